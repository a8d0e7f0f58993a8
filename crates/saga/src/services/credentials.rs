//! Credentials store and the user-creation steps it serves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::EntityId;
use domain::User;
use messaging::SharedChannel;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::message::SagaSubjects;
use crate::participant::{Participant, StepHandler};
use crate::user_creation::{CreateUserCommand, CreateUserSaga};

/// Queue group of the credentials service.
pub const CREDENTIALS_SERVICE: &str = "credentials-service";

/// Login data owned by the credentials service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: EntityId,
    pub username: String,
    pub email: String,
    pub password: String,
}

impl From<&User> for Credentials {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            password: user.password.clone(),
        }
    }
}

/// Trait for credentials storage.
#[async_trait]
pub trait CredentialsStore: Send + Sync {
    /// Inserts or replaces the credentials of a user.
    ///
    /// Fails if the username belongs to a different user.
    async fn upsert(&self, credentials: Credentials) -> Result<()>;

    /// Removes the credentials of a user. Removing twice is not an error.
    async fn remove(&self, user_id: EntityId) -> Result<()>;

    async fn get(&self, user_id: EntityId) -> Result<Option<Credentials>>;
}

#[derive(Debug, Default)]
struct InMemoryCredentialsState {
    by_id: HashMap<EntityId, Credentials>,
    fail_on_upsert: bool,
    fail_on_remove: bool,
}

/// In-memory credentials store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialsStore {
    state: Arc<RwLock<InMemoryCredentialsState>>,
}

impl InMemoryCredentialsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to reject upserts.
    pub async fn set_fail_on_upsert(&self, fail: bool) {
        self.state.write().await.fail_on_upsert = fail;
    }

    /// Configures the store to reject removals.
    pub async fn set_fail_on_remove(&self, fail: bool) {
        self.state.write().await.fail_on_remove = fail;
    }

    /// Returns the number of stored users.
    pub async fn count(&self) -> usize {
        self.state.read().await.by_id.len()
    }

    pub async fn contains(&self, user_id: EntityId) -> bool {
        self.state.read().await.by_id.contains_key(&user_id)
    }
}

#[async_trait]
impl CredentialsStore for InMemoryCredentialsStore {
    async fn upsert(&self, credentials: Credentials) -> Result<()> {
        let mut state = self.state.write().await;

        if state.fail_on_upsert {
            return Err(SagaError::CredentialsStore(
                "credentials store unavailable".to_string(),
            ));
        }

        let taken = state
            .by_id
            .values()
            .any(|c| c.username == credentials.username && c.user_id != credentials.user_id);
        if taken {
            return Err(SagaError::CredentialsStore(format!(
                "username '{}' is already taken",
                credentials.username
            )));
        }

        state.by_id.insert(credentials.user_id, credentials);
        Ok(())
    }

    async fn remove(&self, user_id: EntityId) -> Result<()> {
        let mut state = self.state.write().await;

        if state.fail_on_remove {
            return Err(SagaError::CredentialsStore(
                "credentials store unavailable".to_string(),
            ));
        }

        state.by_id.remove(&user_id);
        Ok(())
    }

    async fn get(&self, user_id: EntityId) -> Result<Option<Credentials>> {
        Ok(self.state.read().await.by_id.get(&user_id).cloned())
    }
}

/// Handles `UpdateCredentials`.
pub struct UpsertCredentials {
    store: Arc<dyn CredentialsStore>,
}

impl UpsertCredentials {
    pub fn new(store: Arc<dyn CredentialsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepHandler<User> for UpsertCredentials {
    async fn apply(&self, user: User) -> Result<User> {
        self.store.upsert(Credentials::from(&user)).await?;
        Ok(user)
    }
}

/// Handles `RollbackCredentials`.
pub struct RemoveCredentials {
    store: Arc<dyn CredentialsStore>,
}

impl RemoveCredentials {
    pub fn new(store: Arc<dyn CredentialsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepHandler<User> for RemoveCredentials {
    async fn apply(&self, user: User) -> Result<User> {
        self.store.remove(user.id).await?;
        Ok(user)
    }
}

/// Subscribes the credentials service to its user-creation steps.
pub async fn credentials_participant(
    channel: SharedChannel,
    subjects: SagaSubjects,
    store: Arc<dyn CredentialsStore>,
) -> Result<Participant<CreateUserSaga>> {
    Participant::builder(CREDENTIALS_SERVICE, channel, subjects)
        .bind(
            CreateUserCommand::UpdateCredentials,
            UpsertCredentials::new(store.clone()),
        )
        .bind(
            CreateUserCommand::RollbackCredentials,
            RemoveCredentials::new(store),
        )
        .subscribe()
        .await
}
