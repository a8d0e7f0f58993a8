//! Profile store and the user-creation steps it serves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::EntityId;
use domain::{Gender, User, UserType};
use messaging::SharedChannel;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::message::SagaSubjects;
use crate::participant::{Participant, StepHandler};
use crate::user_creation::{CreateUserCommand, CreateUserSaga};

/// Queue group of the profile service.
pub const PROFILE_SERVICE: &str = "profile-service";

/// Personal or business data owned by the profile service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: EntityId,
    pub user_type: UserType,
    pub first_name: String,
    pub last_name: String,
    pub gender: Option<Gender>,
    pub age: u32,
    pub residence: String,
    pub email: String,
    pub visibility: bool,
    pub company_name: Option<String>,
    pub website: Option<String>,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            user_type: user.user_type,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            gender: user.gender,
            age: user.age,
            residence: user.residence.clone(),
            email: user.email.clone(),
            visibility: user.visibility,
            company_name: user.company_name.clone(),
            website: user.website.clone(),
        }
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Inserts or replaces the profile of a user.
    async fn upsert(&self, profile: Profile) -> Result<()>;

    /// Removes the profile of a user. Removing twice is not an error.
    async fn remove(&self, user_id: EntityId) -> Result<()>;

    async fn get(&self, user_id: EntityId) -> Result<Option<Profile>>;
}

#[derive(Debug, Default)]
struct InMemoryProfileState {
    profiles: HashMap<EntityId, Profile>,
    fail_on_upsert: bool,
    fail_on_remove: bool,
}

/// In-memory profile store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProfileStore {
    state: Arc<RwLock<InMemoryProfileState>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_upsert(&self, fail: bool) {
        self.state.write().await.fail_on_upsert = fail;
    }

    pub async fn set_fail_on_remove(&self, fail: bool) {
        self.state.write().await.fail_on_remove = fail;
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.profiles.len()
    }

    pub async fn contains(&self, user_id: EntityId) -> bool {
        self.state.read().await.profiles.contains_key(&user_id)
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn upsert(&self, profile: Profile) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_upsert {
            return Err(SagaError::ProfileStore(
                "profile store unavailable".to_string(),
            ));
        }
        state.profiles.insert(profile.user_id, profile);
        Ok(())
    }

    async fn remove(&self, user_id: EntityId) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_remove {
            return Err(SagaError::ProfileStore(
                "profile store unavailable".to_string(),
            ));
        }
        state.profiles.remove(&user_id);
        Ok(())
    }

    async fn get(&self, user_id: EntityId) -> Result<Option<Profile>> {
        Ok(self.state.read().await.profiles.get(&user_id).cloned())
    }
}

/// Handles `UpdateProfile`.
pub struct UpsertProfile {
    store: Arc<dyn ProfileStore>,
}

impl UpsertProfile {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepHandler<User> for UpsertProfile {
    async fn apply(&self, user: User) -> Result<User> {
        self.store.upsert(Profile::from(&user)).await?;
        Ok(user)
    }
}

/// Handles `RollbackProfile`.
pub struct RemoveProfile {
    store: Arc<dyn ProfileStore>,
}

impl RemoveProfile {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepHandler<User> for RemoveProfile {
    async fn apply(&self, user: User) -> Result<User> {
        self.store.remove(user.id).await?;
        Ok(user)
    }
}

/// Subscribes the profile service to its user-creation steps.
pub async fn profile_participant(
    channel: SharedChannel,
    subjects: SagaSubjects,
    store: Arc<dyn ProfileStore>,
) -> Result<Participant<CreateUserSaga>> {
    Participant::builder(PROFILE_SERVICE, channel, subjects)
        .bind(
            CreateUserCommand::UpdateProfile,
            UpsertProfile::new(store.clone()),
        )
        .bind(CreateUserCommand::RollbackProfile, RemoveProfile::new(store))
        .subscribe()
        .await
}
