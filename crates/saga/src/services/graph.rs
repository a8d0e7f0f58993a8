//! Social graph store and the user-creation steps it serves.

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

/// Queue group of the social graph service.
pub const GRAPH_SERVICE: &str = "graph-service";

/// A user node in the social graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNode {
    pub user_id: EntityId,
    pub username: String,
    /// Private users must approve followers.
    pub private: bool,
}

impl From<&User> for UserNode {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            private: user.is_private(),
        }
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Creates or updates the node of a user.
    async fn upsert_node(&self, node: UserNode) -> Result<()>;

    /// Deletes the node of a user. Deleting twice is not an error.
    async fn remove_node(&self, user_id: EntityId) -> Result<()>;

    async fn get_node(&self, user_id: EntityId) -> Result<Option<UserNode>>;
}

#[derive(Debug, Default)]
struct InMemoryGraphState {
    nodes: HashMap<EntityId, UserNode>,
    fail_on_upsert: bool,
}

/// In-memory graph store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    state: Arc<RwLock<InMemoryGraphState>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_upsert(&self, fail: bool) {
        self.state.write().await.fail_on_upsert = fail;
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn contains(&self, user_id: EntityId) -> bool {
        self.state.read().await.nodes.contains_key(&user_id)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(&self, node: UserNode) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_upsert {
            return Err(SagaError::GraphStore("graph store unavailable".to_string()));
        }
        state.nodes.insert(node.user_id, node);
        Ok(())
    }

    async fn remove_node(&self, user_id: EntityId) -> Result<()> {
        self.state.write().await.nodes.remove(&user_id);
        Ok(())
    }

    async fn get_node(&self, user_id: EntityId) -> Result<Option<UserNode>> {
        Ok(self.state.read().await.nodes.get(&user_id).cloned())
    }
}

/// Handles `UpdateGraph`.
pub struct UpsertUserNode {
    store: Arc<dyn GraphStore>,
}

impl UpsertUserNode {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepHandler<User> for UpsertUserNode {
    async fn apply(&self, user: User) -> Result<User> {
        self.store.upsert_node(UserNode::from(&user)).await?;
        Ok(user)
    }
}

/// Subscribes the graph service to its user-creation step.
///
/// The graph write is the last step, so there is no rollback to bind.
pub async fn graph_participant(
    channel: SharedChannel,
    subjects: SagaSubjects,
    store: Arc<dyn GraphStore>,
) -> Result<Participant<CreateUserSaga>> {
    Participant::builder(GRAPH_SERVICE, channel, subjects)
        .bind(CreateUserCommand::UpdateGraph, UpsertUserNode::new(store))
        .subscribe()
        .await
}
