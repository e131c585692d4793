//! Workspace entity store contract.
//!
//! Lookups are read-only and safe to run concurrently across sessions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What kind of workspace produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceKind {
    #[default]
    Regular,
    Prebuild,
}

/// A workspace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace id.
    pub id: String,
    /// Id of the owning user.
    pub owner_id: String,
    /// Workspace kind.
    #[serde(default)]
    pub kind: WorkspaceKind,
    /// Repository the workspace was created from.
    #[serde(default)]
    pub context_url: String,
}

/// Lifecycle phase of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstancePhase {
    Preparing,
    Pending,
    #[default]
    Running,
    Stopping,
    Stopped,
}

impl InstancePhase {
    /// Whether the instance has stopped producing output.
    pub fn is_stopped(&self) -> bool {
        matches!(self, InstancePhase::Stopped)
    }
}

/// One execution of a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInstance {
    /// Instance id.
    pub id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Current phase.
    #[serde(default)]
    pub phase: InstancePhase,
}

/// Entity store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to workspaces and their instances.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// The workspace that owns an instance.
    async fn find_by_instance_id(&self, instance_id: &str) -> Result<Option<Workspace>, StoreError>;

    /// An instance by id.
    async fn find_instance_by_id(&self, instance_id: &str) -> Result<Option<WorkspaceInstance>, StoreError>;

    /// A workspace by id.
    async fn find_by_id(&self, workspace_id: &str) -> Result<Option<Workspace>, StoreError>;

    /// The most recent instance of a workspace.
    async fn find_current_instance(&self, workspace_id: &str) -> Result<Option<WorkspaceInstance>, StoreError>;
}
