//! Workspace Inventory
//!
//! Parses and validates the inventory file that backs the entity store on a
//! standalone server. The file declares users (and their bearer tokens),
//! workspaces, instances and repository readers:
//!
//! ```toml
//! [[user]]
//! id = "u-1"
//! token = "secret"
//!
//! [[workspace]]
//! id = "ws-1"
//! owner_id = "u-1"
//!
//! [[instance]]
//! id = "inst-1"
//! workspace_id = "ws-1"
//! phase = "running"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{BearerTokenAuthenticator, Principal, User};
use crate::guard::StaticRepositoryAccess;
use crate::store::{StoreError, Workspace, WorkspaceInstance, WorkspaceStore};

/// Inventory file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    /// Schema version for forward compatibility
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default, rename = "user")]
    pub users: Vec<UserEntry>,

    #[serde(default, rename = "workspace")]
    pub workspaces: Vec<Workspace>,

    /// Instances in creation order; the last one per workspace is current.
    #[serde(default, rename = "instance")]
    pub instances: Vec<WorkspaceInstance>,

    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryEntry>,
}

fn default_schema_version() -> u32 {
    1
}

/// A user or function principal with its bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub blocked: bool,

    /// Bearer token; entries without one cannot authenticate.
    pub token: Option<String>,

    /// When set, the token authenticates a function principal with these
    /// scopes instead of the user.
    pub function_scopes: Option<Vec<String>>,
}

impl UserEntry {
    /// The principal this entry's token resolves to.
    pub fn principal(&self) -> Principal {
        match &self.function_scopes {
            Some(scopes) => Principal::Function {
                scopes: scopes.clone(),
            },
            None => Principal::User(User {
                id: self.id.clone(),
                name: self.name.clone(),
                blocked: self.blocked,
            }),
        }
    }
}

/// Users allowed to read a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub url: String,

    #[serde(default)]
    pub readers: Vec<String>,
}

/// Errors that can occur when loading or validating the inventory
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Failed to read inventory file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Inventory file not found: {0}")]
    NotFound(PathBuf),

    #[error("Duplicate {kind} id: '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Duplicate token for user '{0}'")]
    DuplicateToken(String),

    #[error("{kind} entry: missing required field '{field}'")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("Instance '{instance_id}' references unknown workspace '{workspace_id}'")]
    UnknownWorkspace {
        instance_id: String,
        workspace_id: String,
    },
}

impl Inventory {
    /// Load the inventory from a specific path
    pub fn load(path: &Path) -> Result<Self, InventoryError> {
        if !path.exists() {
            return Err(InventoryError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse the inventory from a TOML string
    pub fn parse(content: &str) -> Result<Self, InventoryError> {
        let inventory: Inventory = toml::from_str(content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    fn validate(&self) -> Result<(), InventoryError> {
        check_ids("user", self.users.iter().map(|u| u.id.as_str()))?;
        check_ids("workspace", self.workspaces.iter().map(|w| w.id.as_str()))?;
        check_ids("instance", self.instances.iter().map(|i| i.id.as_str()))?;

        let mut tokens = HashSet::new();
        for user in &self.users {
            if let Some(token) = &user.token {
                if !tokens.insert(token.as_str()) {
                    return Err(InventoryError::DuplicateToken(user.id.clone()));
                }
            }
        }

        for workspace in &self.workspaces {
            if workspace.owner_id.is_empty() {
                return Err(InventoryError::MissingField {
                    kind: "workspace",
                    field: "owner_id",
                });
            }
        }

        for instance in &self.instances {
            if self.workspace(&instance.workspace_id).is_none() {
                return Err(InventoryError::UnknownWorkspace {
                    instance_id: instance.id.clone(),
                    workspace_id: instance.workspace_id.clone(),
                });
            }
        }

        for repository in &self.repositories {
            if repository.url.is_empty() {
                return Err(InventoryError::MissingField {
                    kind: "repository",
                    field: "url",
                });
            }
        }

        Ok(())
    }

    /// A workspace by id.
    pub fn workspace(&self, id: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.id == id)
    }

    /// An instance by id.
    pub fn instance(&self, id: &str) -> Option<&WorkspaceInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// The most recently declared instance of a workspace.
    pub fn current_instance(&self, workspace_id: &str) -> Option<&WorkspaceInstance> {
        self.instances
            .iter()
            .rev()
            .find(|i| i.workspace_id == workspace_id)
    }

    /// Authenticator over every entry that has a token.
    pub fn authenticator(&self) -> BearerTokenAuthenticator {
        self.users
            .iter()
            .filter_map(|user| user.token.as_ref().map(|token| (token, user.principal())))
            .fold(BearerTokenAuthenticator::new(), |auth, (token, principal)| {
                auth.with_token(token.clone(), principal)
            })
    }

    /// Repository reader lists.
    pub fn repository_access(&self) -> StaticRepositoryAccess {
        self.repositories
            .iter()
            .flat_map(|repo| repo.readers.iter().map(move |reader| (&repo.url, reader)))
            .fold(StaticRepositoryAccess::new(), |access, (url, reader)| {
                access.grant(url.clone(), reader.clone())
            })
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            schema_version: 1,
            users: Vec::new(),
            workspaces: Vec::new(),
            instances: Vec::new(),
            repositories: Vec::new(),
        }
    }
}

fn check_ids<'a>(kind: &'static str, ids: impl Iterator<Item = &'a str>) -> Result<(), InventoryError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(InventoryError::MissingField { kind, field: "id" });
        }
        if !seen.insert(id) {
            return Err(InventoryError::DuplicateId {
                kind,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

/// Entity store backed by an inventory file.
///
/// The file is re-read on every lookup, so phase changes written by the
/// process supervisor are observed by running streams.
#[derive(Debug, Clone)]
pub struct InventoryStore {
    path: PathBuf,
}

impl InventoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn snapshot(&self) -> Result<Inventory, StoreError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| StoreError::Unavailable(format!("{}: {}", self.path.display(), err)))?;
        let inventory = Inventory::parse(&content)
            .map_err(|err| StoreError::Unavailable(format!("{}: {}", self.path.display(), err)))?;
        debug!(path = %self.path.display(), instances = inventory.instances.len(), "reloaded inventory");
        Ok(inventory)
    }
}

#[async_trait]
impl WorkspaceStore for InventoryStore {
    async fn find_by_instance_id(&self, instance_id: &str) -> Result<Option<Workspace>, StoreError> {
        let inventory = self.snapshot().await?;
        Ok(inventory
            .instance(instance_id)
            .and_then(|instance| inventory.workspace(&instance.workspace_id))
            .cloned())
    }

    async fn find_instance_by_id(&self, instance_id: &str) -> Result<Option<WorkspaceInstance>, StoreError> {
        Ok(self.snapshot().await?.instance(instance_id).cloned())
    }

    async fn find_by_id(&self, workspace_id: &str) -> Result<Option<Workspace>, StoreError> {
        Ok(self.snapshot().await?.workspace(workspace_id).cloned())
    }

    async fn find_current_instance(&self, workspace_id: &str) -> Result<Option<WorkspaceInstance>, StoreError> {
        Ok(self.snapshot().await?.current_instance(workspace_id).cloned())
    }
}
