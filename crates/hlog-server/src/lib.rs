//! Headless Log Stream Server
//!
//! Streams the console output of headless workspace instances to remote
//! watchers over chunked HTTP. Each request is authorized, resolved against
//! the entity store and access-checked, then served by a session that pulls
//! chunks from a log source through a backpressure queue into the response.
//!
//! This crate can be used in two modes:
//! - **Standalone binary**: `hlog-server` over an inventory file and a log
//!   directory
//! - **In-process library**: embedded with custom collaborators, or in
//!   tests with the in-memory ones from [`memory`]

pub mod auth;
pub mod body;
pub mod config;
pub mod controller;
pub mod guard;
pub mod inventory;
pub mod memory;
pub mod queue;
pub mod router;
pub mod session;
pub mod source;
pub mod store;
pub mod telemetry;

pub use auth::{Authenticator, BearerTokenAuthenticator, Principal, User, HEADLESS_LOGS_SCOPE};
pub use body::{BodySink, ResponseSink, SinkError};
pub use config::{ServerConfig, ServerConfigError};
pub use controller::{ControllerError, PreparedStream, StreamController, StreamTarget};
pub use guard::{
    CompositeResourceAccessGuard, DefaultGuardFactory, GuardFactory, GuardedResource,
    OwnerResourceGuard, RepositoryAccess, ResourceAccessGuard, ResourceAccessOp,
    StaticRepositoryAccess, WorkspaceLogAccessGuard,
};
pub use inventory::{Inventory, InventoryError, InventoryStore};
pub use memory::{MemoryWorkspaceStore, RecordingSink, ScriptStep, ScriptedLogSource, SinkEvent};
pub use queue::{QueueError, WriteQueue};
pub use router::{router, AppState};
pub use session::{abort_pair, AbortHandle, AbortSignal, SessionOutcome, StreamSession};
pub use source::{ChunkHandler, DeliveryError, DirectoryLogSource, LogSource, LogSourceError};
pub use store::{
    InstancePhase, StoreError, Workspace, WorkspaceInstance, WorkspaceKind, WorkspaceStore,
};
