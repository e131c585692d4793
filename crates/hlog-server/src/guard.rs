//! Resource access guards.
//!
//! A guard answers one question: may this caller perform `op` on the
//! described resource. Guards compose by logical OR.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::User;
use crate::store::{Workspace, WorkspaceKind};

/// Operation requested on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAccessOp {
    Get,
}

/// Descriptor of the resource being accessed.
#[derive(Debug, Clone, Copy)]
pub enum GuardedResource<'a> {
    /// Console output of a workspace.
    WorkspaceLog { subject: &'a Workspace },
}

impl GuardedResource<'_> {
    /// The workspace the resource belongs to.
    pub fn workspace(&self) -> &Workspace {
        match self {
            GuardedResource::WorkspaceLog { subject } => subject,
        }
    }
}

/// One access decision strategy.
#[async_trait]
pub trait ResourceAccessGuard: Send + Sync {
    /// Whether access is granted.
    async fn can_access(&self, resource: &GuardedResource<'_>, op: ResourceAccessOp) -> bool;
}

/// Grants access to the workspace owner.
#[derive(Debug, Clone)]
pub struct OwnerResourceGuard {
    user_id: String,
}

impl OwnerResourceGuard {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl ResourceAccessGuard for OwnerResourceGuard {
    async fn can_access(&self, resource: &GuardedResource<'_>, _op: ResourceAccessOp) -> bool {
        resource.workspace().owner_id == self.user_id
    }
}

/// Repository read permissions, answered by the hosting provider.
#[async_trait]
pub trait RepositoryAccess: Send + Sync {
    /// Whether `user` can read the repository at `context_url`.
    async fn can_read(&self, user: &User, context_url: &str) -> bool;
}

/// Grants log access on prebuild workspaces to anyone who can read the
/// repository the prebuild was made from.
pub struct WorkspaceLogAccessGuard {
    user: User,
    repositories: Arc<dyn RepositoryAccess>,
}

impl WorkspaceLogAccessGuard {
    pub fn new(user: User, repositories: Arc<dyn RepositoryAccess>) -> Self {
        Self { user, repositories }
    }
}

#[async_trait]
impl ResourceAccessGuard for WorkspaceLogAccessGuard {
    async fn can_access(&self, resource: &GuardedResource<'_>, op: ResourceAccessOp) -> bool {
        let GuardedResource::WorkspaceLog { subject } = resource;
        if op != ResourceAccessOp::Get || subject.kind != WorkspaceKind::Prebuild {
            return false;
        }
        if subject.context_url.is_empty() {
            return false;
        }
        self.repositories.can_read(&self.user, &subject.context_url).await
    }
}

/// Short-circuit OR over a fixed list of guards.
pub struct CompositeResourceAccessGuard {
    guards: Vec<Box<dyn ResourceAccessGuard>>,
}

impl CompositeResourceAccessGuard {
    pub fn new(guards: Vec<Box<dyn ResourceAccessGuard>>) -> Self {
        Self { guards }
    }
}

#[async_trait]
impl ResourceAccessGuard for CompositeResourceAccessGuard {
    async fn can_access(&self, resource: &GuardedResource<'_>, op: ResourceAccessOp) -> bool {
        for guard in &self.guards {
            if guard.can_access(resource, op).await {
                return true;
            }
        }
        false
    }
}

/// Builds the guard applied to a user's request.
pub trait GuardFactory: Send + Sync {
    fn for_user(&self, user: &User) -> Box<dyn ResourceAccessGuard>;
}

/// Owner guard OR workspace log guard.
pub struct DefaultGuardFactory {
    repositories: Arc<dyn RepositoryAccess>,
}

impl DefaultGuardFactory {
    pub fn new(repositories: Arc<dyn RepositoryAccess>) -> Self {
        Self { repositories }
    }
}

impl GuardFactory for DefaultGuardFactory {
    fn for_user(&self, user: &User) -> Box<dyn ResourceAccessGuard> {
        Box::new(CompositeResourceAccessGuard::new(vec![
            Box::new(OwnerResourceGuard::new(user.id.clone())),
            Box::new(WorkspaceLogAccessGuard::new(
                user.clone(),
                Arc::clone(&self.repositories),
            )),
        ]))
    }
}

/// Fixed repository reader lists keyed by repository URL.
#[derive(Debug, Clone, Default)]
pub struct StaticRepositoryAccess {
    readers: HashMap<String, HashSet<String>>,
}

impl StaticRepositoryAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `user_id` to read `url`.
    pub fn grant(mut self, url: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.readers
            .entry(url.into())
            .or_default()
            .insert(user_id.into());
        self
    }
}

#[async_trait]
impl RepositoryAccess for StaticRepositoryAccess {
    async fn can_read(&self, user: &User, context_url: &str) -> bool {
        self.readers
            .get(context_url)
            .map(|readers| readers.contains(&user.id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            name: id.to_string(),
            blocked: false,
        }
    }

    fn workspace(owner: &str, kind: WorkspaceKind) -> Workspace {
        Workspace {
            id: "ws-1".to_string(),
            owner_id: owner.to_string(),
            kind,
            context_url: "https://git.example.com/org/repo".to_string(),
        }
    }

    struct Counting {
        grant: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ResourceAccessGuard for Counting {
        async fn can_access(&self, _: &GuardedResource<'_>, _: ResourceAccessOp) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.grant
        }
    }

    #[tokio::test]
    async fn test_owner_guard() {
        let ws = workspace("u-1", WorkspaceKind::Regular);
        let resource = GuardedResource::WorkspaceLog { subject: &ws };

        assert!(OwnerResourceGuard::new("u-1").can_access(&resource, ResourceAccessOp::Get).await);
        assert!(!OwnerResourceGuard::new("u-2").can_access(&resource, ResourceAccessOp::Get).await);
    }

    #[tokio::test]
    async fn test_log_guard_requires_prebuild_and_repo_access() {
        let repos: Arc<dyn RepositoryAccess> = Arc::new(
            StaticRepositoryAccess::new().grant("https://git.example.com/org/repo", "reader"),
        );
        let guard = WorkspaceLogAccessGuard::new(user("reader"), Arc::clone(&repos));

        let prebuild = workspace("owner", WorkspaceKind::Prebuild);
        let regular = workspace("owner", WorkspaceKind::Regular);

        assert!(
            guard
                .can_access(&GuardedResource::WorkspaceLog { subject: &prebuild }, ResourceAccessOp::Get)
                .await
        );
        assert!(
            !guard
                .can_access(&GuardedResource::WorkspaceLog { subject: &regular }, ResourceAccessOp::Get)
                .await
        );

        let stranger = WorkspaceLogAccessGuard::new(user("stranger"), repos);
        assert!(
            !stranger
                .can_access(&GuardedResource::WorkspaceLog { subject: &prebuild }, ResourceAccessOp::Get)
                .await
        );
    }

    #[tokio::test]
    async fn test_composite_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let composite = CompositeResourceAccessGuard::new(vec![
            Box::new(Counting {
                grant: true,
                calls: Arc::clone(&calls),
            }),
            Box::new(Counting {
                grant: false,
                calls: Arc::clone(&calls),
            }),
        ]);
        let ws = workspace("u-1", WorkspaceKind::Regular);

        assert!(
            composite
                .can_access(&GuardedResource::WorkspaceLog { subject: &ws }, ResourceAccessOp::Get)
                .await
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_composite_denies_when_all_deny() {
        let composite = CompositeResourceAccessGuard::new(vec![
            Box::new(OwnerResourceGuard::new("other")),
            Box::new(OwnerResourceGuard::new("another")),
        ]);
        let ws = workspace("u-1", WorkspaceKind::Regular);

        assert!(
            !composite
                .can_access(&GuardedResource::WorkspaceLog { subject: &ws }, ResourceAccessOp::Get)
                .await
        );
        assert!(
            !CompositeResourceAccessGuard::new(Vec::new())
                .can_access(&GuardedResource::WorkspaceLog { subject: &ws }, ResourceAccessOp::Get)
                .await
        );
    }

    #[tokio::test]
    async fn test_default_factory_grants_owner_or_reader() {
        let factory = DefaultGuardFactory::new(Arc::new(
            StaticRepositoryAccess::new().grant("https://git.example.com/org/repo", "reader"),
        ));
        let ws = workspace("owner", WorkspaceKind::Prebuild);
        let resource = GuardedResource::WorkspaceLog { subject: &ws };

        for (id, expected) in [("owner", true), ("reader", true), ("stranger", false)] {
            let guard = factory.for_user(&user(id));
            assert_eq!(guard.can_access(&resource, ResourceAccessOp::Get).await, expected, "{}", id);
        }
    }
}
