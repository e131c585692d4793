//! Request principals.
//!
//! Authentication itself happens upstream; this module only turns request
//! credentials into a [`Principal`] the controller can authorize.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Capability a function principal needs to read headless logs.
pub const HEADLESS_LOGS_SCOPE: &str = "headless-logs";

/// An end user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Blocked users may not read anything.
    #[serde(default)]
    pub blocked: bool,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// A signed-in user; subject to resource guards.
    User(User),
    /// A scoped service token; authorized by its scopes alone.
    Function {
        /// Granted capability scopes.
        scopes: Vec<String>,
    },
}

impl Principal {
    /// Whether a function principal carries `scope`.
    pub fn has_scope(&self, scope: &str) -> bool {
        match self {
            Principal::Function { scopes } => scopes.iter().any(|s| s == scope),
            Principal::User(_) => false,
        }
    }

    /// Id used in log context.
    pub fn log_id(&self) -> &str {
        match self {
            Principal::User(user) => &user.id,
            Principal::Function { .. } => "function",
        }
    }
}

/// Resolves request credentials to a principal.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `None` means the request is unauthenticated.
    async fn authenticate(&self, headers: &HeaderMap) -> Option<Principal>;
}

/// Maps `Authorization: Bearer <token>` to configured principals.
#[derive(Debug, Clone, Default)]
pub struct BearerTokenAuthenticator {
    tokens: HashMap<String, Principal>,
}

impl BearerTokenAuthenticator {
    /// Create an authenticator with no known tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token.
    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl Authenticator for BearerTokenAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Option<Principal> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))?
            .trim();
        self.tokens.get(token).cloned()
    }
}
