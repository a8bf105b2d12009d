use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::transport::{EngineTransport, Reply, Request};

/// Privilege level of a credential pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Long-lived super credentials from configuration.
    Root,
    /// Tenant principal created by root.
    Principal,
    /// Narrower-scope child created by a principal.
    Child,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Root => f.write_str("root"),
            Role::Principal => f.write_str("principal"),
            Role::Child => f.write_str("child"),
        }
    }
}

/// Key + secret identifying a caller. Debug output never shows the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub role: Role,
    pub key: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(role: Role, key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            role,
            key: key.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("role", &self.role)
            .field("key", &self.key)
            .field("secret", &"***")
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Session
// ═══════════════════════════════════════════════════════════════

/// Credentials bound to a transport. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn EngineTransport>,
    credentials: Credentials,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("credentials", &self.credentials).finish()
    }
}

impl Session {
    pub fn new(transport: Arc<dyn EngineTransport>, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn key(&self) -> &str {
        &self.credentials.key
    }

    pub fn role(&self) -> Role {
        self.credentials.role
    }

    /// Raw call; the reply status is not inspected.
    pub async fn call(&self, request: Request) -> Result<Reply, EngineError> {
        self.transport.call(&self.credentials, request).await
    }

    /// Submit query text, fail on any non-`ok` status.
    pub async fn query(&self, text: &str) -> Result<Value, EngineError> {
        tracing::debug!(role = %self.role(), key = %self.key(), query = %text, "engine query");
        self.call(Request::Query(text.to_string())).await?.into_ok()
    }

    /// Submit one atomic write of flat records.
    pub async fn insert(&self, records: Value) -> Result<Value, EngineError> {
        self.call(Request::Insert(records)).await?.into_ok()
    }
}
