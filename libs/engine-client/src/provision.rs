use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::query;
use crate::session::{Credentials, Role, Session};
use crate::transport::{EngineTransport, Reply, Request};

/// Options for a new scoped child.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildOptions {
    pub details: String,
    pub options: Map<String, Value>,
}

impl ChildOptions {
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
            options: Map::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.options.insert(name.to_string(), value.into());
        self
    }

    /// Child settings used by the stream-detection scenario:
    /// no autoclean, no backend persistence, serialized writes.
    pub fn detection() -> Self {
        Self::new("Swimlane details")
            .with("autoclean_off", true)
            .with("backend", false)
            .with("concurrent_write", false)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Provisioner
// ═══════════════════════════════════════════════════════════════

/// Creates and tears down remote principals and their scoped children.
///
/// Every call is a single round trip; nothing is retried and nothing is
/// rolled back when a later step fails.
pub struct Provisioner {
    transport: Arc<dyn EngineTransport>,
    root: Credentials,
}

impl Provisioner {
    pub fn new(transport: Arc<dyn EngineTransport>, root: Credentials) -> Self {
        Self { transport, root }
    }

    /// Session with the configured root credentials. No remote call.
    pub fn bootstrap_root(&self) -> Session {
        Session::new(self.transport.clone(), self.root.clone())
    }

    /// Session for credentials loaded from elsewhere (e.g. the store).
    pub fn session(&self, credentials: Credentials) -> Session {
        Session::new(self.transport.clone(), credentials)
    }

    pub async fn create_principal(&self, root: &Session, label: &str) -> Result<Credentials, EngineError> {
        let payload = root
            .call(Request::CreatePrincipal {
                details: label.to_string(),
            })
            .await?
            .into_ok()?;
        let creds = issued_credentials(Role::Principal, payload)?;
        tracing::info!(principal = %creds.key, "created principal");
        Ok(creds)
    }

    pub async fn create_scoped_child(
        &self,
        principal: &Session,
        opts: &ChildOptions,
    ) -> Result<Credentials, EngineError> {
        let payload = principal
            .call(Request::CreateChild {
                details: opts.details.clone(),
                options: Value::Object(opts.options.clone()),
            })
            .await?
            .into_ok()?;
        let creds = issued_credentials(Role::Child, payload)?;
        tracing::info!(principal = %principal.key(), child = %creds.key, "created scoped child");
        Ok(creds)
    }

    pub async fn delete_principal(&self, root: &Session, key: &str) -> Result<(), EngineError> {
        let reply = root
            .call(Request::DeletePrincipal { key: key.to_string() })
            .await?;
        expect_deleted(reply)?;
        tracing::info!(principal = %key, "deleted principal");
        Ok(())
    }

    pub async fn delete_scoped_child(&self, principal: &Session, key: &str) -> Result<(), EngineError> {
        let reply = principal
            .call(Request::DeleteChild { key: key.to_string() })
            .await?;
        expect_deleted(reply)?;
        tracing::info!(principal = %principal.key(), child = %key, "deleted scoped child");
        Ok(())
    }

    /// Keys of all children owned by `principal`.
    pub async fn list_scoped_children(&self, principal: &Session) -> Result<Vec<String>, EngineError> {
        let payload = principal.query(query::LIST_CHILDREN).await?;
        match payload {
            Value::Array(items) => Ok(items.iter().filter_map(scalar_string).collect()),
            other => Err(EngineError::remote("ok", other)),
        }
    }
}

/// Extract `{key, secret_key}` from a creation payload.
fn issued_credentials(role: Role, payload: Value) -> Result<Credentials, EngineError> {
    let key = payload.get("key").and_then(scalar_string);
    let secret = payload.get("secret_key").and_then(scalar_string);
    match (key, secret) {
        (Some(key), Some(secret)) => Ok(Credentials::new(role, key, secret)),
        _ => Err(EngineError::remote("ok", payload)),
    }
}

/// Deletion succeeded only if the engine set `status: 1` in the payload.
fn expect_deleted(reply: Reply) -> Result<(), EngineError> {
    let acked = reply.is_ok() && reply.payload.get("status").and_then(Value::as_i64) == Some(1);
    if acked {
        Ok(())
    } else {
        Err(EngineError::remote(reply.status, reply.payload))
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
