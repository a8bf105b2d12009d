use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::session::{Credentials, Role};

/// Status tag of a successful reply.
pub const STATUS_OK: &str = "ok";

// ═══════════════════════════════════════════════════════════════
//  Request / Reply
// ═══════════════════════════════════════════════════════════════

/// One request/response call against the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Opaque query text, executed by the engine.
    Query(String),
    /// JSON array of flat records (`{"ns": tick, "0": v0, ...}`).
    Insert(Value),
    CreatePrincipal { details: String },
    DeletePrincipal { key: String },
    CreateChild { details: String, options: Value },
    DeleteChild { key: String },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Query(_) => "query",
            Request::Insert(_) => "insert",
            Request::CreatePrincipal { .. } => "create_principal",
            Request::DeletePrincipal { .. } => "delete_principal",
            Request::CreateChild { .. } => "create_child",
            Request::DeleteChild { .. } => "delete_child",
        }
    }
}

/// Tagged result `{status, payload}` returned for every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: String,
    #[serde(default)]
    pub payload: Value,
}

impl Reply {
    pub fn ok(payload: Value) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            payload,
        }
    }

    pub fn error(payload: Value) -> Self {
        Self {
            status: "error".to_string(),
            payload,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Payload of an `ok` reply; anything else becomes `RemoteProtocol`.
    pub fn into_ok(self) -> Result<Value, EngineError> {
        if self.is_ok() {
            Ok(self.payload)
        } else {
            Err(EngineError::remote(self.status, self.payload))
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Transport trait
// ═══════════════════════════════════════════════════════════════

/// Request/response channel to the engine.
///
/// Transport errors (connect, timeout) surface as `EngineError::Connection`.
/// A reply with a non-`ok` status is still `Ok(Reply)`; callers decide.
pub trait EngineTransport: Send + Sync {
    fn call<'a>(
        &'a self,
        credentials: &'a Credentials,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, EngineError>> + Send + 'a>>;
}

// ═══════════════════════════════════════════════════════════════
//  HTTP transport
// ═══════════════════════════════════════════════════════════════

/// Where the engine lives and how long a single call may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

/// `EngineTransport` over HTTP(S).
///
/// Root and principal sessions authenticate with `x-admin-key`,
/// child sessions with `x-app-key`; both send `x-secret-key`.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, EngineError> {
        let scheme = if endpoint.tls { "https" } else { "http" };
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(endpoint.accept_invalid_certs)
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{scheme}://{}:{}", endpoint.host, endpoint.port),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base_url)
    }

    async fn exec(&self, credentials: &Credentials, request: Request) -> Result<Reply, EngineError> {
        let name = request.name();
        let builder = match request {
            Request::Query(text) => self
                .http
                .post(self.url("query"))
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(text),
            Request::Insert(records) => self.http.post(self.url("insert")).json(&records),
            Request::CreatePrincipal { details } => self
                .http
                .post(self.url("principals"))
                .json(&serde_json::json!({ "details": details })),
            Request::DeletePrincipal { key } => {
                self.http.delete(self.url(&format!("principals/{key}")))
            }
            Request::CreateChild { details, options } => self
                .http
                .post(self.url("children"))
                .json(&serde_json::json!({ "details": details, "options": options })),
            Request::DeleteChild { key } => self.http.delete(self.url(&format!("children/{key}"))),
        };

        let key_header = match credentials.role {
            Role::Child => "x-app-key",
            Role::Root | Role::Principal => "x-admin-key",
        };

        let resp = builder
            .header(key_header, &credentials.key)
            .header("x-secret-key", &credentials.secret)
            .send()
            .await
            .map_err(|e| EngineError::Connection(format!("{name} request: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| EngineError::Connection(format!("{name} read: {e}")))?;

        match serde_json::from_str::<Reply>(&body) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::debug!(call = name, http_status = %status, error = %e, "unparseable engine reply");
                Err(EngineError::remote(status.as_str(), Value::String(body)))
            }
        }
    }
}

impl EngineTransport for HttpTransport {
    fn call<'a>(
        &'a self,
        credentials: &'a Credentials,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, EngineError>> + Send + 'a>> {
        Box::pin(self.exec(credentials, request))
    }
}
