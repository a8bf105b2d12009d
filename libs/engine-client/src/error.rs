use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine answered, but not with `ok`.
    #[error("remote returned '{status}': {payload}")]
    RemoteProtocol { status: String, payload: Value },

    #[error("connection: {0}")]
    Connection(String),

    #[error("config: {0}")]
    Config(String),

    #[error("encode {context}: {detail}")]
    Encode { context: &'static str, detail: String },
}

impl EngineError {
    pub fn remote(status: impl Into<String>, payload: Value) -> Self {
        EngineError::RemoteProtocol {
            status: status.into(),
            payload,
        }
    }

    /// Status and payload of a rejected call, if this is one.
    pub fn remote_parts(&self) -> Option<(&str, &Value)> {
        match self {
            EngineError::RemoteProtocol { status, payload } => Some((status, payload)),
            _ => None,
        }
    }
}
