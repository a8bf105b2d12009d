use std::path::PathBuf;

use alert_bus::BusError;
use engine_client::EngineError;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The engine answered with a non-`ok` status.
    #[error("remote returned '{status}': {payload}")]
    RemoteProtocol { status: String, payload: Value },

    #[error("connection: {0}")]
    Connection(String),

    /// Malformed or missing local state, unknown scenario, bad settings.
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("io {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("validation: {0}")]
    Validation(String),

    #[error("interrupted")]
    Interrupted,
}

impl HarnessError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }

    /// Caught at the dispatch boundary: logged, action skipped, exit 0.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HarnessError::Connection(_) | HarnessError::Configuration(_))
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            e if e.is_recoverable() => 0,
            HarnessError::Interrupted => 130,
            _ => 1,
        }
    }
}

impl From<EngineError> for HarnessError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::RemoteProtocol { status, payload } => {
                HarnessError::RemoteProtocol { status, payload }
            }
            EngineError::Connection(msg) => HarnessError::Connection(msg),
            EngineError::Config(msg) => HarnessError::Configuration(msg),
            e @ EngineError::Encode { .. } => HarnessError::Configuration(e.to_string()),
        }
    }
}

impl From<BusError> for HarnessError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::TopicNotFound(_) | BusError::Config(_) => {
                HarnessError::Configuration(e.to_string())
            }
            BusError::Connect { .. } | BusError::Broker(_) | BusError::Closed => {
                HarnessError::Connection(e.to_string())
            }
        }
    }
}
