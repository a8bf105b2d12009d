pub mod config;
pub mod error;
pub mod orchestrator;
pub mod scenario;
pub mod store;

pub use config::{
    parse_topics, BrokerConfig, EngineConfig, HarnessConfig, StoreConfig, StreamConfig,
    DEFAULT_STORE_PATH, DEFAULT_TOPIC,
};
pub use error::HarnessError;
pub use orchestrator::{
    DeleteReport, ReadReport, ScenarioOrchestrator, ValidationReport, WriteOutcome, WriteReport,
};
pub use scenario::{Rng, ScenarioMeta, SpikeGenerator};
pub use store::{CredentialStore, ScenarioRecord};
