use std::path::{Path, PathBuf};
use std::time::Duration;

use alert_bus::{ConsumerSettings, KafkaSettings};
use engine_client::{Credentials, EndpointConfig, Role};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

pub const DEFAULT_TOPIC: &str = "compute_data_stream_test_notifications";
pub const DEFAULT_STORE_PATH: &str = "data/compute_data_stream.json";

// ═══════════════════════════════════════════════════════════════
//  HarnessConfig
// ═══════════════════════════════════════════════════════════════

/// Immutable harness settings. Built once (file < env/CLI) and passed
/// by value into everything that needs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub engine: EngineConfig,
    pub broker: BrokerConfig,
    pub stream: StreamConfig,
    pub store: StoreConfig,
}

impl HarnessConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, HarnessError> {
        toml::from_str(text).map_err(|e| HarnessError::Configuration(format!("bad config: {e}")))
    }

    /// Read a TOML file. A missing file is not an error here; callers
    /// decide whether defaults are acceptable.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let text = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        toml::from_str(&text)
            .map_err(|e| HarnessError::Configuration(format!("bad config {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        let s = &self.stream;
        if s.blocks == 0 || s.points == 0 || s.sensors == 0 {
            return Err(HarnessError::Configuration(
                "blocks, points and sensors must be positive".into(),
            ));
        }
        if s.tick_alignment <= 0 {
            return Err(HarnessError::Configuration("tick alignment must be positive".into()));
        }
        if s.spike_period == 0 || s.window == 0 {
            return Err(HarnessError::Configuration(
                "spike period and window must be positive".into(),
            ));
        }
        if self.broker.topics.is_empty() {
            return Err(HarnessError::Configuration("at least one topic is required".into()));
        }
        Ok(())
    }
}

// ═══ engine ═══

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub accept_invalid_certs: bool,
    pub timeout_secs: u64,
    /// Long-lived root credentials.
    pub root_key: String,
    pub root_secret: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            tls: false,
            accept_invalid_certs: false,
            timeout_secs: 600,
            root_key: "MyUser".into(),
            root_secret: "MySecret".into(),
        }
    }
}

impl EngineConfig {
    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig {
            host: self.host.clone(),
            port: self.port,
            tls: self.tls,
            timeout: Duration::from_secs(self.timeout_secs),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }

    pub fn root_credentials(&self) -> Credentials {
        Credentials::new(Role::Root, &self.root_key, &self.root_secret)
    }
}

// ═══ broker ═══

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topics: Vec<String>,
    /// Quiet-poll budget of the consumer; also the join timeout.
    pub consumer_wait_ms: u64,
    /// Upper bound on waiting for the consumer subscription.
    pub init_wait_secs: u64,
    pub buffer: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 9092,
            topics: vec![DEFAULT_TOPIC.into()],
            consumer_wait_ms: 5000,
            init_wait_secs: 5,
            buffer: 1024,
        }
    }
}

impl BrokerConfig {
    pub fn wait_budget(&self) -> Duration {
        Duration::from_millis(self.consumer_wait_ms)
    }

    /// Topic the engine-side sink publishes to.
    pub fn sink_topic(&self) -> &str {
        self.topics.first().map(String::as_str).unwrap_or(DEFAULT_TOPIC)
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        let mut settings = ConsumerSettings::new(self.topics.clone(), self.wait_budget());
        settings.buffer = self.buffer;
        settings.ready_timeout = Duration::from_secs(self.init_wait_secs);
        settings
    }

    pub fn kafka_settings(&self) -> KafkaSettings {
        let mut settings = KafkaSettings::new(&self.host, self.port);
        settings.buffer = self.buffer;
        settings
    }
}

/// `a;b; c` → `["a", "b", "c"]`.
pub fn parse_topics(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

// ═══ stream ═══

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub blocks: usize,
    pub points: usize,
    pub sensors: usize,
    pub tick_alignment: i64,
    /// Every `spike_period`-th global point carries an elevated value.
    pub spike_period: u64,
    /// Tumbling window size of the detection task.
    pub window: usize,
    /// Sentinel tick = now + `sentinel_lead`.
    pub sentinel_lead: i64,
    /// 0 = seed from the clock; the seed actually used is stored.
    pub seed: u64,
    /// Pause after every block.
    pub block_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            blocks: 10,
            points: 10,
            sensors: 1,
            tick_alignment: 10,
            spike_period: 7,
            window: 10,
            sentinel_lead: 100,
            seed: 0,
            block_delay_ms: 0,
        }
    }
}

// ═══ store ═══

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}
