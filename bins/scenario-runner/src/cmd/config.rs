use std::path::{Path, PathBuf};

use clap::Args;
use harness::{parse_topics, HarnessConfig, HarnessError};

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

/// Exactly one action per run.
#[derive(Args, Clone, Debug, Default)]
#[group(required = true, multiple = false)]
pub struct ActionArgs {
    /// Provision the scenario, stream data, collect alerts
    #[arg(short = 'w', long)]
    pub write: bool,

    /// Listen for alerts of an existing scenario
    #[arg(short = 'r', long)]
    pub read: bool,

    /// Read the written series back and compare
    #[arg(short = 'v', long)]
    pub validate: bool,

    /// Print the stored scenario record
    #[arg(short = 'i', long)]
    pub info: bool,

    /// Remove the task, children, principal and the local record
    #[arg(short = 'd', long)]
    pub delete: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Путь к TOML-конфигу
    #[arg(long, default_value = "scenario-runner.toml", env = "SCENARIO_RUNNER_CONFIG")]
    pub config: String,

    #[command(flatten)]
    pub action: ActionArgs,

    /// Engine host
    #[arg(short = 's', long)]
    pub server: Option<String>,

    /// Engine port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Use https
    #[arg(long)]
    pub use_https: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub accept_invalid_certs: bool,

    /// Root key override
    #[arg(long, env = "ENGINE_ROOT_KEY")]
    pub user: Option<String>,

    /// Root secret override
    #[arg(long, env = "ENGINE_ROOT_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Test scenario number
    #[arg(short = 't', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub test: u32,

    /// Number of blocks
    #[arg(long)]
    pub blocks: Option<usize>,

    /// Points per block
    #[arg(long)]
    pub pts: Option<usize>,

    /// Number of sensors
    #[arg(long)]
    pub sensors: Option<usize>,

    /// Validate the write by reading it back
    #[arg(long)]
    pub read_back: bool,

    /// Debug-level logging
    #[arg(long)]
    pub verbose: bool,

    /// Credential store file
    #[arg(long, env = "SCENARIO_RUNNER_CREDS")]
    pub creds: Option<PathBuf>,

    /// Kafka host
    #[arg(long)]
    pub kafka_server: Option<String>,

    /// Kafka port
    #[arg(long)]
    pub kafka_port: Option<u16>,

    /// Kafka topic(s), separated by ';'
    #[arg(long)]
    pub kafka_topic: Option<String>,

    /// Consumer wait budget, ms
    #[arg(long)]
    pub kafka_consumer_wait: Option<u64>,

    /// Wait for the consumer to get ready, s
    #[arg(long)]
    pub kafka_init_wait: Option<u64>,

    /// Seed for the value generator (0 = clock)
    #[arg(long)]
    pub seed: Option<u64>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Write,
    Read,
    Validate,
    Info,
    Delete,
}

impl Action {
    fn from_args(a: &ActionArgs) -> Result<Self, HarnessError> {
        match (a.write, a.read, a.validate, a.info, a.delete) {
            (true, false, false, false, false) => Ok(Action::Write),
            (false, true, false, false, false) => Ok(Action::Read),
            (false, false, true, false, false) => Ok(Action::Validate),
            (false, false, false, true, false) => Ok(Action::Info),
            (false, false, false, false, true) => Ok(Action::Delete),
            _ => Err(HarnessError::Configuration("exactly one action is required".into())),
        }
    }

    /// Actions that subscribe to the broker.
    pub fn needs_bus(self) -> bool {
        matches!(self, Action::Write | Action::Read)
    }
}

/// Итоговая конфигурация после мержа: defaults < config file < env/CLI
#[derive(Debug, Clone)]
pub struct Effective {
    pub config: HarnessConfig,
    pub action: Action,
    pub id: u32,
    pub read_back: bool,
}

impl Effective {
    pub fn new(args: &RunArgs) -> Result<Self, HarnessError> {
        let path = Path::new(&args.config);
        let base = if path.exists() {
            HarnessConfig::load(path)?
        } else {
            HarnessConfig::default()
        };
        Self::merge(base, args)
    }

    pub fn merge(mut cfg: HarnessConfig, args: &RunArgs) -> Result<Self, HarnessError> {
        let engine = &mut cfg.engine;
        if let Some(host) = &args.server {
            engine.host = host.clone();
        }
        engine.port = args.port.unwrap_or(engine.port);
        engine.tls |= args.use_https;
        engine.accept_invalid_certs |= args.accept_invalid_certs;
        if let Some(user) = &args.user {
            engine.root_key = user.clone();
        }
        if let Some(secret) = &args.secret {
            engine.root_secret = secret.clone();
        }

        let broker = &mut cfg.broker;
        if let Some(host) = &args.kafka_server {
            broker.host = host.clone();
        }
        broker.port = args.kafka_port.unwrap_or(broker.port);
        if let Some(raw) = &args.kafka_topic {
            broker.topics = parse_topics(raw);
        }
        broker.consumer_wait_ms = args.kafka_consumer_wait.unwrap_or(broker.consumer_wait_ms);
        broker.init_wait_secs = args.kafka_init_wait.unwrap_or(broker.init_wait_secs);

        let stream = &mut cfg.stream;
        stream.blocks = args.blocks.unwrap_or(stream.blocks);
        stream.points = args.pts.unwrap_or(stream.points);
        stream.sensors = args.sensors.unwrap_or(stream.sensors);
        stream.seed = args.seed.unwrap_or(stream.seed);

        if let Some(creds) = &args.creds {
            cfg.store.path = creds.clone();
        }

        cfg.validate()?;
        Ok(Self {
            config: cfg,
            action: Action::from_args(&args.action)?,
            id: args.test,
            read_back: args.read_back,
        })
    }
}
