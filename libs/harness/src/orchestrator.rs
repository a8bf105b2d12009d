use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use alert_bus::{AlertConsumer, BusMessage, MessageBus, StopReason};
use engine_client::query::{self, DETECTION_TASK};
use engine_client::{
    now_secs, write_sentinel, ChildOptions, EngineTransport, Provisioner, StreamWriter, TickRange,
    WritePlan,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::scenario::{Rng, ScenarioMeta, SpikeGenerator};
use crate::store::{CredentialStore, ScenarioRecord};

/// Label the engine stores with every principal we create.
const PRINCIPAL_DETAILS: &str = "User details";

// ═══════════════════════════════════════════════════════════════
//  Reports
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub enum WriteOutcome {
    /// A record for this id exists; nothing was done.
    AlreadyExists(u32),
    Created(WriteReport),
}

#[derive(Debug)]
pub struct WriteReport {
    pub id: u32,
    pub range: TickRange,
    pub alerts: Vec<BusMessage>,
    pub stop: Option<StopReason>,
    pub validation: Option<ValidationReport>,
}

#[derive(Debug)]
pub struct ReadReport {
    pub id: u32,
    pub alerts: Vec<BusMessage>,
    pub stop: Option<StopReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub id: u32,
    pub points: usize,
    pub sensors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub id: u32,
    pub principal: String,
    pub children: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════
//  ScenarioOrchestrator
// ═══════════════════════════════════════════════════════════════

/// Runs one scenario action end to end against the engine and the bus.
///
/// No compensation on failure: a principal created before a later step
/// fails stays on the engine and is not recorded locally.
pub struct ScenarioOrchestrator {
    config: HarnessConfig,
    provisioner: Provisioner,
    bus: Arc<dyn MessageBus>,
    store: CredentialStore,
    cancel: CancellationToken,
    now: Option<i64>,
}

impl ScenarioOrchestrator {
    /// Opens (or creates) the credential store at `config.store.path`.
    pub fn new(
        config: HarnessConfig,
        transport: Arc<dyn EngineTransport>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self, HarnessError> {
        config.validate()?;
        let store = CredentialStore::load(&config.store.path)?;
        let provisioner = Provisioner::new(transport, config.engine.root_credentials());
        Ok(Self {
            config,
            provisioner,
            bus,
            store,
            cancel: CancellationToken::new(),
            now: None,
        })
    }

    /// Token that, once cancelled, interrupts a running write or read.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Pin the clock (Unix seconds) used for tick placement.
    pub fn with_clock(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn now(&self) -> i64 {
        self.now.unwrap_or_else(now_secs)
    }

    fn known(&self, id: u32) -> Result<ScenarioRecord, HarnessError> {
        self.store
            .get(id)
            .cloned()
            .ok_or_else(|| HarnessError::Configuration(format!("unknown test scenario: {id}")))
    }

    // ═══ write ═══

    /// Provision, stream, collect alerts, persist.
    ///
    /// The consumer starts before anything else so no alert can be
    /// produced ahead of the subscription.
    pub async fn write(&mut self, id: u32, read_back: bool) -> Result<WriteOutcome, HarnessError> {
        let mut consumer =
            AlertConsumer::spawn(self.bus.clone(), self.config.broker.consumer_settings()).await?;

        if self.store.contains(id) {
            tracing::info!(scenario = id, "test scenario already exists");
            return Ok(WriteOutcome::AlreadyExists(id));
        }
        tracing::info!(scenario = id, "create test scenario");

        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            r = self.run_write(id, &mut consumer) => Some(r),
            _ = cancel.cancelled() => None,
        };
        let report = match outcome {
            Some(r) => r?,
            None => {
                tracing::warn!(scenario = id, "interrupted, draining consumer");
                consumer.join(self.config.broker.wait_budget()).await;
                return Err(HarnessError::Interrupted);
            }
        };

        let report = if read_back {
            let validation = self.validate(id).await?;
            WriteReport {
                validation: Some(validation),
                ..report
            }
        } else {
            report
        };
        Ok(WriteOutcome::Created(report))
    }

    async fn run_write(&mut self, id: u32, consumer: &mut AlertConsumer) -> Result<WriteReport, HarnessError> {
        let broker = &self.config.broker;
        let stream = &self.config.stream;

        let root = self.provisioner.bootstrap_root();
        let principal = self.provisioner.create_principal(&root, PRINCIPAL_DETAILS).await?;
        let principal_session = self.provisioner.session(principal.clone());
        let child = self
            .provisioner
            .create_scoped_child(&principal_session, &ChildOptions::detection())
            .await?;
        let child_session = self.provisioner.session(child.clone());

        child_session
            .query(&query::kafka_env(&broker.host, broker.port, broker.sink_topic()))
            .await?;
        child_session.query(&query::detection_task(stream.window)).await?;
        tracing::info!(scenario = id, child = %child.key, task = DETECTION_TASK, "detection task registered");

        let seed = if stream.seed == 0 { Rng::clock_seed() } else { stream.seed };
        let plan = WritePlan {
            blocks: stream.blocks,
            points: stream.points,
            sensors: stream.sensors,
        };
        let now = self.now();
        let mut generator = SpikeGenerator::new(seed, stream.spike_period);
        let mut writer = StreamWriter::new(&child_session)
            .alignment(stream.tick_alignment)
            .now(now)
            .generator(&mut generator);
        if stream.block_delay_ms > 0 {
            let pause = Duration::from_millis(stream.block_delay_ms);
            writer = writer.delay(Box::new(move |_block: usize| Some(pause)));
        }
        let range = writer.write_batches(plan).await?;

        // clock at sentinel time, not at stream start
        write_sentinel(&child_session, self.now() + stream.sentinel_lead, 0, 1.0).await?;

        consumer.join(broker.wait_budget()).await;
        let alerts = consumer.collected().to_vec();
        let stop = consumer.stop_reason();
        tracing::info!(scenario = id, alerts = alerts.len(), stop = ?stop, "alerts collected");

        let meta = ScenarioMeta::new(plan, range, seed, stream.spike_period, broker.topics.clone());
        let record = ScenarioRecord::new(&principal)
            .with_child(&child)
            .with_metadata(meta.to_metadata()?);
        self.store.upsert(id, record)?;

        Ok(WriteReport {
            id,
            range,
            alerts,
            stop,
            validation: None,
        })
    }

    // ═══ read ═══

    /// Listen on the scenario's topics for one wait budget.
    pub async fn read(&mut self, id: u32) -> Result<ReadReport, HarnessError> {
        let record = self.known(id)?;
        let mut settings = self.config.broker.consumer_settings();
        if let Ok(meta) = ScenarioMeta::from_metadata(&record.metadata) {
            if !meta.topics.is_empty() {
                settings.topics = meta.topics;
            }
        }

        let mut consumer = AlertConsumer::spawn(self.bus.clone(), settings).await?;
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = consumer.join(self.config.broker.wait_budget()) => {}
            _ = cancel.cancelled() => return Err(HarnessError::Interrupted),
        }

        Ok(ReadReport {
            id,
            alerts: consumer.collected().to_vec(),
            stop: consumer.stop_reason(),
        })
    }

    // ═══ validate ═══

    /// Read the series back from the child and compare with the
    /// regenerated values. Points outside the written tick range (the
    /// sentinel) are ignored.
    pub async fn validate(&self, id: u32) -> Result<ValidationReport, HarnessError> {
        until_cancelled(&self.cancel, self.run_validate(id)).await
    }

    async fn run_validate(&self, id: u32) -> Result<ValidationReport, HarnessError> {
        let record = self.known(id)?;
        let child = record.child_credentials().ok_or_else(|| {
            HarnessError::Configuration(format!("scenario {id} has no child credentials"))
        })?;
        let meta = ScenarioMeta::from_metadata(&record.metadata)?;

        let session = self.provisioner.session(child);
        let payload = session.query(&query::select_sensors(meta.sensors)).await?;
        let actual = read_back_series(&payload, meta.start_tick..meta.end_tick)?;
        let expected = meta.expected_series();

        for (sensor, want) in expected.iter().enumerate() {
            let got = actual.get(&sensor).ok_or_else(|| {
                HarnessError::Validation(format!("sensor {sensor}: no data returned"))
            })?;
            if got.len() != want.len() {
                return Err(HarnessError::Validation(format!(
                    "sensor {sensor}: expected {} points, got {}",
                    want.len(),
                    got.len()
                )));
            }
            if let Some(i) = want.iter().zip(got).position(|(w, g)| w != g) {
                return Err(HarnessError::Validation(format!(
                    "sensor {sensor}, tick {}: expected {}, got {}",
                    meta.start_tick + i as i64,
                    want[i],
                    got[i]
                )));
            }
        }

        let plan = meta.plan();
        tracing::info!(scenario = id, points = plan.total_points(), sensors = plan.sensors, "data validated");
        Ok(ValidationReport {
            id,
            points: plan.total_points(),
            sensors: plan.sensors,
        })
    }

    // ═══ info ═══

    pub fn info(&self, id: u32) -> Result<ScenarioRecord, HarnessError> {
        self.known(id)
    }

    // ═══ delete ═══

    /// Remove the task, the children, the principal, then the record.
    pub async fn delete(&mut self, id: u32) -> Result<DeleteReport, HarnessError> {
        let cancel = self.cancel.clone();
        until_cancelled(&cancel, self.run_delete(id)).await
    }

    async fn run_delete(&mut self, id: u32) -> Result<DeleteReport, HarnessError> {
        let record = self.known(id)?;
        tracing::info!(scenario = id, principal = %record.admin_key, "clean test scenario");

        let root = self.provisioner.bootstrap_root();
        let principal = self.provisioner.session(record.principal_credentials());

        let children = match record.child_credentials() {
            Some(child) => {
                let child_session = self.provisioner.session(child.clone());
                child_session.query(&query::delete_task(DETECTION_TASK)).await?;
                self.provisioner.delete_scoped_child(&principal, &child.key).await?;
                vec![child.key]
            }
            None => {
                let keys = self.provisioner.list_scoped_children(&principal).await?;
                for key in &keys {
                    self.provisioner.delete_scoped_child(&principal, key).await?;
                }
                keys
            }
        };
        self.provisioner.delete_principal(&root, &record.admin_key).await?;
        self.store.remove(id)?;

        Ok(DeleteReport {
            id,
            principal: record.admin_key,
            children,
        })
    }
}

/// Resolve `fut` unless `cancel` fires first.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, HarnessError>>,
) -> Result<T, HarnessError> {
    tokio::select! {
        r = fut => r,
        _ = cancel.cancelled() => Err(HarnessError::Interrupted),
    }
}

/// `{"data": [{"values": {"<sensor>": [{"ns": t, "value": v}, ...]}}]}` → sensor → values.
///
/// Points whose `ns` falls outside `window` are dropped; points without
/// `ns` are kept in reply order.
fn read_back_series(payload: &Value, window: Range<i64>) -> Result<BTreeMap<usize, Vec<f64>>, HarnessError> {
    let bad = |what: &str| HarnessError::Validation(format!("read-back reply has no valid {what}"));

    let first = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|d| d.first())
        .ok_or_else(|| bad("data[0]"))?;
    if let Some(ms) = first.get("ms").and_then(Value::as_i64) {
        tracing::debug!(server_ms = ms, "server read time");
    }
    let values = first
        .get("values")
        .and_then(Value::as_object)
        .ok_or_else(|| bad("data[0].values"))?;

    let mut series = BTreeMap::new();
    for (sensor, points) in values {
        let sensor: usize = sensor.parse().map_err(|_| bad("sensor index"))?;
        let points = points.as_array().ok_or_else(|| bad("sensor values"))?;
        let mut column = Vec::with_capacity(points.len());
        for p in points {
            if let Some(ns) = p.get("ns").and_then(Value::as_i64) {
                if !window.contains(&ns) {
                    continue;
                }
            }
            column.push(p.get("value").and_then(Value::as_f64).ok_or_else(|| bad("point value"))?);
        }
        series.insert(sensor, column);
    }
    Ok(series)
}
