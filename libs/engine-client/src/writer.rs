use std::collections::BTreeMap;
use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::error::EngineError;
use crate::session::Session;
use crate::util::now_secs;

/// Granularity the first tick of a run is aligned down to.
pub const DEFAULT_TICK_ALIGNMENT: i64 = 10;

// ═══════════════════════════════════════════════════════════════
//  Batch
// ═══════════════════════════════════════════════════════════════

/// Одна точка: tick + значения по номерам сенсоров.
///
/// На проводе плоский объект `{"ns": tick, "0": v0, "1": v1, ...}`.
/// Целые значения уходят как JSON-целые (`150`, не `150.0`).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub timestamp: i64,
    pub values: BTreeMap<usize, f64>,
}

impl Serialize for BatchRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry("ns", &self.timestamp)?;
        for (sensor, value) in &self.values {
            let key = sensor.to_string();
            match as_integer(*value) {
                Some(i) => map.serialize_entry(&key, &i)?,
                None => map.serialize_entry(&key, value)?,
            }
        }
        map.end()
    }
}

/// `Some` for finite whole numbers that fit an `i64` exactly.
fn as_integer(v: f64) -> Option<i64> {
    const LIMIT: f64 = 9_007_199_254_740_992.0; // 2^53
    (v.is_finite() && v.fract() == 0.0 && v.abs() <= LIMIT).then_some(v as i64)
}

/// Набор точек, отправляемый одним атомарным insert'ом.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub records: Vec<BatchRecord>,
}

impl Batch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            records: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_json(&self) -> Result<Value, EngineError> {
        serde_json::to_value(&self.records).map_err(|e| EngineError::Encode {
            context: "batch",
            detail: e.to_string(),
        })
    }
}

/// Half-open `[start, end)` range of ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickRange {
    pub start: i64,
    pub end: i64,
}

impl TickRange {
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

// ═══════════════════════════════════════════════════════════════
//  Generators
// ═══════════════════════════════════════════════════════════════

/// Значение сенсора `sensor` для глобального номера точки `serial`,
/// номера точки в блоке `point` и tick'а `tick`.
pub trait ValueGenerator: Send {
    fn value(&mut self, serial: u64, point: usize, tick: i64, sensor: usize) -> f64;
}

impl<F> ValueGenerator for F
where
    F: FnMut(u64, usize, i64, usize) -> f64 + Send,
{
    fn value(&mut self, serial: u64, point: usize, tick: i64, sensor: usize) -> f64 {
        self(serial, point, tick, sensor)
    }
}

/// `(point + 1) * (sensor + 1)`, used when no generator is supplied.
pub fn default_value(point: usize, sensor: usize) -> f64 {
    ((point + 1) * (sensor + 1)) as f64
}

/// Вызывается после каждого блока; `Some(d)` означает паузу перед следующим.
pub type DelayHook<'a> = Box<dyn FnMut(usize) -> Option<Duration> + Send + 'a>;

/// Shape of one streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePlan {
    pub blocks: usize,
    pub points: usize,
    pub sensors: usize,
}

impl WritePlan {
    pub fn total_points(&self) -> usize {
        self.blocks * self.points
    }
}

// ═══════════════════════════════════════════════════════════════
//  StreamWriter
// ═══════════════════════════════════════════════════════════════

/// Generates time-sequenced blocks and sends each one as a single insert.
///
/// Fail-fast: the first rejected block aborts the run. Blocks already
/// accepted stay on the engine.
pub struct StreamWriter<'a> {
    session: &'a Session,
    alignment: i64,
    now: Option<i64>,
    generator: Option<&'a mut dyn ValueGenerator>,
    delay: Option<DelayHook<'a>>,
}

impl<'a> StreamWriter<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            alignment: DEFAULT_TICK_ALIGNMENT,
            now: None,
            generator: None,
            delay: None,
        }
    }

    pub fn alignment(mut self, alignment: i64) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    /// Pin "now" (Unix seconds) instead of reading the clock.
    pub fn now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    pub fn generator(mut self, generator: &'a mut dyn ValueGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn delay(mut self, hook: DelayHook<'a>) -> Self {
        self.delay = Some(hook);
        self
    }

    /// First tick of a run of `total` points ending near `now`.
    pub fn start_tick(now: i64, total: usize, alignment: i64) -> i64 {
        let alignment = alignment.max(1);
        (now - total as i64).div_euclid(alignment) * alignment
    }

    pub async fn write_batches(&mut self, plan: WritePlan) -> Result<TickRange, EngineError> {
        let now = self.now.unwrap_or_else(now_secs);
        let start = Self::start_tick(now, plan.total_points(), self.alignment);

        let mut tick = start;
        let mut serial: u64 = 0;

        for block in 0..plan.blocks {
            let mut batch = Batch::with_capacity(plan.points);
            for point in 0..plan.points {
                let mut values = BTreeMap::new();
                for sensor in 0..plan.sensors {
                    let v = match &mut self.generator {
                        Some(g) => g.value(serial, point, tick, sensor),
                        None => default_value(point, sensor),
                    };
                    values.insert(sensor, v);
                }
                batch.records.push(BatchRecord {
                    timestamp: tick,
                    values,
                });
                tick += 1;
                serial += 1;
            }

            let payload = match self.session.insert(batch.to_json()?).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(block, error = %e, "block rejected, aborting stream");
                    return Err(e);
                }
            };
            match server_write_ms(&payload, self.session.key()) {
                Some(ms) => tracing::debug!(block, records = batch.len(), server_ms = ms, "block written"),
                None => tracing::debug!(block, records = batch.len(), "block written"),
            }

            if let Some(hook) = self.delay.as_mut() {
                if let Some(pause) = hook(block) {
                    tokio::time::sleep(pause).await;
                }
            }
        }

        let range = TickRange { start, end: tick };
        tracing::info!(
            blocks = plan.blocks,
            points = plan.points,
            sensors = plan.sensors,
            start = range.start,
            end = range.end,
            "stream written"
        );
        Ok(range)
    }
}

/// Одна внеочередная точка (например, sentinel для сброса окон).
pub async fn write_sentinel(session: &Session, tick: i64, sensor: usize, value: f64) -> Result<(), EngineError> {
    let record = BatchRecord {
        timestamp: tick,
        values: BTreeMap::from([(sensor, value)]),
    };
    let batch = Batch {
        records: vec![record],
    };
    session.insert(batch.to_json()?).await?;
    tracing::info!(tick, sensor, "sentinel written");
    Ok(())
}

/// `batch.<key>.result.info.ms` from an insert reply, if the engine sent it.
fn server_write_ms(payload: &Value, key: &str) -> Option<i64> {
    payload
        .get("batch")?
        .get(key)?
        .get("result")?
        .get("info")?
        .get("ms")?
        .as_i64()
}
