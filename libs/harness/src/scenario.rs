use std::collections::BTreeMap;

use engine_client::{TickRange, ValueGenerator, WritePlan};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarnessError;

// ═══════════════════════════════════════════════════════════════
//  PRNG (xorshift64)
// ═══════════════════════════════════════════════════════════════

/// Small deterministic PRNG. Same seed, same sequence.
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        // xorshift never leaves state 0
        let state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state }
    }

    /// Seed from the wall clock, never 0.
    pub fn clock_seed() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64
            | 1
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform integer in `[lo, hi]`.
    pub fn range_inclusive(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.next_u64() % (hi - lo + 1)
    }
}

// ═══════════════════════════════════════════════════════════════
//  SpikeGenerator
// ═══════════════════════════════════════════════════════════════

/// Values in `[1, 10]`, except every `period`-th global point which
/// gets a spike in `[100, 200)`.
pub struct SpikeGenerator {
    rng: Rng,
    period: u64,
}

impl SpikeGenerator {
    pub fn new(seed: u64, period: u64) -> Self {
        Self {
            rng: Rng::new(seed),
            period: period.max(1),
        }
    }

    pub fn is_spike(&self, serial: u64) -> bool {
        (serial + 1) % self.period == 0
    }
}

impl ValueGenerator for SpikeGenerator {
    fn value(&mut self, serial: u64, _point: usize, _tick: i64, _sensor: usize) -> f64 {
        if self.is_spike(serial) {
            self.rng.range_inclusive(100, 199) as f64
        } else {
            self.rng.range_inclusive(1, 10) as f64
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  ScenarioMeta: what `write` stores for later validation
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioMeta {
    pub start_tick: i64,
    pub end_tick: i64,
    pub blocks: usize,
    pub points: usize,
    pub sensors: usize,
    pub seed: u64,
    pub spike_period: u64,
    pub topics: Vec<String>,
}

impl ScenarioMeta {
    pub fn new(plan: WritePlan, range: TickRange, seed: u64, spike_period: u64, topics: Vec<String>) -> Self {
        Self {
            start_tick: range.start,
            end_tick: range.end,
            blocks: plan.blocks,
            points: plan.points,
            sensors: plan.sensors,
            seed,
            spike_period,
            topics,
        }
    }

    pub fn to_metadata(&self) -> Result<BTreeMap<String, Value>, HarnessError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(other) => Err(HarnessError::Configuration(format!("metadata is not an object: {other}"))),
            Err(e) => Err(HarnessError::Configuration(format!("encode metadata: {e}"))),
        }
    }

    pub fn from_metadata(metadata: &BTreeMap<String, Value>) -> Result<Self, HarnessError> {
        let object: serde_json::Map<String, Value> =
            metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| HarnessError::Configuration(format!("scenario metadata: {e}")))
    }

    pub fn plan(&self) -> WritePlan {
        WritePlan {
            blocks: self.blocks,
            points: self.points,
            sensors: self.sensors,
        }
    }

    /// Regenerate the written series: `series[sensor][i]` for the i-th tick.
    ///
    /// Draws in the same order as the stream writer: point by point,
    /// sensors inner.
    pub fn expected_series(&self) -> Vec<Vec<f64>> {
        let total = self.blocks * self.points;
        let mut generator = SpikeGenerator::new(self.seed, self.spike_period);
        let mut series = vec![Vec::with_capacity(total); self.sensors];

        for serial in 0..total {
            let point = serial % self.points.max(1);
            let tick = self.start_tick + serial as i64;
            for (sensor, column) in series.iter_mut().enumerate() {
                column.push(generator.value(serial as u64, point, tick, sensor));
            }
        }
        series
    }
}
