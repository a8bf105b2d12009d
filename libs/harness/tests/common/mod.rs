#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alert_bus::MemoryBus;
use engine_client::{Credentials, EngineError, EngineTransport, Reply, Request, Role};
use harness::HarnessConfig;
use serde_json::{json, Value};

pub const ROOT_KEY: &str = "MyUser";
pub const ROOT_SECRET: &str = "MySecret";
pub const TOPIC: &str = "detector_alerts";

/// Config pointing the store into `dir`, with short consumer waits.
pub fn test_config(dir: &Path) -> HarnessConfig {
    let mut cfg = HarnessConfig::default();
    cfg.store.path = dir.join("compute_data_stream.json");
    cfg.broker.topics = vec![TOPIC.to_string()];
    cfg.broker.consumer_wait_ms = 1000;
    cfg.broker.init_wait_secs = 1;
    cfg.stream.seed = 12345;
    cfg
}

// ═══════════════════════════════════════════════════════════════
//  FakeEngine
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Child {
    secret: String,
    owner: String,
    sink_topic: Option<String>,
    window: Option<usize>,
    /// sensor → (tick, value), in arrival order
    series: BTreeMap<String, Vec<(i64, f64)>>,
    /// $0 items not yet closed into a window
    pending: Vec<f64>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    principals: BTreeMap<String, String>,
    children: BTreeMap<String, Child>,
    calls: Vec<(Credentials, Request)>,
    fail_insert_after: Option<usize>,
}

/// In-process engine: principals, children, inserts, a tumbling-window
/// outlier task that publishes to a `MemoryBus`.
pub struct FakeEngine {
    state: Mutex<State>,
    bus: Arc<MemoryBus>,
}

impl FakeEngine {
    pub fn new(bus: Arc<MemoryBus>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            bus,
        })
    }

    pub fn calls(&self) -> Vec<(Credentials, Request)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn principal_count(&self) -> usize {
        self.state.lock().unwrap().principals.len()
    }

    pub fn child_count(&self) -> usize {
        self.state.lock().unwrap().children.len()
    }

    pub fn has_task(&self, child: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .children
            .get(child)
            .is_some_and(|c| c.window.is_some())
    }

    /// Inserts beyond the first `n` are rejected.
    pub fn fail_inserts_after(&self, n: usize) {
        self.state.lock().unwrap().fail_insert_after = Some(n);
    }

    /// Stored points of one sensor, sentinel included.
    pub fn stored_points(&self, child: &str, sensor: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .children
            .get(child)
            .and_then(|c| c.series.get(sensor))
            .map_or(0, Vec::len)
    }

    /// Overwrite one stored value to simulate corruption.
    pub fn corrupt(&self, child: &str, sensor: &str, index: usize, value: f64) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.children.get_mut(child) {
            if let Some(series) = c.series.get_mut(sensor) {
                series[index].1 = value;
            }
        }
    }

    fn authorized(state: &State, creds: &Credentials) -> bool {
        match creds.role {
            Role::Root => creds.key == ROOT_KEY && creds.secret == ROOT_SECRET,
            Role::Principal => state.principals.get(&creds.key) == Some(&creds.secret),
            Role::Child => state.children.get(&creds.key).is_some_and(|c| c.secret == creds.secret),
        }
    }

    /// Handle one call; returns the reply and alerts to publish.
    fn handle(&self, creds: &Credentials, request: &Request) -> (Reply, Vec<(String, String)>) {
        let mut state = self.state.lock().unwrap();
        state.calls.push((creds.clone(), request.clone()));

        if !Self::authorized(&state, creds) {
            return (Reply::error(json!("unauthorized")), Vec::new());
        }

        match request {
            Request::CreatePrincipal { .. } if creds.role == Role::Root => {
                state.next_id += 1;
                let key = format!("adm-{}", state.next_id);
                let secret = format!("adm-secret-{}", state.next_id);
                state.principals.insert(key.clone(), secret.clone());
                (Reply::ok(json!({"key": key, "secret_key": secret})), Vec::new())
            }
            Request::DeletePrincipal { key } if creds.role == Role::Root => {
                let status = if state.principals.remove(key).is_some() { 1 } else { 0 };
                (Reply::ok(json!({ "status": status })), Vec::new())
            }
            Request::CreateChild { .. } if creds.role == Role::Principal => {
                state.next_id += 1;
                let key = format!("{}", 1000 + state.next_id);
                let secret = format!("app-secret-{}", state.next_id);
                state.children.insert(
                    key.clone(),
                    Child {
                        secret: secret.clone(),
                        owner: creds.key.clone(),
                        ..Default::default()
                    },
                );
                (Reply::ok(json!({"key": key, "secret_key": secret})), Vec::new())
            }
            Request::DeleteChild { key } if creds.role == Role::Principal => {
                let owned = state.children.get(key).is_some_and(|c| c.owner == creds.key);
                let status = if owned { 1 } else { 0 };
                if owned {
                    state.children.remove(key);
                }
                (Reply::ok(json!({ "status": status })), Vec::new())
            }
            Request::Query(text) => Self::query(&mut state, creds, text),
            Request::Insert(records) if creds.role == Role::Child => {
                let inserts = state
                    .calls
                    .iter()
                    .filter(|(_, r)| matches!(r, Request::Insert(_)))
                    .count();
                if state.fail_insert_after.is_some_and(|n| inserts > n) {
                    return (Reply::error(json!({"reason": "write rejected"})), Vec::new());
                }
                let child = state.children.get_mut(&creds.key).unwrap();
                let alerts = Self::ingest(child, records);
                let payload = json!({"batch": {creds.key.clone(): {"result": {"info": {"ms": 3}}}}});
                (Reply::ok(payload), alerts)
            }
            _ => (Reply::error(json!("forbidden")), Vec::new()),
        }
    }

    fn query(state: &mut State, creds: &Credentials, text: &str) -> (Reply, Vec<(String, String)>) {
        let text = text.trim();
        if text == "get_swimlanes()." && creds.role == Role::Principal {
            let keys: Vec<Value> = state
                .children
                .iter()
                .filter(|(_, c)| c.owner == creds.key)
                .map(|(k, _)| json!(k))
                .collect();
            return (Reply::ok(Value::Array(keys)), Vec::new());
        }
        let Some(child) = state.children.get_mut(&creds.key) else {
            return (Reply::error(json!("not a child session")), Vec::new());
        };

        if text.starts_with("env kafka:") {
            child.sink_topic = between(text, "\"topic\": \"", "\"");
            return (Reply::ok(json!("ok")), Vec::new());
        }
        if text.starts_with("task \"detect_anomalies\"") {
            child.window = between(text, "sz: ", ",").and_then(|s| s.parse().ok());
            return (Reply::ok(json!("ok")), Vec::new());
        }
        if text == "delete_task(\"detect_anomalies\")." {
            let existed = child.window.take().is_some();
            return if existed {
                (Reply::ok(json!("ok")), Vec::new())
            } else {
                (Reply::error(json!("no such task")), Vec::new())
            };
        }
        if text.starts_with("select $0-$") {
            let values: serde_json::Map<String, Value> = child
                .series
                .iter()
                .map(|(sensor, vs)| {
                    let points: Vec<Value> = vs.iter().map(|(ns, v)| json!({"ns": ns, "value": v})).collect();
                    (sensor.clone(), Value::Array(points))
                })
                .collect();
            return (Reply::ok(json!({"data": [{"values": values, "ms": 1}]})), Vec::new());
        }
        (Reply::error(json!(format!("syntax error: {text}"))), Vec::new())
    }

    /// Store records; run the tumbling window over `$0`.
    fn ingest(child: &mut Child, records: &Value) -> Vec<(String, String)> {
        let mut alerts = Vec::new();
        for record in records.as_array().into_iter().flatten() {
            let Some(object) = record.as_object() else { continue };
            let ns = object.get("ns").and_then(Value::as_i64).unwrap_or_default();
            for (key, value) in object {
                if key == "ns" {
                    continue;
                }
                if let Some(v) = value.as_f64() {
                    child.series.entry(key.clone()).or_default().push((ns, v));
                    if key == "0" {
                        child.pending.push(v);
                    }
                }
            }

            let (Some(window), Some(topic)) = (child.window, child.sink_topic.clone()) else {
                continue;
            };
            if child.pending.len() >= window {
                let items: Vec<f64> = child.pending.drain(..window).collect();
                let out = outliers(&items);
                if !out.is_empty() {
                    let msg = format!(
                        "Found {} outliers ({:?}) in a stream of {} items: {:?}. Data stream: 'detect_anomalies' (window: tumbling, size: {}).",
                        out.len(),
                        out,
                        items.len(),
                        items,
                        window
                    );
                    alerts.push((topic, msg));
                }
            }
        }
        alerts
    }
}

/// MAD outliers: |x - median| / (1.4826 * MAD) > 3.
fn outliers(items: &[f64]) -> Vec<f64> {
    fn median(v: &mut [f64]) -> f64 {
        v.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = v.len();
        if n % 2 == 1 { v[n / 2] } else { (v[n / 2 - 1] + v[n / 2]) / 2.0 }
    }
    let mut sorted = items.to_vec();
    let m = median(&mut sorted);
    let mut deviations: Vec<f64> = items.iter().map(|x| (x - m).abs()).collect();
    let mad = median(&mut deviations) * 1.4826;
    items
        .iter()
        .copied()
        .filter(|x| if mad == 0.0 { *x != m } else { (x - m).abs() / mad > 3.0 })
        .collect()
}

fn between(text: &str, start: &str, end: &str) -> Option<String> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(text[from..from + len].to_string())
}

impl EngineTransport for FakeEngine {
    fn call<'a>(
        &'a self,
        credentials: &'a Credentials,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, EngineError>> + Send + 'a>> {
        let (reply, alerts) = self.handle(credentials, &request);
        Box::pin(async move {
            for (topic, msg) in alerts {
                self.bus.publish(&topic, msg).await;
            }
            Ok(reply)
        })
    }
}

/// Engine that refuses every connection.
pub struct DownEngine;

impl EngineTransport for DownEngine {
    fn call<'a>(
        &'a self,
        _credentials: &'a Credentials,
        _request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, EngineError>> + Send + 'a>> {
        Box::pin(async { Err(EngineError::Connection("connection refused".into())) })
    }
}

pub fn short(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Engine that never answers.
pub struct HangingEngine;

impl EngineTransport for HangingEngine {
    fn call<'a>(
        &'a self,
        _credentials: &'a Credentials,
        _request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, EngineError>> + Send + 'a>> {
        Box::pin(std::future::pending())
    }
}
