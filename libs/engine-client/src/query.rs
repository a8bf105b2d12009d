//! Query text submitted to the engine. The engine executes it; this crate
//! only builds the strings.

/// Lists the children of the calling principal.
pub const LIST_CHILDREN: &str = "get_swimlanes().";

/// Name under which the detection task is registered.
pub const DETECTION_TASK: &str = "detect_anomalies";

/// Escape a value for use inside a double-quoted engine string literal.
fn escape_str(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Attach a Kafka sink to the calling child's environment.
pub fn kafka_env(host: &str, port: u16, topic: &str) -> String {
    format!(
        "env kafka: #{{\n    \"host\": \"{}\",\n    \"port\": {port},\n    \"topic\": \"{}\",\n    \"options\": #{{\"no_ack\": true}}\n}} end.",
        escape_str(host),
        escape_str(topic),
    )
}

/// Tumbling-window MAD outlier detection on sensor `$0`.
///
/// Every window of `window` items with at least one outlier publishes a
/// "Found N outliers ..." message to the environment's Kafka sink.
pub fn detection_task(window: usize) -> String {
    format!(
        r#"task "{DETECTION_TASK}" (
    window: "tumbling",
    sz: {window},
    real_time: false,
    save: false, %% ephemeral results, no persistency on backend nodes
    options: #{{
        "permanent": true
    }},

    result: def (task_props, n, items) ->
        out = outliers(items; method: "mad", sensitivity: 0.1, format: "values"),
        sz_outliers = length(out),
        if
            sz_outliers > 0 ->
                msg = format("Found ~0p outliers (~0p) in a stream of ~0p items: ~0p. Data stream: '~s' (window: ~s, size: ~p).",
                    [sz_outliers, out, n, items, task_props.name, task_props.window, task_props.sz]),
                kafka msg
        end,
        out
    end
)
from [$0]
end."#
    )
}

pub fn delete_task(name: &str) -> String {
    format!("delete_task(\"{}\").", escape_str(name))
}

/// Read back sensors `$0..$sensors-1` as per-sensor value arrays.
pub fn select_sensors(sensors: usize) -> String {
    let last = sensors.saturating_sub(1);
    format!("select $0-${last} format json (array: true) end.")
}
