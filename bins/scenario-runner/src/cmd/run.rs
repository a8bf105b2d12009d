use std::sync::Arc;

use alert_bus::{BusMessage, KafkaBus, MemoryBus, MessageBus};
use engine_client::HttpTransport;
use harness::{HarnessError, ScenarioOrchestrator, WriteOutcome};
use tokio_util::sync::CancellationToken;

use super::config::{Action, Effective};

// ═══════════════════════════════════════════════════════════════
//  Main dispatch
// ═══════════════════════════════════════════════════════════════

pub async fn run(eff: Effective) -> Result<(), HarnessError> {
    let cancel = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(cancel.clone()));

    let transport = Arc::new(HttpTransport::new(&eff.config.engine.endpoint())?);
    tracing::debug!(engine = %transport.base_url(), "engine endpoint");

    // Only write/read subscribe; the others get an idle in-process bus.
    let bus: Arc<dyn MessageBus> = if eff.action.needs_bus() {
        Arc::new(KafkaBus::connect(eff.config.broker.kafka_settings()).await?)
    } else {
        Arc::new(MemoryBus::default())
    };

    let mut orchestrator =
        ScenarioOrchestrator::new(eff.config, transport, bus)?.with_cancel(cancel);
    let id = eff.id;

    match eff.action {
        Action::Write => match orchestrator.write(id, eff.read_back).await? {
            WriteOutcome::AlreadyExists(id) => println!("test scenario {id} already exists"),
            WriteOutcome::Created(report) => {
                println!(
                    "test scenario {id}: wrote ticks [{}, {})",
                    report.range.start, report.range.end
                );
                print_alerts(&report.alerts);
                if let Some(v) = report.validation {
                    println!("OK: {} points x {} sensors validated", v.points, v.sensors);
                }
            }
        },
        Action::Read => {
            let report = orchestrator.read(id).await?;
            print_alerts(&report.alerts);
        }
        Action::Validate => {
            let v = orchestrator.validate(id).await?;
            println!("OK: {} points x {} sensors validated", v.points, v.sensors);
        }
        Action::Info => {
            let record = orchestrator.info(id)?;
            let text = serde_json::to_string_pretty(&record)
                .map_err(|e| HarnessError::Configuration(format!("encode record: {e}")))?;
            println!("{text}");
        }
        Action::Delete => {
            let report = orchestrator.delete(id).await?;
            println!(
                "test scenario {id} removed (principal {}, children {:?})",
                report.principal, report.children
            );
        }
    }
    Ok(())
}

fn print_alerts(alerts: &[BusMessage]) {
    if alerts.is_empty() {
        println!("    no messages");
        return;
    }
    println!("    there are {} messages from the engine", alerts.len());
    for m in alerts {
        println!("{}", m.text());
    }
}

async fn watch_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Ctrl-C received");
        cancel.cancel();
    }
}
