pub mod consumer;
pub mod error;
pub mod kafka;
pub mod memory;

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use consumer::{AlertConsumer, ConsumerSettings, ConsumerState, JoinOutcome, StopReason};
pub use error::BusError;
pub use kafka::{KafkaBus, KafkaSettings};
pub use memory::{MemoryBus, OverflowPolicy};

// ═══════════════════════════════════════════════════════════════
//  BusMessage
// ═══════════════════════════════════════════════════════════════

/// Opaque payload captured verbatim from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            offset: None,
            payload: payload.into(),
        }
    }

    /// Payload as text, lossy for non-UTF-8 bytes.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Traits
// ═══════════════════════════════════════════════════════════════

/// Topic pub/sub backend the consumer reads from.
pub trait MessageBus: Send + Sync {
    /// One subscription over all `topics`. Only messages published after
    /// this resolves are delivered.
    fn subscribe<'a>(
        &'a self,
        topics: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusSubscription>, BusError>> + Send + 'a>>;
}

/// Live subscription. Dropping it releases the broker side.
pub trait BusSubscription: Send {
    /// Next message, or `Ok(None)` if nothing arrived within `timeout`.
    /// `Err(BusError::Closed)` once no source can ever deliver again.
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BusMessage>, BusError>> + Send + '_>>;
}

// ═══════════════════════════════════════════════════════════════
//  ChannelSubscription: общая mpsc-реализация для всех шин
// ═══════════════════════════════════════════════════════════════

/// Subscription fed through an mpsc channel by one or more producers.
/// Producer tasks owned by the subscription are aborted on drop.
pub struct ChannelSubscription {
    rx: mpsc::Receiver<Result<BusMessage, BusError>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChannelSubscription {
    pub fn new(rx: mpsc::Receiver<Result<BusMessage, BusError>>) -> Self {
        Self { rx, tasks: Vec::new() }
    }

    pub fn with_tasks(mut self, tasks: Vec<JoinHandle<()>>) -> Self {
        self.tasks = tasks;
        self
    }
}

impl BusSubscription for ChannelSubscription {
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BusMessage>, BusError>> + Send + '_>> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Err(_) => Ok(None),
                Ok(None) => Err(BusError::Closed),
                Ok(Some(item)) => item.map(Some),
            }
        })
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
