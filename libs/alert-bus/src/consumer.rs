use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{BusError, BusMessage, MessageBus};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topics: Vec<String>,
    /// A poll with no new data for this long stops the worker.
    pub wait_budget: Duration,
    pub max_messages: Option<usize>,
    /// Capacity of the worker → consumer channel.
    pub buffer: usize,
    /// How long `start` waits for the subscription to be established.
    pub ready_timeout: Duration,
}

impl ConsumerSettings {
    pub fn new(topics: Vec<String>, wait_budget: Duration) -> Self {
        Self {
            topics,
            wait_budget,
            max_messages: None,
            buffer: 1024,
            ready_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Running,
    Joined,
}

/// Why the worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `max_messages` reached.
    Exhausted,
    /// A poll waited the full budget without new data.
    TimedOut,
    /// The bus or the receiving side went away.
    Closed,
    Failed(String),
}

/// Result of one `join` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Messages collected so far, over all joins.
    pub collected: usize,
    /// The worker finished and everything it produced was drained.
    pub finished: bool,
}

// ═══════════════════════════════════════════════════════════════
//  AlertConsumer
// ═══════════════════════════════════════════════════════════════

/// Background worker collecting alert messages from a set of topics.
///
/// The worker is the only producer; it hands messages over a bounded
/// channel and `join` drains that channel against a deadline.
/// Dropping the consumer aborts the worker.
pub struct AlertConsumer {
    settings: ConsumerSettings,
    state: ConsumerState,
    rx: Option<mpsc::Receiver<BusMessage>>,
    collected: Vec<BusMessage>,
    stop: Arc<Mutex<Option<StopReason>>>,
    worker: Option<JoinHandle<()>>,
}

impl AlertConsumer {
    pub fn new(settings: ConsumerSettings) -> Self {
        Self {
            settings,
            state: ConsumerState::Created,
            rx: None,
            collected: Vec::new(),
            stop: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    /// Create and start in one go.
    pub async fn spawn(bus: Arc<dyn MessageBus>, settings: ConsumerSettings) -> Result<Self, BusError> {
        let mut consumer = Self::new(settings);
        consumer.start(bus).await?;
        Ok(consumer)
    }

    /// Spawn the worker and wait until its subscription is live.
    ///
    /// If the subscription is not ready within `ready_timeout` the worker
    /// keeps going and `start` returns anyway.
    pub async fn start(&mut self, bus: Arc<dyn MessageBus>) -> Result<(), BusError> {
        if self.state != ConsumerState::Created {
            return Err(BusError::Config("consumer already started".into()));
        }

        let (tx, rx) = mpsc::channel(self.settings.buffer.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = Worker {
            topics: self.settings.topics.clone(),
            wait_budget: self.settings.wait_budget,
            max_messages: self.settings.max_messages,
            stop: self.stop.clone(),
        };
        self.worker = Some(tokio::spawn(worker.run(bus, tx, ready_tx)));
        self.rx = Some(rx);
        self.state = ConsumerState::Running;

        match tokio::time::timeout(self.settings.ready_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => {
                tracing::warn!(
                    topics = ?self.settings.topics,
                    timeout_ms = self.settings.ready_timeout.as_millis() as u64,
                    "consumer subscription not ready in time, continuing"
                );
                Ok(())
            }
        }
    }

    /// Drain whatever the worker produces for at most `timeout`.
    ///
    /// Returns as soon as the worker has finished and the channel is
    /// empty, or when the deadline passes. Never waits longer.
    pub async fn join(&mut self, timeout: Duration) -> JoinOutcome {
        let deadline = Instant::now() + timeout;
        let mut finished = false;

        if let Some(rx) = self.rx.as_mut() {
            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(message)) => self.collected.push(message),
                    Ok(None) => {
                        finished = true;
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
        if self.state == ConsumerState::Running {
            self.state = ConsumerState::Joined;
        }

        tracing::debug!(
            collected = self.collected.len(),
            finished,
            stop = ?self.stop_reason(),
            "consumer joined"
        );
        JoinOutcome {
            collected: self.collected.len(),
            finished,
        }
    }

    /// Messages drained so far, in arrival order. May be a prefix.
    pub fn collected(&self) -> &[BusMessage] {
        &self.collected
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Set once the worker has stopped.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop.lock().ok().and_then(|s| s.clone())
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }
}

impl Drop for AlertConsumer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Worker
// ═══════════════════════════════════════════════════════════════

struct Worker {
    topics: Vec<String>,
    wait_budget: Duration,
    max_messages: Option<usize>,
    stop: Arc<Mutex<Option<StopReason>>>,
}

impl Worker {
    async fn run(
        self,
        bus: Arc<dyn MessageBus>,
        tx: mpsc::Sender<BusMessage>,
        ready: oneshot::Sender<Result<(), BusError>>,
    ) {
        let mut subscription = match bus.subscribe(&self.topics).await {
            Ok(s) => {
                let _ = ready.send(Ok(()));
                s
            }
            Err(e) => {
                tracing::error!(topics = ?self.topics, error = %e, "consumer subscribe failed");
                self.finish(StopReason::Failed(e.to_string()));
                let _ = ready.send(Err(e));
                return;
            }
        };
        tracing::info!(topics = ?self.topics, "consumer subscribed");

        let mut count = 0usize;
        let reason = loop {
            if self.max_messages.is_some_and(|max| count >= max) {
                break StopReason::Exhausted;
            }
            match subscription.poll(self.wait_budget).await {
                Ok(Some(message)) => {
                    tracing::debug!(topic = %message.topic, offset = ?message.offset, "alert received");
                    if tx.send(message).await.is_err() {
                        break StopReason::Closed;
                    }
                    count += 1;
                }
                Ok(None) => break StopReason::TimedOut,
                Err(BusError::Closed) => break StopReason::Closed,
                Err(e) => break StopReason::Failed(e.to_string()),
            }
        };

        // release the broker side before reporting
        drop(subscription);
        tracing::info!(received = count, reason = ?reason, "consumer stopped");
        self.finish(reason);
    }

    fn finish(&self, reason: StopReason) {
        if let Ok(mut stop) = self.stop.lock() {
            *stop = Some(reason);
        }
    }
}
