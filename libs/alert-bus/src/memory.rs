use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::{mpsc, RwLock};

use crate::{BusError, BusMessage, BusSubscription, ChannelSubscription, MessageBus};

/// What a publisher does when a subscriber's channel is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the message for that subscriber, log a warning.
    #[default]
    Drop,
    /// Wait for room in the subscriber's channel.
    BackPressure,
}

// ═══════════════════════════════════════════════════════════════
//  Subscriber / Topic
// ═══════════════════════════════════════════════════════════════

struct Subscriber {
    tx: mpsc::Sender<Result<BusMessage, BusError>>,
}

/// Именованный канал: счётчик offset'ов + подписчики.
struct Topic {
    name: String,
    next_offset: AtomicI64,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl Topic {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            next_offset: AtomicI64::new(0),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    async fn attach(&self, tx: mpsc::Sender<Result<BusMessage, BusError>>) {
        self.subscribers.write().await.push(Subscriber { tx });
    }

    /// Deliver to every live subscriber; returns how many accepted it.
    async fn publish(&self, payload: Vec<u8>, overflow: OverflowPolicy) -> usize {
        let message = BusMessage {
            topic: self.name.clone(),
            partition: Some(0),
            offset: Some(self.next_offset.fetch_add(1, Ordering::Relaxed)),
            payload,
        };

        // prune closed, send outside the lock
        let senders: Vec<_> = {
            let mut subs = self.subscribers.write().await;
            subs.retain(|s| !s.tx.is_closed());
            subs.iter().map(|s| s.tx.clone()).collect()
        };

        let mut delivered = 0;
        for tx in senders {
            match overflow {
                OverflowPolicy::Drop => match tx.try_send(Ok(message.clone())) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(topic = %self.name, "subscriber channel full, dropping");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                },
                OverflowPolicy::BackPressure => {
                    if tx.send(Ok(message.clone())).await.is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBus
// ═══════════════════════════════════════════════════════════════

/// In-process bus. Topics are created on first use.
pub struct MemoryBus {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    buffer: usize,
    overflow: OverflowPolicy,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024, OverflowPolicy::Drop)
    }
}

impl MemoryBus {
    pub fn new(buffer: usize, overflow: OverflowPolicy) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            overflow,
        }
    }

    async fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(t) = self.topics.read().await.get(name) {
            return t.clone();
        }
        self.topics
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name)))
            .clone()
    }

    /// Publish to `topic`; returns the number of subscribers that got it.
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let t = self.topic(topic).await;
        let delivered = t.publish(payload.into(), self.overflow).await;
        tracing::debug!(topic, delivered, "memory bus publish");
        delivered
    }
}

impl MessageBus for MemoryBus {
    fn subscribe<'a>(
        &'a self,
        topics: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusSubscription>, BusError>> + Send + 'a>> {
        Box::pin(async move {
            if topics.is_empty() {
                return Err(BusError::Config("no topics to subscribe to".into()));
            }
            let (tx, rx) = mpsc::channel(self.buffer);
            for name in topics {
                self.topic(name).await.attach(tx.clone()).await;
            }
            Ok(Box::new(ChannelSubscription::new(rx)) as Box<dyn BusSubscription>)
        })
    }
}
