use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use tokio::sync::mpsc;

use crate::{BusError, BusMessage, BusSubscription, ChannelSubscription, MessageBus};

/// Upper bound on one fetch response.
const FETCH_MAX_BYTES: i32 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub host: String,
    pub port: u16,
    /// Create missing topics (1 partition, replication 1) on subscribe.
    pub create_missing_topics: bool,
    /// Broker-side wait of one fetch request.
    pub fetch_wait: Duration,
    /// Channel size between partition fetchers and the subscription.
    pub buffer: usize,
}

impl KafkaSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            create_missing_topics: true,
            fetch_wait: Duration::from_millis(500),
            buffer: 1024,
        }
    }

    pub fn bootstrap(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ═══════════════════════════════════════════════════════════════
//  KafkaBus
// ═══════════════════════════════════════════════════════════════

/// Kafka consumer side of the bus.
///
/// Each subscription reads every partition of every topic starting at
/// the partition's latest offset at subscribe time; no group offsets
/// are committed.
pub struct KafkaBus {
    client: Client,
    settings: KafkaSettings,
}

impl KafkaBus {
    pub async fn connect(settings: KafkaSettings) -> Result<Self, BusError> {
        let bootstrap = settings.bootstrap();
        let client = ClientBuilder::new(vec![bootstrap.clone()])
            .build()
            .await
            .map_err(|e| BusError::Connect {
                bootstrap: bootstrap.clone(),
                detail: e.to_string(),
            })?;
        tracing::debug!(%bootstrap, "kafka client connected");
        Ok(Self { client, settings })
    }

    /// Partition count per topic, creating missing topics when allowed.
    async fn partitions(&self, topics: &[String]) -> Result<Vec<(String, i32)>, BusError> {
        let known = self.client.list_topics().await.map_err(BusError::broker)?;

        let mut out = Vec::with_capacity(topics.len());
        for name in topics {
            match known.iter().find(|t| &t.name == name) {
                Some(t) => out.push((name.clone(), t.partitions.len() as i32)),
                None if self.settings.create_missing_topics => {
                    let controller = self.client.controller_client().map_err(BusError::broker)?;
                    controller
                        .create_topic(name.clone(), 1, 1, 5_000)
                        .await
                        .map_err(BusError::broker)?;
                    tracing::info!(topic = %name, "kafka topic created");
                    out.push((name.clone(), 1));
                }
                None => return Err(BusError::TopicNotFound(name.clone())),
            }
        }
        Ok(out)
    }
}

impl MessageBus for KafkaBus {
    fn subscribe<'a>(
        &'a self,
        topics: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusSubscription>, BusError>> + Send + 'a>> {
        Box::pin(async move {
            if topics.is_empty() {
                return Err(BusError::Config("no topics to subscribe to".into()));
            }

            let (tx, rx) = mpsc::channel(self.settings.buffer.max(1));
            let max_wait_ms = self.settings.fetch_wait.as_millis().min(i32::MAX as u128) as i32;
            let mut tasks = Vec::new();

            for (topic, count) in self.partitions(topics).await? {
                for partition in 0..count {
                    let client = self
                        .client
                        .partition_client(topic.clone(), partition, UnknownTopicHandling::Retry)
                        .await
                        .map_err(BusError::broker)?;
                    // Start offset is fixed before the subscription is handed out.
                    let offset = client.get_offset(OffsetAt::Latest).await.map_err(BusError::broker)?;
                    tracing::debug!(%topic, partition, offset, "kafka partition subscribed");

                    let fetcher = PartitionFetcher {
                        topic: topic.clone(),
                        partition,
                        client,
                        offset,
                        max_wait_ms,
                    };
                    tasks.push(tokio::spawn(fetcher.run(tx.clone())));
                }
            }

            Ok(Box::new(ChannelSubscription::new(rx).with_tasks(tasks)) as Box<dyn BusSubscription>)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  PartitionFetcher
// ═══════════════════════════════════════════════════════════════

struct PartitionFetcher {
    topic: String,
    partition: i32,
    client: PartitionClient,
    offset: i64,
    max_wait_ms: i32,
}

impl PartitionFetcher {
    async fn run(mut self, tx: mpsc::Sender<Result<BusMessage, BusError>>) {
        loop {
            let records = match self
                .client
                .fetch_records(self.offset, 1..FETCH_MAX_BYTES, self.max_wait_ms)
                .await
            {
                Ok((records, _high_watermark)) => records,
                Err(e) => {
                    tracing::warn!(topic = %self.topic, partition = self.partition, error = %e, "kafka fetch failed");
                    let _ = tx.send(Err(BusError::broker(e))).await;
                    return;
                }
            };

            for r in records {
                // compressed batches may start before the requested offset
                if r.offset < self.offset {
                    continue;
                }
                self.offset = r.offset + 1;
                let message = BusMessage {
                    topic: self.topic.clone(),
                    partition: Some(self.partition),
                    offset: Some(r.offset),
                    payload: r.record.value.unwrap_or_default(),
                };
                if tx.send(Ok(message)).await.is_err() {
                    return;
                }
            }
        }
    }
}
