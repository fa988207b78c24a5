use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;

use super::dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink};
use crate::config::{AckPolicy, KafkaConfig};
use crate::domain::order::Order;
use crate::health::{HealthMonitor, HealthStatus};
use crate::metrics::Metrics;
use crate::service::OrderService;

// ============================================================================
// Order Consumer - ingestion loop
// ============================================================================
//
// Pulls order messages from one topic/consumer group and hands each one to
// the `MessageProcessor`. Offsets are committed manually, one message at a
// time, once the message reached a terminal disposition:
//
//   saved                              -> commit
//   empty / undecodable payload        -> dead letter, commit
//   validation failure                 -> dead letter, commit
//   persistence failure (after retry)  -> dead letter, commit
//
// If the dead letter itself cannot be published the message is held and
// processed again after a pause; the offset is not committed meanwhile.
//
// ============================================================================

const HOLD_PAUSE: Duration = Duration::from_secs(1);

/// Position of a message in the feed
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

pub struct MessageProcessor {
    service: Arc<OrderService>,
    dead_letters: Arc<dyn DeadLetterSink>,
    ack_policy: AckPolicy,
    metrics: Arc<Metrics>,
}

impl MessageProcessor {
    pub fn new(
        service: Arc<OrderService>,
        dead_letters: Arc<dyn DeadLetterSink>,
        ack_policy: AckPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            service,
            dead_letters,
            ack_policy,
            metrics,
        }
    }

    /// Handle one message; `true` when its offset may be committed
    pub async fn process(&self, meta: &MessageMeta, payload: Option<&[u8]>) -> bool {
        let payload = match payload {
            Some(payload) if !payload.is_empty() => payload,
            _ => {
                self.metrics.record_ingested("decode_error");
                tracing::warn!(
                    topic = %meta.topic,
                    partition = meta.partition,
                    offset = meta.offset,
                    "Message has no payload"
                );
                let letter =
                    self.letter(meta, DeadLetterReason::Decode, "message has no payload", &[]);
                return self.dead_letter(letter).await;
            }
        };

        let order = match Order::from_json(payload) {
            Ok(order) => order,
            Err(e) => {
                self.metrics.record_ingested("decode_error");
                tracing::warn!(
                    topic = %meta.topic,
                    partition = meta.partition,
                    offset = meta.offset,
                    error = %e,
                    "Failed to decode order message"
                );
                let letter = self.letter(meta, DeadLetterReason::Decode, e, payload);
                return self.dead_letter(letter).await;
            }
        };

        let order_uid = order.order_uid.clone();
        tracing::debug!(
            order_uid = %order_uid,
            partition = meta.partition,
            offset = meta.offset,
            "Received order"
        );

        match self.service.save(order).await {
            Ok(()) => {
                self.metrics.record_ingested("saved");
                tracing::info!(
                    order_uid = %order_uid,
                    partition = meta.partition,
                    offset = meta.offset,
                    "📥 Order ingested"
                );
                true
            }
            Err(err) => {
                let outcome = if err.is_validation() {
                    "validation_error"
                } else {
                    "persistence_error"
                };
                self.metrics.record_ingested(outcome);

                let letter = self
                    .letter(meta, DeadLetterReason::from(&err), &err, payload)
                    .with_order_uid(order_uid);
                self.dead_letter(letter).await
            }
        }
    }

    fn letter(
        &self,
        meta: &MessageMeta,
        reason: DeadLetterReason,
        error: impl ToString,
        payload: &[u8],
    ) -> DeadLetter {
        DeadLetter::new(reason, error, &meta.topic, meta.partition, meta.offset, payload)
    }

    async fn dead_letter(&self, letter: DeadLetter) -> bool {
        if self.ack_policy == AckPolicy::Always {
            tracing::warn!(
                reason = letter.reason.as_str(),
                offset = letter.offset,
                error = %letter.error,
                "Dropping message"
            );
            return true;
        }

        match self.dead_letters.publish(&letter).await {
            Ok(()) => {
                self.metrics.record_dead_letter(letter.reason.as_str());
                true
            }
            Err(e) => {
                tracing::error!(
                    reason = letter.reason.as_str(),
                    partition = letter.partition,
                    offset = letter.offset,
                    error = %e,
                    "Dead letter not published, holding message"
                );
                false
            }
        }
    }
}

pub struct OrderConsumer {
    consumer: StreamConsumer,
    topic: String,
    processor: MessageProcessor,
    health: Arc<HealthMonitor>,
}

impl OrderConsumer {
    pub fn new(
        config: &KafkaConfig,
        processor: MessageProcessor,
        health: Arc<HealthMonitor>,
    ) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        tracing::info!(
            topic = %config.topic,
            consumer_group = %config.consumer_group,
            ack_policy = ?config.ack_policy,
            manual_commit = true,
            "Order consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            processor,
            health,
        })
    }

    /// Consume until the stream ends or the task is aborted
    pub async fn run(self) {
        self.health
            .update(
                "consumer",
                HealthStatus::Healthy,
                Some(format!("subscribed to {}", self.topic)),
            )
            .await;
        tracing::info!(topic = %self.topic, "🚀 Ingestion loop started");

        let mut status = ConsumerStatus::new(self.health.clone());
        let mut stream = self.consumer.stream();

        while let Some(result) = stream.next().await {
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to receive message");
                    status.degraded(e.to_string(), None).await;
                    continue;
                }
            };
            status.recovered().await;

            let meta = MessageMeta {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            };

            while !self.processor.process(&meta, message.payload()).await {
                status
                    .degraded(
                        "dead-letter topic unavailable".to_string(),
                        Some(format!("holding offset {}", meta.offset)),
                    )
                    .await;
                tokio::time::sleep(HOLD_PAUSE).await;
            }
            status.recovered().await;

            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                tracing::warn!(
                    topic = %meta.topic,
                    partition = meta.partition,
                    offset = meta.offset,
                    error = %e,
                    "Failed to commit offset (message may be redelivered)"
                );
            }
        }

        tracing::warn!(topic = %self.topic, "Ingestion loop stopped");
        self.health
            .update(
                "consumer",
                HealthStatus::Unhealthy("message stream ended".to_string()),
                None,
            )
            .await;
    }
}

/// Consumer health as pushed to the monitor; only transitions are written
struct ConsumerStatus {
    health: Arc<HealthMonitor>,
    degraded: bool,
}

impl ConsumerStatus {
    fn new(health: Arc<HealthMonitor>) -> Self {
        Self {
            health,
            degraded: false,
        }
    }

    async fn degraded(&mut self, reason: String, details: Option<String>) {
        if !self.degraded {
            self.degraded = true;
            self.health
                .update("consumer", HealthStatus::Degraded(reason), details)
                .await;
        }
    }

    async fn recovered(&mut self) {
        if self.degraded {
            self.degraded = false;
            self.health
                .update("consumer", HealthStatus::Healthy, None)
                .await;
            tracing::info!("Ingestion loop recovered");
        }
    }
}
