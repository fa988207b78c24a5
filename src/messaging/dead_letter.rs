use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::KafkaConfig;
use crate::db::RepositoryError;
use crate::domain::order::OrderError;
use crate::utils::{
    retry_on_transient, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, RetryPolicy,
};

// ============================================================================
// Dead Letters
// ============================================================================
//
// A message that can never be stored (undecodable, invalid, conflicting) or
// that kept failing after every retry is wrapped in a `DeadLetter` envelope
// and published to the dead-letter topic. The consumer commits its offset
// only once the envelope is accepted by the broker.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Empty payload or malformed JSON
    Decode,
    Validation,
    /// order_uid or track_number already persisted
    Conflict,
    /// Storage rejected the order permanently
    Persistence,
    /// Storage still unreachable after every retry
    Unavailable,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Decode => "decode",
            DeadLetterReason::Validation => "validation",
            DeadLetterReason::Conflict => "conflict",
            DeadLetterReason::Persistence => "persistence",
            DeadLetterReason::Unavailable => "unavailable",
        }
    }
}

impl From<&OrderError> for DeadLetterReason {
    fn from(err: &OrderError) -> Self {
        match err {
            OrderError::Validation(_) => DeadLetterReason::Validation,
            OrderError::Persistence(RepositoryError::Conflict(_)) => DeadLetterReason::Conflict,
            OrderError::Persistence(RepositoryError::Unavailable(_)) => {
                DeadLetterReason::Unavailable
            }
            OrderError::Persistence(_) => DeadLetterReason::Persistence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub reason: DeadLetterReason,
    pub error: String,
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub order_uid: Option<String>,
    /// Original payload, lossily decoded as UTF-8
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        reason: DeadLetterReason,
        error: impl ToString,
        source_topic: &str,
        partition: i32,
        offset: i64,
        payload: &[u8],
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            reason,
            error: error.to_string(),
            source_topic: source_topic.to_string(),
            partition,
            offset,
            order_uid: None,
            payload: String::from_utf8_lossy(payload).into_owned(),
            failed_at: Utc::now(),
        }
    }

    pub fn with_order_uid(mut self, order_uid: impl Into<String>) -> Self {
        self.order_uid = Some(order_uid.into());
        self
    }

    /// Record key: the order identifier when known, else the source position
    pub fn key(&self) -> String {
        match &self.order_uid {
            Some(uid) if !uid.is_empty() => uid.clone(),
            _ => format!("{}-{}-{}", self.source_topic, self.partition, self.offset),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, letter: &DeadLetter) -> anyhow::Result<()>;
}

// ============================================================================
// Kafka dead-letter producer
// ============================================================================

pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
}

impl KafkaDeadLetterSink {
    pub fn new(config: &KafkaConfig, retry_policy: RetryPolicy) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
            success_threshold: 3,
        };

        tracing::info!(topic = %config.dead_letter_topic, "Dead-letter producer created");

        Ok(Self {
            producer,
            topic: config.dead_letter_topic.clone(),
            circuit_breaker: CircuitBreaker::new(cb_config),
            retry_policy,
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }
}

async fn send(
    producer: &FutureProducer,
    topic: &str,
    key: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    let record = FutureRecord::to(topic).key(key).payload(payload);

    producer
        .send(record, Timeout::After(Duration::from_secs(5)))
        .await
        .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))?;

    Ok(())
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn publish(&self, letter: &DeadLetter) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(letter)?;
        let key = letter.key();

        let producer = &self.producer;
        let breaker = &self.circuit_breaker;
        let topic = self.topic.as_str();
        let (key_ref, payload_ref) = (key.as_str(), payload.as_slice());

        let result = retry_on_transient(&self.retry_policy, move |_attempt| {
            breaker.call(send(producer, topic, key_ref, payload_ref))
        })
        .await
        .into_result();

        match result {
            Ok(()) => {
                tracing::warn!(
                    topic = %self.topic,
                    key = %key,
                    reason = letter.reason.as_str(),
                    source_offset = letter.offset,
                    "💀 Message routed to dead-letter topic"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(
                    topic = %self.topic,
                    "Circuit breaker open - dead-letter topic unavailable"
                );
                Err(anyhow::anyhow!("Circuit breaker open for dead-letter topic"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %self.topic, "Failed to publish dead letter");
                Err(e)
            }
        }
    }
}

// ============================================================================
// In-memory sink (tests only)
// ============================================================================
