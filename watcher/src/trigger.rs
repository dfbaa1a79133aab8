use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use streamwatch_common::config::KafkaConfig;
use streamwatch_common::frame::TriggerEvent;
use tracing::debug;

/// Destination for change triggers.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn publish(&self, event: &TriggerEvent) -> Result<(), SinkError>;
}

/// Publishes trigger events to a Kafka topic, keyed by channel.
pub struct KafkaTriggerSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaTriggerSink {
    pub fn new(config: &KafkaConfig) -> Result<Self, SinkError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("compression.type", &config.compression)
            .set("linger.ms", "5")
            .set("request.timeout.ms", "5000")
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| SinkError::Create(e.to_string()))?;
        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl TriggerSink for KafkaTriggerSink {
    async fn publish(&self, event: &TriggerEvent) -> Result<(), SinkError> {
        let payload = event
            .serialize()
            .map_err(|e| SinkError::Encode(e.to_string()))?;
        let record = FutureRecord::to(&self.topic)
            .key(&event.channel)
            .payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| SinkError::Send(e.to_string()))?;

        debug!(
            topic = self.topic,
            channel = event.channel,
            partition,
            offset,
            "trigger published"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to create Kafka producer: {0}")]
    Create(String),
    #[error("failed to encode trigger: {0}")]
    Encode(String),
    #[error("failed to deliver trigger: {0}")]
    Send(String),
}
