use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{info, error};
use shipdesk_core::repository::NotificationSink;
use shipdesk_shared::models::events::FulfillmentEvent;

/// Kafka-backed audit sink. Topics are `{prefix}.fulfillment.created` etc.,
/// keyed by order id so one order's events stay ordered.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    topic_prefix: String,
}

impl EventProducer {
    pub fn new(brokers: &str, topic_prefix: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic_prefix: topic_prefix.to_string(),
        })
    }

    pub async fn publish_raw(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!("Sent message to {}/{}: partition {} offset {}", topic, key, delivery.partition, delivery.offset);
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl NotificationSink for EventProducer {
    async fn publish(
        &self,
        event: &FulfillmentEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let topic = format!("{}.{}", self.topic_prefix, event.topic());
        let payload = serde_json::to_string(event)?;
        self.publish_raw(&topic, &event.order_id().to_string(), &payload).await?;
        Ok(())
    }
}

/// Sink used when no broker is configured
#[derive(Clone, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn publish(
        &self,
        event: &FulfillmentEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(topic = event.topic(), order_id = %event.order_id(), "{}", serde_json::to_string(event)?);
        Ok(())
    }
}
