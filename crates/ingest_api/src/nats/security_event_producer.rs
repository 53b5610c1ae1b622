use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, SecurityEvent, SecurityEventProducer};
use common::nats::{
    JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, PartitionRouter, PublishRequest,
};
use common::wire::encode_security_event;
use std::sync::Arc;
use std::time::Duration;
use tower::Service;
use tracing::debug;

/// Publishes security events to the partitioned stream, one subject per host
pub struct NatsSecurityEventProducer {
    publisher: LayeredPublisher,
    router: PartitionRouter,
}

impl NatsSecurityEventProducer {
    pub fn new(
        jetstream: Arc<dyn JetStreamPublisher>,
        router: PartitionRouter,
        ack_timeout: Duration,
    ) -> Self {
        debug!(
            stream = %router.stream(),
            partitions = router.partition_count(),
            "initialized NatsSecurityEventProducer"
        );

        let publisher = NatsPublisherBuilder::new(jetstream, "security_event_producer")
            .with_ack_timeout(ack_timeout)
            .with_logging()
            .build();

        Self { publisher, router }
    }
}

#[async_trait]
impl SecurityEventProducer for NatsSecurityEventProducer {
    async fn publish(&self, event: &SecurityEvent) -> DomainResult<()> {
        let payload = encode_security_event(event)
            .map_err(|e| DomainError::PublishError(anyhow::Error::new(e)))?;
        let subject = self.router.subject_for(&event.hostname);

        self.publisher
            .clone()
            .call(PublishRequest::new(subject, payload))
            .await
            .map_err(DomainError::PublishError)?;

        Ok(())
    }
}
