use crate::nats::message::ConsumedMessage;
use crate::nats::partition::PartitionRouter;
use crate::nats::traits::{JetStreamConsumer, JetStreamPublisher, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_nats::HeaderMap;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Create the partitioned event stream unless it already exists
    pub async fn ensure_stream(&self, router: &PartitionRouter) -> Result<()> {
        self.ensure_stream_with_subjects(
            router.stream(),
            router.stream_subjects(),
            "Partitioned security events",
        )
        .await
    }

    /// Create a stream capturing `{name}.>` unless it already exists
    pub async fn ensure_plain_stream(&self, name: &str, description: &str) -> Result<()> {
        self.ensure_stream_with_subjects(name, vec![format!("{}.>", name)], description)
            .await
    }

    async fn ensure_stream_with_subjects(
        &self,
        name: &str,
        subjects: Vec<String>,
        description: &str,
    ) -> Result<()> {
        info!(stream = %name, "Ensuring stream exists");

        match self.jetstream.get_stream(name).await {
            Ok(_) => {
                info!(stream = %name, "Stream already exists");
            }
            Err(_) => {
                let config = StreamConfig {
                    name: name.to_string(),
                    subjects,
                    description: Some(description.to_string()),
                    storage: jetstream::stream::StorageType::File,
                    ..Default::default()
                };
                self.jetstream
                    .create_stream(config)
                    .await
                    .with_context(|| format!("Failed to create stream {}", name))?;
                info!(stream = %name, "Created stream");
            }
        }

        Ok(())
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    /// Flush pending publishes and drop the connection
    pub async fn close(self) -> Result<()> {
        info!("Closing NATS connection");
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;
        Ok(())
    }
}

pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("Failed to create consumer")?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: std::time::Duration,
    ) -> Result<Vec<ConsumedMessage>> {
        use futures::StreamExt;

        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("Failed to fetch messages")?;

        let mut result = Vec::new();
        while let Some(msg) = messages.next().await {
            match msg {
                Ok(message) => result.push(ConsumedMessage::from(message)),
                // the message stays un-acked and comes back after ack_wait
                Err(e) => warn!(error = %e, "Error receiving message"),
            }
        }

        debug!(count = result.len(), "Fetched messages");
        Ok(result)
    }
}

pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    async fn get_stream(&self, stream_name: &str) -> Result<()> {
        self.context
            .get_stream(stream_name)
            .await
            .context("Failed to get stream")?;
        Ok(())
    }

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()> {
        self.context
            .create_stream(config)
            .await
            .context("Failed to create stream")?;
        Ok(())
    }

    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: bytes::Bytes,
    ) -> Result<u64> {
        let ack = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .context("Failed to publish message to JetStream")?;

        let ack = ack
            .await
            .context("Failed to receive JetStream acknowledgment")?;
        Ok(ack.sequence)
    }
}
