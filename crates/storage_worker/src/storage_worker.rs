use crate::domain::{EventStorageService, StorageRetry};
use crate::nats::{ConsumerSettings, DeadLetterSink, SecurityEventConsumer};
use common::domain::SecurityEventRepository;
use common::nats::{ConsumerAssignment, JetStreamConsumer, JetStreamPublisher, PartitionRouter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct StorageWorkerConfig {
    pub consumer_group: String,
    /// Empty means every partition
    pub partitions: Vec<u32>,
    pub consumer: ConsumerSettings,
    pub retry: StorageRetry,
    pub dead_letter_stream: Option<String>,
}

/// Consumer side of the pipeline: queue in, event store out
pub struct StorageWorker {
    consumer: SecurityEventConsumer,
}

impl StorageWorker {
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        publisher: Arc<dyn JetStreamPublisher>,
        repository: Arc<dyn SecurityEventRepository>,
        router: &PartitionRouter,
        config: StorageWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!("Initializing storage worker");

        let assignment =
            ConsumerAssignment::new(router, config.consumer_group, &config.partitions)?;
        let storage = Arc::new(EventStorageService::new(repository, config.retry));
        let dead_letter = config
            .dead_letter_stream
            .map(|stream| DeadLetterSink::new(publisher, stream));

        let consumer = SecurityEventConsumer::new(
            jetstream,
            router,
            &assignment,
            config.consumer,
            storage,
            dead_letter,
        )
        .await?;

        info!(
            consumer = %consumer.consumer_name(),
            partitions = ?assignment.partitions(),
            "Storage worker initialized"
        );

        Ok(Self { consumer })
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
           + Send
           + 'static {
        let consumer = self.consumer;
        move |ctx| Box::pin(async move { consumer.run(ctx).await })
    }
}
