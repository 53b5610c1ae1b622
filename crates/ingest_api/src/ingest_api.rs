use crate::domain::{EventIngestionService, EventQueryService};
use crate::http::{router, AppState, CorsConfig};
use crate::nats::NatsSecurityEventProducer;
use anyhow::Context;
use axum::Router;
use common::domain::SecurityEventReader;
use common::nats::{JetStreamPublisher, PartitionRouter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct IngestApiConfig {
    pub bind_addr: String,
    pub cors: CorsConfig,
    pub publish_ack_timeout: Duration,
    pub default_events_limit: u32,
}

/// HTTP boundary of the pipeline: ingestion, dashboard reads and health
pub struct IngestApi {
    app: Router,
    bind_addr: String,
}

impl IngestApi {
    pub fn new(
        publisher: Arc<dyn JetStreamPublisher>,
        reader: Arc<dyn SecurityEventReader>,
        partition_router: PartitionRouter,
        config: IngestApiConfig,
    ) -> anyhow::Result<Self> {
        info!("Initializing ingest API");

        let producer = Arc::new(NatsSecurityEventProducer::new(
            publisher,
            partition_router,
            config.publish_ack_timeout,
        ));
        let state = AppState::new(
            Arc::new(EventIngestionService::new(producer)),
            Arc::new(EventQueryService::new(reader, config.default_events_limit)),
        );
        let cors = config.cors.build_layer()?;

        Ok(Self {
            app: router(state, cors),
            bind_addr: config.bind_addr,
        })
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
           + Send
           + 'static {
        move |ctx| Box::pin(async move { self.serve(ctx).await })
    }

    /// Serve until the token is cancelled, then drain in-flight requests
    pub async fn serve(self, ctx: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.bind_addr))?;
        info!(addr = %self.bind_addr, "starting HTTP server");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                ctx.cancelled().await;
                debug!("HTTP server shutdown signal received");
            })
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped");
        Ok(())
    }
}
