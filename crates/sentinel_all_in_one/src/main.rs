mod config;

use common::clickhouse::{ClickHouseClient, ClickHouseSecurityEventRepository};
use common::domain::SecurityEventRepository;
use common::nats::{NatsClient, PartitionRouter};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use ingest_api::http::CorsConfig;
use ingest_api::{IngestApi, IngestApiConfig};
use sentinel_runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use storage_worker::nats::ConsumerSettings;
use storage_worker::{StorageWorker, StorageWorkerConfig};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting sentinel-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let (partition_router, repository, nats_client) =
        match initialize_shared_dependencies(&config).await {
            Ok(deps) => deps,
            Err(e) => {
                error!("Failed to initialize shared dependencies: {:#}", e);
                std::process::exit(1);
            }
        };

    let ingest_api = match IngestApi::new(
        nats_client.create_publisher_client(),
        repository.clone(),
        partition_router.clone(),
        IngestApiConfig {
            bind_addr: config.http_bind_addr.clone(),
            cors: CorsConfig::from_comma_separated(&config.cors_allowed_origins),
            publish_ack_timeout: Duration::from_millis(config.publish_ack_timeout_ms),
            default_events_limit: config.events_default_limit,
        },
    ) {
        Ok(api) => api,
        Err(e) => {
            error!("Failed to initialize ingest API: {:#}", e);
            std::process::exit(1);
        }
    };

    let storage_worker = match build_storage_worker(
        &config,
        &nats_client,
        repository,
        &partition_router,
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize storage worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let runner = Runner::new()
        .with_named_process("ingest_api", ingest_api.into_runner_process())
        .with_named_process("storage_worker", storage_worker.into_runner_process())
        .with_closer(move || {
            Box::pin(async move {
                info!("Running cleanup tasks...");
                if let Err(e) = nats_client.close().await {
                    error!("Failed to close NATS connection: {:#}", e);
                }

                // Flush pending spans before exit
                shutdown_telemetry(telemetry_providers);

                info!("Cleanup complete");
                Ok(())
            })
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await;
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(
    PartitionRouter,
    Arc<ClickHouseSecurityEventRepository>,
    NatsClient,
)> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);

    info!("Initializing ClickHouse...");
    let clickhouse_client = ClickHouseClient::new(
        &config.clickhouse_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
    );
    tokio::time::timeout(startup_timeout, clickhouse_client.ping())
        .await
        .map_err(|_| anyhow::anyhow!("ClickHouse did not answer within {:?}", startup_timeout))??;

    let repository = Arc::new(ClickHouseSecurityEventRepository::new(
        clickhouse_client,
        config.clickhouse_table.clone(),
    ));
    repository.ensure_schema().await?;

    info!("Initializing NATS...");
    let nats_client = NatsClient::connect(&config.nats_url, startup_timeout).await?;
    let partition_router = PartitionRouter::new(config.nats_stream.clone(), config.nats_partitions)?;
    nats_client.ensure_stream(&partition_router).await?;
    if let Some(stream) = config.dead_letter_stream() {
        nats_client
            .ensure_plain_stream(&stream, "Discarded security events")
            .await?;
    }

    Ok((partition_router, repository, nats_client))
}

async fn build_storage_worker(
    config: &ServiceConfig,
    nats_client: &NatsClient,
    repository: Arc<ClickHouseSecurityEventRepository>,
    partition_router: &PartitionRouter,
) -> anyhow::Result<StorageWorker> {
    StorageWorker::new(
        nats_client.create_consumer_client(),
        nats_client.create_publisher_client(),
        repository,
        partition_router,
        StorageWorkerConfig {
            consumer_group: config.nats_consumer_group.clone(),
            partitions: config.assigned_partitions()?,
            consumer: ConsumerSettings {
                fetch_batch: config.nats_fetch_batch,
                fetch_wait: Duration::from_millis(config.nats_fetch_wait_ms),
                ack_wait: Duration::from_secs(config.nats_ack_wait_secs),
                flush_policy: config.flush_policy(),
                failure_policy: config.storage_failure_policy()?,
            },
            retry: config.storage_retry(),
            dead_letter_stream: config.dead_letter_stream(),
        },
    )
    .await
}
