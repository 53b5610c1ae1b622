use crate::clickhouse::ClickHouseClient;
use crate::domain::{
    AppendEventsInput, DomainError, DomainResult, SecurityEventReader, SecurityEventRepository,
    StoredEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::sql::Identifier;
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS ? (
    timestamp DateTime64(3, 'UTC'),
    hostname String,
    event_type String,
    details String
) ENGINE = MergeTree()
ORDER BY timestamp";

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct SecurityEventRow {
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub event_type: String,
    pub details: String,
}

impl From<&StoredEvent> for SecurityEventRow {
    fn from(event: &StoredEvent) -> Self {
        SecurityEventRow {
            timestamp: event.timestamp,
            hostname: event.hostname.clone(),
            event_type: event.event_type.clone(),
            details: event.details.clone(),
        }
    }
}

impl From<SecurityEventRow> for StoredEvent {
    fn from(row: SecurityEventRow) -> Self {
        StoredEvent {
            timestamp: row.timestamp,
            hostname: row.hostname,
            event_type: row.event_type,
            details: row.details,
        }
    }
}

/// ClickHouse implementation of the event store, write and read side
#[derive(Clone)]
pub struct ClickHouseSecurityEventRepository {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseSecurityEventRepository {
    pub fn new(client: ClickHouseClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl SecurityEventRepository for ClickHouseSecurityEventRepository {
    async fn ensure_schema(&self) -> DomainResult<()> {
        self.client
            .get_client()
            .query(CREATE_TABLE_SQL)
            .bind(Identifier(&self.table))
            .execute()
            .await
            .map_err(|e| {
                error!(table = %self.table, "failed to create events table: {}", e);
                DomainError::StorageError(e.into())
            })?;

        info!(table = %self.table, "events table ready");
        Ok(())
    }

    async fn append_batch(&self, input: AppendEventsInput) -> DomainResult<()> {
        if input.events.is_empty() {
            debug!("no events to append, skipping");
            return Ok(());
        }

        debug!(
            event_count = input.events.len(),
            table = %self.table,
            "appending event batch to ClickHouse"
        );

        let mut insert = self
            .client
            .get_client()
            .insert::<SecurityEventRow>(&self.table)
            .await
            .map_err(|e| {
                error!("failed to create ClickHouse insert: {}", e);
                DomainError::StorageError(e.into())
            })?;

        for event in &input.events {
            insert
                .write(&SecurityEventRow::from(event))
                .await
                .map_err(|e| {
                    error!("failed to write row to ClickHouse: {}", e);
                    DomainError::StorageError(e.into())
                })?;
        }

        // nothing is visible until end() commits the insert
        insert.end().await.map_err(|e| {
            error!("failed to finalize ClickHouse insert: {}", e);
            DomainError::StorageError(e.into())
        })?;

        debug!(rows_inserted = input.events.len(), "appended event batch");
        Ok(())
    }
}

#[async_trait]
impl SecurityEventReader for ClickHouseSecurityEventRepository {
    async fn recent_events(&self, limit: u32) -> DomainResult<Vec<StoredEvent>> {
        let rows = self
            .client
            .get_client()
            .query("SELECT ?fields FROM ? ORDER BY timestamp DESC LIMIT ?")
            .bind(Identifier(&self.table))
            .bind(limit)
            .fetch_all::<SecurityEventRow>()
            .await
            .map_err(|e| {
                error!(table = %self.table, "failed to query recent events: {}", e);
                DomainError::StorageError(e.into())
            })?;

        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }
}
