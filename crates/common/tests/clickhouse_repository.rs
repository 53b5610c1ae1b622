#![cfg(feature = "integration-tests")]

use chrono::{TimeZone, Utc};
use common::clickhouse::{ClickHouseClient, ClickHouseSecurityEventRepository};
use common::domain::{
    AppendEventsInput, SecurityEventReader, SecurityEventRepository, StoredEvent,
};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::clickhouse::ClickHouse;

async fn setup() -> (ContainerAsync<ClickHouse>, ClickHouseSecurityEventRepository) {
    let clickhouse = ClickHouse::default().start().await.unwrap();
    let host = clickhouse.get_host().await.unwrap();
    let port = clickhouse.get_host_port_ipv4(8123).await.unwrap();

    let client = ClickHouseClient::new(&format!("http://{}:{}", host, port), "default", "default", "");
    client.ping().await.unwrap();

    let repo = ClickHouseSecurityEventRepository::new(client, "security_events");
    repo.ensure_schema().await.unwrap();

    (clickhouse, repo)
}

fn event(second: u32, hostname: &str) -> StoredEvent {
    StoredEvent {
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
        hostname: hostname.to_string(),
        event_type: "login".to_string(),
        details: format!("event at {}", second),
    }
}

#[tokio::test]
async fn test_ensure_schema_twice_succeeds() {
    let (_container, repo) = setup().await;

    repo.ensure_schema().await.unwrap();

    let events = repo.recent_events(10).await.unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_append_and_read_newest_first() {
    let (_container, repo) = setup().await;

    repo.append_batch(AppendEventsInput {
        events: vec![event(1, "h1"), event(3, "h2"), event(2, "h1")],
    })
    .await
    .unwrap();

    let events = repo.recent_events(2).await.unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], event(3, "h2"));
    assert_eq!(events[1], event(2, "h1"));
}

#[tokio::test]
async fn test_millisecond_precision_is_kept() {
    let (_container, repo) = setup().await;

    let timestamp = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00.123Z")
        .unwrap()
        .with_timezone(&Utc);
    let stored = StoredEvent {
        timestamp,
        ..event(0, "h1")
    };

    repo.append_batch(AppendEventsInput {
        events: vec![stored.clone()],
    })
    .await
    .unwrap();

    let events = repo.recent_events(1).await.unwrap();
    assert_eq!(events[0].timestamp, timestamp);
}

#[tokio::test]
async fn test_empty_batch_writes_nothing() {
    let (_container, repo) = setup().await;

    repo.append_batch(AppendEventsInput { events: vec![] })
        .await
        .unwrap();

    assert!(repo.recent_events(10).await.unwrap().is_empty());
}
