use crate::domain::{EventBatch, EventStorageService, FlushPolicy, StorageFailurePolicy};
use crate::nats::{DeadLetterSink, DiscardReason};
use anyhow::{Context, Result};
use common::domain::StoredEvent;
use common::nats::{
    link_span_to_headers, AckDecision, ConsumedMessage, ConsumerAssignment, JetStreamConsumer,
    PartitionRouter, PullConsumer,
};
use common::wire::decode_security_event;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Upper bound on messages per fetch
    pub fetch_batch: usize,
    /// How long one fetch may wait for messages
    pub fetch_wait: Duration,
    /// Redelivery delay for messages that are never settled
    pub ack_wait: Duration,
    pub flush_policy: FlushPolicy,
    pub failure_policy: StorageFailurePolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            fetch_batch: 100,
            fetch_wait: Duration::from_secs(1),
            ack_wait: Duration::from_secs(30),
            flush_policy: FlushPolicy::PerEvent,
            failure_policy: StorageFailurePolicy::Drop,
        }
    }
}

/// Pulls security events from the assigned partitions and writes them to
/// storage, one fetch-decode-flush-settle cycle at a time.
///
/// A message is settled only after the outcome for it is known: discarded
/// messages are terminated right away, stored ones are acked after their
/// batch was written, and a failed batch is acked or nak'd according to
/// the failure policy.
pub struct SecurityEventConsumer {
    consumer: Box<dyn PullConsumer>,
    consumer_name: String,
    settings: ConsumerSettings,
    storage: Arc<EventStorageService>,
    dead_letter: Option<DeadLetterSink>,
    batch: EventBatch<ConsumedMessage>,
}

impl SecurityEventConsumer {
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        router: &PartitionRouter,
        assignment: &ConsumerAssignment,
        settings: ConsumerSettings,
        storage: Arc<EventStorageService>,
        dead_letter: Option<DeadLetterSink>,
    ) -> Result<Self> {
        let config = assignment.pull_config(router, settings.ack_wait);
        let consumer_name = assignment.durable_name(router);

        debug!(
            stream = %router.stream(),
            consumer = %consumer_name,
            partitions = ?assignment.partitions(),
            "creating security event consumer"
        );

        let consumer = jetstream
            .create_consumer(config, router.stream())
            .await
            .with_context(|| format!("failed to create consumer {}", consumer_name))?;

        Ok(Self {
            consumer,
            consumer_name,
            settings,
            storage,
            dead_letter,
            batch: EventBatch::new(),
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until cancelled. Cancellation interrupts only the wait for the
    /// next fetch; whatever is buffered at that point is flushed and settled.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(consumer = %self.consumer_name, "starting security event consumer");

        loop {
            let wait = self
                .settings
                .flush_policy
                .fetch_wait(self.settings.fetch_wait, self.batch.age());

            let fetched = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                fetched = self.consumer.fetch_messages(self.settings.fetch_batch, wait) => fetched,
            };

            match fetched {
                Ok(messages) => {
                    if !messages.is_empty() {
                        debug!(message_count = messages.len(), "received message batch");
                    }
                    for msg in messages {
                        self.handle_message(msg).await;
                    }
                }
                Err(e) => {
                    error!(
                        consumer = %self.consumer_name,
                        error = %e,
                        "error fetching messages"
                    );
                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(FETCH_ERROR_BACKOFF) => {}
                    }
                }
            }

            // age-based flush when the fetch came back empty
            if self
                .settings
                .flush_policy
                .should_flush(self.batch.len(), self.batch.age())
            {
                self.flush().await;
            }
        }

        info!(
            consumer = %self.consumer_name,
            buffered = self.batch.len(),
            "received shutdown signal, flushing and stopping consumer"
        );
        self.flush().await;

        Ok(())
    }

    async fn handle_message(&mut self, msg: ConsumedMessage) {
        let span = info_span!(
            "consume_security_event",
            subject = %msg.subject,
            delivered = msg.delivered,
        );
        link_span_to_headers(&span, msg.headers.as_ref());

        async {
            let event = match decode_security_event(&msg.payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(subject = %msg.subject, error = %e, "discarding undecodable message");
                    self.discard(msg, DiscardReason::Decode, e.to_string()).await;
                    return;
                }
            };

            let stored = match StoredEvent::try_from(event) {
                Ok(stored) => stored,
                Err(e) => {
                    error!(subject = %msg.subject, error = %e, "discarding event with invalid timestamp");
                    self.discard(msg, DiscardReason::Timestamp, e.to_string()).await;
                    return;
                }
            };

            self.batch.push(stored, msg);

            if self
                .settings
                .flush_policy
                .should_flush(self.batch.len(), self.batch.age())
            {
                self.flush().await;
            }
        }
        .instrument(span)
        .await
    }

    async fn discard(&self, msg: ConsumedMessage, reason: DiscardReason, error_text: String) {
        if let Some(sink) = &self.dead_letter {
            sink.forward(msg.payload.clone(), reason, &error_text).await;
        }
        settle(msg, AckDecision::Term).await;
    }

    async fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let (events, receipts) = self.batch.take();
        let event_count = events.len();

        let decision = match self.storage.store(events).await {
            Ok(()) => {
                debug!(event_count, "stored event batch");
                AckDecision::Ack
            }
            Err(e) => {
                let decision = match self.settings.failure_policy {
                    StorageFailurePolicy::Drop => AckDecision::Ack,
                    StorageFailurePolicy::Redeliver => AckDecision::Nak,
                };
                error!(
                    event_count,
                    error = %e,
                    decision = ?decision,
                    "failed to store event batch"
                );
                decision
            }
        };

        for msg in receipts {
            settle(msg, decision).await;
        }
    }
}

async fn settle(msg: ConsumedMessage, decision: AckDecision) {
    let subject = msg.subject.clone();
    if let Err(e) = msg.settle(decision).await {
        // unsettled messages come back after ack_wait
        error!(subject = %subject, decision = ?decision, error = %e, "failed to settle message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StorageRetry;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use common::domain::{AppendEventsInput, DomainError, MockSecurityEventRepository};
    use common::nats::{MessageAcker, MockJetStreamConsumer, MockJetStreamPublisher, MockPullConsumer};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Settled = Arc<Mutex<Vec<(String, AckDecision)>>>;

    /// Records every settle call as (message id, decision)
    struct RecordingAcker {
        id: String,
        settled: Settled,
    }

    #[async_trait]
    impl MessageAcker for RecordingAcker {
        async fn settle(&self, decision: AckDecision) -> Result<()> {
            self.settled
                .lock()
                .unwrap()
                .push((self.id.clone(), decision));
            Ok(())
        }
    }

    fn message(id: &str, payload: &str, settled: &Settled) -> ConsumedMessage {
        ConsumedMessage::new(
            format!("security_events.p0.{}", id),
            Bytes::from(payload.to_string()),
            None,
            1,
            Box::new(RecordingAcker {
                id: id.to_string(),
                settled: settled.clone(),
            }),
        )
    }

    fn event_json(timestamp: &str, hostname: &str, details: &str) -> String {
        serde_json::json!({
            "timestamp": timestamp,
            "hostname": hostname,
            "event_type": "login",
            "details": details,
        })
        .to_string()
    }

    /// Pull consumer that hands out the given fetches in order, then
    /// cancels the token and keeps returning empty fetches
    fn scripted_pull_consumer(
        fetches: Vec<Vec<ConsumedMessage>>,
        ctx: CancellationToken,
    ) -> MockPullConsumer {
        let queue = Mutex::new(VecDeque::from(fetches));
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages().returning(move |_, _| {
            let next = queue.lock().unwrap().pop_front();
            match next {
                Some(batch) => Ok(batch),
                None => {
                    ctx.cancel();
                    Ok(vec![])
                }
            }
        });
        pull
    }

    async fn build_consumer(
        pull: MockPullConsumer,
        repo: MockSecurityEventRepository,
        settings: ConsumerSettings,
        dead_letter: Option<DeadLetterSink>,
    ) -> SecurityEventConsumer {
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream
            .expect_create_consumer()
            .withf(|config, stream| {
                stream.to_string() == "security_events"
                    && config.durable_name.as_deref() == Some("sentinel-storage-group")
            })
            .times(1)
            .return_once(move |_, _| Ok(Box::new(pull)));

        let router = PartitionRouter::new("security_events", 8).unwrap();
        let assignment = ConsumerAssignment::new(&router, "sentinel-storage-group", &[]).unwrap();
        let storage = Arc::new(EventStorageService::new(
            Arc::new(repo),
            StorageRetry::default(),
        ));

        SecurityEventConsumer::new(
            Arc::new(jetstream),
            &router,
            &assignment,
            settings,
            storage,
            dead_letter,
        )
        .await
        .unwrap()
    }

    fn recorded(settled: &Settled) -> Vec<(String, AckDecision)> {
        settled.lock().unwrap().clone()
    }

    fn entry(id: &str, decision: AckDecision) -> (String, AckDecision) {
        (id.to_string(), decision)
    }

    #[tokio::test]
    async fn test_valid_event_is_stored_and_acked() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();

        let pull = scripted_pull_consumer(
            vec![vec![message(
                "m1",
                &event_json("2024-01-01T00:00:00Z", "h1", "ok"),
                &settled,
            )]],
            ctx.clone(),
        );

        let mut repo = MockSecurityEventRepository::new();
        repo.expect_append_batch()
            .withf(|input: &AppendEventsInput| {
                input.events.len() == 1
                    && input.events[0].timestamp
                        == Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    && input.events[0].hostname == "h1"
                    && input.events[0].details == "ok"
            })
            .times(1)
            .returning(|_| Ok(()));

        let consumer = build_consumer(pull, repo, ConsumerSettings::default(), None).await;
        consumer.run(ctx).await.unwrap();

        assert_eq!(recorded(&settled), vec![entry("m1", AckDecision::Ack)]);
    }

    #[tokio::test]
    async fn test_invalid_timestamp_is_discarded_and_loop_continues() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();

        let pull = scripted_pull_consumer(
            vec![
                vec![message("bad", &event_json("not-a-date", "h1", "x"), &settled)],
                vec![message(
                    "good",
                    &event_json("2024-01-01T00:00:01Z", "h1", "y"),
                    &settled,
                )],
            ],
            ctx.clone(),
        );

        let mut repo = MockSecurityEventRepository::new();
        repo.expect_append_batch()
            .withf(|input: &AppendEventsInput| input.events[0].details == "y")
            .times(1)
            .returning(|_| Ok(()));

        let consumer = build_consumer(pull, repo, ConsumerSettings::default(), None).await;
        consumer.run(ctx).await.unwrap();

        assert_eq!(
            recorded(&settled),
            vec![entry("bad", AckDecision::Term), entry("good", AckDecision::Ack)]
        );
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_terminated() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();

        let pull = scripted_pull_consumer(
            vec![vec![
                message("m1", "{not json", &settled),
                message("m2", r#"{"timestamp":"2024-01-01T00:00:00Z"}"#, &settled),
            ]],
            ctx.clone(),
        );

        let mut repo = MockSecurityEventRepository::new();
        repo.expect_append_batch().never();

        let consumer = build_consumer(pull, repo, ConsumerSettings::default(), None).await;
        consumer.run(ctx).await.unwrap();

        assert_eq!(
            recorded(&settled),
            vec![entry("m1", AckDecision::Term), entry("m2", AckDecision::Term)]
        );
    }

    #[tokio::test]
    async fn test_storage_failure_then_next_event_succeeds() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();

        let pull = scripted_pull_consumer(
            vec![vec![
                message("m1", &event_json("2024-01-01T00:00:00Z", "h1", "a"), &settled),
                message("m2", &event_json("2024-01-01T00:00:01Z", "h1", "b"), &settled),
            ]],
            ctx.clone(),
        );

        let mut repo = MockSecurityEventRepository::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_append_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DomainError::StorageError(anyhow::anyhow!("unreachable"))));
        repo.expect_append_batch()
            .withf(|input: &AppendEventsInput| input.events[0].details == "b")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let consumer = build_consumer(pull, repo, ConsumerSettings::default(), None).await;
        consumer.run(ctx).await.unwrap();

        // dropped batch still advances progress
        assert_eq!(
            recorded(&settled),
            vec![entry("m1", AckDecision::Ack), entry("m2", AckDecision::Ack)]
        );
    }

    #[tokio::test]
    async fn test_storage_failure_with_redeliver_policy_naks() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();

        let pull = scripted_pull_consumer(
            vec![vec![message(
                "m1",
                &event_json("2024-01-01T00:00:00Z", "h1", "a"),
                &settled,
            )]],
            ctx.clone(),
        );

        let mut repo = MockSecurityEventRepository::new();
        repo.expect_append_batch()
            .times(1)
            .returning(|_| Err(DomainError::StorageError(anyhow::anyhow!("unreachable"))));

        let settings = ConsumerSettings {
            failure_policy: StorageFailurePolicy::Redeliver,
            ..Default::default()
        };
        let consumer = build_consumer(pull, repo, settings, None).await;
        consumer.run(ctx).await.unwrap();

        assert_eq!(recorded(&settled), vec![entry("m1", AckDecision::Nak)]);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_stored_twice() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();
        let payload = event_json("2024-01-01T00:00:00Z", "h1", "dup");

        let pull = scripted_pull_consumer(
            vec![
                vec![message("first", &payload, &settled)],
                vec![message("again", &payload, &settled)],
            ],
            ctx.clone(),
        );

        let mut repo = MockSecurityEventRepository::new();
        repo.expect_append_batch().times(2).returning(|_| Ok(()));

        let consumer = build_consumer(pull, repo, ConsumerSettings::default(), None).await;
        consumer.run(ctx).await.unwrap();

        assert_eq!(
            recorded(&settled),
            vec![entry("first", AckDecision::Ack), entry("again", AckDecision::Ack)]
        );
    }

    #[tokio::test]
    async fn test_per_host_order_is_preserved() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();

        let pull = scripted_pull_consumer(
            vec![vec![
                message("e1", &event_json("2024-01-01T00:00:03Z", "h1", "1"), &settled),
                message("e2", &event_json("2024-01-01T00:00:01Z", "h1", "2"), &settled),
                message("e3", &event_json("2024-01-01T00:00:02Z", "h1", "3"), &settled),
            ]],
            ctx.clone(),
        );

        let written = Arc::new(Mutex::new(Vec::new()));
        let written_clone = written.clone();
        let mut repo = MockSecurityEventRepository::new();
        repo.expect_append_batch().times(3).returning(move |input| {
            let mut written = written_clone.lock().unwrap();
            written.extend(input.events.into_iter().map(|e| e.details));
            Ok(())
        });

        let consumer = build_consumer(pull, repo, ConsumerSettings::default(), None).await;
        consumer.run(ctx).await.unwrap();

        // delivery order, not timestamp order
        assert_eq!(*written.lock().unwrap(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_threshold_policy_flushes_full_batches() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();

        let pull = scripted_pull_consumer(
            vec![vec![
                message("m1", &event_json("2024-01-01T00:00:00Z", "h1", "a"), &settled),
                message("m2", &event_json("2024-01-01T00:00:01Z", "h2", "b"), &settled),
                message("m3", &event_json("2024-01-01T00:00:02Z", "h3", "c"), &settled),
            ]],
            ctx.clone(),
        );

        let mut repo = MockSecurityEventRepository::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_append_batch()
            .withf(|input: &AppendEventsInput| input.events.len() == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        // remainder flushed on shutdown
        repo.expect_append_batch()
            .withf(|input: &AppendEventsInput| {
                input.events.len() == 1 && input.events[0].details == "c"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let settings = ConsumerSettings {
            flush_policy: FlushPolicy::from_settings(2, 60_000),
            ..Default::default()
        };
        let consumer = build_consumer(pull, repo, settings, None).await;
        consumer.run(ctx).await.unwrap();

        assert_eq!(
            recorded(&settled),
            vec![
                entry("m1", AckDecision::Ack),
                entry("m2", AckDecision::Ack),
                entry("m3", AckDecision::Ack)
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_error_is_survived() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();
        let ctx_clone = ctx.clone();

        let mut first = Some(message(
            "m1",
            &event_json("2024-01-01T00:00:00Z", "h1", "a"),
            &settled,
        ));
        let mut calls = 0;
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages().returning(move |_, _| {
            calls += 1;
            match calls {
                1 => Err(anyhow::anyhow!("connection reset")),
                2 => Ok(first.take().into_iter().collect()),
                _ => {
                    ctx_clone.cancel();
                    Ok(vec![])
                }
            }
        });

        let mut repo = MockSecurityEventRepository::new();
        repo.expect_append_batch().times(1).returning(|_| Ok(()));

        let consumer = build_consumer(pull, repo, ConsumerSettings::default(), None).await;

        tokio::time::pause();
        consumer.run(ctx).await.unwrap();

        assert_eq!(recorded(&settled), vec![entry("m1", AckDecision::Ack)]);
    }

    #[tokio::test]
    async fn test_discarded_message_forwarded_to_dead_letter() {
        let settled = Settled::default();
        let ctx = CancellationToken::new();

        let pull = scripted_pull_consumer(
            vec![vec![message("m1", &event_json("yesterday", "h1", "x"), &settled)]],
            ctx.clone(),
        );

        let mut publisher = MockJetStreamPublisher::new();
        publisher
            .expect_publish_with_headers()
            .withf(|subject, _, payload| {
                subject == "security_events_dlq.timestamp"
                    && std::str::from_utf8(payload).unwrap().contains("yesterday")
            })
            .times(1)
            .returning(|_, _, _| Ok(1));

        let mut repo = MockSecurityEventRepository::new();
        repo.expect_append_batch().never();

        let sink = DeadLetterSink::new(Arc::new(publisher), "security_events_dlq");
        let consumer = build_consumer(pull, repo, ConsumerSettings::default(), Some(sink)).await;
        consumer.run(ctx).await.unwrap();

        assert_eq!(recorded(&settled), vec![entry("m1", AckDecision::Term)]);
    }

    #[tokio::test]
    async fn test_create_consumer_failure_is_reported() {
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream
            .expect_create_consumer()
            .return_once(|_, _| Err(anyhow::anyhow!("stream not found")));

        let router = PartitionRouter::new("security_events", 8).unwrap();
        let assignment = ConsumerAssignment::new(&router, "g", &[1]).unwrap();
        let storage = Arc::new(EventStorageService::new(
            Arc::new(MockSecurityEventRepository::new()),
            StorageRetry::default(),
        ));

        let result = SecurityEventConsumer::new(
            Arc::new(jetstream),
            &router,
            &assignment,
            ConsumerSettings::default(),
            storage,
            None,
        )
        .await;

        let err = result.err().unwrap();
        assert!(format!("{:#}", err).contains("g-p1"));
    }
}
