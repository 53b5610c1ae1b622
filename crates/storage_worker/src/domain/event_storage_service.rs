use common::domain::{AppendEventsInput, DomainResult, SecurityEventRepository, StoredEvent};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// What happens to a batch whose write finally failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageFailurePolicy {
    /// Ack and move on; the events are lost
    #[default]
    Drop,
    /// Nak so the broker delivers the events again
    Redeliver,
}

impl FromStr for StorageFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(StorageFailurePolicy::Drop),
            "redeliver" => Ok(StorageFailurePolicy::Redeliver),
            other => anyhow::bail!(
                "unknown storage failure policy '{}', expected 'drop' or 'redeliver'",
                other
            ),
        }
    }
}

/// Bounded retry for transient storage failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageRetry {
    /// Total attempts including the first; 1 disables retry
    pub max_attempts: u32,
    /// Attempt `n` waits `n * backoff` before the next try
    pub backoff: Duration,
}

impl StorageRetry {
    /// Longest time a batch can spend sleeping between attempts
    pub fn worst_case_backoff(&self) -> Duration {
        let retries = self.max_attempts.max(1) - 1;
        // 1 + 2 + ... + retries
        self.backoff * (retries * (retries + 1) / 2)
    }
}

impl Default for StorageRetry {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Domain service that writes decoded batches to the event store
pub struct EventStorageService {
    repository: Arc<dyn SecurityEventRepository>,
    retry: StorageRetry,
}

impl EventStorageService {
    pub fn new(repository: Arc<dyn SecurityEventRepository>, retry: StorageRetry) -> Self {
        Self { repository, retry }
    }

    #[instrument(skip(self, events), fields(event_count = events.len()))]
    pub async fn store(&self, events: Vec<StoredEvent>) -> DomainResult<()> {
        let input = AppendEventsInput { events };
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        // Only attempts that may still be retried need their own copy
        while attempt < max_attempts {
            match self.repository.append_batch(input.clone()).await {
                Ok(()) => {
                    debug!(attempt, "stored event batch");
                    return Ok(());
                }
                Err(e) if !e.is_permanent() => {
                    let delay = self.retry.backoff * attempt;
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "storage write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.repository.append_batch(input).await?;
        debug!(attempt, "stored event batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::{DomainError, MockSecurityEventRepository};

    fn stored(hostname: &str) -> StoredEvent {
        StoredEvent {
            timestamp: Utc::now(),
            hostname: hostname.to_string(),
            event_type: "login".to_string(),
            details: "ok".to_string(),
        }
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!(
            "drop".parse::<StorageFailurePolicy>().unwrap(),
            StorageFailurePolicy::Drop
        );
        assert_eq!(
            " Redeliver ".parse::<StorageFailurePolicy>().unwrap(),
            StorageFailurePolicy::Redeliver
        );
        assert!("retry".parse::<StorageFailurePolicy>().is_err());
    }

    #[tokio::test]
    async fn test_store_success() {
        let mut mock_repo = MockSecurityEventRepository::new();
        mock_repo
            .expect_append_batch()
            .withf(|input: &AppendEventsInput| {
                input.events.len() == 2 && input.events[0].hostname == "h1"
            })
            .times(1)
            .return_once(|_| Ok(()));

        let service = EventStorageService::new(Arc::new(mock_repo), StorageRetry::default());

        service
            .store(vec![stored("h1"), stored("h2")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_without_retry_fails_once() {
        let mut mock_repo = MockSecurityEventRepository::new();
        mock_repo.expect_append_batch().times(1).return_once(|_| {
            Err(DomainError::StorageError(anyhow::anyhow!("connection refused")))
        });

        let service = EventStorageService::new(Arc::new(mock_repo), StorageRetry::default());

        let result = service.store(vec![stored("h1")]).await;
        assert!(matches!(result, Err(DomainError::StorageError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_retries_transient_failure() {
        let mut mock_repo = MockSecurityEventRepository::new();
        let mut seq = mockall::Sequence::new();
        mock_repo
            .expect_append_batch()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_| Err(DomainError::StorageError(anyhow::anyhow!("timeout"))));
        mock_repo
            .expect_append_batch()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_| Ok(()));

        let service = EventStorageService::new(
            Arc::new(mock_repo),
            StorageRetry {
                max_attempts: 3,
                backoff: Duration::from_millis(100),
            },
        );

        service.store(vec![stored("h1")]).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_gives_up_after_max_attempts() {
        let mut mock_repo = MockSecurityEventRepository::new();
        mock_repo
            .expect_append_batch()
            .times(2)
            .returning(|_| Err(DomainError::StorageError(anyhow::anyhow!("down"))));

        let service = EventStorageService::new(
            Arc::new(mock_repo),
            StorageRetry {
                max_attempts: 2,
                backoff: Duration::from_millis(100),
            },
        );

        assert!(service.store(vec![stored("h1")]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_final_attempt_receives_full_batch() {
        let mut mock_repo = MockSecurityEventRepository::new();
        let mut seq = mockall::Sequence::new();
        mock_repo
            .expect_append_batch()
            .withf(|input: &AppendEventsInput| input.events.len() == 2)
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_| Err(DomainError::StorageError(anyhow::anyhow!("timeout"))));
        mock_repo
            .expect_append_batch()
            .withf(|input: &AppendEventsInput| {
                input.events.len() == 2 && input.events[1].hostname == "h2"
            })
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_| Ok(()));

        let service = EventStorageService::new(
            Arc::new(mock_repo),
            StorageRetry {
                max_attempts: 2,
                backoff: Duration::from_millis(100),
            },
        );

        service
            .store(vec![stored("h1"), stored("h2")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_permanent_error_is_not_retried() {
        let mut mock_repo = MockSecurityEventRepository::new();
        mock_repo
            .expect_append_batch()
            .times(1)
            .return_once(|_| Err(DomainError::ValidationError("bad row".to_string())));

        let service = EventStorageService::new(
            Arc::new(mock_repo),
            StorageRetry {
                max_attempts: 5,
                backoff: Duration::from_millis(100),
            },
        );

        let result = service.store(vec![stored("h1")]).await;
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[test]
    fn test_worst_case_backoff() {
        assert_eq!(StorageRetry::default().worst_case_backoff(), Duration::ZERO);

        let retry = StorageRetry {
            max_attempts: 4,
            backoff: Duration::from_millis(500),
        };
        // 500 + 1000 + 1500
        assert_eq!(retry.worst_case_backoff(), Duration::from_millis(3000));
    }
}
