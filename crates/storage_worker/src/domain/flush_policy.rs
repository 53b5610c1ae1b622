use std::time::Duration;

/// When buffered events are handed to storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Write every event as soon as it is decoded
    #[default]
    PerEvent,
    /// Write when `max_events` are buffered or the oldest buffered event
    /// has waited `max_wait`, whichever comes first
    Threshold {
        max_events: usize,
        max_wait: Duration,
    },
}

impl FlushPolicy {
    /// `max_events` of 0 or 1 means per-event writes
    pub fn from_settings(max_events: usize, max_wait_ms: u64) -> Self {
        if max_events <= 1 {
            return FlushPolicy::PerEvent;
        }

        FlushPolicy::Threshold {
            max_events,
            max_wait: Duration::from_millis(max_wait_ms),
        }
    }

    pub fn should_flush(&self, buffered: usize, oldest_age: Option<Duration>) -> bool {
        if buffered == 0 {
            return false;
        }

        match self {
            FlushPolicy::PerEvent => true,
            FlushPolicy::Threshold {
                max_events,
                max_wait,
            } => buffered >= *max_events || oldest_age.is_some_and(|age| age >= *max_wait),
        }
    }

    /// How long the next fetch may block without holding a partial batch
    /// past its deadline
    pub fn fetch_wait(&self, configured: Duration, oldest_age: Option<Duration>) -> Duration {
        match (self, oldest_age) {
            (FlushPolicy::Threshold { max_wait, .. }, Some(age)) => {
                let remaining = max_wait.saturating_sub(age);
                // JetStream rejects a zero expiry
                configured.min(remaining).max(Duration::from_millis(1))
            }
            _ => configured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_max_events_means_per_event() {
        assert_eq!(FlushPolicy::from_settings(0, 500), FlushPolicy::PerEvent);
        assert_eq!(FlushPolicy::from_settings(1, 500), FlushPolicy::PerEvent);
        assert_eq!(
            FlushPolicy::from_settings(100, 500),
            FlushPolicy::Threshold {
                max_events: 100,
                max_wait: Duration::from_millis(500)
            }
        );
    }

    #[test]
    fn test_per_event_flushes_anything_buffered() {
        let policy = FlushPolicy::PerEvent;
        assert!(!policy.should_flush(0, None));
        assert!(policy.should_flush(1, Some(Duration::ZERO)));
    }

    #[test]
    fn test_threshold_by_count() {
        let policy = FlushPolicy::from_settings(3, 1_000);
        assert!(!policy.should_flush(2, Some(Duration::from_millis(10))));
        assert!(policy.should_flush(3, Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_threshold_by_age() {
        let policy = FlushPolicy::from_settings(100, 200);
        assert!(!policy.should_flush(1, Some(Duration::from_millis(199))));
        assert!(policy.should_flush(1, Some(Duration::from_millis(200))));
    }

    #[test]
    fn test_fetch_wait_shrinks_to_batch_deadline() {
        let policy = FlushPolicy::from_settings(100, 200);
        let configured = Duration::from_secs(5);

        assert_eq!(policy.fetch_wait(configured, None), configured);
        assert_eq!(
            policy.fetch_wait(configured, Some(Duration::from_millis(50))),
            Duration::from_millis(150)
        );
        assert_eq!(
            policy.fetch_wait(configured, Some(Duration::from_secs(1))),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_fetch_wait_per_event_unchanged() {
        let configured = Duration::from_secs(5);
        assert_eq!(
            FlushPolicy::PerEvent.fetch_wait(configured, Some(Duration::from_secs(9))),
            configured
        );
    }
}
