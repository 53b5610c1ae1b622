use common::domain::StoredEvent;
use std::time::Duration;
use tokio::time::Instant;

/// Events awaiting a flush together with the delivery receipts that are
/// settled once the flush outcome is known
#[derive(Debug)]
pub struct EventBatch<R> {
    events: Vec<StoredEvent>,
    receipts: Vec<R>,
    opened_at: Option<Instant>,
}

impl<R> Default for EventBatch<R> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            receipts: Vec::new(),
            opened_at: None,
        }
    }
}

impl<R> EventBatch<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: StoredEvent, receipt: R) {
        if self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
        }
        self.events.push(event);
        self.receipts.push(receipt);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time since the first buffered event arrived
    pub fn age(&self) -> Option<Duration> {
        self.opened_at.map(|opened| opened.elapsed())
    }

    /// Drain the batch, events and receipts in arrival order
    pub fn take(&mut self) -> (Vec<StoredEvent>, Vec<R>) {
        self.opened_at = None;
        (
            std::mem::take(&mut self.events),
            std::mem::take(&mut self.receipts),
        )
    }
}
