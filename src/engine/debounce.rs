//! Keystroke debouncing for symbol search

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use super::events::EngineEvent;

/// What a keystroke resulted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceOutcome {
    /// Input was blank; nothing scheduled, candidates should be cleared now
    Cleared,
    /// A lookup will be due after the quiet period unless superseded
    Scheduled { generation: u64 },
}

/// Turns every change of the search box into at most one `SearchDue` per quiet period.
///
/// Each keystroke aborts the pending timer and bumps a generation counter. A timer that
/// already fired before being aborted still carries its old generation, so the receiver
/// checks [`SearchDebouncer::is_current`] before acting on it.
pub struct SearchDebouncer {
    quiet_period: Duration,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl SearchDebouncer {
    pub fn new(quiet_period: Duration, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            quiet_period,
            generation: 0,
            pending: None,
            events,
        }
    }

    pub fn input(&mut self, text: &str) -> DebounceOutcome {
        self.cancel();

        let text = text.trim();
        if text.is_empty() {
            debug!("Search input cleared");
            return DebounceOutcome::Cleared;
        }

        let generation = self.generation;
        let events = self.events.clone();
        let quiet_period = self.quiet_period;
        let text = text.to_string();

        self.pending = Some(tokio::spawn(async move {
            sleep(quiet_period).await;
            let _ = events.send(EngineEvent::SearchDue { generation, text });
        }));

        DebounceOutcome::Scheduled { generation }
    }

    /// Abort the pending timer, if any, and invalidate anything it may already have sent
    pub fn cancel(&mut self) {
        self.generation += 1;
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }
}

impl Drop for SearchDebouncer {
    fn drop(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn debouncer() -> (SearchDebouncer, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SearchDebouncer::new(Duration::from_millis(300), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_last_keystroke_fires() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.input("A");
        sleep(Duration::from_millis(100)).await;
        debouncer.input("AA");
        sleep(Duration::from_millis(100)).await;
        let outcome = debouncer.input("AAP");

        let event = assert_ok!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await);
        match (event, outcome) {
            (
                Some(EngineEvent::SearchDue { generation, text }),
                DebounceOutcome::Scheduled { generation: expected },
            ) => {
                assert_eq!(text, "AAP");
                assert_eq!(generation, expected);
                assert!(debouncer.is_current(generation));
            }
            (other, _) => panic!("unexpected event: {:?}", other),
        }

        sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_input_clears_without_scheduling() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.input("MS");
        assert_eq!(debouncer.input("   "), DebounceOutcome::Cleared);

        sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_timer_is_invalidated_by_newer_input() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.input("T");
        sleep(Duration::from_millis(400)).await;

        // Already queued, then superseded before being handled
        debouncer.input("TS");
        match rx.recv().await {
            Some(EngineEvent::SearchDue { generation, text }) => {
                assert_eq!(text, "T");
                assert!(!debouncer.is_current(generation));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
