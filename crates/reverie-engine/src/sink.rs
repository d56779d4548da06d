//! Event sinks: fan-out over a broadcast channel, and a tracing logger

use reverie_core::{Event, EventSink};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Forwards events to every subscriber. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<Event> {
        self.tx.clone()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Logs every event through `tracing`. Trigger, score and consolidation events
/// at info, the rest at debug.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        match &event {
            Event::TriggerGenerated { trigger } => info!(
                "[trigger] {} ({}, {}): {}",
                trigger.source.as_str(),
                trigger.category,
                trigger.priority,
                trigger.question
            ),
            Event::ScoresComputed { scores, paradigm_shift } => info!(
                "[scores] empathy={:.2} coherence={:.2} dissonance={:.2} total={:.3}{}",
                scores.values.empathy,
                scores.values.coherence,
                scores.values.dissonance,
                scores.weighted_total,
                if *paradigm_shift { " PARADIGM SHIFT" } else { "" }
            ),
            Event::WeightsReset { reason, .. } => info!("[weights] reset: {}", reason),
            Event::ConsolidationStarted { reason } => info!("[sleep] consolidation started: {}", reason),
            Event::ConsolidationCompleted { stats, duration_ms } => info!(
                "[sleep] done in {}ms: {} patterns, {} beliefs, {} pruned, {} insights",
                duration_ms,
                stats.patterns_extracted,
                stats.beliefs_created + stats.beliefs_updated,
                stats.records_pruned + stats.failsafe_pruned,
                stats.insights_created
            ),
            other => debug!(
                "[{}] {}",
                other.name(),
                serde_json::to_string(other).unwrap_or_default()
            ),
        }
    }
}

/// Sends each event to both sinks.
pub struct Tee<A, B>(pub A, pub B);

impl<A: EventSink, B: EventSink> EventSink for Tee<A, B> {
    fn emit(&self, event: Event) {
        self.0.emit(event.clone());
        self.1.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let sink = BroadcastSink::new(16);
        let mut rx = sink.subscribe();
        sink.emit(Event::ConsolidationStarted { reason: "manual".into() });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.name(), "consolidation_started");
    }

    #[test]
    fn broadcast_without_subscribers_is_fine() {
        BroadcastSink::default().emit(Event::ConsolidationStarted { reason: "x".into() });
    }

    #[tokio::test]
    async fn tee_feeds_both() {
        let a = BroadcastSink::new(4);
        let b = BroadcastSink::new(4);
        let (mut ra, mut rb) = (a.subscribe(), b.subscribe());
        Tee(a, b).emit(Event::ConsolidationStarted { reason: "x".into() });
        assert!(ra.recv().await.is_ok());
        assert!(rb.recv().await.is_ok());
    }
}
