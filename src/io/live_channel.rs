//! Live update channel - fan-out of registration and day-closure events
//!
//! Backed by a bounded tokio broadcast channel. Publishing never blocks and
//! never fails the caller: with no subscribers the event is dropped, and a
//! slow subscriber is lagged (it loses the oldest events) rather than
//! slowing down commits. Subscribers treat events as hints and reconcile
//! from the productivity snapshot.

use crate::domain::types::LiveEvent;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct LiveChannel {
    tx: broadcast::Sender<LiveEvent>,
}

impl LiveChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget publish; returns the number of subscribers reached
    pub fn publish(&self, event: LiveEvent) -> usize {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(kind = %kind, receivers = %receivers, "live_event_published");
                receivers
            }
            Err(_) => 0,
        }
    }

    /// Global subscription; date filtering is up to the subscriber
    pub fn subscribe(&self) -> LiveSubscription {
        LiveSubscription { rx: self.tx.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct LiveSubscription {
    rx: broadcast::Receiver<LiveEvent>,
}

impl LiveSubscription {
    /// Next event, skipping over any lag
    ///
    /// Returns None once the channel is closed. Lost events are counted
    /// into `metrics` when given.
    pub async fn recv(&mut self, metrics: Option<&Arc<Metrics>>) -> Option<LiveEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "live_subscriber_lagged");
                    if let Some(metrics) = metrics {
                        metrics.record_live_events_dropped(skipped);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of `recv`; None when nothing is queued
    pub fn try_recv(&mut self) -> Option<LiveEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "live_subscriber_lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
