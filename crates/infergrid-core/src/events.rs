//! Best-effort event feeds for heartbeat, alert, and scale notifications.
//!
//! Publishing never blocks. A feed fans out over a bounded broadcast ring:
//! a subscriber that falls behind by more than the capacity loses the
//! oldest events. Each subscriber then gets its own bounded queue filled
//! with `try_send`, so a full queue drops the newest event. Consumers must
//! tolerate gaps.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

pub struct EventFeed<T> {
    name: &'static str,
    tx: broadcast::Sender<T>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl<T: Clone + Send + 'static> EventFeed<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            name,
            tx,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: T) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Events dropped so far across all subscribers.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Subscribe until `cancel` flips to `true` or is dropped.
    ///
    /// The returned receiver closes once the subscription ends.
    pub fn subscribe(&self, mut cancel: watch::Receiver<bool>) -> mpsc::Receiver<T> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::channel(self.capacity);
        let dropped = self.dropped.clone();
        let name = self.name;

        tokio::spawn(async move {
            if *cancel.borrow() {
                return;
            }
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => match out_tx.try_send(event) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                dropped.fetch_add(1, Ordering::Relaxed);
                                debug!(feed = name, "subscriber queue full, event dropped");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            dropped.fetch_add(skipped, Ordering::Relaxed);
                            debug!(feed = name, skipped, "subscriber lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(feed = name, "subscription closed");
        });

        out_rx
    }
}
