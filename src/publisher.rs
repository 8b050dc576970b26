//! Snapshot fan-out.
//!
//! Publication is a reference swap on a watch channel: readers either see the
//! previous snapshot or the new one, never anything in between. Subscribers
//! get latest-wins delivery — a slow consumer's pending value is overwritten
//! rather than queued, so the cycle loop never blocks on a reader.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::snapshot::GridSnapshot;

pub struct SnapshotPublisher {
    tx: watch::Sender<Option<Arc<GridSnapshot>>>,
    history: RwLock<VecDeque<Arc<GridSnapshot>>>,
    depth: usize,
    shutdown: CancellationToken,
}

impl SnapshotPublisher {
    pub fn new(depth: usize, shutdown: CancellationToken) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            history: RwLock::new(VecDeque::with_capacity(depth)),
            depth: depth.max(1),
            shutdown,
        }
    }

    /// Swap in a fully built snapshot. Called once per cycle by the engine.
    pub fn publish(&self, snapshot: GridSnapshot) -> Arc<GridSnapshot> {
        let snapshot = Arc::new(snapshot);
        {
            let mut history = self.history.write();
            if history.len() == self.depth {
                history.pop_front();
            }
            history.push_back(snapshot.clone());
        }
        self.tx.send_replace(Some(snapshot.clone()));
        snapshot
    }

    /// Most recent fully built snapshot; `None` only before the first cycle.
    pub fn latest(&self) -> Option<Arc<GridSnapshot>> {
        self.tx.borrow().clone()
    }

    /// Recent snapshots, oldest first, at most `limit`.
    pub fn history(&self, limit: usize) -> Vec<Arc<GridSnapshot>> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Per-subscriber stream. Each subscriber gets its own cancellation
    /// handle; cancelling the publisher's token ends every stream.
    pub fn subscribe(&self) -> SnapshotStream {
        SnapshotStream {
            rx: self.tx.subscribe(),
            token: self.shutdown.child_token(),
        }
    }

    /// Ends all subscriber streams. Part of shutdown.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

pub struct SnapshotStream {
    rx: watch::Receiver<Option<Arc<GridSnapshot>>>,
    token: CancellationToken,
}

impl SnapshotStream {
    /// Next snapshot published after the last one seen, or `None` once the
    /// stream is cancelled or the publisher is gone. If several snapshots
    /// were published since the last call, only the newest is delivered.
    pub async fn recv(&mut self) -> Option<Arc<GridSnapshot>> {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => return None,
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    if let Some(snapshot) = self.rx.borrow_and_update().clone() {
                        return Some(snapshot);
                    }
                }
            }
        }
    }

    /// Cancels this stream only.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}
