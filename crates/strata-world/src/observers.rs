//! Delivery of chunk updates to whoever is watching a chunk.
//!
//! Chunks only know the [`ChunkObservers`] trait. [`ChunkSubscribers`] is the
//! in-process implementation: each viewer subscribes to the chunks it has
//! loaded and drains encoded packets from a channel.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;

use crate::coords::ChunkCoord;

/// Receives encoded packets addressed to all viewers of a chunk.
pub trait ChunkObservers: Send + Sync {
    /// Delivers `packet` to every current observer of `coord`.
    fn multicast(&self, coord: ChunkCoord, packet: &[u8]);
}

/// Per-chunk subscriber lists backed by unbounded channels.
///
/// Receivers that have been dropped are pruned on the next multicast to
/// their chunk.
#[derive(Default)]
pub struct ChunkSubscribers {
    subscribers: DashMap<ChunkCoord, Vec<Sender<Arc<[u8]>>>>,
}

impl ChunkSubscribers {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new viewer of `coord` and returns its packet stream.
    pub fn subscribe(&self, coord: ChunkCoord) -> Receiver<Arc<[u8]>> {
        let (tx, rx) = unbounded();
        self.subscribers.entry(coord).or_default().push(tx);
        rx
    }

    /// Drops every viewer of `coord`.
    pub fn unsubscribe_all(&self, coord: ChunkCoord) {
        self.subscribers.remove(&coord);
    }

    /// Number of live-or-not-yet-pruned viewers of `coord`.
    pub fn observer_count(&self, coord: ChunkCoord) -> usize {
        self.subscribers.get(&coord).map_or(0, |subs| subs.len())
    }
}

impl ChunkObservers for ChunkSubscribers {
    fn multicast(&self, coord: ChunkCoord, packet: &[u8]) {
        let Some(mut subs) = self.subscribers.get_mut(&coord) else {
            return;
        };
        let packet: Arc<[u8]> = Arc::from(packet);
        subs.retain(|tx| tx.send(Arc::clone(&packet)).is_ok());
        tracing::trace!("multicast {} bytes to {} viewers of {coord}", packet.len(), subs.len());
    }
}
