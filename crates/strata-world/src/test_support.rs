//! In-memory chunk source for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::chunk::ChunkData;
use crate::chunk_store::{ChunkSource, StoreError};
use crate::coords::ChunkCoord;

/// Serves chunks from a map and counts loads and saves.
#[derive(Default)]
pub(crate) struct MemorySource {
    chunks: Mutex<HashMap<ChunkCoord, ChunkData>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
    delay: Duration,
}

impl MemorySource {
    /// A source where every chunk in the square of `radius` around the
    /// origin exists.
    pub(crate) fn with_square(radius: i32) -> Self {
        let source = Self::default();
        for coord in ChunkCoord::default().square(radius) {
            source.insert(ChunkData::new(coord));
        }
        source
    }

    /// Makes every load sleep first, widening race windows.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn insert(&self, data: ChunkData) {
        self.chunks.lock().unwrap().insert(data.coord(), data);
    }

    pub(crate) fn stored(&self, coord: ChunkCoord) -> Option<ChunkData> {
        self.chunks.lock().unwrap().get(&coord).cloned()
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ChunkSource for MemorySource {
    fn load(&self, coord: ChunkCoord) -> Result<ChunkData, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.chunks
            .lock()
            .unwrap()
            .get(&coord)
            .cloned()
            .ok_or(StoreError::NotFound(coord))
    }

    fn save(&self, chunk: &ChunkData) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.insert(chunk.clone());
        Ok(())
    }
}
