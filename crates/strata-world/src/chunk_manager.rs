//! Central cache of loaded chunks, keyed by [`ChunkCoord`].
//!
//! The [`ChunkManager`] is the single authority for which chunks exist in
//! memory. Lookups are lock-free for already loaded chunks; the first request
//! for a coordinate loads it from the [`ChunkSource`] while any concurrent
//! requests for the same coordinate wait on that one load and receive the
//! same [`ChunkHandle`].
//!
//! Retention is governed by a [`CachePolicy`]. Eviction never removes a
//! chunk that anyone outside the cache still holds a handle to, so there is
//! at most one in-memory instance per coordinate at all times.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::chunk_api::Chunk;
use crate::chunk_store::{ChunkSource, StoreError};
use crate::coords::ChunkCoord;
use crate::entity::NonPlayerEntity;
use crate::observers::ChunkObservers;

/// Shared reference to a loaded chunk.
pub type ChunkHandle = Arc<ChunkCell>;

/// A loaded chunk behind a reader-writer lock.
///
/// Anyone holding a handle may read. Writes are reserved to shard
/// operations, which are the chunk's sole mutators.
pub struct ChunkCell {
    coord: ChunkCoord,
    chunk: RwLock<Chunk>,
    /// Chunk version last written to the source.
    saved_version: AtomicU64,
}

impl ChunkCell {
    fn new(chunk: Chunk) -> Self {
        let saved = chunk.version();
        Self {
            coord: chunk.coord(),
            chunk: RwLock::new(chunk),
            saved_version: AtomicU64::new(saved),
        }
    }

    /// The chunk's coordinate.
    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Shared access to the chunk.
    pub fn read(&self) -> RwLockReadGuard<'_, Chunk> {
        self.chunk.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Chunk> {
        self.chunk.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if blocks changed since the chunk was last saved.
    pub fn is_dirty(&self) -> bool {
        self.read().version() != self.saved_version.load(Ordering::Acquire)
    }

    /// Returns `true` while any entity lives in the chunk. Entities are not
    /// persisted, so such a chunk must stay resident.
    pub fn has_entities(&self) -> bool {
        self.read().entity_count() > 0
    }

    /// Writes the chunk to `source` if dirty. Returns whether a save happened.
    fn persist(&self, source: &dyn ChunkSource) -> Result<bool, StoreError> {
        let chunk = self.read();
        let version = chunk.version();
        if version == self.saved_version.load(Ordering::Acquire) {
            return Ok(false);
        }
        source.save(chunk.data())?;
        self.saved_version.store(version, Ordering::Release);
        Ok(true)
    }
}

impl std::fmt::Debug for ChunkCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCell")
            .field("coord", &self.coord)
            .field("saved_version", &self.saved_version.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// How many chunks the manager keeps resident.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Never evict.
    #[default]
    Unbounded,
    /// Evict least-recently-used idle chunks above `max_chunks`.
    Bounded {
        /// Soft upper bound on resident chunks. Chunks still referenced by
        /// callers are never evicted, so the bound can be exceeded.
        max_chunks: usize,
    },
}

impl CachePolicy {
    /// Maps a configured limit to a policy, with `0` meaning unbounded.
    pub fn from_max_chunks(max_chunks: usize) -> Self {
        if max_chunks == 0 {
            Self::Unbounded
        } else {
            Self::Bounded { max_chunks }
        }
    }
}

/// One cache entry. The cell is filled by exactly one successful load.
#[derive(Default)]
struct ChunkSlot {
    cell: OnceCell<ChunkHandle>,
    last_access: AtomicU64,
}

/// Owns every loaded chunk and loads missing ones on demand.
pub struct ChunkManager {
    source: Arc<dyn ChunkSource>,
    observers: Arc<dyn ChunkObservers>,
    slots: DashMap<ChunkCoord, Arc<ChunkSlot>>,
    policy: CachePolicy,
    /// Logical clock for LRU ordering.
    clock: AtomicU64,
    loads: AtomicU64,
}

impl ChunkManager {
    /// Creates an empty manager.
    ///
    /// Loaded chunks report block changes to `observers` through a weak
    /// reference.
    pub fn new(
        source: Arc<dyn ChunkSource>,
        observers: Arc<dyn ChunkObservers>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            source,
            observers,
            slots: DashMap::new(),
            policy,
            clock: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    /// The retention policy in effect.
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Returns the chunk at `coord`, loading it if necessary.
    ///
    /// Concurrent callers for the same uncached coordinate share a single
    /// load. A failed load is reported to the callers waiting on it and is
    /// not cached; the next call tries again.
    pub fn get(&self, coord: ChunkCoord) -> Result<ChunkHandle, StoreError> {
        let slot = Arc::clone(self.slots.entry(coord).or_default().value());
        slot.last_access.store(self.now(), Ordering::Relaxed);

        let mut loaded = false;
        let result = slot
            .cell
            .get_or_try_init(|| {
                loaded = true;
                self.load(coord)
            })
            .map(Arc::clone);

        match result {
            Ok(handle) => {
                if loaded {
                    self.evict_idle();
                }
                Ok(handle)
            }
            Err(e) => {
                // Drop the empty slot unless another caller is waiting on it.
                self.slots.remove_if(&coord, |_, s| {
                    Arc::ptr_eq(s, &slot) && s.cell.get().is_none() && Arc::strong_count(s) == 2
                });
                Err(e)
            }
        }
    }

    fn load(&self, coord: ChunkCoord) -> Result<ChunkHandle, StoreError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let data = self.source.load(coord)?;
        let chunk = Chunk::new(data, Arc::downgrade(&self.observers));
        tracing::debug!("chunk {coord} loaded");
        Ok(Arc::new(ChunkCell::new(chunk)))
    }

    /// Returns the chunk at `coord` only if it is already resident.
    pub fn get_if_loaded(&self, coord: ChunkCoord) -> Option<ChunkHandle> {
        let slot = self.slots.get(&coord)?;
        let handle = slot.cell.get().map(Arc::clone)?;
        slot.last_access.store(self.now(), Ordering::Relaxed);
        Some(handle)
    }

    /// Lazily yields every chunk in the square of side `2 * radius + 1`
    /// around `center`, row-major with Z outer and X inner.
    ///
    /// Each coordinate is fetched with [`ChunkManager::get`] as the iterator
    /// advances; failures are yielded in place and do not stop iteration.
    pub fn chunks_in_radius(
        &self,
        center: ChunkCoord,
        radius: i32,
    ) -> impl Iterator<Item = (ChunkCoord, Result<ChunkHandle, StoreError>)> + '_ {
        center.square(radius).map(move |coord| (coord, self.get(coord)))
    }

    /// Like [`ChunkManager::chunks_in_radius`], centred on the chunk holding
    /// `entity`.
    pub fn chunks_in_entity_radius(
        &self,
        entity: &dyn NonPlayerEntity,
        radius: i32,
    ) -> impl Iterator<Item = (ChunkCoord, Result<ChunkHandle, StoreError>)> + '_ {
        self.chunks_in_radius(entity.position().chunk_coord(), radius)
    }

    /// Number of resident chunks.
    pub fn loaded_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.cell.get().is_some())
            .count()
    }

    /// Number of loads issued to the source, failed ones included.
    pub fn loads_performed(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Saves every dirty resident chunk. Returns how many were written.
    ///
    /// A chunk that fails to save stays dirty and is retried next time.
    pub fn save_dirty(&self) -> usize {
        let handles: Vec<ChunkHandle> = self
            .slots
            .iter()
            .filter_map(|slot| slot.cell.get().map(Arc::clone))
            .collect();

        let mut saved = 0;
        for handle in handles {
            match handle.persist(self.source.as_ref()) {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("failed to save chunk {}: {e}", handle.coord()),
            }
        }
        if saved > 0 {
            tracing::debug!("saved {saved} dirty chunks");
        }
        saved
    }

    /// Evicts least-recently-used idle chunks until the cache is within its
    /// bound. Returns how many were evicted. No-op when unbounded.
    ///
    /// Dirty chunks are saved before they are dropped; one that fails to save
    /// stays resident.
    pub fn evict_idle(&self) -> usize {
        let CachePolicy::Bounded { max_chunks } = self.policy else {
            return 0;
        };
        if self.slots.len() <= max_chunks {
            return 0;
        }

        let mut candidates: Vec<(u64, ChunkCoord)> = self
            .slots
            .iter()
            .filter(|slot| slot.cell.get().is_some())
            .map(|slot| (slot.last_access.load(Ordering::Relaxed), *slot.key()))
            .collect();
        candidates.sort_unstable();

        let mut evicted = 0;
        for (_, coord) in candidates {
            if self.slots.len() <= max_chunks {
                break;
            }
            if self.try_evict(coord) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!("evicted {evicted} idle chunks");
        }
        evicted
    }

    fn try_evict(&self, coord: ChunkCoord) -> bool {
        let handle = {
            let Some(slot) = self.slots.get(&coord) else {
                return false;
            };
            match slot.cell.get() {
                Some(handle) => Arc::clone(handle),
                None => return false,
            }
        };
        // The cache's reference plus ours.
        if Arc::strong_count(&handle) > 2 || handle.has_entities() {
            return false;
        }
        if let Err(e) = handle.persist(self.source.as_ref()) {
            tracing::warn!("keeping chunk {coord} resident, save failed: {e}");
            return false;
        }
        drop(handle);

        self.slots
            .remove_if(&coord, |_, slot| {
                Arc::strong_count(slot) == 1
                    && slot
                        .cell
                        .get()
                        .is_some_and(|h| {
                        Arc::strong_count(h) == 1 && !h.is_dirty() && !h.has_entities()
                    })
            })
            .is_some()
    }

    fn now(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
