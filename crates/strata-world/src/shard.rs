//! Shards: single-threaded owners of a square region of chunks.
//!
//! Every mutation of a chunk runs as an operation on the chunk's owning
//! [`Shard`]. A shard is an actor: callers enqueue boxed closures, and a
//! dedicated worker thread runs them one at a time, in submission order, each
//! with exclusive access to the shard's [`ShardContext`]. Because only one
//! worker ever mutates a shard's chunks, chunk arrays never see concurrent
//! writers.
//!
//! Shutdown is explicit. [`Shard::shutdown`] queues a stop marker behind any
//! operations already submitted, waits for the worker to reach it, and
//! rejects anything enqueued afterwards with [`ShardError::Closed`].

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use rustc_hash::FxHashSet;

use crate::chunk::{BlockError, BlockId};
use crate::chunk_api::Chunk;
use crate::chunk_manager::{ChunkHandle, ChunkManager};
use crate::chunk_store::StoreError;
use crate::coords::{BlockPos, ChunkCoord, ShardCoord};
use crate::entity::{EntityId, NonPlayerEntity};

/// A unit of work executed on a shard's worker.
pub type ShardOp = Box<dyn FnOnce(&mut ShardContext) + Send>;

/// Errors from shard operations.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    /// The shard has been shut down and accepts no more work.
    #[error("shard {0} is shut down")]
    Closed(ShardCoord),
    /// The chunk lies outside the shard's region.
    #[error("shard {shard} does not own chunk {chunk}")]
    NotOwned {
        /// The shard asked.
        shard: ShardCoord,
        /// The chunk requested.
        chunk: ChunkCoord,
    },
    /// The chunk could not be loaded.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A block position was outside its chunk.
    #[error(transparent)]
    Block(#[from] BlockError),
    /// The worker thread could not be started.
    #[error("failed to spawn shard worker: {0}")]
    Spawn(#[source] io::Error),
}

/// An entity a shard could not accept, handed back to the caller.
#[derive(Debug)]
pub struct RejectedTransfer {
    /// The entity, still owned by nobody.
    pub entity: Box<dyn NonPlayerEntity>,
    /// Why it was rejected.
    pub reason: ShardError,
}

/// Per-tick behaviour of active blocks, supplied by the game layer.
pub trait ActiveBlockHandler: Send + Sync {
    /// Updates the block at `pos` inside `chunk`. Returns `true` to keep the
    /// block active for the next tick.
    fn tick_block(&self, chunk: &mut Chunk, pos: BlockPos) -> bool;
}

/// Counters describing a shard's activity.
#[derive(Debug, Default)]
pub struct ShardStats {
    executed: AtomicU64,
    transfers_completed: AtomicU64,
    transfers_dropped: AtomicU64,
    moves_rejected: AtomicU64,
    panics: AtomicU64,
}

impl ShardStats {
    /// Operations taken off the queue and run.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }

    /// Entities successfully inserted into one of the shard's chunks.
    pub fn transfers_completed(&self) -> u64 {
        self.transfers_completed.load(Ordering::Relaxed)
    }

    /// Entities discarded because their destination was unavailable.
    pub fn transfers_dropped(&self) -> u64 {
        self.transfers_dropped.load(Ordering::Relaxed)
    }

    /// Entity moves this shard refused as destination. The entity goes back
    /// to the chunk it came from.
    pub fn moves_rejected(&self) -> u64 {
        self.moves_rejected.load(Ordering::Relaxed)
    }

    /// Operations that panicked.
    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    pub(crate) fn record_dropped_transfer(&self) {
        self.transfers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_move(&self) {
        self.moves_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of all counters.
    pub fn snapshot(&self) -> ShardStatsSnapshot {
        ShardStatsSnapshot {
            executed: self.executed(),
            transfers_completed: self.transfers_completed(),
            transfers_dropped: self.transfers_dropped(),
            moves_rejected: self.moves_rejected(),
            panics: self.panics(),
        }
    }
}

/// Plain copy of [`ShardStats`], summable across shards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShardStatsSnapshot {
    /// See [`ShardStats::executed`].
    pub executed: u64,
    /// See [`ShardStats::transfers_completed`].
    pub transfers_completed: u64,
    /// See [`ShardStats::transfers_dropped`].
    pub transfers_dropped: u64,
    /// See [`ShardStats::moves_rejected`].
    pub moves_rejected: u64,
    /// See [`ShardStats::panics`].
    pub panics: u64,
}

impl std::ops::Add for ShardStatsSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            executed: self.executed + rhs.executed,
            transfers_completed: self.transfers_completed + rhs.transfers_completed,
            transfers_dropped: self.transfers_dropped + rhs.transfers_dropped,
            moves_rejected: self.moves_rejected + rhs.moves_rejected,
            panics: self.panics + rhs.panics,
        }
    }
}

enum ShardMessage {
    Run(ShardOp),
    Stop,
}

/// A running shard.
pub struct Shard {
    coord: ShardCoord,
    sender: RwLock<Option<Sender<ShardMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    stats: Arc<ShardStats>,
}

impl Shard {
    /// Starts the worker for the shard at `coord`.
    pub fn spawn(coord: ShardCoord, manager: Arc<ChunkManager>) -> Result<Self, ShardError> {
        let (sender, receiver) = unbounded();
        let stats = Arc::new(ShardStats::default());
        let mut ctx = ShardContext {
            coord,
            manager,
            active: FxHashSet::default(),
            stats: Arc::clone(&stats),
        };

        let worker = thread::Builder::new()
            .name(format!("shard-{coord}"))
            .spawn(move || run_worker(&mut ctx, &receiver))
            .map_err(ShardError::Spawn)?;
        tracing::debug!("shard {coord} started");

        Ok(Self {
            coord,
            sender: RwLock::new(Some(sender)),
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            stats,
        })
    }

    /// The region this shard owns.
    pub fn coord(&self) -> ShardCoord {
        self.coord
    }

    /// Live counters.
    pub fn stats(&self) -> &ShardStats {
        &self.stats
    }

    /// Queues `op` to run on the worker. Never blocks.
    ///
    /// Operations enqueued by one caller run in the order they were enqueued.
    pub fn enqueue<F>(&self, op: F) -> Result<(), ShardError>
    where
        F: FnOnce(&mut ShardContext) + Send + 'static,
    {
        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(ShardError::Closed(self.coord));
        };
        sender
            .send(ShardMessage::Run(Box::new(op)))
            .map_err(|_| ShardError::Closed(self.coord))
    }

    /// Blocks until every operation enqueued before this call has run.
    ///
    /// Returns immediately when called from the shard's own worker.
    pub fn sync(&self) -> Result<(), ShardError> {
        if thread::current().id() == self.worker_id {
            return Ok(());
        }
        let (done_tx, done_rx) = bounded(1);
        self.enqueue(move |_| {
            let _ = done_tx.send(());
        })?;
        done_rx.recv().map_err(|_| ShardError::Closed(self.coord))
    }

    /// Runs every pending operation, then stops the worker. Idempotent.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(ShardMessage::Stop);
        }

        if thread::current().id() == self.worker_id {
            // Joining from inside an operation would deadlock; the worker
            // exits once it reaches the stop marker.
            return;
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("shard {} worker terminated abnormally", self.coord);
            } else {
                tracing::debug!("shard {} stopped", self.coord);
            }
        }
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Drop for Shard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("coord", &self.coord)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn run_worker(ctx: &mut ShardContext, receiver: &Receiver<ShardMessage>) {
    while let Ok(message) = receiver.recv() {
        let op = match message {
            ShardMessage::Run(op) => op,
            ShardMessage::Stop => break,
        };
        // Counted before running so a completed sync implies its own count.
        ctx.stats.executed.fetch_add(1, Ordering::SeqCst);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| op(ctx)));
        if let Err(payload) = outcome {
            ctx.stats.panics.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                "shard {} operation panicked: {}",
                ctx.coord,
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// State a shard's operations run against. Only reachable from inside an
/// operation on that shard.
pub struct ShardContext {
    coord: ShardCoord,
    manager: Arc<ChunkManager>,
    active: FxHashSet<BlockPos>,
    stats: Arc<ShardStats>,
}

impl ShardContext {
    /// The shard's region.
    pub fn coord(&self) -> ShardCoord {
        self.coord
    }

    /// Returns `true` if `chunk` belongs to this shard.
    pub fn owns(&self, chunk: ChunkCoord) -> bool {
        self.coord.contains(chunk)
    }

    pub(crate) fn stats(&self) -> &ShardStats {
        &self.stats
    }

    /// Resolves an owned chunk through the chunk manager, loading it if
    /// needed.
    pub fn get(&self, chunk: ChunkCoord) -> Result<ChunkHandle, ShardError> {
        if !self.owns(chunk) {
            return Err(ShardError::NotOwned {
                shard: self.coord,
                chunk,
            });
        }
        Ok(self.manager.get(chunk)?)
    }

    /// Marks blocks as active so they are ticked, loading their chunks.
    /// Blocks outside the shard or in a chunk that cannot be loaded are
    /// skipped with a warning. Returns how many were accepted.
    pub fn set_blocks_active<I>(&mut self, blocks: I) -> usize
    where
        I: IntoIterator<Item = BlockPos>,
    {
        let mut accepted = 0;
        for pos in blocks {
            match self.get(pos.chunk_coord()) {
                Ok(_) => {
                    self.active.insert(pos);
                    accepted += 1;
                }
                Err(e) => {
                    tracing::warn!("shard {} ignoring active block {pos}: {e}", self.coord);
                }
            }
        }
        accepted
    }

    /// Returns `true` if `pos` is currently active.
    pub fn is_active(&self, pos: BlockPos) -> bool {
        self.active.contains(&pos)
    }

    /// Number of active blocks.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Writes a block. Returns whether the stored value changed.
    pub fn set_block(
        &self,
        pos: BlockPos,
        block: BlockId,
        metadata: u8,
    ) -> Result<bool, ShardError> {
        let handle = self.get(pos.chunk_coord())?;
        let changed = handle
            .write()
            .set_block(pos.sub_chunk(), block, metadata)?;
        Ok(changed)
    }

    /// Reads a block type.
    pub fn get_block(&self, pos: BlockPos) -> Result<BlockId, ShardError> {
        let handle = self.get(pos.chunk_coord())?;
        let block = handle.read().get_block(pos.sub_chunk())?;
        Ok(block)
    }

    /// Inserts `entity` into the owned chunk at `chunk`.
    ///
    /// If the chunk cannot be resolved the entity is handed back unchanged;
    /// what happens to it is the caller's decision.
    pub fn transfer_entity(
        &mut self,
        chunk: ChunkCoord,
        entity: Box<dyn NonPlayerEntity>,
    ) -> Result<(), RejectedTransfer> {
        let handle = match self.get(chunk) {
            Ok(handle) => handle,
            Err(reason) => return Err(RejectedTransfer { entity, reason }),
        };
        let id = entity.id();
        handle.write().add_entity(entity);
        self.stats
            .transfers_completed
            .fetch_add(1, Ordering::Relaxed);
        tracing::trace!("entity {id} now owned by chunk {chunk}");
        Ok(())
    }

    /// Removes entity `id` from the owned chunk at `chunk`, transferring
    /// ownership to the caller. `Ok(None)` if the chunk does not hold it.
    pub fn take_entity(
        &mut self,
        chunk: ChunkCoord,
        id: EntityId,
    ) -> Result<Option<Box<dyn NonPlayerEntity>>, ShardError> {
        let handle = self.get(chunk)?;
        let entity = handle.write().remove_entity(id);
        Ok(entity)
    }

    /// Ticks every active block, reloading its chunk if it was evicted.
    ///
    /// Blocks are visited in position order. Each is dropped from the active
    /// set unless `handler` asks to keep it. A block whose chunk can no longer
    /// be loaded is dropped with a warning. Returns how many were ticked.
    pub fn tick(&mut self, handler: &dyn ActiveBlockHandler) -> usize {
        let mut blocks: Vec<BlockPos> = self.active.drain().collect();
        blocks.sort_unstable();

        let mut ticked = 0;
        for pos in blocks {
            let handle = match self.get(pos.chunk_coord()) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!("shard {} dropping active block {pos}: {e}", self.coord);
                    continue;
                }
            };
            ticked += 1;
            if handler.tick_block(&mut handle.write(), pos) {
                self.active.insert(pos);
            }
        }
        ticked
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::chunk::ChunkData;
    use crate::chunk_manager::CachePolicy;
    use crate::coords::{AbsPos, SubChunkPos};
    use crate::entity::{Mob, MobKind};
    use crate::observers::ChunkSubscribers;
    use crate::test_support::MemorySource;

    fn manager_with_square(radius: i32) -> Arc<ChunkManager> {
        Arc::new(ChunkManager::new(
            Arc::new(MemorySource::with_square(radius)),
            Arc::new(ChunkSubscribers::new()),
            CachePolicy::Unbounded,
        ))
    }

    fn origin_shard(manager: Arc<ChunkManager>) -> Shard {
        Shard::spawn(ShardCoord::new(0, 0), manager).unwrap()
    }

    fn mob(id: u32) -> Box<dyn NonPlayerEntity> {
        Box::new(Mob::new(EntityId(id), MobKind::Sheep, AbsPos::new(1.0, 64.0, 1.0)))
    }

    #[test]
    fn test_operations_run_in_submission_order() {
        let shard = origin_shard(manager_with_square(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = Arc::clone(&seen);
            shard.enqueue(move |_| seen.lock().unwrap().push(i)).unwrap();
        }
        shard.shutdown();

        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
        assert_eq!(shard.stats().executed(), 100);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_closed() {
        let shard = origin_shard(manager_with_square(0));
        shard.shutdown();
        assert!(shard.is_closed());
        let err = shard.enqueue(|_| {}).unwrap_err();
        assert!(matches!(err, ShardError::Closed(c) if c == ShardCoord::new(0, 0)));
        // A second shutdown is harmless.
        shard.shutdown();
    }

    #[test]
    fn test_worker_thread_is_named_after_shard() {
        let shard = Shard::spawn(ShardCoord::new(-1, 2), manager_with_square(0)).unwrap();
        let (tx, rx) = unbounded();
        shard
            .enqueue(move |_| {
                let _ = tx.send(thread::current().name().map(str::to_owned));
            })
            .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("shard--1.2"));
    }

    #[test]
    fn test_panicking_operation_does_not_stop_shard() {
        let shard = origin_shard(manager_with_square(0));
        shard.enqueue(|_| panic!("boom")).unwrap();
        let (tx, rx) = unbounded();
        shard.enqueue(move |_| tx.send(()).unwrap()).unwrap();

        rx.recv().unwrap();
        assert_eq!(shard.stats().panics(), 1);
        shard.shutdown();
        assert_eq!(shard.stats().executed(), 2);
    }

    #[test]
    fn test_get_refuses_unowned_chunk() {
        let shard = origin_shard(manager_with_square(20));
        let (tx, rx) = unbounded();
        shard
            .enqueue(move |ctx| {
                let _ = tx.send((
                    ctx.get(ChunkCoord::new(15, 15)).is_ok(),
                    ctx.get(ChunkCoord::new(16, 0)).unwrap_err(),
                ));
            })
            .unwrap();

        let (owned_ok, err) = rx.recv().unwrap();
        assert!(owned_ok);
        assert!(matches!(
            err,
            ShardError::NotOwned { chunk, .. } if chunk == ChunkCoord::new(16, 0)
        ));
    }

    #[test]
    fn test_set_block_through_shard_is_visible_to_readers() {
        let manager = manager_with_square(1);
        let shard = origin_shard(Arc::clone(&manager));
        let pos = BlockPos::new(3, 70, 5);

        let (tx, rx) = unbounded();
        shard
            .enqueue(move |ctx| {
                let _ = tx.send(ctx.set_block(pos, BlockId(4), 2).unwrap());
            })
            .unwrap();
        assert!(rx.recv().unwrap());

        let chunk = manager.get(ChunkCoord::new(0, 0)).unwrap();
        let chunk = chunk.read();
        assert_eq!(chunk.get_block(SubChunkPos::new(3, 70, 5)).unwrap(), BlockId(4));
        assert_eq!(chunk.get_block_data(SubChunkPos::new(3, 70, 5)).unwrap(), 2);
    }

    #[test]
    fn test_set_block_out_of_range_height_is_block_error() {
        let shard = origin_shard(manager_with_square(0));
        let (tx, rx) = unbounded();
        shard
            .enqueue(move |ctx| {
                let _ = tx.send(ctx.set_block(BlockPos::new(0, 128, 0), BlockId(1), 0));
            })
            .unwrap();
        assert!(matches!(rx.recv().unwrap(), Err(ShardError::Block(_))));
    }

    #[test]
    fn test_transfer_to_missing_chunk_returns_entity() {
        let manager = manager_with_square(0);
        let shard = origin_shard(Arc::clone(&manager));
        let (tx, rx) = unbounded();
        shard
            .enqueue(move |ctx| {
                let _ = tx.send(ctx.transfer_entity(ChunkCoord::new(5, 5), mob(9)));
            })
            .unwrap();

        let rejected = rx.recv().unwrap().unwrap_err();
        assert_eq!(rejected.entity.id(), EntityId(9));
        assert!(matches!(rejected.reason, ShardError::Store(StoreError::NotFound(_))));
        assert_eq!(shard.stats().transfers_completed(), 0);
        assert!(manager.get_if_loaded(ChunkCoord::new(5, 5)).is_none());
    }

    #[test]
    fn test_transfer_then_take_entity() {
        let manager = manager_with_square(1);
        let shard = origin_shard(Arc::clone(&manager));
        let (tx, rx) = unbounded();
        shard
            .enqueue(move |ctx| {
                ctx.transfer_entity(ChunkCoord::new(1, 1), mob(3)).unwrap();
                let missing = ctx.take_entity(ChunkCoord::new(0, 0), EntityId(3)).unwrap();
                let taken = ctx.take_entity(ChunkCoord::new(1, 1), EntityId(3)).unwrap();
                let _ = tx.send((missing.is_none(), taken.map(|e| e.id())));
            })
            .unwrap();

        assert_eq!(rx.recv().unwrap(), (true, Some(EntityId(3))));
        assert_eq!(shard.stats().transfers_completed(), 1);
        let chunk = manager.get(ChunkCoord::new(1, 1)).unwrap();
        assert_eq!(chunk.read().entity_count(), 0);
    }

    struct DecayHandler;

    impl ActiveBlockHandler for DecayHandler {
        // Turns the block to air; stays active while above y = 10.
        fn tick_block(&self, chunk: &mut Chunk, pos: BlockPos) -> bool {
            let _ = chunk.set_block(pos.sub_chunk(), BlockId::AIR, 0);
            pos.y > 10
        }
    }

    #[test]
    fn test_tick_drains_active_blocks_and_keeps_requested() {
        let manager = manager_with_square(1);
        let shard = origin_shard(Arc::clone(&manager));
        let (tx, rx) = unbounded();
        shard
            .enqueue(move |ctx| {
                ctx.get(ChunkCoord::new(0, 0)).unwrap();
                let accepted = ctx.set_blocks_active([
                    BlockPos::new(1, 5, 1),
                    BlockPos::new(2, 20, 2),
                    BlockPos::new(-300, 5, 0),
                ]);
                let ticked = ctx.tick(&DecayHandler);
                let _ = tx.send((
                    accepted,
                    ticked,
                    ctx.active_count(),
                    ctx.is_active(BlockPos::new(2, 20, 2)),
                ));
            })
            .unwrap();

        assert_eq!(rx.recv().unwrap(), (2, 2, 1, true));
    }

    #[test]
    fn test_active_block_loads_its_chunk() {
        let source = Arc::new(MemorySource::default());
        source.insert(ChunkData::new(ChunkCoord::new(0, 0)));
        let manager = Arc::new(ChunkManager::new(
            source,
            Arc::new(ChunkSubscribers::new()),
            CachePolicy::Unbounded,
        ));
        let shard = origin_shard(Arc::clone(&manager));
        assert!(manager.get_if_loaded(ChunkCoord::new(0, 0)).is_none());

        let (tx, rx) = unbounded();
        shard
            .enqueue(move |ctx| {
                // (1, 0) is in the shard but has no stored record.
                let accepted =
                    ctx.set_blocks_active([BlockPos::new(0, 1, 0), BlockPos::new(16, 1, 0)]);
                let _ = tx.send((accepted, ctx.tick(&DecayHandler), ctx.active_count()));
            })
            .unwrap();

        assert_eq!(rx.recv().unwrap(), (1, 1, 0));
        assert!(manager.get_if_loaded(ChunkCoord::new(0, 0)).is_some());
        assert!(manager.get_if_loaded(ChunkCoord::new(1, 0)).is_none());
    }
}
