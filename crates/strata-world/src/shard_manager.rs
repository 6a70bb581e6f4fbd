//! In-process registry of shards.
//!
//! [`LocalShardManager`] maps every chunk to the shard that owns it and
//! starts shards lazily the first time a chunk in their region is
//! addressed. It also implements the two-phase entity hand-off between
//! chunks: the entity is removed on the source shard and then queued for
//! insertion on the destination shard, so each half runs inside the shard
//! that owns the chunk involved.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::chunk_manager::ChunkManager;
use crate::coords::{ChunkCoord, ShardCoord};
use crate::entity::{EntityId, NonPlayerEntity};
use crate::shard::{ActiveBlockHandler, RejectedTransfer, Shard, ShardError, ShardStatsSnapshot};
use crate::shard_client::LocalShardClient;

/// Upper bound on drain rounds during [`LocalShardManager::quiesce`].
const MAX_QUIESCE_ROUNDS: usize = 16;

/// Owns the chunk manager and every running shard.
pub struct LocalShardManager {
    chunks: Arc<ChunkManager>,
    shards: DashMap<ShardCoord, Arc<Shard>>,
    closed: AtomicBool,
}

impl LocalShardManager {
    /// Creates a manager with no shards running.
    pub fn new(chunks: Arc<ChunkManager>) -> Self {
        Self {
            chunks,
            shards: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// The chunk cache shared by all shards.
    pub fn chunks(&self) -> &Arc<ChunkManager> {
        &self.chunks
    }

    /// Returns a client for the shard owning `chunk`, starting it if needed.
    pub fn shard_client(&self, chunk: ChunkCoord) -> Result<LocalShardClient, ShardError> {
        self.shard(chunk.shard_coord()).map(LocalShardClient::new)
    }

    fn shard(&self, coord: ShardCoord) -> Result<Arc<Shard>, ShardError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ShardError::Closed(coord));
        }
        if let Some(shard) = self.shards.get(&coord) {
            return Ok(Arc::clone(shard.value()));
        }
        match self.shards.entry(coord) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let shard = Arc::new(Shard::spawn(coord, Arc::clone(&self.chunks))?);
                entry.insert(Arc::clone(&shard));
                tracing::info!("started shard {coord}");
                Ok(shard)
            }
        }
    }

    /// Moves entity `id` from chunk `from` to chunk `to`.
    ///
    /// The entity is taken out of `from` on its shard, then inserted into
    /// `to` on the destination shard. If the entity is not in `from` nothing
    /// happens. If `to` cannot be resolved the move is counted as rejected on
    /// the destination shard and the entity is queued back into `from`, so
    /// its owner is unchanged.
    pub fn move_entity(
        &self,
        from: ChunkCoord,
        to: ChunkCoord,
        id: EntityId,
    ) -> Result<(), ShardError> {
        let source = self.shard(from.shard_coord())?;
        let destination = self.shard(to.shard_coord())?;
        let home = Arc::clone(&source);
        source.enqueue(move |ctx| {
            if destination.is_closed() {
                tracing::warn!(
                    "entity {id} stays in chunk {from}: shard {} is closed",
                    destination.coord()
                );
                return;
            }
            let entity = match ctx.take_entity(from, id) {
                Ok(Some(entity)) => entity,
                Ok(None) => {
                    tracing::warn!("entity {id} is not in chunk {from}, move ignored");
                    return;
                }
                Err(e) => {
                    tracing::warn!("cannot move entity {id} out of chunk {from}: {e}");
                    return;
                }
            };
            let sent = destination.enqueue(move |dst| {
                if let Err(RejectedTransfer { entity, reason }) = dst.transfer_entity(to, entity) {
                    tracing::warn!(
                        "chunk {to} refused entity {id}, returning it to {from}: {reason}"
                    );
                    dst.stats().record_rejected_move();
                    return_entity(&home, from, entity);
                }
            });
            if let Err(e) = sent {
                tracing::warn!("entity {id} lost in transit to chunk {to}: {e}");
                ctx.stats().record_dropped_transfer();
            }
        })
    }

    /// Queues one tick of active blocks on every running shard. Returns the
    /// number of shards ticked.
    pub fn tick_all(&self, handler: Arc<dyn ActiveBlockHandler>) -> usize {
        let mut ticked = 0;
        for shard in self.running() {
            let handler = Arc::clone(&handler);
            match shard.enqueue(move |ctx| {
                ctx.tick(handler.as_ref());
            }) {
                Ok(()) => ticked += 1,
                Err(e) => tracing::warn!("tick skipped: {e}"),
            }
        }
        ticked
    }

    /// Blocks until every shard has run out of queued work, including work
    /// that shards queue on each other while draining.
    pub fn quiesce(&self) {
        for _ in 0..MAX_QUIESCE_ROUNDS {
            let shards = self.running();
            let before = self.stats().executed;
            for shard in &shards {
                let _ = shard.sync();
            }
            // Each sync runs exactly one operation of its own.
            if self.stats().executed - before <= shards.len() as u64 {
                return;
            }
        }
        tracing::warn!("shards still busy after {MAX_QUIESCE_ROUNDS} drain rounds");
    }

    /// Counters summed over all shards.
    pub fn stats(&self) -> ShardStatsSnapshot {
        self.shards
            .iter()
            .map(|shard| shard.stats().snapshot())
            .fold(ShardStatsSnapshot::default(), |acc, s| acc + s)
    }

    /// Number of shards started.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Drains and stops every shard. Later requests fail with
    /// [`ShardError::Closed`].
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.quiesce();
        for shard in self.running() {
            shard.shutdown();
        }
        tracing::info!("all shards stopped");
    }

    fn running(&self) -> Vec<Arc<Shard>> {
        self.shards
            .iter()
            .map(|shard| Arc::clone(shard.value()))
            .collect()
    }
}

/// Queues `entity` back into the chunk it was moved out of.
fn return_entity(source: &Shard, chunk: ChunkCoord, entity: Box<dyn NonPlayerEntity>) {
    let id = entity.id();
    let result = source.enqueue(move |ctx| {
        if let Err(RejectedTransfer { entity, reason }) = ctx.transfer_entity(chunk, entity) {
            tracing::warn!(
                "dropping entity {} that could not return to chunk {chunk}: {reason}",
                entity.id()
            );
            ctx.stats().record_dropped_transfer();
        }
    });
    if let Err(e) = result {
        tracing::warn!("dropping entity {id} that could not return to chunk {chunk}: {e}");
        source.stats().record_dropped_transfer();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{BlockId, ChunkData};
    use crate::chunk_api::Chunk;
    use crate::chunk_manager::CachePolicy;
    use crate::coords::{AbsPos, BlockPos, SubChunkPos};
    use crate::entity::{Mob, MobKind};
    use crate::observers::ChunkSubscribers;
    use crate::shard_client::ShardClient;
    use crate::test_support::MemorySource;

    fn manager(source: MemorySource) -> LocalShardManager {
        LocalShardManager::new(Arc::new(ChunkManager::new(
            Arc::new(source),
            Arc::new(ChunkSubscribers::new()),
            CachePolicy::Unbounded,
        )))
    }

    fn spawn_mob(mgr: &LocalShardManager, chunk: ChunkCoord, id: u32) {
        let mob = Mob::new(EntityId(id), MobKind::Spider, AbsPos::default());
        mgr.shard_client(chunk)
            .unwrap()
            .req_transfer_entity(chunk, Box::new(mob));
    }

    #[test]
    fn test_shards_start_on_demand() {
        let mgr = manager(MemorySource::default());
        assert_eq!(mgr.shard_count(), 0);

        let a = mgr.shard_client(ChunkCoord::new(0, 0)).unwrap();
        let b = mgr.shard_client(ChunkCoord::new(15, 15)).unwrap();
        let c = mgr.shard_client(ChunkCoord::new(-1, 0)).unwrap();
        assert_eq!(a.shard_coord(), b.shard_coord());
        assert_eq!(c.shard_coord(), ShardCoord::new(-1, 0));
        assert_eq!(mgr.shard_count(), 2);
        mgr.shutdown();
    }

    #[test]
    fn test_move_entity_across_shards() {
        let source = MemorySource::default();
        let from = ChunkCoord::new(15, 0);
        let to = ChunkCoord::new(16, 0);
        source.insert(ChunkData::new(from));
        source.insert(ChunkData::new(to));
        let mgr = manager(source);

        spawn_mob(&mgr, from, 42);
        mgr.move_entity(from, to, EntityId(42)).unwrap();
        mgr.quiesce();

        let chunks = mgr.chunks();
        assert!(!chunks.get(from).unwrap().read().contains_entity(EntityId(42)));
        assert!(chunks.get(to).unwrap().read().contains_entity(EntityId(42)));
        let stats = mgr.stats();
        assert_eq!(stats.transfers_completed, 2);
        assert_eq!(stats.transfers_dropped, 0);
        mgr.shutdown();
    }

    #[test]
    fn test_move_to_absent_chunk_keeps_entity_at_source() {
        let source = MemorySource::default();
        let from = ChunkCoord::new(0, 0);
        source.insert(ChunkData::new(from));
        let mgr = manager(source);

        spawn_mob(&mgr, from, 7);
        mgr.move_entity(from, ChunkCoord::new(40, 40), EntityId(7)).unwrap();
        mgr.quiesce();

        assert!(mgr.chunks().get(from).unwrap().read().contains_entity(EntityId(7)));
        let stats = mgr.stats();
        assert_eq!(stats.moves_rejected, 1);
        assert_eq!(stats.transfers_dropped, 0);
        assert_eq!(stats.panics, 0);
        mgr.shutdown();
    }

    #[test]
    fn test_move_within_shard_to_absent_chunk_keeps_entity() {
        let source = MemorySource::default();
        let from = ChunkCoord::new(3, 3);
        source.insert(ChunkData::new(from));
        let mgr = manager(source);

        spawn_mob(&mgr, from, 8);
        mgr.move_entity(from, ChunkCoord::new(4, 3), EntityId(8)).unwrap();
        mgr.quiesce();

        assert!(mgr.chunks().get(from).unwrap().read().contains_entity(EntityId(8)));
        assert_eq!(mgr.shard_count(), 1);
        assert_eq!(mgr.stats().moves_rejected, 1);
        mgr.shutdown();
    }

    #[test]
    fn test_move_unknown_entity_is_ignored() {
        let source = MemorySource::default();
        source.insert(ChunkData::new(ChunkCoord::new(0, 0)));
        source.insert(ChunkData::new(ChunkCoord::new(1, 0)));
        let mgr = manager(source);

        mgr.move_entity(ChunkCoord::new(0, 0), ChunkCoord::new(1, 0), EntityId(1))
            .unwrap();
        mgr.quiesce();
        assert_eq!(mgr.stats().transfers_completed, 0);
        assert_eq!(mgr.stats().transfers_dropped, 0);
        mgr.shutdown();
    }

    struct Solidify;

    impl ActiveBlockHandler for Solidify {
        fn tick_block(&self, chunk: &mut Chunk, pos: BlockPos) -> bool {
            let _ = chunk.set_block(pos.sub_chunk(), BlockId(1), 0);
            false
        }
    }

    #[test]
    fn test_tick_all_reaches_every_shard() {
        let source = MemorySource::default();
        source.insert(ChunkData::new(ChunkCoord::new(0, 0)));
        source.insert(ChunkData::new(ChunkCoord::new(-1, 0)));
        let mgr = manager(source);

        mgr.shard_client(ChunkCoord::new(0, 0))
            .unwrap()
            .req_set_active_blocks(vec![BlockPos::new(2, 3, 4)]);
        mgr.shard_client(ChunkCoord::new(-1, 0))
            .unwrap()
            .req_set_active_blocks(vec![BlockPos::new(-2, 3, 4)]);

        assert_eq!(mgr.tick_all(Arc::new(Solidify)), 2);
        mgr.quiesce();

        let east = mgr.chunks().get(ChunkCoord::new(0, 0)).unwrap();
        let west = mgr.chunks().get(ChunkCoord::new(-1, 0)).unwrap();
        assert_eq!(east.read().get_block(SubChunkPos::new(2, 3, 4)).unwrap(), BlockId(1));
        assert_eq!(west.read().get_block(SubChunkPos::new(14, 3, 4)).unwrap(), BlockId(1));
        mgr.shutdown();
    }

    #[test]
    fn test_shutdown_rejects_new_clients() {
        let mgr = manager(MemorySource::default());
        let client = mgr.shard_client(ChunkCoord::new(0, 0)).unwrap();
        mgr.shutdown();

        assert!(matches!(
            mgr.shard_client(ChunkCoord::new(0, 0)),
            Err(ShardError::Closed(_))
        ));
        // Requests through an old client are dropped, not panics.
        client.req_set_block(BlockPos::new(0, 0, 0), BlockId(1), 0);
        mgr.shutdown();
    }
}
