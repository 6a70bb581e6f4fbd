//! The request interface other subsystems use to reach a shard.
//!
//! All requests are fire-and-forget: they are queued on the owning shard and
//! return immediately. Failures are logged on the shard and counted in its
//! [`ShardStats`](crate::shard::ShardStats).

use std::sync::Arc;

use crate::chunk::BlockId;
use crate::coords::{BlockPos, ChunkCoord, ShardCoord};
use crate::entity::NonPlayerEntity;
use crate::shard::{RejectedTransfer, Shard};

/// Requests that can be made of a shard.
pub trait ShardClient: Send + Sync {
    /// Marks blocks in the shard as active.
    fn req_set_active_blocks(&self, blocks: Vec<BlockPos>);

    /// Hands `entity` to the chunk at `chunk`. If the chunk is unavailable
    /// the entity is dropped.
    fn req_transfer_entity(&self, chunk: ChunkCoord, entity: Box<dyn NonPlayerEntity>);

    /// Writes a block.
    fn req_set_block(&self, pos: BlockPos, block: BlockId, metadata: u8);

    /// Releases the connection to the shard.
    fn disconnect(&self);
}

/// A [`ShardClient`] for a shard running in this process.
#[derive(Clone, Debug)]
pub struct LocalShardClient {
    shard: Arc<Shard>,
}

impl LocalShardClient {
    /// Wraps a running shard.
    pub fn new(shard: Arc<Shard>) -> Self {
        Self { shard }
    }

    /// The shard this client talks to.
    pub fn shard_coord(&self) -> ShardCoord {
        self.shard.coord()
    }
}

impl ShardClient for LocalShardClient {
    fn req_set_active_blocks(&self, blocks: Vec<BlockPos>) {
        let result = self.shard.enqueue(move |ctx| {
            ctx.set_blocks_active(blocks);
        });
        if let Err(e) = result {
            tracing::warn!("active block request lost: {e}");
        }
    }

    fn req_transfer_entity(&self, chunk: ChunkCoord, entity: Box<dyn NonPlayerEntity>) {
        let id = entity.id();
        let result = self.shard.enqueue(move |ctx| {
            if let Err(RejectedTransfer { entity, reason }) = ctx.transfer_entity(chunk, entity) {
                tracing::warn!(
                    "dropping entity {} bound for chunk {chunk}: {reason}",
                    entity.id()
                );
                ctx.stats().record_dropped_transfer();
            }
        });
        if let Err(e) = result {
            tracing::warn!("dropping entity {id} bound for chunk {chunk}: {e}");
            self.shard.stats().record_dropped_transfer();
        }
    }

    fn req_set_block(&self, pos: BlockPos, block: BlockId, metadata: u8) {
        let result = self.shard.enqueue(move |ctx| {
            if let Err(e) = ctx.set_block(pos, block, metadata) {
                tracing::warn!("set block at {pos} failed: {e}");
            }
        });
        if let Err(e) = result {
            tracing::warn!("set block request for {pos} lost: {e}");
        }
    }

    fn disconnect(&self) {}
}
