//! Chunk storage, caching and the sharded mutation model of a voxel world.

pub mod chunk;
pub mod chunk_api;
pub mod chunk_manager;
pub mod chunk_store;
pub mod coords;
pub mod entity;
pub mod nibble;
pub mod observers;
pub mod packets;
pub mod shard;
pub mod shard_client;
pub mod shard_manager;

#[cfg(test)]
mod test_support;

pub use chunk::{BlockError, BlockId, BlockIndex, CHUNK_VOLUME, ChunkData, block_index};
pub use chunk_api::Chunk;
pub use chunk_manager::{CachePolicy, ChunkCell, ChunkHandle, ChunkManager};
pub use chunk_store::{ChunkSource, DecodeError, DiskStore, StoreError, chunk_path};
pub use coords::{
    AbsPos, BlockPos, ChunkCoord, MAX_CHUNK_COORD, SHARD_SIZE, ShardCoord, SubChunkPos,
};
pub use entity::{EntityId, Mob, MobKind, NonPlayerEntity};
pub use observers::{ChunkObservers, ChunkSubscribers};
pub use shard::{
    ActiveBlockHandler, RejectedTransfer, Shard, ShardContext, ShardError, ShardStats,
    ShardStatsSnapshot,
};
pub use shard_client::{LocalShardClient, ShardClient};
pub use shard_manager::LocalShardManager;
