//! High-level chunk wrapper with bounds-checked block access, observer
//! notification, entity ownership and versioning.
//!
//! [`Chunk`] wraps [`ChunkData`] and is the unit the chunk manager caches.
//! It keeps a non-owning reference to the observer registry so that block
//! writes can be broadcast to everyone watching the chunk.

use std::fmt;
use std::io::{self, Write};
use std::sync::Weak;

use rustc_hash::FxHashMap;

use crate::chunk::{BlockError, BlockId, BlockIndex, ChunkData, block_index};
use crate::coords::{ChunkCoord, SubChunkPos};
use crate::entity::{EntityId, NonPlayerEntity};
use crate::observers::ChunkObservers;
use crate::packets;

/// A loaded chunk: voxel data plus the entities it currently owns.
pub struct Chunk {
    data: ChunkData,
    observers: Weak<dyn ChunkObservers>,
    entities: FxHashMap<EntityId, Box<dyn NonPlayerEntity>>,
    /// Incremented on every mutation that changes block data.
    version: u64,
}

impl Chunk {
    /// Wraps decoded data. Block changes are reported to `observers` while
    /// the registry is still alive.
    pub fn new(data: ChunkData, observers: Weak<dyn ChunkObservers>) -> Self {
        Self {
            data,
            observers,
            entities: FxHashMap::default(),
            version: 0,
        }
    }

    /// The chunk's coordinate.
    pub fn coord(&self) -> ChunkCoord {
        self.data.coord()
    }

    /// Maps `sub` to its array offset.
    pub fn index_of(&self, sub: SubChunkPos) -> Result<BlockIndex, BlockError> {
        block_index(sub)
    }

    /// Sets a block and its metadata, then notifies observers.
    ///
    /// Returns whether the stored type or metadata actually changed.
    /// Out-of-range positions are rejected without touching the chunk.
    pub fn set_block(
        &mut self,
        sub: SubChunkPos,
        block: BlockId,
        metadata: u8,
    ) -> Result<bool, BlockError> {
        let at = block_index(sub)?;
        let metadata = metadata & 0x0f;
        let changed = self.data.block(at) != block || self.data.block_data(at) != metadata;
        self.data.set(at, block, metadata);
        if changed {
            self.version += 1;
        }
        self.notify_block_change(sub, block, metadata);
        Ok(changed)
    }

    /// Returns the block type at `sub`.
    pub fn get_block(&self, sub: SubChunkPos) -> Result<BlockId, BlockError> {
        Ok(self.data.block(block_index(sub)?))
    }

    /// Returns the metadata nibble at `sub`.
    pub fn get_block_data(&self, sub: SubChunkPos) -> Result<u8, BlockError> {
        Ok(self.data.block_data(block_index(sub)?))
    }

    /// Returns the block-light level at `sub`.
    pub fn block_light(&self, sub: SubChunkPos) -> Result<u8, BlockError> {
        Ok(self.data.block_light(block_index(sub)?))
    }

    /// Returns the sky-light level at `sub`.
    pub fn sky_light(&self, sub: SubChunkPos) -> Result<u8, BlockError> {
        Ok(self.data.sky_light(block_index(sub)?))
    }

    /// Height-map value for column `(x, z)`.
    pub fn height_at(&self, x: usize, z: usize) -> Option<u8> {
        self.data.height_at(x, z)
    }

    /// Writes the full chunk as a map-chunk packet for a connected viewer.
    pub fn write_chunk_data<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        packets::write_map_chunk(writer, &self.data)
    }

    /// Current mutation counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The underlying arrays.
    pub fn data(&self) -> &ChunkData {
        &self.data
    }

    /// Takes ownership of `entity`. An entity with the same id is replaced.
    pub fn add_entity(&mut self, entity: Box<dyn NonPlayerEntity>) {
        self.entities.insert(entity.id(), entity);
    }

    /// Gives up ownership of the entity with `id`, if present.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<Box<dyn NonPlayerEntity>> {
        self.entities.remove(&id)
    }

    /// Returns `true` if this chunk owns the entity with `id`.
    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Borrows an owned entity.
    pub fn entity(&self, id: EntityId) -> Option<&dyn NonPlayerEntity> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    /// Number of entities owned by this chunk.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Ids of all owned entities, in no particular order.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    fn notify_block_change(&self, sub: SubChunkPos, block: BlockId, metadata: u8) {
        let Some(observers) = self.observers.upgrade() else {
            return;
        };
        let coord = self.coord();
        let mut packet = Vec::with_capacity(packets::BLOCK_CHANGE_LEN);
        if let Err(e) = packets::write_block_change(&mut packet, coord.block_pos(sub), block, metadata)
        {
            tracing::warn!("failed to encode block change in chunk {coord}: {e}");
            return;
        }
        observers.multicast(coord, &packet);
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("coord", &self.coord())
            .field("entities", &self.entities.len())
            .field("version", &self.version)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
