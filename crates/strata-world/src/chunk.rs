//! Raw storage for a 16×128×16 chunk column.
//!
//! [`ChunkData`] holds the block-type bytes, nibble-packed metadata and light
//! arrays, and the per-column height map exactly as they are persisted and
//! sent to clients. Index math lives here; bounds checking, notifications and
//! entities are layered on top by [`Chunk`](crate::chunk_api::Chunk).

use crate::coords::{ChunkCoord, SubChunkPos};
use crate::nibble::{NibbleArray, nibble_shift};

/// Chunk width along X, in blocks.
pub const CHUNK_SIZE_X: usize = 16;
/// Chunk height along Y, in blocks.
pub const CHUNK_SIZE_Y: usize = 128;
/// Chunk depth along Z, in blocks.
pub const CHUNK_SIZE_Z: usize = 16;

/// Number of voxels in a chunk.
pub const CHUNK_VOLUME: usize = CHUNK_SIZE_X * CHUNK_SIZE_Y * CHUNK_SIZE_Z;

/// Number of vertical columns in a chunk (one height-map entry each).
pub const CHUNK_COLUMNS: usize = CHUNK_SIZE_X * CHUNK_SIZE_Z;

/// A block type id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BlockId(pub u8);

impl BlockId {
    /// Empty space.
    pub const AIR: Self = Self(0);
}

/// Errors from block addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    /// The sub-chunk position lies outside the chunk volume.
    #[error("sub-chunk position {0} is outside the chunk")]
    OutOfBounds(SubChunkPos),
}

/// Location of one voxel inside the chunk arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockIndex {
    /// Offset into the block-type array.
    pub index: usize,
    /// Nibble shift inside byte `index / 2` of the nibble arrays (0 or 4).
    pub shift: u8,
}

/// Maps a sub-chunk position to its array offset.
///
/// `index = y + z * 128 + x * 128 * 16`. Y varies fastest so a column is
/// contiguous.
pub fn block_index(sub: SubChunkPos) -> Result<BlockIndex, BlockError> {
    let in_bounds = (0..CHUNK_SIZE_X as i32).contains(&sub.x)
        && (0..CHUNK_SIZE_Y as i32).contains(&sub.y)
        && (0..CHUNK_SIZE_Z as i32).contains(&sub.z);
    if !in_bounds {
        return Err(BlockError::OutOfBounds(sub));
    }
    let index = sub.y as usize
        + sub.z as usize * CHUNK_SIZE_Y
        + sub.x as usize * CHUNK_SIZE_Y * CHUNK_SIZE_Z;
    Ok(BlockIndex {
        index,
        shift: nibble_shift(index),
    })
}

/// Block, metadata, light and height-map arrays for one chunk column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkData {
    coord: ChunkCoord,
    blocks: Vec<u8>,
    metadata: NibbleArray,
    block_light: NibbleArray,
    sky_light: NibbleArray,
    height_map: Vec<u8>,
}

impl ChunkData {
    /// Creates an all-air chunk with no light.
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            blocks: vec![0; CHUNK_VOLUME],
            metadata: NibbleArray::new(CHUNK_VOLUME),
            block_light: NibbleArray::new(CHUNK_VOLUME),
            sky_light: NibbleArray::new(CHUNK_VOLUME),
            height_map: vec![0; CHUNK_COLUMNS],
        }
    }

    /// Constructs `ChunkData` from raw arrays (used by the store decoder).
    ///
    /// The caller must ensure every array has the exact size for the chunk
    /// volume.
    pub(crate) fn from_raw_parts(
        coord: ChunkCoord,
        blocks: Vec<u8>,
        metadata: Vec<u8>,
        block_light: Vec<u8>,
        sky_light: Vec<u8>,
        height_map: Vec<u8>,
    ) -> Self {
        Self {
            coord,
            blocks,
            metadata: NibbleArray::from_bytes(metadata),
            block_light: NibbleArray::from_bytes(block_light),
            sky_light: NibbleArray::from_bytes(sky_light),
            height_map,
        }
    }

    /// The chunk's coordinate.
    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Block type at `at`.
    pub fn block(&self, at: BlockIndex) -> BlockId {
        BlockId(self.blocks[at.index])
    }

    /// Metadata nibble at `at`.
    pub fn block_data(&self, at: BlockIndex) -> u8 {
        self.metadata.get(at.index)
    }

    /// Block-light nibble at `at`.
    pub fn block_light(&self, at: BlockIndex) -> u8 {
        self.block_light.get(at.index)
    }

    /// Sky-light nibble at `at`.
    pub fn sky_light(&self, at: BlockIndex) -> u8 {
        self.sky_light.get(at.index)
    }

    /// Writes block type and metadata at `at`.
    pub fn set(&mut self, at: BlockIndex, block: BlockId, metadata: u8) {
        self.blocks[at.index] = block.0;
        self.metadata.set(at.index, metadata);
    }

    /// Sets the sky-light level of every voxel.
    pub fn fill_sky_light(&mut self, level: u8) {
        self.sky_light.fill(level);
    }

    /// Height-map entry for column `(x, z)`, or `None` outside the chunk.
    pub fn height_at(&self, x: usize, z: usize) -> Option<u8> {
        if x >= CHUNK_SIZE_X || z >= CHUNK_SIZE_Z {
            return None;
        }
        Some(self.height_map[z * CHUNK_SIZE_X + x])
    }

    /// Raw block-type bytes.
    pub fn blocks(&self) -> &[u8] {
        &self.blocks
    }

    /// Raw packed metadata bytes.
    pub fn metadata(&self) -> &[u8] {
        self.metadata.as_bytes()
    }

    /// Raw packed block-light bytes.
    pub fn block_light_bytes(&self) -> &[u8] {
        self.block_light.as_bytes()
    }

    /// Raw packed sky-light bytes.
    pub fn sky_light_bytes(&self) -> &[u8] {
        self.sky_light.as_bytes()
    }

    /// Raw height-map bytes.
    pub fn height_map(&self) -> &[u8] {
        &self.height_map
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
