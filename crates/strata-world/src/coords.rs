//! World, chunk, sub-chunk and shard coordinate types.
//!
//! Chunks are 16 blocks wide on X and Z and span the full world height, so
//! only the horizontal axes participate in chunk and shard addressing.

use std::fmt;

use crate::chunk::{CHUNK_SIZE_X, CHUNK_SIZE_Z};

/// Number of chunks along each horizontal edge of a shard.
pub const SHARD_SIZE: i32 = 16;

/// Largest chunk coordinate whose blocks have `i32` coordinates. The world
/// spans `[-MAX_CHUNK_COORD - 1, MAX_CHUNK_COORD]` on both horizontal axes.
pub const MAX_CHUNK_COORD: i32 = i32::MAX / CHUNK_SIZE_X as i32;

/// Identifies a chunk column in the world grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChunkCoord {
    /// Chunk-grid X coordinate.
    pub x: i32,
    /// Chunk-grid Z coordinate.
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Packs both axes into a single collision-free 64-bit key.
    ///
    /// X occupies the high 32 bits and Z the low 32 bits, both as their
    /// two's-complement bit patterns.
    pub fn key(self) -> u64 {
        (u64::from(self.x as u32) << 32) | u64::from(self.z as u32)
    }

    /// Inverse of [`ChunkCoord::key`].
    pub fn from_key(key: u64) -> Self {
        Self {
            x: (key >> 32) as u32 as i32,
            z: key as u32 as i32,
        }
    }

    /// Returns the absolute position of `sub` inside this chunk.
    ///
    /// Exact for chunks within [`MAX_CHUNK_COORD`]; beyond it the block
    /// coordinates wrap.
    pub fn block_pos(self, sub: SubChunkPos) -> BlockPos {
        BlockPos {
            x: self.x.wrapping_mul(CHUNK_SIZE_X as i32).wrapping_add(sub.x),
            y: sub.y,
            z: self.z.wrapping_mul(CHUNK_SIZE_Z as i32).wrapping_add(sub.z),
        }
    }

    /// Returns the shard that owns this chunk.
    pub fn shard_coord(self) -> ShardCoord {
        ShardCoord {
            x: self.x.div_euclid(SHARD_SIZE),
            z: self.z.div_euclid(SHARD_SIZE),
        }
    }

    /// Iterates over the square of side `2 * radius + 1` centred on this
    /// chunk, row-major with Z outer and X inner.
    ///
    /// A negative radius yields nothing.
    pub fn square(self, radius: i32) -> impl Iterator<Item = ChunkCoord> {
        let Self { x: cx, z: cz } = self;
        (cz - radius..=cz + radius)
            .flat_map(move |z| (cx - radius..=cx + radius).map(move |x| ChunkCoord { x, z }))
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// A position local to one chunk's voxel grid.
///
/// Components are signed so that out-of-range input can be represented and
/// rejected by bounds checks rather than wrapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SubChunkPos {
    /// Local X in `[0, 16)` when valid.
    pub x: i32,
    /// Local Y in `[0, 128)` when valid.
    pub y: i32,
    /// Local Z in `[0, 16)` when valid.
    pub z: i32,
}

impl SubChunkPos {
    /// Creates a new sub-chunk position. No validation is performed.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for SubChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// An absolute block position in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPos {
    /// World X.
    pub x: i32,
    /// World Y.
    pub y: i32,
    /// World Z.
    pub z: i32,
}

impl BlockPos {
    /// Creates a new block position.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk containing this block.
    pub fn chunk_coord(self) -> ChunkCoord {
        ChunkCoord {
            x: self.x.div_euclid(CHUNK_SIZE_X as i32),
            z: self.z.div_euclid(CHUNK_SIZE_Z as i32),
        }
    }

    /// This block's position relative to its chunk.
    pub fn sub_chunk(self) -> SubChunkPos {
        SubChunkPos {
            x: self.x.rem_euclid(CHUNK_SIZE_X as i32),
            y: self.y,
            z: self.z.rem_euclid(CHUNK_SIZE_Z as i32),
        }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// An absolute, fractional entity position in block units.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct AbsPos {
    /// World X.
    pub x: f64,
    /// World Y.
    pub y: f64,
    /// World Z.
    pub z: f64,
}

impl AbsPos {
    /// Creates a new absolute position.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The chunk containing this position.
    pub fn chunk_coord(self) -> ChunkCoord {
        ChunkCoord {
            x: (self.x / CHUNK_SIZE_X as f64).floor() as i32,
            z: (self.z / CHUNK_SIZE_Z as f64).floor() as i32,
        }
    }
}

/// Identifies a shard: a square region of [`SHARD_SIZE`]² chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardCoord {
    /// Shard-grid X coordinate.
    pub x: i32,
    /// Shard-grid Z coordinate.
    pub z: i32,
}

impl ShardCoord {
    /// Creates a new shard coordinate.
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Returns `true` if `chunk` lies inside this shard's region.
    pub fn contains(self, chunk: ChunkCoord) -> bool {
        chunk.shard_coord() == self
    }
}

impl fmt::Display for ShardCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.x, self.z)
    }
}
