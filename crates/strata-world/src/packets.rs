//! Wire encodings of the two packets the world core emits to viewers.
//!
//! All multi-byte integers are big-endian. Framing beyond the leading packet
//! id belongs to the transport.
//!
//! ## Map chunk (`0x33`)
//!
//! | Field | Type |
//! |-------|------|
//! | block X of chunk origin | `i32` |
//! | block Y of chunk origin | `i16` (always 0) |
//! | block Z of chunk origin | `i32` |
//! | size X − 1, size Y − 1, size Z − 1 | 3 × `u8` |
//! | compressed length | `i32` |
//! | zlib(blocks ‖ metadata ‖ block light ‖ sky light) | bytes |
//!
//! ## Block change (`0x35`)
//!
//! `x: i32`, `y: i8`, `z: i32`, `type: i8`, `metadata: i8`.

use std::io::{self, Write};

use flate2::Compression;
use flate2::write::ZlibEncoder;

use crate::chunk::{BlockId, CHUNK_SIZE_X, CHUNK_SIZE_Y, CHUNK_SIZE_Z, ChunkData};
use crate::coords::BlockPos;

/// Packet id of the full chunk transfer.
pub const PACKET_ID_MAP_CHUNK: u8 = 0x33;
/// Packet id of a single block update.
pub const PACKET_ID_BLOCK_CHANGE: u8 = 0x35;

/// Encoded size of a block-change packet, id included.
pub const BLOCK_CHANGE_LEN: usize = 1 + 4 + 1 + 4 + 1 + 1;

/// Writes a block-change packet.
pub fn write_block_change<W: Write>(
    writer: &mut W,
    pos: BlockPos,
    block: BlockId,
    metadata: u8,
) -> io::Result<()> {
    let mut buf = [0u8; BLOCK_CHANGE_LEN];
    buf[0] = PACKET_ID_BLOCK_CHANGE;
    buf[1..5].copy_from_slice(&pos.x.to_be_bytes());
    buf[5] = pos.y as i8 as u8;
    buf[6..10].copy_from_slice(&pos.z.to_be_bytes());
    buf[10] = block.0;
    buf[11] = metadata;
    writer.write_all(&buf)
}

/// Writes a map-chunk packet carrying the whole chunk.
pub fn write_map_chunk<W: Write>(writer: &mut W, data: &ChunkData) -> io::Result<()> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data.blocks())?;
    encoder.write_all(data.metadata())?;
    encoder.write_all(data.block_light_bytes())?;
    encoder.write_all(data.sky_light_bytes())?;
    let compressed = encoder.finish()?;
    let compressed_len = i32::try_from(compressed.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "compressed chunk too large"))?;

    let origin = data.coord().block_pos(Default::default());
    let mut header = Vec::with_capacity(18);
    header.push(PACKET_ID_MAP_CHUNK);
    header.extend_from_slice(&origin.x.to_be_bytes());
    header.extend_from_slice(&0i16.to_be_bytes());
    header.extend_from_slice(&origin.z.to_be_bytes());
    header.push((CHUNK_SIZE_X - 1) as u8);
    header.push((CHUNK_SIZE_Y - 1) as u8);
    header.push((CHUNK_SIZE_Z - 1) as u8);
    header.extend_from_slice(&compressed_len.to_be_bytes());

    writer.write_all(&header)?;
    writer.write_all(&compressed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
