//! Persistent chunk records and their on-disk layout.
//!
//! Each chunk lives in its own gzip-compressed NBT file whose root compound
//! holds a `Level` compound with these fields:
//!
//! | Path | Tag |
//! |------|-----|
//! | `/Level/xPos` | Int |
//! | `/Level/zPos` | Int |
//! | `/Level/Blocks` | ByteArray (32768) |
//! | `/Level/Data` | ByteArray (16384) |
//! | `/Level/SkyLight` | ByteArray (16384) |
//! | `/Level/BlockLight` | ByteArray (16384) |
//! | `/Level/HeightMap` | ByteArray (256) |
//!
//! Files are laid out as
//! `<world>/<b36(x & 63)>/<b36(z & 63)>/c.<b36(x)>.<b36(z)>.dat`.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use quartz_nbt::io::{Flavor, NbtIoError};
use quartz_nbt::{NbtCompound, NbtTag};

use crate::chunk::{CHUNK_COLUMNS, CHUNK_VOLUME, ChunkData};
use crate::coords::ChunkCoord;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Errors from decoding a persisted chunk record.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The bytes are not a readable gzip NBT document.
    #[error("unreadable NBT: {0}")]
    Nbt(#[from] NbtIoError),
    /// A required field is absent.
    #[error("missing field {0}")]
    MissingField(&'static str),
    /// A required field has an unexpected tag type.
    #[error("field {path} is not a{expected}")]
    WrongType {
        /// Field path.
        path: &'static str,
        /// Expected tag kind, with article spacing.
        expected: &'static str,
    },
    /// A byte array does not match the fixed chunk dimensions.
    #[error("field {path} has {actual} bytes, expected {expected}")]
    BadLength {
        /// Field path.
        path: &'static str,
        /// Required length.
        expected: usize,
        /// Length found.
        actual: usize,
    },
}

/// Errors from loading or saving chunks.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the chunk.
    #[error("chunk {0} not found")]
    NotFound(ChunkCoord),
    /// The record exists but could not be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The record is corrupt.
    #[error("corrupt chunk record: {0}")]
    Decode(#[from] DecodeError),
    /// The chunk could not be encoded.
    #[error("failed to encode chunk: {0}")]
    Encode(#[source] NbtIoError),
    /// The record describes a different chunk than the one requested.
    #[error("record for chunk {requested} claims to be chunk {found}")]
    CoordinateMismatch {
        /// Coordinate asked for.
        requested: ChunkCoord,
        /// Coordinate stored in the record.
        found: ChunkCoord,
    },
}

/// Backing storage the chunk manager loads from and saves to.
pub trait ChunkSource: Send + Sync {
    /// Reads and decodes the chunk at `coord`.
    fn load(&self, coord: ChunkCoord) -> Result<ChunkData, StoreError>;

    /// Persists `chunk`.
    fn save(&self, chunk: &ChunkData) -> Result<(), StoreError>;
}

/// Encodes `n` in lowercase base 36, with a leading `-` for negatives.
pub fn base36_encode(n: i32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut magnitude = i64::from(n).unsigned_abs();
    let mut digits = Vec::with_capacity(8);
    while magnitude != 0 {
        digits.push(BASE36_DIGITS[(magnitude % 36) as usize]);
        magnitude /= 36;
    }
    if n < 0 {
        digits.push(b'-');
    }
    digits.reverse();
    // Only ASCII from BASE36_DIGITS and '-' was pushed.
    digits.into_iter().map(char::from).collect()
}

/// Inverse of [`base36_encode`].
///
/// Accepts exactly the strings `base36_encode` produces: lowercase digits,
/// no leading zeros, no `+`, no `-0`.
pub fn base36_decode(s: &str) -> Option<i32> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if body.is_empty() || (body.len() > 1 && body.starts_with('0')) {
        return None;
    }
    if negative && body == "0" {
        return None;
    }
    let mut value: i64 = 0;
    for b in body.bytes() {
        let digit = BASE36_DIGITS.iter().position(|&d| d == b)? as i64;
        value = value.checked_mul(36)?.checked_add(digit)?;
        if value > i64::from(i32::MAX) + 1 {
            return None;
        }
    }
    let value = if negative { -value } else { value };
    i32::try_from(value).ok()
}

/// Path of the record for `coord` under `world`.
pub fn chunk_path(world: &Path, coord: ChunkCoord) -> PathBuf {
    world
        .join(base36_encode(coord.x & 63))
        .join(base36_encode(coord.z & 63))
        .join(format!(
            "c.{}.{}.dat",
            base36_encode(coord.x),
            base36_encode(coord.z)
        ))
}

/// Decodes a gzip NBT chunk record.
pub fn decode_chunk(bytes: &[u8]) -> Result<ChunkData, DecodeError> {
    let (root, _) = quartz_nbt::io::read_nbt(&mut Cursor::new(bytes), Flavor::GzCompressed)?;

    let level = match root.inner().get("Level") {
        Some(NbtTag::Compound(level)) => level,
        Some(_) => {
            return Err(DecodeError::WrongType {
                path: "/Level",
                expected: " compound",
            });
        }
        None => return Err(DecodeError::MissingField("/Level")),
    };

    let x = int_field(level, "xPos", "/Level/xPos")?;
    let z = int_field(level, "zPos", "/Level/zPos")?;
    let blocks = byte_array_field(level, "Blocks", "/Level/Blocks", CHUNK_VOLUME)?;
    let metadata = byte_array_field(level, "Data", "/Level/Data", CHUNK_VOLUME / 2)?;
    let sky_light = byte_array_field(level, "SkyLight", "/Level/SkyLight", CHUNK_VOLUME / 2)?;
    let block_light =
        byte_array_field(level, "BlockLight", "/Level/BlockLight", CHUNK_VOLUME / 2)?;
    let height_map = byte_array_field(level, "HeightMap", "/Level/HeightMap", CHUNK_COLUMNS)?;

    Ok(ChunkData::from_raw_parts(
        ChunkCoord::new(x, z),
        blocks,
        metadata,
        block_light,
        sky_light,
        height_map,
    ))
}

/// Encodes `chunk` as a gzip NBT record readable by [`decode_chunk`].
pub fn encode_chunk(chunk: &ChunkData) -> Result<Vec<u8>, StoreError> {
    let mut level = NbtCompound::new();
    level.insert("xPos", NbtTag::Int(chunk.coord().x));
    level.insert("zPos", NbtTag::Int(chunk.coord().z));
    level.insert("Blocks", byte_array(chunk.blocks()));
    level.insert("Data", byte_array(chunk.metadata()));
    level.insert("SkyLight", byte_array(chunk.sky_light_bytes()));
    level.insert("BlockLight", byte_array(chunk.block_light_bytes()));
    level.insert("HeightMap", byte_array(chunk.height_map()));

    let mut root = NbtCompound::new();
    root.insert("Level", NbtTag::Compound(level));

    let mut out = Vec::new();
    quartz_nbt::io::write_nbt(&mut out, None, &root, Flavor::GzCompressed)
        .map_err(StoreError::Encode)?;
    Ok(out)
}

fn int_field(level: &NbtCompound, name: &str, path: &'static str) -> Result<i32, DecodeError> {
    match level.inner().get(name) {
        Some(NbtTag::Int(v)) => Ok(*v),
        Some(_) => Err(DecodeError::WrongType {
            path,
            expected: "n int",
        }),
        None => Err(DecodeError::MissingField(path)),
    }
}

fn byte_array_field(
    level: &NbtCompound,
    name: &str,
    path: &'static str,
    expected: usize,
) -> Result<Vec<u8>, DecodeError> {
    let bytes = match level.inner().get(name) {
        Some(NbtTag::ByteArray(bytes)) => bytes,
        Some(_) => {
            return Err(DecodeError::WrongType {
                path,
                expected: " byte array",
            });
        }
        None => return Err(DecodeError::MissingField(path)),
    };
    if bytes.len() != expected {
        return Err(DecodeError::BadLength {
            path,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes.iter().map(|&b| b as u8).collect())
}

fn byte_array(bytes: &[u8]) -> NbtTag {
    NbtTag::ByteArray(bytes.iter().map(|&b| b as i8).collect())
}

/// Chunk records stored as individual files under a world directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    world_path: PathBuf,
}

impl DiskStore {
    /// Creates a store rooted at `world_path`.
    pub fn new(world_path: impl Into<PathBuf>) -> Self {
        Self {
            world_path: world_path.into(),
        }
    }

    /// The world directory.
    pub fn world_path(&self) -> &Path {
        &self.world_path
    }
}

impl ChunkSource for DiskStore {
    fn load(&self, coord: ChunkCoord) -> Result<ChunkData, StoreError> {
        let path = chunk_path(&self.world_path, coord);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(coord));
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let chunk = decode_chunk(&bytes)?;
        if chunk.coord() != coord {
            return Err(StoreError::CoordinateMismatch {
                requested: coord,
                found: chunk.coord(),
            });
        }
        tracing::debug!("loaded chunk {coord} from {}", path.display());
        Ok(chunk)
    }

    fn save(&self, chunk: &ChunkData) -> Result<(), StoreError> {
        let path = chunk_path(&self.world_path, chunk.coord());
        let bytes = encode_chunk(chunk)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        // Write beside the target and rename so readers never see a torn file.
        let tmp = path.with_extension("dat.tmp");
        fs::write(&tmp, &bytes).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!("saved chunk {} to {}", chunk.coord(), path.display());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;
    use crate::chunk::{BlockId, block_index};
    use crate::coords::SubChunkPos;

    fn gz_nbt(root: &NbtCompound) -> Vec<u8> {
        let mut out = Vec::new();
        quartz_nbt::io::write_nbt(&mut out, None, root, Flavor::GzCompressed).unwrap();
        out
    }

    fn level_without(skip: Option<&str>, x: i32, z: i32) -> NbtCompound {
        let fields = [
            ("xPos", NbtTag::Int(x)),
            ("zPos", NbtTag::Int(z)),
            ("Blocks", byte_array(&vec![1; CHUNK_VOLUME])),
            ("Data", byte_array(&vec![0; CHUNK_VOLUME / 2])),
            ("SkyLight", byte_array(&vec![0xff; CHUNK_VOLUME / 2])),
            ("BlockLight", byte_array(&vec![0; CHUNK_VOLUME / 2])),
            ("HeightMap", byte_array(&vec![64; CHUNK_COLUMNS])),
        ];
        let mut level = NbtCompound::new();
        for (name, tag) in fields {
            if Some(name) != skip {
                level.insert(name, tag);
            }
        }
        level
    }

    fn full_level(x: i32, z: i32) -> NbtCompound {
        level_without(None, x, z)
    }

    fn wrap(level: NbtCompound) -> NbtCompound {
        let mut root = NbtCompound::new();
        root.insert("Level", NbtTag::Compound(level));
        root
    }

    #[test]
    fn test_base36_known_values() {
        assert_eq!(base36_encode(0), "0");
        assert_eq!(base36_encode(35), "z");
        assert_eq!(base36_encode(36), "10");
        assert_eq!(base36_encode(-1), "-1");
        assert_eq!(base36_encode(-37), "-11");
        assert_eq!(base36_encode(63), "1r");
        assert_eq!(base36_encode(i32::MAX), "zik0zj");
        assert_eq!(base36_encode(i32::MIN), "-zik0zk");
    }

    #[test]
    fn test_base36_roundtrip_and_injective_in_range() {
        let mut seen = HashSet::new();
        for n in -10_000..=10_000 {
            let s = base36_encode(n);
            assert_eq!(base36_decode(&s), Some(n), "roundtrip failed for {n}");
            assert!(seen.insert(s), "duplicate encoding for {n}");
        }
        for n in [i32::MIN, i32::MAX, i32::MIN + 1] {
            assert_eq!(base36_decode(&base36_encode(n)), Some(n));
        }
    }

    #[test]
    fn test_base36_decode_rejects_noncanonical() {
        for s in ["", "-", "-0", "00", "01", "A", "+1", "1 ", "zzzzzzzz"] {
            assert_eq!(base36_decode(s), None, "accepted {s:?}");
        }
    }

    #[test]
    fn test_chunk_path_layout() {
        let world = Path::new("/world");
        assert_eq!(
            chunk_path(world, ChunkCoord::new(0, 0)),
            PathBuf::from("/world/0/0/c.0.0.dat")
        );
        // -13 & 63 == 51 == "1f"; 44 & 63 == 44 == "18"
        assert_eq!(
            chunk_path(world, ChunkCoord::new(-13, 44)),
            PathBuf::from("/world/1f/18/c.-d.18.dat")
        );
    }

    #[test]
    fn test_chunk_path_injective_on_sampled_grid() {
        let world = Path::new("w");
        let mut seen = HashSet::new();
        for x in (-10_000..=10_000).step_by(97) {
            for z in (-10_000..=10_000).step_by(89) {
                let path = chunk_path(world, ChunkCoord::new(x, z));
                assert!(seen.insert(path), "path collision at ({x}, {z})");
            }
        }

        // Neighbours around zero, where sign handling matters most.
        let mut near = HashSet::new();
        for x in -70..=70 {
            for z in -70..=70 {
                assert!(near.insert(chunk_path(world, ChunkCoord::new(x, z))));
            }
        }
    }

    #[test]
    fn test_decode_valid_record() {
        let bytes = gz_nbt(&wrap(full_level(3, -4)));
        let data = decode_chunk(&bytes).unwrap();
        assert_eq!(data.coord(), ChunkCoord::new(3, -4));
        let at = block_index(SubChunkPos::new(1, 2, 3)).unwrap();
        assert_eq!(data.block(at), BlockId(1));
        assert_eq!(data.sky_light(at), 15);
        assert_eq!(data.height_at(0, 0), Some(64));
    }

    #[test]
    fn test_decode_missing_each_field() {
        for name in ["xPos", "zPos", "Blocks", "Data", "SkyLight", "BlockLight", "HeightMap"] {
            let level = level_without(Some(name), 0, 0);
            let err = decode_chunk(&gz_nbt(&wrap(level))).unwrap_err();
            match err {
                DecodeError::MissingField(path) => assert!(path.ends_with(name)),
                other => panic!("expected MissingField for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_missing_level() {
        let err = decode_chunk(&gz_nbt(&NbtCompound::new())).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("/Level")));
    }

    #[test]
    fn test_decode_wrong_types() {
        let mut level = full_level(0, 0);
        level.insert("xPos", NbtTag::String("zero".to_string()));
        let err = decode_chunk(&gz_nbt(&wrap(level))).unwrap_err();
        assert!(matches!(err, DecodeError::WrongType { path: "/Level/xPos", .. }));

        let mut level = full_level(0, 0);
        level.insert("Blocks", NbtTag::Int(5));
        let err = decode_chunk(&gz_nbt(&wrap(level))).unwrap_err();
        assert!(matches!(err, DecodeError::WrongType { path: "/Level/Blocks", .. }));
    }

    #[test]
    fn test_decode_short_array() {
        let mut level = full_level(0, 0);
        level.insert("HeightMap", byte_array(&[0; 10]));
        let err = decode_chunk(&gz_nbt(&wrap(level))).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BadLength {
                path: "/Level/HeightMap",
                expected: CHUNK_COLUMNS,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_decode_garbage_is_error_not_panic() {
        assert!(matches!(decode_chunk(b"not a chunk"), Err(DecodeError::Nbt(_))));

        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&[0xff, 0x00, 0x01]).unwrap();
        let bytes = gz.finish().unwrap();
        assert!(decode_chunk(&bytes).is_err());
    }

    #[test]
    fn test_disk_store_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let coord = ChunkCoord::new(-70, 130);

        let mut data = ChunkData::new(coord);
        data.set(block_index(SubChunkPos::new(4, 5, 6)).unwrap(), BlockId(17), 3);
        store.save(&data).unwrap();

        assert!(chunk_path(dir.path(), coord).is_file());
        let loaded = store.load(coord).unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_disk_store_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let err = store.load(ChunkCoord::new(1, 1)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(c) if c == ChunkCoord::new(1, 1)));
    }

    #[test]
    fn test_disk_store_rejects_misfiled_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let wrong = gz_nbt(&wrap(full_level(9, 9)));
        let path = chunk_path(dir.path(), ChunkCoord::new(0, 0));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, wrong).unwrap();

        let err = store.load(ChunkCoord::new(0, 0)).unwrap_err();
        assert!(matches!(err, StoreError::CoordinateMismatch { .. }));
    }

    #[test]
    fn test_disk_store_corrupt_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let path = chunk_path(dir.path(), ChunkCoord::new(2, 2));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"\x1f\x8bjunk").unwrap();

        let err = store.load(ChunkCoord::new(2, 2)).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
