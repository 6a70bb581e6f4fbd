//! Nibble-packed array: two 4-bit values per byte.
//!
//! Even indices live in the low nibble of byte `index / 2`, odd indices in
//! the high nibble. This order matches the on-disk and wire layouts and must
//! not change.

/// Bit shift of the nibble holding `index`: 0 for even, 4 for odd.
pub fn nibble_shift(index: usize) -> u8 {
    if index % 2 == 0 { 0 } else { 4 }
}

/// A compact array of 4-bit values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NibbleArray {
    data: Vec<u8>,
}

impl NibbleArray {
    /// Creates an array holding `len` nibbles, all zero. `len` must be even.
    pub fn new(len: usize) -> Self {
        debug_assert!(len % 2 == 0, "nibble count must be even");
        Self {
            data: vec![0; len / 2],
        }
    }

    /// Wraps raw packed bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Number of nibbles stored.
    pub fn len(&self) -> usize {
        self.data.len() * 2
    }

    /// Returns `true` if the array holds no nibbles.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the value at `index`.
    pub fn get(&self, index: usize) -> u8 {
        (self.data[index / 2] >> nibble_shift(index)) & 0x0f
    }

    /// Sets the value at `index`, keeping the neighbouring nibble intact.
    ///
    /// Only the low four bits of `value` are stored.
    pub fn set(&mut self, index: usize, value: u8) {
        let shift = nibble_shift(index);
        let mask = 0x0fu8 << shift;
        let byte = &mut self.data[index / 2];
        *byte = ((value << shift) & mask) | (*byte & !mask);
    }

    /// Sets every nibble to `value`.
    pub fn fill(&mut self, value: u8) {
        let v = value & 0x0f;
        self.data.fill(v | (v << 4));
    }

    /// The packed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
