/// Fixed-length bit vector backing field and record Bloom filters.
///
/// Bit `i` is stored as bit `i % 8` of byte `i / 8` (little-endian bit order), which is also the
/// transport byte layout of a record Bloom filter.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitVector {
    len: usize,
    data: Vec<u8>,
}

impl BitVector {
    /// An all-zero vector of `len` bits.
    pub fn zeros(len: usize) -> Self {
        Self {
            len,
            data: vec![0u8; len.div_ceil(8)],
        }
    }

    /// Rebuilds a vector of `len` bits from its byte layout.
    ///
    /// Returns `None` unless `bytes` is exactly `ceil(len / 8)` bytes long with no bit set at or
    /// beyond `len`.
    pub fn from_bytes(len: usize, bytes: &[u8]) -> Option<Self> {
        let mut vector = Self::zeros(len);
        if bytes.len() != vector.data.len() {
            return None;
        }
        vector.data.copy_from_slice(bytes);

        let tail_bits = len % 8;
        if tail_bits != 0 {
            let last = vector.data[vector.data.len() - 1];
            if last >> tail_bits != 0 {
                return None;
            }
        }
        Some(vector)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Reads bit `index`; out-of-range bits read as unset.
    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.data[index / 8] >> (index % 8)) & 1 == 1
    }

    /// Sets bit `index`; out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index >= self.len {
            return;
        }
        self.data[index / 8] |= 1 << (index % 8);
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        self.data.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Number of bits set in both vectors.
    pub fn intersection_cardinality(&self, other: &BitVector) -> usize {
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// Indices of set bits, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.get(i))
    }
}

impl std::fmt::Debug for BitVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitVector")
            .field("len", &self.len)
            .field("cardinality", &self.cardinality())
            .finish()
    }
}
