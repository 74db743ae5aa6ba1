//! Type-safe wrappers for hashing parameters and signatures.
//!
//! Newtypes keep raw `usize` values from being passed where a validated
//! dimension or hash length is expected.

use std::num::NonZeroUsize;

use crate::error::{LshError, LshResult};

/// Dimension `d` shared by every vector one model processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorDimension(NonZeroUsize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> LshResult<Self> {
        NonZeroUsize::new(dim)
            .map(Self)
            .ok_or_else(|| LshError::MalformedInput {
                reason: "vector dimension cannot be zero".to_string(),
            })
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0.get()
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> LshResult<()> {
        if vector.len() != self.get() {
            return Err(LshError::DimensionMismatch {
                expected: self.get(),
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configured hash length: one bit per hyperplane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashBits(NonZeroUsize);

impl HashBits {
    /// Creates a new `HashBits`, rejecting zero.
    pub fn new(bits: usize) -> LshResult<Self> {
        NonZeroUsize::new(bits)
            .map(Self)
            .ok_or_else(|| LshError::InvalidConfig {
                reason: "bits must be a positive integer".to_string(),
            })
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0.get()
    }

    /// Number of calibration vectors consumed by one fit.
    #[must_use]
    pub const fn required_samples(&self) -> usize {
        2 * self.0.get()
    }
}

impl std::fmt::Display for HashBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binary signature of one vector, one `0`/`1` byte per hyperplane in
/// hyperplane order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashCode(Vec<u8>);

impl HashCode {
    /// Wraps bits that are already known to be `0` or `1`.
    pub(crate) fn from_bits(bits: Vec<u8>) -> Self {
        debug_assert!(bits.iter().all(|&b| b <= 1));
        Self(bits)
    }

    /// Number of bits in the code.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bits as bytes, one byte per bit.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of `1` bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.0.iter().filter(|&&bit| bit == 1).count()
    }

    /// Fraction of bits set, `0.0` for an empty code.
    #[must_use]
    pub fn set_fraction(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.count_ones() as f64 / self.0.len() as f64
    }

    /// Bits packed eight to a byte, most significant bit first.
    ///
    /// The final byte is zero-padded when `len()` is not a multiple of 8.
    #[must_use]
    pub fn packed(&self) -> Vec<u8> {
        self.0
            .chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, &bit)| acc | (bit << (7 - i)))
            })
            .collect()
    }

    /// Number of positions at which the two codes differ.
    ///
    /// Returns an error if the codes have different lengths.
    pub fn hamming_distance(&self, other: &HashCode) -> LshResult<usize> {
        if self.len() != other.len() {
            return Err(LshError::DimensionMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(self
            .0
            .iter()
            .zip(other.0.iter())
            .filter(|(a, b)| a != b)
            .count())
    }
}

impl AsRef<[u8]> for HashCode {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
