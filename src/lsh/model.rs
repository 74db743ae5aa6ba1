//! The calibrated hyperplane set and the hashing operations over it.
//!
//! A `HyperplaneSet` is immutable once built. Hashing takes `&self`, so any
//! number of threads can hash against one shared model without locking.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};

use crate::error::{LshError, LshResult};
use crate::lsh::calibration;
use crate::lsh::types::{HashBits, HashCode, VectorDimension};

/// Calibrated hyperplanes: `bits` planes in a `d`-dimensional space.
///
/// Row `i` of `anchors` (`M`) is the point plane `i` passes through, row `i`
/// of `normals` (`N`) its normal, and `offsets[i]` (`NdotM`) the cached
/// `N[i] . M[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperplaneSet {
    anchors: Array2<f32>,
    normals: Array2<f32>,
    offsets: Array1<f32>,
    bits: HashBits,
    dimension: VectorDimension,
}

impl HyperplaneSet {
    /// Calibrates a new model from `data`.
    ///
    /// See [`calibration::calibrate`] for the sampling rules.
    pub fn fit(data: &[Vec<f32>], bits: HashBits, seed: u64) -> LshResult<Self> {
        calibration::calibrate(data, bits, seed)
    }

    /// Assembles a model from its three arrays, checking that they align.
    pub fn from_parts(
        anchors: Array2<f32>,
        normals: Array2<f32>,
        offsets: Array1<f32>,
    ) -> LshResult<Self> {
        let bits = HashBits::new(anchors.nrows())?;
        let dimension = VectorDimension::new(anchors.ncols())?;

        if normals.nrows() != bits.get() || offsets.len() != bits.get() {
            return Err(LshError::DimensionMismatch {
                expected: bits.get(),
                actual: if normals.nrows() != bits.get() {
                    normals.nrows()
                } else {
                    offsets.len()
                },
            });
        }
        if normals.ncols() != dimension.get() {
            return Err(LshError::DimensionMismatch {
                expected: dimension.get(),
                actual: normals.ncols(),
            });
        }

        Ok(Self {
            anchors,
            normals,
            offsets,
            bits,
            dimension,
        })
    }

    #[must_use]
    pub fn bits(&self) -> HashBits {
        self.bits
    }

    /// Dimension every hashed vector must have.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Anchor points `M`, one row per hyperplane.
    #[must_use]
    pub fn anchors(&self) -> ArrayView2<'_, f32> {
        self.anchors.view()
    }

    /// Normals `N`, one row per hyperplane.
    #[must_use]
    pub fn normals(&self) -> ArrayView2<'_, f32> {
        self.normals.view()
    }

    /// Cached `N[i] . M[i]` per hyperplane.
    #[must_use]
    pub fn offsets(&self) -> ArrayView1<'_, f32> {
        self.offsets.view()
    }

    /// Hashes a single vector.
    ///
    /// Bit `i` is `1` when `x . N[i] >= NdotM[i]`, i.e. when `x` lies on the
    /// normal side of plane `i` or on the plane itself.
    pub fn hash(&self, vector: &[f32]) -> LshResult<HashCode> {
        self.dimension.validate_vector(vector)?;

        let projections = self.normals.dot(&ArrayView1::from(vector));
        let bits = Zip::from(&projections)
            .and(&self.offsets)
            .map_collect(|&p, &t| u8::from(p >= t));

        Ok(HashCode::from_bits(bits.to_vec()))
    }

    /// Hashes a batch of vectors laid out as rows of an `m x d` matrix.
    ///
    /// Returns an `m x bits` matrix of `0`/`1` values. The whole batch is
    /// projected with one matrix product and compared against the offsets.
    pub fn hash_batch(&self, queries: ArrayView2<'_, f32>) -> LshResult<Array2<u8>> {
        if queries.ncols() != self.dimension.get() {
            return Err(LshError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: queries.ncols(),
            });
        }

        let projections = queries.dot(&self.normals.t());
        let mut codes = Array2::<u8>::zeros(projections.raw_dim());
        Zip::from(&mut codes)
            .and(&projections)
            .and_broadcast(&self.offsets)
            .for_each(|code, &p, &t| *code = u8::from(p >= t));

        Ok(codes)
    }

    /// Hashes a batch given as separate vectors.
    ///
    /// Every vector is checked against the model dimension before any
    /// hashing happens.
    pub fn hash_rows(&self, vectors: &[Vec<f32>]) -> LshResult<Vec<HashCode>> {
        let d = self.dimension.get();
        let mut flat = Vec::with_capacity(vectors.len() * d);
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
            flat.extend_from_slice(vector);
        }

        let queries = ArrayView2::from_shape((vectors.len(), d), &flat).map_err(|e| {
            LshError::MalformedInput {
                reason: format!("cannot shape batch: {e}"),
            }
        })?;

        let codes = self.hash_batch(queries)?;
        Ok(codes
            .rows()
            .into_iter()
            .map(|row| HashCode::from_bits(row.to_vec()))
            .collect())
    }
}
