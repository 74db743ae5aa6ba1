//! Calibration: derives hyperplanes from a sample of real vectors.
//!
//! Each hyperplane is anchored at the midpoint of a pair of sampled vectors
//! and oriented along the direction from the midpoint to the second vector,
//! so the planes follow the data distribution instead of passing through the
//! origin.
//!
//! # Algorithm Details
//! - Sampling: `2 * bits` distinct indices, drawn without replacement from a
//!   `StdRng` seeded with the configured seed
//! - Pairing: pair `i` is `(draw[i], draw[bits + i])`
//! - Anchor: `M[i] = (v1 + v2) / 2`
//! - Normal: `N[i] = v2 - M[i]`
//! - Offset: `NdotM[i] = N[i] . M[i]`

use ndarray::{Array2, ArrayView1, Axis, Zip};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use tracing::debug;

use crate::error::{LshError, LshResult};
use crate::lsh::model::HyperplaneSet;
use crate::lsh::types::{HashBits, VectorDimension};

/// Fits a hyperplane set to `data` using a seeded sample of `2 * bits` vectors.
///
/// The same `seed` and the same `data` (same vectors, same order) always
/// produce an identical model.
///
/// # Errors
/// - `InsufficientData` if `data` has fewer than `2 * bits` vectors
/// - `DimensionMismatch` if the vectors do not share one dimension
#[must_use = "calibration results should be used or the computation is wasted"]
pub fn calibrate(data: &[Vec<f32>], bits: HashBits, seed: u64) -> LshResult<HyperplaneSet> {
    let indices = sample_indices(data.len(), bits, seed)?;
    debug!(
        vectors = data.len(),
        bits = bits.get(),
        seed,
        "sampled calibration pairs"
    );
    from_sample(data, &indices)
}

/// Draws `2 * bits` distinct indices in `0..n` from a generator seeded with `seed`.
pub fn sample_indices(n: usize, bits: HashBits, seed: u64) -> LshResult<Vec<usize>> {
    let required = bits.required_samples();
    if n < required {
        return Err(LshError::InsufficientData {
            required,
            available: n,
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    Ok(index::sample(&mut rng, n, required).into_vec())
}

/// Builds a hyperplane set from an explicit ordered sample of `data` indices.
///
/// `indices` must have even, non-zero length. The first half supplies the
/// first vector of each pair and the second half the second vector. A
/// sample that is odd-sized or points past the end of `data` is rejected
/// with `InvalidConfig`.
pub fn from_sample(data: &[Vec<f32>], indices: &[usize]) -> LshResult<HyperplaneSet> {
    let bits = HashBits::new(indices.len() / 2)?;
    if indices.len() % 2 != 0 {
        return Err(LshError::InvalidConfig {
            reason: format!("sample of {} indices cannot be split into pairs", indices.len()),
        });
    }
    if let Some(&out_of_range) = indices.iter().find(|&&i| i >= data.len()) {
        return Err(LshError::InvalidConfig {
            reason: format!(
                "sample index {out_of_range} is out of range for {} vectors",
                data.len()
            ),
        });
    }

    let dimension = dataset_dimension(data)?;
    let d = dimension.get();
    let (first, second) = indices.split_at(bits.get());

    let mut anchors = Array2::<f32>::zeros((bits.get(), d));
    let mut normals = Array2::<f32>::zeros((bits.get(), d));

    for (i, (&a, &b)) in first.iter().zip(second.iter()).enumerate() {
        let (v1, v2) = (&data[a], &data[b]);
        Zip::from(anchors.row_mut(i))
            .and(normals.row_mut(i))
            .and(ArrayView1::from(v1.as_slice()))
            .and(ArrayView1::from(v2.as_slice()))
            .for_each(|m, n, &x1, &x2| {
                *m = (x1 + x2) / 2.0;
                *n = x2 - *m;
            });
    }

    let offsets = (&normals * &anchors).sum_axis(Axis(1));
    HyperplaneSet::from_parts(anchors, normals, offsets)
}

/// Returns the shared dimension of `data`, or `DimensionMismatch` if the
/// vectors disagree.
fn dataset_dimension(data: &[Vec<f32>]) -> LshResult<VectorDimension> {
    let first = data.first().ok_or(LshError::InsufficientData {
        required: 1,
        available: 0,
    })?;
    let dimension = VectorDimension::new(first.len())?;
    for vector in data {
        dimension.validate_vector(vector)?;
    }
    Ok(dimension)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize, d: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| (0..d).map(|j| (i * d + j) as f32).collect())
            .collect()
    }

    #[test]
    fn test_sample_indices_are_distinct_and_in_range() {
        let bits = HashBits::new(8).unwrap();
        let mut indices = sample_indices(40, bits, 865).unwrap();
        assert_eq!(indices.len(), 16);
        assert!(indices.iter().all(|&i| i < 40));
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 16);
    }

    #[test]
    fn test_sample_indices_follow_seed() {
        let bits = HashBits::new(4).unwrap();
        let a = sample_indices(100, bits, 7).unwrap();
        let b = sample_indices(100, bits, 7).unwrap();
        let c = sample_indices(100, bits, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sample_boundary() {
        let bits = HashBits::new(3).unwrap();
        assert!(sample_indices(6, bits, 1).is_ok());
        assert!(matches!(
            sample_indices(5, bits, 1),
            Err(LshError::InsufficientData {
                required: 6,
                available: 5
            })
        ));
    }

    #[test]
    fn test_from_sample_midpoint_and_normal() {
        let data = vec![vec![0.0, 2.0], vec![4.0, 0.0]];
        let model = from_sample(&data, &[0, 1]).unwrap();

        assert_eq!(model.anchors().row(0).to_vec(), vec![2.0, 1.0]);
        assert_eq!(model.normals().row(0).to_vec(), vec![2.0, -1.0]);
        // 2*2 + (-1)*1
        assert_eq!(model.offsets()[0], 3.0);
    }

    #[test]
    fn test_from_sample_rejects_bad_samples() {
        let data = grid(4, 2);
        assert!(matches!(
            from_sample(&data, &[0, 1, 2]),
            Err(LshError::InvalidConfig { .. })
        ));
        assert!(matches!(
            from_sample(&data, &[0, 9]),
            Err(LshError::InvalidConfig { ref reason }) if reason.contains("index 9")
        ));
        assert!(from_sample(&data, &[]).is_err());
    }

    #[test]
    fn test_calibrate_rejects_ragged_data() {
        let mut data = grid(4, 3);
        data[2].push(1.0);
        assert!(matches!(
            calibrate(&data, HashBits::new(2).unwrap(), 1),
            Err(LshError::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_calibrate_is_deterministic() {
        let data = grid(50, 5);
        let bits = HashBits::new(10).unwrap();
        let a = calibrate(&data, bits, 865).unwrap();
        let b = calibrate(&data, bits, 865).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.bits(), bits);
        assert_eq!(a.dimension().get(), 5);
    }
}
