//! Calibration dataset loading.
//!
//! Two source layouts are recognized:
//! - `.json`: an array of arrays of numbers, one inner array per vector
//! - anything else: raw little-endian `f32` values, rows of `dimension`
//!   values back to back (the dimension must be supplied)

use std::fs::File;
use std::path::Path;

use memmap2::MmapOptions;
use tracing::debug;

use crate::error::{LshError, LshResult};
use crate::lsh::VectorDimension;
use crate::stream::decode_vector;

/// Reads every vector in the calibration source at `path`.
pub fn load_vectors(path: &Path, dimension: Option<usize>) -> LshResult<Vec<Vec<f32>>> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let vectors = if is_json {
        load_json(path)?
    } else {
        let dimension = dimension.ok_or_else(|| LshError::InvalidConfig {
            reason: format!(
                "dimension must be set to read raw f32 source '{}'",
                path.display()
            ),
        })?;
        load_raw(path, VectorDimension::new(dimension)?)?
    };

    debug!(path = %path.display(), vectors = vectors.len(), "loaded calibration source");
    Ok(vectors)
}

fn load_json(path: &Path) -> LshResult<Vec<Vec<f32>>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| LshError::MalformedInput {
        reason: format!("'{}' is not a JSON array of vectors: {e}", path.display()),
    })
}

fn load_raw(path: &Path, dimension: VectorDimension) -> LshResult<Vec<Vec<f32>>> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }
    let mmap = unsafe { MmapOptions::new().map(&file)? };

    let row_bytes = dimension.get() * 4;
    if mmap.len() % row_bytes != 0 {
        return Err(LshError::DimensionMismatch {
            expected: dimension.get(),
            actual: (mmap.len() % row_bytes) / 4,
        });
    }

    mmap.chunks_exact(row_bytes).map(decode_vector).collect()
}
