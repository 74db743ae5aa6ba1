//! Durable storage for calibrated hyperplane sets.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic `PLSH`, format version, `bits`, dimension `d`,
//!   each a little-endian `u32`
//! - `M`: `bits * d` little-endian `f32`, row-major
//! - `N`: `bits * d` little-endian `f32`, row-major
//! - `NdotM`: `bits` little-endian `f32`
//!
//! Only the three arrays are stored. The seed and the calibration data are
//! not part of the artifact.
//!
//! Saves write to a temporary file in the target directory and rename it
//! into place, so a reader sees either the previous artifact or the
//! complete new one.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use ndarray::{Array1, Array2};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{LshError, LshResult};
use crate::lsh::model::HyperplaneSet;

/// Current artifact format version.
const FORMAT_VERSION: u32 = 1;

/// Size of the artifact header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify model artifacts.
const MAGIC_BYTES: &[u8; 4] = b"PLSH";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// A model artifact at a fixed location.
#[derive(Debug, Clone)]
pub struct ModelStorage {
    path: PathBuf,
}

impl ModelStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks if the artifact exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Returns the size of the artifact in bytes.
    pub fn file_size(&self) -> LshResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Writes `model` to the artifact location, replacing any previous artifact.
    #[must_use = "Save errors should be handled to ensure the model is persisted"]
    pub fn save(&self, model: &HyperplaneSet) -> LshResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| self.error(format!("cannot create directory: {e}")))?;

        let temp = NamedTempFile::new_in(&dir)
            .map_err(|e| self.error(format!("cannot create temporary file: {e}")))?;

        {
            let mut writer = BufWriter::new(temp.as_file());
            self.write_artifact(&mut writer, model)
                .map_err(|e| self.error(format!("write failed: {e}")))?;
            writer
                .flush()
                .map_err(|e| self.error(format!("flush failed: {e}")))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| self.error(format!("sync failed: {e}")))?;

        temp.persist(&self.path)
            .map_err(|e| self.error(format!("cannot publish artifact: {}", e.error)))?;

        info!(
            path = %self.path.display(),
            bits = model.bits().get(),
            dimension = model.dimension().get(),
            "saved hyperplane model"
        );
        Ok(())
    }

    /// Reads the artifact back into a model.
    ///
    /// Fails with `Persistence` if the artifact is missing, truncated, has
    /// trailing data, or declares an unknown format.
    pub fn load(&self) -> LshResult<HyperplaneSet> {
        if !self.path.exists() {
            return Err(self.error("artifact not found"));
        }

        let file = File::open(&self.path).map_err(|e| self.error(format!("cannot open: {e}")))?;
        let len = file
            .metadata()
            .map_err(|e| self.error(format!("cannot stat: {e}")))?
            .len() as usize;
        if len < HEADER_SIZE {
            return Err(self.error("truncated: file too small to contain header"));
        }

        let mmap = unsafe { MmapOptions::new().map(&file) }
            .map_err(|e| self.error(format!("cannot map: {e}")))?;

        let (bits, dimension) = self.read_header(&mmap)?;
        let matrix_len = bits
            .checked_mul(dimension)
            .ok_or_else(|| self.error("header declares an impossible shape"))?;
        let expected = matrix_len
            .checked_mul(2)
            .and_then(|v| v.checked_add(bits))
            .and_then(|v| v.checked_mul(BYTES_PER_F32))
            .and_then(|v| v.checked_add(HEADER_SIZE))
            .ok_or_else(|| self.error("header declares an impossible shape"))?;

        if mmap.len() < expected {
            return Err(self.error(format!(
                "truncated: expected {expected} bytes, found {}",
                mmap.len()
            )));
        }
        if mmap.len() > expected {
            return Err(self.error(format!(
                "array shapes inconsistent with header: {} trailing bytes",
                mmap.len() - expected
            )));
        }

        let body = &mmap[HEADER_SIZE..];
        let (m_bytes, rest) = body.split_at(matrix_len * BYTES_PER_F32);
        let (n_bytes, o_bytes) = rest.split_at(matrix_len * BYTES_PER_F32);

        let anchors = Array2::from_shape_vec((bits, dimension), decode_f32s(m_bytes))
            .map_err(|e| self.error(format!("bad M array: {e}")))?;
        let normals = Array2::from_shape_vec((bits, dimension), decode_f32s(n_bytes))
            .map_err(|e| self.error(format!("bad N array: {e}")))?;
        let offsets = Array1::from_vec(decode_f32s(o_bytes));

        let model = HyperplaneSet::from_parts(anchors, normals, offsets)
            .map_err(|e| self.error(format!("inconsistent arrays: {e}")))?;

        debug!(
            path = %self.path.display(),
            bits,
            dimension,
            "loaded hyperplane model"
        );
        Ok(model)
    }

    fn write_artifact(&self, writer: &mut impl Write, model: &HyperplaneSet) -> std::io::Result<()> {
        writer.write_all(MAGIC_BYTES)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&header_u32(model.bits().get())?.to_le_bytes())?;
        writer.write_all(&header_u32(model.dimension().get())?.to_le_bytes())?;

        for &value in model
            .anchors()
            .iter()
            .chain(model.normals().iter())
            .chain(model.offsets().iter())
        {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    fn read_header(&self, bytes: &[u8]) -> LshResult<(usize, usize)> {
        if &bytes[0..4] != MAGIC_BYTES {
            return Err(self.error("invalid magic bytes"));
        }

        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(self.error(format!(
                "unsupported format version {version}, expected {FORMAT_VERSION}"
            )));
        }

        let bits = read_u32(&bytes[8..12]) as usize;
        let dimension = read_u32(&bytes[12..16]) as usize;
        if bits == 0 || dimension == 0 {
            return Err(self.error(format!(
                "header declares an empty model ({bits} bits, dimension {dimension})"
            )));
        }

        Ok((bits, dimension))
    }

    fn error(&self, reason: impl Into<String>) -> LshError {
        LshError::persistence(&self.path, reason)
    }
}

fn header_u32(value: usize) -> std::io::Result<u32> {
    u32::try_from(value).map_err(|_| std::io::Error::other(format!("{value} exceeds header range")))
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn decode_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_F32)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
