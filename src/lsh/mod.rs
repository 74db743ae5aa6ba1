//! Random-hyperplane locality-sensitive hashing.
//!
//! Vectors that point in similar directions land on the same side of most
//! hyperplanes and so share most signature bits.
//!
//! # Architecture
//! Calibration derives a [`HyperplaneSet`] from a sample of real vectors.
//! The set is immutable and shared read-only by hashing callers. Storage
//! moves it to and from disk so later processes can skip calibration.

mod calibration;
mod engine;
mod model;
mod storage;
mod types;

pub use calibration::{calibrate, from_sample, sample_indices};
pub use engine::LshEngine;
pub use model::HyperplaneSet;
pub use storage::ModelStorage;
pub use types::{HashBits, HashCode, VectorDimension};
