/// The main library module for planehash
pub mod config;
pub mod dataset;
pub mod error;
pub mod lsh;
pub mod stream;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{LshError, LshResult};
pub use lsh::{HashBits, HashCode, HyperplaneSet, LshEngine, ModelStorage, VectorDimension};
