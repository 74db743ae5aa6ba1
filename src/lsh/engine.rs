//! Engine that owns the published model and routes hashing to it.
//!
//! The model is published exactly once, by either `fit` or `load`. Until then
//! hashing and saving fail with `ModelNotFitted`. Publication goes through a
//! `OnceLock`, so a concurrent reader sees either no model or the complete one.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use ndarray::{Array2, ArrayView2};
use tracing::info;

use crate::error::{LshError, LshResult};
use crate::lsh::model::HyperplaneSet;
use crate::lsh::storage::ModelStorage;
use crate::lsh::types::{HashBits, HashCode};

/// Main entry point for calibration, hashing and persistence.
#[derive(Debug)]
pub struct LshEngine {
    /// Hash length used by `fit`
    bits: HashBits,

    /// Seed for the calibration sampler
    seed: u64,

    model: OnceLock<Arc<HyperplaneSet>>,
}

impl LshEngine {
    /// Creates an engine with no model yet.
    pub fn new(bits: HashBits, seed: u64) -> Self {
        Self {
            bits,
            seed,
            model: OnceLock::new(),
        }
    }

    /// Creates an engine around an already-built model.
    pub fn with_model(model: HyperplaneSet, seed: u64) -> Self {
        let engine = Self::new(model.bits(), seed);
        let _ = engine.model.set(Arc::new(model));
        engine
    }

    /// Hash length of the published model, or the configured fit length
    /// while no model is published.
    #[must_use]
    pub fn bits(&self) -> HashBits {
        self.model.get().map_or(self.bits, |model| model.bits())
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the published model, if any.
    #[must_use]
    pub fn model(&self) -> Option<Arc<HyperplaneSet>> {
        self.model.get().cloned()
    }

    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.model.get().is_some()
    }

    /// Calibrates a model from `data` and publishes it.
    ///
    /// Fails with `ModelAlreadyPresent` if a model was already published.
    pub fn fit(&self, data: &[Vec<f32>]) -> LshResult<Arc<HyperplaneSet>> {
        if self.is_fitted() {
            return Err(LshError::ModelAlreadyPresent);
        }
        let model = HyperplaneSet::fit(data, self.bits, self.seed)?;
        info!(
            vectors = data.len(),
            bits = model.bits().get(),
            dimension = model.dimension().get(),
            "calibrated hyperplane model"
        );
        self.publish(model)
    }

    /// Loads a saved model from `path` and publishes it.
    ///
    /// The loaded model keeps its own hash length even if it differs from
    /// the engine's configured `bits`.
    pub fn load(&self, path: impl AsRef<Path>) -> LshResult<Arc<HyperplaneSet>> {
        if self.is_fitted() {
            return Err(LshError::ModelAlreadyPresent);
        }
        let model = ModelStorage::new(path.as_ref()).load()?;
        if model.bits() != self.bits {
            tracing::warn!(
                configured = self.bits.get(),
                loaded = model.bits().get(),
                "loaded model hash length differs from configuration"
            );
        }
        self.publish(model)
    }

    /// Saves the published model to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> LshResult<()> {
        let model = self.require_model()?;
        ModelStorage::new(path.as_ref()).save(model)
    }

    /// Hashes one vector against the published model.
    pub fn hash(&self, vector: &[f32]) -> LshResult<HashCode> {
        self.require_model()?.hash(vector)
    }

    /// Hashes the rows of an `m x d` matrix against the published model.
    pub fn hash_batch(&self, queries: ArrayView2<'_, f32>) -> LshResult<Array2<u8>> {
        self.require_model()?.hash_batch(queries)
    }

    /// Hashes a batch of separate vectors against the published model.
    pub fn hash_rows(&self, vectors: &[Vec<f32>]) -> LshResult<Vec<HashCode>> {
        self.require_model()?.hash_rows(vectors)
    }

    fn require_model(&self) -> LshResult<&HyperplaneSet> {
        self.model
            .get()
            .map(Arc::as_ref)
            .ok_or(LshError::ModelNotFitted)
    }

    fn publish(&self, model: HyperplaneSet) -> LshResult<Arc<HyperplaneSet>> {
        let model = Arc::new(model);
        self.model
            .set(Arc::clone(&model))
            .map_err(|_| LshError::ModelAlreadyPresent)?;
        Ok(model)
    }
}
