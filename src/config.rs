//! Configuration module for the hashing service.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`planehash.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `PLANEHASH_` and use double
//! underscores to separate nested levels:
//! - `PLANEHASH_BITS=256` sets `bits`
//! - `PLANEHASH_MODEL_PATH=/var/lib/planehash/model.plsh` sets `model_path`
//! - `PLANEHASH_STREAM__MALFORMED_POLICY=fail` sets `stream.malformed_policy`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LshError, LshResult};
use crate::lsh::HashBits;
use crate::stream::{HashEncoding, MalformedPolicy};

/// Name of the configuration file searched for in the working directory
/// and its ancestors.
pub const CONFIG_FILE_NAME: &str = "planehash.toml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Hash length: number of hyperplanes
    #[serde(default = "default_bits")]
    pub bits: usize,

    /// Seed for the calibration sampler
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Sample dataset used by `fit`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_source: Option<PathBuf>,

    /// Vector dimension of a raw f32 calibration source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,

    /// Model artifact location for save and load
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Streaming boundary settings
    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StreamConfig {
    /// How long one poll waits for a record
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// What to do with records that cannot be hashed
    #[serde(default)]
    pub malformed_policy: MalformedPolicy,

    /// Wire encoding of outbound hash codes
    #[serde(default)]
    pub encoding: HashEncoding,

    /// Hashed records sent before the sink is flushed
    #[serde(default = "default_flush_records")]
    pub flush_records: usize,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_bits() -> usize {
    1024
}
fn default_seed() -> u64 {
    865
}
fn default_model_path() -> PathBuf {
    PathBuf::from("planehash.model")
}
fn default_poll_timeout_ms() -> u64 {
    100
}
fn default_flush_records() -> usize {
    64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            bits: default_bits(),
            seed: default_seed(),
            calibration_source: None,
            dimension: None,
            model_path: default_model_path(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            malformed_policy: MalformedPolicy::default(),
            encoding: HashEncoding::default(),
            flush_records: default_flush_records(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path =
            Self::find_config_file().unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels, single underscore
            // stays inside field names
            .merge(Env::prefixed("PLANEHASH_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the config file by searching from the current directory up to root
    fn find_config_file() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Rejects values no component can run with.
    pub fn validate(&self) -> LshResult<()> {
        let bits = self.hash_bits()?;
        if u32::try_from(bits.get()).is_err() {
            return Err(LshError::InvalidConfig {
                reason: format!("bits = {} exceeds the artifact limit", bits.get()),
            });
        }
        if self.dimension == Some(0) {
            return Err(LshError::InvalidConfig {
                reason: "dimension must be positive when set".to_string(),
            });
        }
        if self.stream.poll_timeout_ms == 0 {
            return Err(LshError::InvalidConfig {
                reason: "stream.poll_timeout_ms must be positive".to_string(),
            });
        }
        if self.stream.flush_records == 0 {
            return Err(LshError::InvalidConfig {
                reason: "stream.flush_records must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Configured hash length as a validated value.
    pub fn hash_bits(&self) -> LshResult<HashBits> {
        HashBits::new(self.bits)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> LshResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| LshError::InvalidConfig {
            reason: format!("cannot serialize settings: {e}"),
        })?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}
