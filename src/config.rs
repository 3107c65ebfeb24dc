//! Core configuration.
//! Hardware limits the abstract model needs to size its per-warp state,
//! with named presets for common architectures and JSON loading for
//! everything else.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::warp::MAX_WARP_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-core hardware limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Lanes per warp (at most 32)
    pub warp_size: u32,
    /// Maximum concurrent warps per core
    pub max_warps_per_core: u32,
    /// Hard hardware cap on concurrent thread blocks per core
    pub max_ctas_per_core: u32,
    /// Cores on the device
    pub num_cores: u32,
}

impl CoreConfig {
    /// H100 (Hopper, CC 9.0)
    pub fn h100() -> Self {
        CoreConfig {
            warp_size: 32,
            max_warps_per_core: 64,
            max_ctas_per_core: 32,
            num_cores: 132,
        }
    }

    /// A100 (Ampere, CC 8.0)
    pub fn a100() -> Self {
        CoreConfig {
            warp_size: 32,
            max_warps_per_core: 64,
            max_ctas_per_core: 32,
            num_cores: 108,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warp_size == 0 || self.warp_size as usize > MAX_WARP_SIZE {
            return Err(ConfigError::Invalid(format!(
                "warp_size must be in 1..={MAX_WARP_SIZE}, got {}",
                self.warp_size
            )));
        }
        if self.max_warps_per_core == 0 {
            return Err(ConfigError::Invalid("max_warps_per_core must be non-zero".into()));
        }
        if self.num_cores == 0 {
            return Err(ConfigError::Invalid("num_cores must be non-zero".into()));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        log::debug!("loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::h100()
    }
}
