// Copyright 2025 SochDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Accelerator selection configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::simd::dispatch::SimdLevel;

/// Environment variable that caps the selected SIMD level.
pub const MAX_LEVEL_ENV: &str = "HWACCEL_MAX_LEVEL";

/// Configuration for accelerator resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelConfig {
    /// Highest SIMD level the dispatcher may bind (`None` = best available)
    pub max_level: Option<SimdLevel>,
}

impl AccelConfig {
    /// Config capped at `level`
    pub fn with_max_level(level: SimdLevel) -> Self {
        Self {
            max_level: Some(level),
        }
    }

    /// Read the config from `HWACCEL_MAX_LEVEL`.
    ///
    /// An unset or empty variable yields the default config.
    pub fn from_env() -> Result<Self> {
        match std::env::var(MAX_LEVEL_ENV) {
            Ok(value) => Self::parse_override(Some(&value)),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(std::env::VarError::NotUnicode(_)) => Err(Error::Config(format!(
                "{} is not valid unicode",
                MAX_LEVEL_ENV
            ))),
        }
    }

    /// Build a config from the raw override value.
    pub fn parse_override(value: Option<&str>) -> Result<Self> {
        let config = match value.map(str::trim) {
            None | Some("") => Self::default(),
            Some(level) => Self::with_max_level(level.parse()?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Whether a target at `level` may be selected.
    pub fn allows(&self, level: SimdLevel) -> bool {
        self.max_level.map_or(true, |max| level <= max)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self.max_level {
            if !level.is_native() {
                return Err(Error::Config(format!(
                    "max_level {} does not exist on {}",
                    level,
                    std::env::consts::ARCH
                )));
            }
        }
        Ok(())
    }
}
