//! Analysis configuration.
//!
//! Every field has a default, so an empty TOML or JSON document is a valid
//! configuration. Values are checked by [`AnalysisConfig::validate`] before a
//! save is touched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{ClassCatalog, ClassSpec};
use crate::error::ParseError;
use crate::fixed::{Fixed64, f64_to_fixed64};
use crate::recipe::RecipeBook;

/// 64 MiB.
pub const DEFAULT_MAX_DECLARED_SIZE: u64 = 64 * 1024 * 1024;
pub const DEFAULT_DISTRICT_RADIUS: f64 = 2500.0;
pub const DEFAULT_BOTTLENECK_THRESHOLD: f64 = 0.1;
pub const DEFAULT_MAX_RELAXATION_PASSES: u32 = 32;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("invalid recipe {name}: {reason}")]
    InvalidRecipe { name: String, reason: String },
    #[error("invalid class {name}: {reason}")]
    InvalidClass { name: String, reason: String },
}

impl From<ConfigError> for ParseError {
    fn from(e: ConfigError) -> Self {
        ParseError::InvalidConfig(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// AnalysisConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Upper bound for any length or count declared inside the save.
    pub max_declared_size_bytes: u64,
    /// Clustering radius in world units.
    pub district_radius: f64,
    /// Minimum deficit ratio for a classification to be raised.
    pub bottleneck_threshold: f64,
    /// Surface dangling references as issues as well as diagnostics.
    pub include_dangling_as_issues: bool,
    /// Extra passes over feedback loops after the topological sweep.
    pub max_relaxation_passes: u32,
    pub recipes: RecipeBook,
    /// Extra or overriding class catalog entries keyed by short class name.
    pub classes: BTreeMap<String, ClassSpec>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_declared_size_bytes: DEFAULT_MAX_DECLARED_SIZE,
            district_radius: DEFAULT_DISTRICT_RADIUS,
            bottleneck_threshold: DEFAULT_BOTTLENECK_THRESHOLD,
            include_dangling_as_issues: false,
            max_relaxation_passes: DEFAULT_MAX_RELAXATION_PASSES,
            recipes: RecipeBook::default(),
            classes: BTreeMap::new(),
        }
    }
}

impl AnalysisConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_declared_size_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_declared_size_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        if !self.district_radius.is_finite() || self.district_radius <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "district_radius",
                reason: format!("must be finite and positive, got {}", self.district_radius),
            });
        }
        if !(0.0..=1.0).contains(&self.bottleneck_threshold) {
            return Err(ConfigError::Invalid {
                field: "bottleneck_threshold",
                reason: format!("must lie in 0..=1, got {}", self.bottleneck_threshold),
            });
        }
        self.recipes.validate()?;
        ClassCatalog::with_overrides(&self.classes)?;
        Ok(())
    }

    /// Threshold as fixed-point. Out-of-range values clamp to the bounds.
    pub fn threshold(&self) -> Fixed64 {
        f64_to_fixed64(self.bottleneck_threshold.clamp(0.0, 1.0)).unwrap_or(Fixed64::ZERO)
    }

    /// The class catalog with configured overrides applied.
    pub fn catalog(&self) -> Result<ClassCatalog, ConfigError> {
        ClassCatalog::with_overrides(&self.classes)
    }
}
