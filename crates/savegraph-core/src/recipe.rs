//! Recipe identifiers and the configured recipe book.
//!
//! Saves store a recipe as an asset path
//! (`/Game/FactoryGame/Recipes/Constructor/Recipe_Concrete.Recipe_Concrete_C`).
//! The book is keyed by the slug (`Recipe_Concrete`) and supplies the
//! designed per-minute input demand and output rate at 100% clock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::fixed::{Fixed64, f64_to_fixed64};

/// Slug of a recipe path: the last `/` segment up to its first `.`.
pub fn recipe_slug(path: &str) -> &str {
    let last = path.rsplit('/').next().unwrap_or(path);
    last.split('.').next().unwrap_or(last)
}

/// Human-readable recipe name derived from a slug or path.
///
/// `Recipe_Alternate_PureIronIngot` becomes `Alt: PureIronIngot`.
pub fn recipe_display_name(path: &str) -> String {
    let slug = recipe_slug(path);
    let name = slug.strip_prefix("Recipe_").unwrap_or(slug);
    name.replace("Alternate_", "Alt: ").replace('_', " ")
}

/// Designed rates of one recipe at 100% clock, per minute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecipeRate {
    #[serde(default)]
    pub input_per_min: f64,
    #[serde(default)]
    pub output_per_min: f64,
}

impl RecipeRate {
    pub fn new(input_per_min: f64, output_per_min: f64) -> Self {
        Self {
            input_per_min,
            output_per_min,
        }
    }
}

/// Validated recipe rates in fixed-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesignedRates {
    pub input: Fixed64,
    pub output: Fixed64,
}

/// Recipe slug to designed rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipeBook {
    entries: BTreeMap<String, RecipeRate>,
}

impl RecipeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a recipe. `recipe` may be a slug or a full path.
    pub fn insert(&mut self, recipe: &str, rate: RecipeRate) {
        self.entries.insert(recipe_slug(recipe).to_string(), rate);
    }

    pub fn get(&self, recipe: &str) -> Option<&RecipeRate> {
        self.entries.get(recipe_slug(recipe))
    }

    /// Fixed-point rates for a recipe path, if the recipe is known and valid.
    pub fn rates(&self, recipe: &str) -> Option<DesignedRates> {
        let rate = self.get(recipe)?;
        Some(DesignedRates {
            input: f64_to_fixed64(rate.input_per_min)?,
            output: f64_to_fixed64(rate.output_per_min)?,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecipeRate)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every rate must be finite, non-negative and representable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, rate) in &self.entries {
            for (field, value) in [
                ("input_per_min", rate.input_per_min),
                ("output_per_min", rate.output_per_min),
            ] {
                if !value.is_finite() || value < 0.0 || f64_to_fixed64(value).is_none() {
                    return Err(ConfigError::InvalidRecipe {
                        name: name.clone(),
                        reason: format!("{field} must be a finite non-negative rate, got {value}"),
                    });
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, RecipeRate)> for RecipeBook {
    fn from_iter<I: IntoIterator<Item = (String, RecipeRate)>>(iter: I) -> Self {
        let mut book = RecipeBook::new();
        for (name, rate) in iter {
            book.insert(&name, rate);
        }
        book
    }
}
