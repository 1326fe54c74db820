//! Named integer scales
//!
//! Each scale has a `{min, max, default}` definition. Catalogs written before
//! definitions existed only list scale names; those names are upgraded to the
//! fixed fallback `{min: 0, max: 5, default: 0}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::ScaleName;
use crate::{Error, Result};

/// Default scales shipped with new catalogs
pub const DEFAULT_SCALES: &[&str] = &["energy", "details", "tension", "diversity", "users_liking"];

/// Scale range and default
///
/// Invariant after [`ScaleDefinition::new`]: `min <= default <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleDefinition {
    #[serde(default)]
    pub min: i64,
    #[serde(default = "legacy_max")]
    pub max: i64,
    #[serde(default)]
    pub default: i64,
}

fn legacy_max() -> i64 {
    5
}

impl Default for ScaleDefinition {
    /// Fallback used for legacy names-only catalogs
    fn default() -> Self {
        Self {
            min: 0,
            max: legacy_max(),
            default: 0,
        }
    }
}

impl ScaleDefinition {
    /// Build a definition, swapping an inverted range and clamping the default
    pub fn new(min: i64, max: i64, default: i64) -> Self {
        let (min, max) = if max < min { (max, min) } else { (min, max) };
        Self {
            min,
            max,
            default: default.clamp(min, max),
        }
    }

    /// Clamp a value into this scale's range
    pub fn clamp(&self, value: i64) -> i64 {
        // Tolerate definitions deserialized with an inverted range
        let (lo, hi) = if self.max < self.min {
            (self.max, self.min)
        } else {
            (self.min, self.max)
        };
        value.clamp(lo, hi)
    }

    /// Value used when a track has no entry: the default when it lies in
    /// range, otherwise the minimum
    pub fn fallback(&self) -> i64 {
        if self.min <= self.default && self.default <= self.max {
            self.default
        } else {
            self.min.min(self.max)
        }
    }
}

/// Scale definitions plus the ordering hint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleRegistry {
    #[serde(default)]
    pub scale_defs: BTreeMap<ScaleName, ScaleDefinition>,
    /// Display order; also the only scale data in legacy catalogs
    #[serde(default)]
    pub scale_names: Vec<ScaleName>,
}

impl ScaleRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        for name in DEFAULT_SCALES {
            let name = ScaleName::from_static(name);
            registry.scale_defs.insert(name.clone(), ScaleDefinition::default());
            registry.scale_names.push(name);
        }
        registry
    }

    pub fn is_blank(&self) -> bool {
        self.scale_defs.is_empty() && self.scale_names.is_empty()
    }

    /// Backfill definitions and ordering for older catalogs
    ///
    /// Returns the number of definitions synthesized.
    pub fn upgrade_legacy(&mut self) -> usize {
        let mut synthesized = 0;
        if self.scale_defs.is_empty() {
            for name in &self.scale_names {
                if !self.scale_defs.contains_key(name.as_str()) {
                    self.scale_defs.insert(name.clone(), ScaleDefinition::default());
                    synthesized += 1;
                }
            }
        }
        if self.scale_names.is_empty() {
            self.scale_names = self.scale_defs.keys().cloned().collect();
        }
        if synthesized > 0 {
            debug!(synthesized, "Synthesized legacy scale definitions");
        }
        synthesized
    }

    pub fn get(&self, name: &str) -> Option<&ScaleDefinition> {
        self.scale_defs.get(name)
    }

    /// Scale names in display order (ordering hint first, then any stragglers)
    pub fn ordered_names(&self) -> Vec<&ScaleName> {
        let mut names: Vec<&ScaleName> = self
            .scale_names
            .iter()
            .filter(|n| self.scale_defs.contains_key(n.as_str()))
            .collect();
        for name in self.scale_defs.keys() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Effective value of a scale for a track
    ///
    /// The track's own value (clamped), else the scale default, else its
    /// minimum. `None` when the scale is not defined.
    pub fn value_for(&self, track_scales: &BTreeMap<ScaleName, i64>, name: &str) -> Option<i64> {
        let def = self.scale_defs.get(name)?;
        Some(match track_scales.get(name) {
            Some(value) => def.clamp(*value),
            None => def.fallback(),
        })
    }

    /// Ensure a track carries every known scale, clamped to its range
    ///
    /// Returns true when anything changed.
    pub fn ensure_track_scales(&self, track_scales: &mut BTreeMap<ScaleName, i64>) -> bool {
        let mut changed = false;
        for (name, def) in &self.scale_defs {
            let value = match track_scales.get(name.as_str()) {
                Some(value) => def.clamp(*value),
                None => def.fallback(),
            };
            if track_scales.insert(name.clone(), value) != Some(value) {
                changed = true;
            }
        }
        changed
    }

    /// Add a scale definition; returns false if the name already exists
    pub fn add(&mut self, name: ScaleName, definition: ScaleDefinition) -> bool {
        if self.scale_defs.contains_key(name.as_str()) {
            return false;
        }
        if !self.scale_names.contains(&name) {
            self.scale_names.push(name.clone());
        }
        self.scale_defs.insert(name, definition);
        true
    }

    /// Update any of min/max/default, keeping the others
    pub fn update(
        &mut self,
        name: &str,
        min: Option<i64>,
        max: Option<i64>,
        default: Option<i64>,
    ) -> Result<ScaleDefinition> {
        let current = self
            .scale_defs
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("scale '{}'", name)))?;
        let updated = ScaleDefinition::new(
            min.unwrap_or(current.min),
            max.unwrap_or(current.max),
            default.unwrap_or(current.default),
        );
        *current = updated;
        Ok(updated)
    }

    /// Remove a scale; returns false if it did not exist
    pub fn remove(&mut self, name: &str) -> bool {
        let existed = self.scale_defs.remove(name).is_some();
        self.scale_names.retain(|n| n.as_str() != name);
        existed
    }
}
