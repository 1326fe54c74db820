//! Catalog entity models
//!
//! Tracks and clusters as handed to the engine by the scan/persistence layer.
//! Fields the engine does not interpret (loop points, licensing, fingerprint,
//! paths) are carried through untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Validated tag group identifier
///
/// Obtain one from [`crate::vocab::TagVocabulary::group`] to reject unknown
/// groups at the boundary, or from [`GroupName::new`] when defining groups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

impl GroupName {
    /// Create a group name; blank names are rejected
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument("tag group name cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Built-in names (non-blank literals)
    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for GroupName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupName {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        Self::new(name)
    }
}

impl From<GroupName> for String {
    fn from(name: GroupName) -> Self {
        name.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated scale identifier (`[A-Za-z0-9_]+`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScaleName(String);

impl ScaleName {
    /// Create a scale name
    ///
    /// Names must be alphanumeric/underscore (e.g. `energy`, `emotional_weight`).
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument("scale name cannot be empty".to_string()));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidArgument(format!(
                "scale name '{}' must be alphanumeric/underscore (e.g. energy, emotional_weight)",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ScaleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ScaleName {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        Self::new(name)
    }
}

impl From<ScaleName> for String {
    fn from(name: ScaleName) -> Self {
        name.0
    }
}

impl fmt::Display for ScaleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Loop and intro/outro markers (opaque to the engine)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopInfo {
    #[serde(default)]
    pub can_loop: bool,
    pub loop_start_sec: Option<f64>,
    pub loop_end_sec: Option<f64>,
    pub intro_sec: Option<f64>,
    pub outro_sec: Option<f64>,
}

/// Licensing metadata (opaque to the engine, shared across a cluster on merge)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensingInfo {
    #[serde(default)]
    pub source_pack: String,
    #[serde(default)]
    pub license_type: String,
    #[serde(default)]
    pub proof_url_or_file: String,
    #[serde(default)]
    pub attribution_required: bool,
    #[serde(default)]
    pub attribution_text: String,
}

/// File fingerprint maintained by the scan layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackFingerprint {
    pub sha1: String,
    pub file_size: u64,
    /// Epoch seconds
    pub modified_time: f64,
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable identifier, assigned by the scan layer and never changed
    pub track_id: Uuid,
    /// Owning cluster; `None` only on legacy catalogs before normalization
    #[serde(default)]
    pub cluster_id: Option<Uuid>,

    /// Path relative to the raw music directory (forward slashes)
    #[serde(default)]
    pub original_path: String,
    #[serde(default)]
    pub file_format: String,
    /// Relink hint: last known file name
    #[serde(default)]
    pub raw_file_name: String,
    /// Relink hint: last known parent folder name
    #[serde(default)]
    pub raw_parent_dir_name: String,
    #[serde(default)]
    pub fingerprint: TrackFingerprint,

    /// `mood_context_instrument_style_NNN`, unique across the catalog
    pub virtual_key: String,
    #[serde(default)]
    pub primary_role: String,

    /// Group -> ordered values; index 0 of a protected group is its identity value
    #[serde(default)]
    pub tags: BTreeMap<GroupName, Vec<String>>,
    #[serde(default)]
    pub scales: BTreeMap<ScaleName, i64>,

    #[serde(default)]
    pub loop_info: LoopInfo,
    #[serde(default)]
    pub length_sec: Option<f64>,
    #[serde(default)]
    pub bpm: Option<u32>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub licensing: LicensingInfo,

    #[serde(default)]
    pub missing_file: bool,
    #[serde(default)]
    pub duplicate_of: Option<Uuid>,
}

impl Track {
    /// Create a bare track with the given key and no metadata
    pub fn new(track_id: Uuid, virtual_key: impl Into<String>) -> Self {
        Self {
            track_id,
            cluster_id: None,
            original_path: String::new(),
            file_format: String::new(),
            raw_file_name: String::new(),
            raw_parent_dir_name: String::new(),
            fingerprint: TrackFingerprint::default(),
            virtual_key: virtual_key.into(),
            primary_role: String::new(),
            tags: BTreeMap::new(),
            scales: BTreeMap::new(),
            loop_info: LoopInfo::default(),
            length_sec: None,
            bpm: None,
            notes: String::new(),
            licensing: LicensingInfo::default(),
            missing_file: false,
            duplicate_of: None,
        }
    }

    /// Values held for a group (empty when the group is absent)
    pub fn tag_values(&self, group: &str) -> &[String] {
        self.tags.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Identity value of a group: index 0, or "" when nothing is selected
    pub fn identity_value(&self, group: &str) -> &str {
        self.tag_values(group).first().map(String::as_str).unwrap_or("")
    }

    /// Derive `raw_file_name` / `raw_parent_dir_name` from `original_path`
    /// when they are blank
    pub fn backfill_path_hints(&mut self) {
        let mut parts = self.original_path.rsplit('/');
        let file_name = parts.next().unwrap_or("");
        let parent = parts.next().unwrap_or("");
        if self.raw_file_name.is_empty() {
            self.raw_file_name = file_name.to_string();
        }
        if self.raw_parent_dir_name.is_empty() {
            self.raw_parent_dir_name = parent.to_string();
        }
    }
}

/// Named partition of the track set
///
/// `track_count` is never stored; see [`crate::clusters::ClusterSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: Uuid,
    pub name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    /// Create a cluster with a fresh id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    pub fn with_id(cluster_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            cluster_id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_name_rejects_blank() {
        assert!(GroupName::new("   ").is_err());
        assert_eq!(GroupName::new(" moods ").unwrap().as_str(), "moods");
    }

    #[test]
    fn test_scale_name_validation() {
        assert!(ScaleName::new("emotional_weight").is_ok());
        assert!(ScaleName::new("energy level").is_err());
        assert!(ScaleName::new("").is_err());
    }

    #[test]
    fn test_identity_value_of_missing_group_is_empty() {
        let track = Track::new(Uuid::new_v4(), "k");
        assert_eq!(track.identity_value("moods"), "");
        assert!(track.tag_values("moods").is_empty());
    }

    #[test]
    fn test_path_hints_backfill() {
        let mut track = Track::new(Uuid::new_v4(), "k");
        track.original_path = "PackA/battle_theme_01.mp3".to_string();
        track.backfill_path_hints();
        assert_eq!(track.raw_file_name, "battle_theme_01.mp3");
        assert_eq!(track.raw_parent_dir_name, "PackA");

        let mut root_level = Track::new(Uuid::new_v4(), "k2");
        root_level.original_path = "intro.ogg".to_string();
        root_level.backfill_path_hints();
        assert_eq!(root_level.raw_file_name, "intro.ogg");
        assert_eq!(root_level.raw_parent_dir_name, "");
    }

    #[test]
    fn test_legacy_track_deserializes_without_cluster() {
        let json = r#"{
            "track_id": "6f1c1f0e-8d7a-4c59-9a3e-6f4f4f0b2a11",
            "virtual_key": "calm_menu_piano_ambient_001",
            "tags": {"moods": ["calm"]}
        }"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert!(track.cluster_id.is_none());
        assert_eq!(track.identity_value("moods"), "calm");
        assert!(!track.missing_file);
    }
}
