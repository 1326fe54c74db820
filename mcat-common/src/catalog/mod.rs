//! Catalog context object
//!
//! A [`Catalog`] owns the vocabulary, tracks and clusters and exposes every
//! mutation as a transaction: the change is applied to a staged copy, the
//! copy is audited, and only a clean copy replaces the live state. Callers
//! never observe a half-applied merge or split.
//!
//! Implementation is split across submodules:
//! - `mod.rs`: struct, transactions, consistency audit, core edits
//! - `normalize.rs`: load-time upgrade and repair
//! - `admin.rs`: vocabulary, scale and track administration

mod admin;
mod normalize;

pub use admin::ValueRemoval;
pub use normalize::NormalizeReport;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clusters::{self, ClusterMutationCoordinator, ClusterSummary, MergeOutcome, SplitOutcome};
use crate::config::CatalogRules;
use crate::error::Warning;
use crate::models::{Cluster, Track};
use crate::tags::TagGroupSynchronizer;
use crate::vkey::{KeyParts, VirtualKeyBuilder};
use crate::vocab::Vocab;
use crate::{Error, Result};

/// Schema version written by this engine
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

fn legacy_schema_version() -> u32 {
    1
}

/// In-memory music catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Root the tracks' `original_path` values are relative to
    #[serde(default)]
    pub raw_music_directory: String,

    #[serde(default)]
    vocab: Vocab,
    /// Lower-case source value -> canonical value
    #[serde(default)]
    aliases: BTreeMap<String, String>,
    #[serde(default)]
    clusters: Vec<Cluster>,
    #[serde(default)]
    tracks: Vec<Track>,

    #[serde(skip)]
    rules: CatalogRules,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::empty(CatalogRules::default())
    }
}

/// Result of a single-track edit
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEdit {
    /// The track after the edit
    pub track: Track,
    pub old_key: String,
    pub key_changed: bool,
    pub tags_changed: bool,
    /// Anything about the track changed and should be persisted
    pub dirty: bool,
    pub warnings: Vec<Warning>,
}

/// Tracks sharing one virtual key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateKey {
    pub key: String,
    pub track_ids: Vec<Uuid>,
}

/// Track whose cluster reference does not resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingCluster {
    pub track_id: Uuid,
    /// `None` when the track has no cluster at all
    pub cluster_id: Option<Uuid>,
}

/// Findings of [`Catalog::check_consistency`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub duplicate_keys: Vec<DuplicateKey>,
    pub dangling_clusters: Vec<DanglingCluster>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_keys.is_empty() && self.dangling_clusters.is_empty()
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return f.write_str("consistent");
        }
        let mut parts = Vec::new();
        for dup in &self.duplicate_keys {
            parts.push(format!(
                "key '{}' held by {} tracks",
                dup.key,
                dup.track_ids.len()
            ));
        }
        for dangling in &self.dangling_clusters {
            match dangling.cluster_id {
                Some(cluster_id) => parts.push(format!(
                    "track {} references missing cluster {}",
                    dangling.track_id, cluster_id
                )),
                None => parts.push(format!("track {} has no cluster", dangling.track_id)),
            }
        }
        f.write_str(&parts.join("; "))
    }
}

impl Catalog {
    /// Empty catalog with the default vocabulary
    pub fn new(rules: CatalogRules) -> Result<Self> {
        rules.validate()?;
        Ok(Self::empty(rules))
    }

    fn empty(rules: CatalogRules) -> Self {
        let now = Utc::now();
        let mut vocab = Vocab::with_defaults();
        vocab.tag_vocab.ensure_protected(&rules.protected_groups);
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
            raw_music_directory: String::new(),
            vocab,
            aliases: BTreeMap::new(),
            clusters: Vec::new(),
            tracks: Vec::new(),
            rules,
        }
    }

    /// Replace the engine rules (not persisted with the catalog)
    ///
    /// Rejects rules that fail [`CatalogRules::validate`]; newly protected
    /// groups are added to the vocabulary.
    pub fn set_rules(&mut self, rules: CatalogRules) -> Result<()> {
        rules.validate()?;
        self.vocab.tag_vocab.ensure_protected(&rules.protected_groups);
        self.rules = rules;
        Ok(())
    }

    pub fn rules(&self) -> &CatalogRules {
        &self.rules
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn track(&self, track_id: Uuid) -> Option<&Track> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    pub fn track_by_key(&self, virtual_key: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.virtual_key == virtual_key)
    }

    pub fn cluster(&self, cluster_id: Uuid) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }

    /// Members of a cluster in catalog order
    pub fn cluster_tracks(&self, cluster_id: Uuid) -> impl Iterator<Item = &Track> {
        self.tracks
            .iter()
            .filter(move |t| t.cluster_id == Some(cluster_id))
    }

    pub fn roster(&self) -> Vec<ClusterSummary> {
        clusters::roster(&self.tracks, &self.clusters, &self.rules.protected_groups)
    }

    fn require_track(&self, track_id: Uuid) -> Result<&Track> {
        self.track(track_id)
            .ok_or_else(|| Error::NotFound(format!("track {}", track_id)))
    }

    /// Audit key uniqueness and cluster references
    pub fn check_consistency(&self) -> ConsistencyReport {
        let mut holders: BTreeMap<&str, Vec<Uuid>> = BTreeMap::new();
        for track in &self.tracks {
            holders
                .entry(track.virtual_key.as_str())
                .or_default()
                .push(track.track_id);
        }
        let duplicate_keys = holders
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(key, track_ids)| DuplicateKey {
                key: key.to_string(),
                track_ids,
            })
            .collect();

        let known: HashSet<Uuid> = self.clusters.iter().map(|c| c.cluster_id).collect();
        let dangling_clusters = self
            .tracks
            .iter()
            .filter(|t| !t.cluster_id.is_some_and(|id| known.contains(&id)))
            .map(|t| DanglingCluster {
                track_id: t.track_id,
                cluster_id: t.cluster_id,
            })
            .collect();

        ConsistencyReport {
            duplicate_keys,
            dangling_clusters,
        }
    }

    /// Apply `op` to a staged copy and commit it only if it stays consistent
    ///
    /// Errors from `op` and failed audits both leave `self` untouched.
    pub(crate) fn transaction<T>(
        &mut self,
        operation: &str,
        op: impl FnOnce(&mut Catalog) -> Result<T>,
    ) -> Result<T> {
        let mut staged = self.clone();
        let value = op(&mut staged)?;

        let report = staged.check_consistency();
        if !report.is_clean() {
            warn!(operation, %report, "Mutation failed consistency check, rolled back");
            return Err(Error::ConsistencyViolation(format!("{}: {}", operation, report)));
        }

        staged.updated_at = Utc::now();
        *self = staged;
        Ok(value)
    }

    /// Rebuild a track's key from raw identity values
    ///
    /// Idempotent for identical inputs when `force_new_serial` is false.
    pub fn rebuild_virtual_key(
        &mut self,
        track_id: Uuid,
        parts: &KeyParts,
        force_new_serial: bool,
    ) -> Result<TrackEdit> {
        self.require_track(track_id)?;
        self.transaction("rebuild_virtual_key", |catalog| {
            let Catalog {
                vocab,
                rules,
                tracks,
                ..
            } = &mut *catalog;
            let builder = VirtualKeyBuilder::new(&vocab.tag_vocab, &rules.protected_groups);
            let outcome = builder.rebuild(tracks, track_id, parts, force_new_serial)?;
            let edit = TrackEdit {
                track: catalog.require_track(track_id)?.clone(),
                key_changed: outcome.key_changed(),
                tags_changed: outcome.tags_changed,
                dirty: outcome.dirty,
                old_key: outcome.old_key,
                warnings: outcome.warnings,
            };
            Ok(edit)
        })
    }

    /// Add or remove one value of a tag group on a track
    ///
    /// `group` must name a vocabulary group.
    pub fn toggle_tag_membership(
        &mut self,
        track_id: Uuid,
        group: &str,
        value: &str,
        included: bool,
    ) -> Result<TrackEdit> {
        let group = self.vocab.tag_vocab.group(group)?;
        self.require_track(track_id)?;
        self.transaction("toggle_tag_membership", |catalog| {
            let Catalog {
                vocab,
                rules,
                tracks,
                ..
            } = &mut *catalog;
            let sync = TagGroupSynchronizer::new(
                &vocab.tag_vocab,
                &rules.protected_groups,
                &rules.unknown_sentinel,
            );
            let outcome = sync.toggle(tracks, track_id, &group, value, included)?;
            let track = catalog.require_track(track_id)?.clone();
            let key_changed = outcome.key_changed();
            Ok(TrackEdit {
                old_key: outcome
                    .rebuild
                    .as_ref()
                    .map(|r| r.old_key.clone())
                    .unwrap_or_else(|| track.virtual_key.clone()),
                track,
                key_changed,
                tags_changed: outcome.tags_changed,
                dirty: outcome.tags_changed || key_changed,
                warnings: outcome.warnings,
            })
        })
    }

    /// Fold `source` into `target`
    pub fn merge_clusters(&mut self, target: Uuid, source: Uuid) -> Result<MergeOutcome> {
        let outcome = self.transaction("merge_clusters", |catalog| {
            let Catalog {
                vocab,
                rules,
                tracks,
                clusters,
                ..
            } = &mut *catalog;
            ClusterMutationCoordinator::new(&vocab.tag_vocab, rules)
                .merge(tracks, clusters, target, source)
        })?;
        info!(
            target_cluster = %target,
            moved = outcome.moved_track_ids.len(),
            "Committed cluster merge"
        );
        Ok(outcome)
    }

    /// Move a strict subset of `source` into a new cluster
    pub fn split_cluster(
        &mut self,
        source: Uuid,
        track_ids: &[Uuid],
        new_name: &str,
    ) -> Result<SplitOutcome> {
        let outcome = self.transaction("split_cluster", |catalog| {
            let Catalog {
                vocab,
                rules,
                tracks,
                clusters,
                ..
            } = &mut *catalog;
            ClusterMutationCoordinator::new(&vocab.tag_vocab, rules)
                .split(tracks, clusters, source, track_ids, new_name)
        })?;
        info!(
            source_cluster = %source,
            new_cluster = %outcome.new_cluster_id,
            "Committed cluster split"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GroupName;

    fn catalog_with_two_tracks() -> (Catalog, Uuid, Uuid) {
        let mut catalog = Catalog::default();
        let mut first = Track::new(Uuid::new_v4(), "");
        first.tags.insert(
            catalog.rules.protected_groups.mood.clone(),
            vec!["calm".into()],
        );
        let second = Track::new(Uuid::new_v4(), "");
        let (a, b) = (first.track_id, second.track_id);
        catalog.admit_track(first).unwrap();
        catalog.admit_track(second).unwrap();
        (catalog, a, b)
    }

    #[test]
    fn test_new_catalog_is_consistent() {
        let catalog = Catalog::default();
        assert_eq!(catalog.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(catalog.check_consistency().is_clean());
        assert!(catalog.vocab().tag_vocab.contains_group("moods"));
    }

    #[test]
    fn test_rebuild_reports_key_change() {
        let (mut catalog, a, _) = catalog_with_two_tracks();
        let parts = KeyParts::new("tense", "boss", "strings", "orchestral");
        let edit = catalog.rebuild_virtual_key(a, &parts, false).unwrap();
        assert!(edit.key_changed);
        assert_eq!(edit.track.virtual_key, "tense_boss_strings_orchestral_001");
        assert_eq!(edit.track.identity_value("moods"), "tense");

        let again = catalog.rebuild_virtual_key(a, &parts, false).unwrap();
        assert!(!again.key_changed);
        assert!(!again.dirty);
    }

    #[test]
    fn test_rebuild_unknown_track_is_not_found() {
        let (mut catalog, _, _) = catalog_with_two_tracks();
        let err = catalog
            .rebuild_virtual_key(Uuid::new_v4(), &KeyParts::default(), false)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_toggle_unknown_group_is_rejected() {
        let (mut catalog, a, _) = catalog_with_two_tracks();
        let err = catalog
            .toggle_tag_membership(a, "mods", "calm", true)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_failed_audit_rolls_back() {
        let (mut catalog, a, b) = catalog_with_two_tracks();
        let before = catalog.clone();
        let err = catalog
            .transaction("force_duplicate", |staged| {
                let key = staged.require_track(a)?.virtual_key.clone();
                if let Some(track) = staged.tracks.iter_mut().find(|t| t.track_id == b) {
                    track.virtual_key = key;
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::ConsistencyViolation(_)));
        assert_eq!(catalog.tracks(), before.tracks());
        assert_eq!(catalog.updated_at, before.updated_at);
    }

    #[test]
    fn test_report_lists_dangling_clusters() {
        let (mut catalog, a, _) = catalog_with_two_tracks();
        if let Some(track) = catalog.tracks.iter_mut().find(|t| t.track_id == a) {
            track.cluster_id = None;
        }
        let report = catalog.check_consistency();
        assert_eq!(report.dangling_clusters.len(), 1);
        assert!(report.to_string().contains("has no cluster"));
    }

    #[test]
    fn test_rules_with_shared_protected_group_are_rejected() {
        let mut rules = CatalogRules::default();
        rules.protected_groups.context = rules.protected_groups.mood.clone();

        assert!(matches!(Catalog::new(rules.clone()), Err(Error::Config(_))));

        let mut catalog = Catalog::default();
        let before = catalog.rules().clone();
        assert!(matches!(catalog.set_rules(rules), Err(Error::Config(_))));
        assert_eq!(catalog.rules(), &before);
    }

    #[test]
    fn test_set_rules_registers_new_protected_group() {
        let mut rules = CatalogRules::default();
        rules.protected_groups.style = GroupName::new("genres").unwrap();

        let mut catalog = Catalog::default();
        catalog.set_rules(rules).unwrap();
        assert!(catalog.vocab().tag_vocab.contains_group("genres"));
        assert!(catalog.check_consistency().is_clean());
    }
}
