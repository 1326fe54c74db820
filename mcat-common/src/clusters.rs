//! Cluster merge and split
//!
//! A cluster groups recordings of the same piece. Merging folds one cluster
//! into another and aligns the moved tracks' shared metadata with the target;
//! splitting carves a strict subset of a cluster into a new one. Both keep
//! virtual keys unique and report every key they changed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CatalogRules, SharedField};
use crate::error::Warning;
use crate::models::{Cluster, Track};
use crate::tags::set_identity_value;
use crate::vkey::{KeyParts, VirtualKeyBuilder};
use crate::vocab::{KeyRole, ProtectedGroups, TagVocabulary};
use crate::{Error, Result};

/// One row of the cluster roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: Uuid,
    pub name: String,
    pub track_count: usize,
    /// First member in catalog order
    pub representative_track_id: Option<Uuid>,
    pub mood: String,
    pub context: String,
    pub instrument: String,
    pub style: String,
}

/// A virtual key rewritten by a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChange {
    pub track_id: Uuid,
    pub old_key: String,
    pub new_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub target_cluster_id: Uuid,
    pub removed_cluster_id: Uuid,
    pub moved_track_ids: Vec<Uuid>,
    pub changed_keys: Vec<KeyChange>,
    pub roster: Vec<ClusterSummary>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOutcome {
    pub source_cluster_id: Uuid,
    pub new_cluster_id: Uuid,
    pub moved_track_ids: Vec<Uuid>,
    pub changed_keys: Vec<KeyChange>,
    pub roster: Vec<ClusterSummary>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

/// Cluster roster sorted by case-insensitive name
pub fn roster(tracks: &[Track], clusters: &[Cluster], protected: &ProtectedGroups) -> Vec<ClusterSummary> {
    let mut members: BTreeMap<Uuid, (usize, Option<&Track>)> = BTreeMap::new();
    for track in tracks {
        if let Some(cluster_id) = track.cluster_id {
            let entry = members.entry(cluster_id).or_insert((0, None));
            entry.0 += 1;
            entry.1.get_or_insert(track);
        }
    }

    let mut rows: Vec<ClusterSummary> = clusters
        .iter()
        .map(|cluster| {
            let (track_count, representative) = members
                .get(&cluster.cluster_id)
                .copied()
                .unwrap_or((0, None));
            let identity = |role: KeyRole| {
                representative
                    .map(|t| t.identity_value(protected.group(role).as_str()).to_string())
                    .unwrap_or_default()
            };
            ClusterSummary {
                cluster_id: cluster.cluster_id,
                name: cluster.name.clone(),
                track_count,
                representative_track_id: representative.map(|t| t.track_id),
                mood: identity(KeyRole::Mood),
                context: identity(KeyRole::Context),
                instrument: identity(KeyRole::Instrument),
                style: identity(KeyRole::Style),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then(a.cluster_id.cmp(&b.cluster_id))
    });
    rows
}

/// Applies merge and split to a catalog's tracks and clusters
pub struct ClusterMutationCoordinator<'a> {
    vocab: &'a TagVocabulary,
    rules: &'a CatalogRules,
}

impl<'a> ClusterMutationCoordinator<'a> {
    pub fn new(vocab: &'a TagVocabulary, rules: &'a CatalogRules) -> Self {
        Self { vocab, rules }
    }

    fn builder(&self) -> VirtualKeyBuilder<'a> {
        VirtualKeyBuilder::new(self.vocab, &self.rules.protected_groups)
    }

    /// Fold `source` into `target`
    ///
    /// Moved tracks take the target representative's cluster-shared fields
    /// and have their keys rebuilt without forcing new serials. An empty
    /// source is simply removed.
    pub fn merge(
        &self,
        tracks: &mut [Track],
        clusters: &mut Vec<Cluster>,
        target: Uuid,
        source: Uuid,
    ) -> Result<MergeOutcome> {
        if target == source {
            return Err(Error::InvalidArgument(
                "cannot merge a cluster into itself".to_string(),
            ));
        }
        for (label, id) in [("target", target), ("source", source)] {
            if !clusters.iter().any(|c| c.cluster_id == id) {
                return Err(Error::InvalidArgument(format!(
                    "{} cluster {} does not exist",
                    label, id
                )));
            }
        }

        let moved_track_ids: Vec<Uuid> = tracks
            .iter()
            .filter(|t| t.cluster_id == Some(source))
            .map(|t| t.track_id)
            .collect();

        let mut changed_keys = Vec::new();
        let mut warnings = Vec::new();

        if !moved_track_ids.is_empty() {
            let template = tracks
                .iter()
                .find(|t| t.cluster_id == Some(target))
                .cloned()
                .ok_or_else(|| {
                    Error::InvalidArgument("target cluster has no tracks".to_string())
                })?;

            let protected = &self.rules.protected_groups;
            for track in tracks.iter_mut().filter(|t| t.cluster_id == Some(source)) {
                track.cluster_id = Some(target);
                self.copy_shared_fields(&template, track);
            }

            let builder = self.builder();
            for track_id in &moved_track_ids {
                let parts = tracks
                    .iter()
                    .find(|t| t.track_id == *track_id)
                    .map(|t| KeyParts::from_track(t, protected))
                    .unwrap_or_default();
                let outcome = builder.rebuild(tracks, *track_id, &parts, false)?;
                merge_warnings(&mut warnings, outcome.warnings.clone());
                if outcome.key_changed() {
                    changed_keys.push(KeyChange {
                        track_id: *track_id,
                        old_key: outcome.old_key,
                        new_key: outcome.new_key,
                    });
                }
            }
        }

        clusters.retain(|c| c.cluster_id != source);

        info!(
            target_cluster = %target,
            source_cluster = %source,
            moved = moved_track_ids.len(),
            keys_changed = changed_keys.len(),
            "Merged clusters"
        );

        Ok(MergeOutcome {
            target_cluster_id: target,
            removed_cluster_id: source,
            moved_track_ids,
            changed_keys,
            roster: roster(tracks, clusters, &self.rules.protected_groups),
            warnings,
        })
    }

    fn copy_shared_fields(&self, template: &Track, track: &mut Track) {
        for field in &self.rules.cluster_shared {
            match field {
                SharedField::Tags => {
                    let mut tags = template.tags.clone();
                    for (group, values) in tags.iter_mut() {
                        if self.rules.protected_groups.is_protected(group.as_str()) {
                            if let Some(identity) = values.first().cloned() {
                                set_identity_value(values, &identity);
                            }
                        }
                    }
                    track.tags = tags;
                }
                SharedField::Scales => track.scales = template.scales.clone(),
                SharedField::Bpm => track.bpm = template.bpm,
                SharedField::Licensing => track.licensing = template.licensing.clone(),
            }
        }
    }

    /// Move a strict subset of `source` into a new cluster
    ///
    /// A blank `new_name` yields the source name plus the configured suffix.
    /// Any duplicate keys are resolved by giving the offending tracks fresh
    /// serials, preferring to keep keys on tracks that did not move.
    pub fn split(
        &self,
        tracks: &mut [Track],
        clusters: &mut Vec<Cluster>,
        source: Uuid,
        track_ids: &[Uuid],
        new_name: &str,
    ) -> Result<SplitOutcome> {
        let source_cluster = clusters
            .iter()
            .find(|c| c.cluster_id == source)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("source cluster {} does not exist", source))
            })?;

        let mut selected: Vec<Uuid> = Vec::with_capacity(track_ids.len());
        for id in track_ids {
            if !selected.contains(id) {
                selected.push(*id);
            }
        }
        if selected.is_empty() {
            return Err(Error::InvalidArgument("nothing to move".to_string()));
        }
        for id in &selected {
            let in_source = tracks
                .iter()
                .any(|t| t.track_id == *id && t.cluster_id == Some(source));
            if !in_source {
                return Err(Error::InvalidArgument(format!(
                    "track {} is not in the source cluster",
                    id
                )));
            }
        }
        let source_count = tracks
            .iter()
            .filter(|t| t.cluster_id == Some(source))
            .count();
        if selected.len() >= source_count {
            return Err(Error::InvalidArgument(
                "cannot empty a cluster via split".to_string(),
            ));
        }

        let name = match new_name.trim() {
            "" => {
                let base = source_cluster.name.trim();
                let base = if base.is_empty() { "cluster" } else { base };
                format!("{}{}", base, self.rules.split_suffix)
            }
            trimmed => trimmed.to_string(),
        };
        let cluster = Cluster::new(name);
        let new_cluster_id = cluster.cluster_id;
        clusters.push(cluster);

        let moving: HashSet<Uuid> = selected.iter().copied().collect();
        for track in tracks.iter_mut().filter(|t| moving.contains(&t.track_id)) {
            track.cluster_id = Some(new_cluster_id);
        }

        let (changed_keys, warnings) = self.resolve_duplicate_keys(tracks, &moving)?;

        info!(
            source_cluster = %source,
            new_cluster = %new_cluster_id,
            moved = selected.len(),
            keys_changed = changed_keys.len(),
            "Split cluster"
        );

        Ok(SplitOutcome {
            source_cluster_id: source,
            new_cluster_id,
            moved_track_ids: selected,
            changed_keys,
            roster: roster(tracks, clusters, &self.rules.protected_groups),
            warnings,
        })
    }

    /// Give every track sharing a key except one a fresh serial
    ///
    /// Within each duplicate set the first track outside `prefer_rebuild`
    /// keeps its key; when all are in it, the first in catalog order does.
    pub(crate) fn resolve_duplicate_keys(
        &self,
        tracks: &mut [Track],
        prefer_rebuild: &HashSet<Uuid>,
    ) -> Result<(Vec<KeyChange>, Vec<Warning>)> {
        let mut holders: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
        for track in tracks.iter() {
            holders
                .entry(track.virtual_key.clone())
                .or_default()
                .push(track.track_id);
        }

        let mut offenders = Vec::new();
        for (key, ids) in holders.into_iter().filter(|(_, ids)| ids.len() > 1) {
            let keeper = ids
                .iter()
                .find(|id| !prefer_rebuild.contains(id))
                .or_else(|| ids.first())
                .copied();
            warn!(key = %key, holders = ids.len(), "Resolving duplicate virtual key");
            offenders.extend(ids.into_iter().filter(|id| Some(*id) != keeper));
        }

        let builder = self.builder();
        let protected = &self.rules.protected_groups;
        let mut changed_keys = Vec::new();
        let mut warnings = Vec::new();
        for track_id in offenders {
            let parts = tracks
                .iter()
                .find(|t| t.track_id == track_id)
                .map(|t| KeyParts::from_track(t, protected))
                .unwrap_or_default();
            let outcome = builder.rebuild(tracks, track_id, &parts, true)?;
            debug!(track_id = %track_id, new_key = %outcome.new_key, "Reassigned duplicate key");
            merge_warnings(&mut warnings, outcome.warnings.clone());
            if outcome.key_changed() {
                changed_keys.push(KeyChange {
                    track_id,
                    old_key: outcome.old_key,
                    new_key: outcome.new_key,
                });
            }
        }
        Ok((changed_keys, warnings))
    }
}

/// Append warnings not already present
pub(crate) fn merge_warnings(into: &mut Vec<Warning>, from: Vec<Warning>) {
    for warning in from {
        if !into.contains(&warning) {
            into.push(warning);
        }
    }
}
