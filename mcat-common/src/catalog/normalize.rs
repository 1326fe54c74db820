//! Load-time upgrade and repair
//!
//! Catalogs arrive from disk in whatever shape an older writer left them.
//! Normalization fills in missing vocabulary, upgrades legacy scale data,
//! backfills per-track fields and clusters, cleans tag values and repairs
//! duplicate keys, leaving a catalog that passes the consistency audit.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Catalog, TrackEdit, CURRENT_SCHEMA_VERSION};
use crate::clusters::{merge_warnings, ClusterMutationCoordinator, KeyChange};
use crate::models::{Cluster, Track};
use crate::tags::normalize_values;
use crate::vkey::{KeyParts, VirtualKeyBuilder};
use crate::vocab::{ProtectedGroups, Vocab, DEFAULT_PRIMARY_ROLES};
use crate::Result;

/// What [`Catalog::normalize`] changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub vocab_defaulted: bool,
    pub primary_roles_defaulted: bool,
    pub scales_synthesized: usize,
    pub clusters_created: usize,
    /// Tracks whose tag values were cleaned
    pub tracks_retagged: usize,
    pub changed_keys: Vec<KeyChange>,
    pub upgraded_from: Option<u32>,
}

impl NormalizeReport {
    pub fn changed(&self) -> bool {
        self.vocab_defaulted
            || self.primary_roles_defaulted
            || self.scales_synthesized > 0
            || self.clusters_created > 0
            || self.tracks_retagged > 0
            || !self.changed_keys.is_empty()
            || self.upgraded_from.is_some()
    }
}

/// Clean every tag group of a track; returns (tags changed, protected identity changed)
fn clean_track_tags(
    track: &mut Track,
    aliases: &BTreeMap<String, String>,
    protected: &ProtectedGroups,
) -> (bool, bool) {
    let mut tags_changed = false;
    let mut identity_changed = false;
    for (group, values) in track.tags.iter_mut() {
        let cleaned = normalize_values(values, aliases);
        if cleaned != *values {
            tags_changed = true;
            if protected.is_protected(group.as_str()) && cleaned.first() != values.first() {
                identity_changed = true;
            }
            *values = cleaned;
        }
    }
    (tags_changed, identity_changed)
}

impl Catalog {
    /// Upgrade and repair a freshly loaded catalog
    ///
    /// Safe to call repeatedly; a normalized catalog reports no changes.
    pub fn normalize(&mut self) -> Result<NormalizeReport> {
        let mut report = NormalizeReport::default();

        if self.vocab.is_blank() {
            let roles = std::mem::take(&mut self.vocab.primary_roles);
            self.vocab = Vocab::with_defaults();
            if !roles.is_empty() {
                self.vocab.primary_roles = roles;
            }
            report.vocab_defaulted = true;
        }
        self.vocab
            .tag_vocab
            .ensure_protected(&self.rules.protected_groups);
        if self.vocab.primary_roles.is_empty() {
            self.vocab.primary_roles = DEFAULT_PRIMARY_ROLES.iter().map(|r| r.to_string()).collect();
            report.primary_roles_defaulted = true;
        }
        report.scales_synthesized = self.vocab.scales.upgrade_legacy();

        report.clusters_created = self.backfill_clusters();

        let Catalog {
            vocab,
            aliases,
            rules,
            tracks,
            clusters,
            ..
        } = &mut *self;
        let protected = &rules.protected_groups;

        let mut rebuild_ids = Vec::new();
        for track in tracks.iter_mut() {
            for group in vocab.tag_vocab.group_names() {
                track.tags.entry(group.clone()).or_default();
            }
            vocab.scales.ensure_track_scales(&mut track.scales);
            track.backfill_path_hints();

            let (tags_changed, identity_changed) = clean_track_tags(track, aliases, protected);
            if tags_changed {
                report.tracks_retagged += 1;
            }
            if identity_changed || track.virtual_key.trim().is_empty() {
                rebuild_ids.push(track.track_id);
            }
        }

        let builder = VirtualKeyBuilder::new(&vocab.tag_vocab, protected);
        for track_id in rebuild_ids {
            let parts = tracks
                .iter()
                .find(|t| t.track_id == track_id)
                .map(|t| KeyParts::from_track(t, protected))
                .unwrap_or_default();
            let outcome = builder.rebuild(tracks, track_id, &parts, false)?;
            if outcome.key_changed() {
                report.changed_keys.push(KeyChange {
                    track_id,
                    old_key: outcome.old_key,
                    new_key: outcome.new_key,
                });
            }
        }

        let coordinator = ClusterMutationCoordinator::new(&vocab.tag_vocab, rules);
        let (repaired, _) = coordinator.resolve_duplicate_keys(tracks, &HashSet::new())?;
        report.changed_keys.extend(repaired);
        debug!(clusters = clusters.len(), "Normalized tracks");

        if self.schema_version < CURRENT_SCHEMA_VERSION {
            report.upgraded_from = Some(self.schema_version);
            self.schema_version = CURRENT_SCHEMA_VERSION;
        }

        if report.changed() {
            info!(
                vocab_defaulted = report.vocab_defaulted,
                scales_synthesized = report.scales_synthesized,
                clusters_created = report.clusters_created,
                tracks_retagged = report.tracks_retagged,
                keys_changed = report.changed_keys.len(),
                "Normalized catalog"
            );
        }
        Ok(report)
    }

    /// Give every track a resolvable cluster; returns clusters created
    ///
    /// Unassigned tracks get a fresh cluster named after their key. Tracks
    /// pointing at a missing cluster get a shell cluster with that id.
    fn backfill_clusters(&mut self) -> usize {
        let mut known: HashSet<Uuid> = self.clusters.iter().map(|c| c.cluster_id).collect();
        let mut created = 0;
        for track in self.tracks.iter_mut() {
            match track.cluster_id {
                Some(id) if known.contains(&id) => {}
                Some(id) => {
                    self.clusters.push(Cluster::with_id(id, cluster_name_for(track)));
                    known.insert(id);
                    created += 1;
                }
                None => {
                    let cluster = Cluster::new(cluster_name_for(track));
                    track.cluster_id = Some(cluster.cluster_id);
                    known.insert(cluster.cluster_id);
                    self.clusters.push(cluster);
                    created += 1;
                }
            }
        }
        created
    }

    /// Trim, de-alias and de-duplicate one track's tag values
    ///
    /// Rebuilds the key when a protected identity value changed.
    pub fn normalize_track_tags(&mut self, track_id: Uuid) -> Result<TrackEdit> {
        self.require_track(track_id)?;
        self.transaction("normalize_track_tags", |catalog| {
            let Catalog {
                vocab,
                aliases,
                rules,
                tracks,
                ..
            } = &mut *catalog;
            let protected = &rules.protected_groups;

            let mut old_key = String::new();
            let mut tags_changed = false;
            let mut identity_changed = false;
            if let Some(track) = tracks.iter_mut().find(|t| t.track_id == track_id) {
                old_key = track.virtual_key.clone();
                (tags_changed, identity_changed) = clean_track_tags(track, aliases, protected);
            }

            let mut warnings = Vec::new();
            if identity_changed {
                let parts = tracks
                    .iter()
                    .find(|t| t.track_id == track_id)
                    .map(|t| KeyParts::from_track(t, protected))
                    .unwrap_or_default();
                let outcome = VirtualKeyBuilder::new(&vocab.tag_vocab, protected)
                    .rebuild(tracks, track_id, &parts, false)?;
                merge_warnings(&mut warnings, outcome.warnings);
            }

            let track = catalog.require_track(track_id)?.clone();
            let key_changed = track.virtual_key != old_key;
            Ok(TrackEdit {
                track,
                old_key,
                key_changed,
                tags_changed,
                dirty: tags_changed || key_changed,
                warnings,
            })
        })
    }
}

/// Backfilled clusters are named after the track's key, else "cluster"
fn cluster_name_for(track: &Track) -> String {
    if track.virtual_key.trim().is_empty() {
        "cluster".to_string()
    } else {
        track.virtual_key.clone()
    }
}
