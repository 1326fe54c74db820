//! Vocabulary, scale and track administration
//!
//! Every method here runs as a catalog transaction.

use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Catalog, TrackEdit};
use crate::clusters::{merge_warnings, KeyChange};
use crate::error::Warning;
use crate::models::{Cluster, GroupName, ScaleName, Track};
use crate::scales::ScaleDefinition;
use crate::vkey::{KeyParts, VirtualKeyBuilder, UNKNOWN_COMPONENT};
use crate::vocab::KeyRole;
use crate::{Error, Result};

/// Result of deleting a tag value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueRemoval {
    pub vocab_entries_removed: usize,
    /// Values removed from tracks
    pub assignments_removed: usize,
    pub changed_keys: Vec<KeyChange>,
    pub warnings: Vec<Warning>,
}

impl Catalog {
    // ---- vocabulary ----

    /// Append a value to a group's vocabulary; false if already present
    /// (case-insensitive)
    pub fn add_tag_value(&mut self, group: &str, value: &str) -> Result<bool> {
        let group = self.vocab.tag_vocab.group(group)?;
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvalidArgument("tag value cannot be empty".to_string()));
        }
        if self.vocab.tag_vocab.contains_value(group.as_str(), value) {
            return Ok(false);
        }
        self.transaction("add_tag_value", |catalog| {
            Ok(catalog.vocab.tag_vocab.add_value(&group, value))
        })
    }

    /// Create an empty group in the vocabulary and on every track
    pub fn add_tag_group(&mut self, name: &str) -> Result<GroupName> {
        let group = GroupName::new(name)?;
        if self.vocab.tag_vocab.contains_group(group.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "tag group '{}' already exists",
                group
            )));
        }
        self.transaction("add_tag_group", |catalog| {
            catalog.vocab.tag_vocab.add_group(group.clone());
            for track in catalog.tracks.iter_mut() {
                track.tags.entry(group.clone()).or_default();
            }
            info!(group = %group, "Added tag group");
            Ok(group)
        })
    }

    /// Delete a non-protected group; returns the number of values removed
    /// from tracks
    pub fn delete_tag_group(&mut self, name: &str) -> Result<usize> {
        let group = self.vocab.tag_vocab.group(name)?;
        if self.rules.protected_groups.is_protected(group.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "tag group '{}' feeds the virtual key and cannot be deleted",
                group
            )));
        }
        self.transaction("delete_tag_group", |catalog| {
            catalog.vocab.tag_vocab.remove_group(group.as_str());
            let removed: usize = catalog
                .tracks
                .iter_mut()
                .filter_map(|t| t.tags.remove(group.as_str()))
                .map(|values| values.len())
                .sum();
            info!(group = %group, removed, "Deleted tag group");
            Ok(removed)
        })
    }

    /// Delete a value (case-insensitive) from the vocabulary and every track
    ///
    /// Tracks whose protected identity value was removed get their key
    /// rebuilt from the next value in line.
    pub fn delete_tag_value(&mut self, group: &str, value: &str) -> Result<ValueRemoval> {
        let group = self.vocab.tag_vocab.group(group)?;
        let folded = value.trim().to_lowercase();
        if folded.is_empty() {
            return Err(Error::InvalidArgument("tag value cannot be empty".to_string()));
        }
        self.transaction("delete_tag_value", |catalog| {
            let Catalog {
                vocab,
                rules,
                tracks,
                ..
            } = &mut *catalog;
            let protected = &rules.protected_groups;
            let mut removal = ValueRemoval {
                vocab_entries_removed: vocab.tag_vocab.remove_value(group.as_str(), &folded),
                ..ValueRemoval::default()
            };

            let mut rebuild_ids = Vec::new();
            for track in tracks.iter_mut() {
                if let Some(values) = track.tags.get_mut(group.as_str()) {
                    let before_identity = values.first().cloned();
                    let before = values.len();
                    values.retain(|v| v.to_lowercase() != folded);
                    removal.assignments_removed += before - values.len();
                    if values.first() != before_identity.as_ref() {
                        rebuild_ids.push(track.track_id);
                    }
                }
            }

            if protected.is_protected(group.as_str()) {
                let builder = VirtualKeyBuilder::new(&vocab.tag_vocab, protected);
                for track_id in rebuild_ids {
                    let parts = tracks
                        .iter()
                        .find(|t| t.track_id == track_id)
                        .map(|t| KeyParts::from_track(t, protected))
                        .unwrap_or_default();
                    let outcome = builder.rebuild(tracks, track_id, &parts, false)?;
                    merge_warnings(&mut removal.warnings, outcome.warnings.clone());
                    if outcome.key_changed() {
                        removal.changed_keys.push(KeyChange {
                            track_id,
                            old_key: outcome.old_key,
                            new_key: outcome.new_key,
                        });
                    }
                }
            }

            info!(
                group = %group,
                value = %folded,
                assignments = removal.assignments_removed,
                keys_changed = removal.changed_keys.len(),
                "Deleted tag value"
            );
            Ok(removal)
        })
    }

    /// Append a primary role; false if already present
    pub fn add_primary_role(&mut self, role: &str) -> Result<bool> {
        let role = role.trim();
        if role.is_empty() {
            return Err(Error::InvalidArgument("primary role cannot be empty".to_string()));
        }
        if self.vocab.primary_roles.iter().any(|r| r == role) {
            return Ok(false);
        }
        self.transaction("add_primary_role", |catalog| {
            catalog.vocab.primary_roles.push(role.to_string());
            Ok(true)
        })
    }

    /// Map a source value (stored lower-cased) to a canonical value
    pub fn set_alias(&mut self, source: &str, canonical: &str) -> Result<()> {
        let source = source.trim().to_lowercase();
        let canonical = canonical.trim();
        if source.is_empty() || canonical.is_empty() {
            return Err(Error::InvalidArgument(
                "alias source and target cannot be empty".to_string(),
            ));
        }
        self.transaction("set_alias", |catalog| {
            catalog.aliases.insert(source, canonical.to_string());
            Ok(())
        })
    }

    // ---- scales ----

    /// Define a new scale; every track receives its default
    pub fn add_scale(&mut self, name: &str, min: i64, max: i64, default: i64) -> Result<ScaleDefinition> {
        let name = ScaleName::new(name)?;
        if self.vocab.scales.get(name.as_str()).is_some() {
            return Err(Error::InvalidArgument(format!("scale '{}' already exists", name)));
        }
        let definition = ScaleDefinition::new(min, max, default);
        self.transaction("add_scale", |catalog| {
            catalog.vocab.scales.add(name.clone(), definition);
            catalog.clamp_track_scales();
            info!(scale = %name, min = definition.min, max = definition.max, "Added scale");
            Ok(definition)
        })
    }

    /// Partially update a scale; track values are re-clamped
    pub fn update_scale(
        &mut self,
        name: &str,
        min: Option<i64>,
        max: Option<i64>,
        default: Option<i64>,
    ) -> Result<ScaleDefinition> {
        self.transaction("update_scale", |catalog| {
            let definition = catalog.vocab.scales.update(name, min, max, default)?;
            catalog.clamp_track_scales();
            Ok(definition)
        })
    }

    /// Remove a scale; returns how many tracks carried a value for it
    pub fn delete_scale(&mut self, name: &str) -> Result<usize> {
        if self.vocab.scales.get(name).is_none() {
            return Err(Error::NotFound(format!("scale '{}'", name)));
        }
        self.transaction("delete_scale", |catalog| {
            catalog.vocab.scales.remove(name);
            let removed = catalog
                .tracks
                .iter_mut()
                .filter_map(|t| t.scales.remove(name))
                .count();
            info!(scale = name, removed, "Deleted scale");
            Ok(removed)
        })
    }

    /// Effective scale value: the track's own, else the default, else the minimum
    pub fn scale_value(&self, track_id: Uuid, name: &str) -> Result<i64> {
        let track = self.require_track(track_id)?;
        self.vocab
            .scales
            .value_for(&track.scales, name)
            .ok_or_else(|| Error::NotFound(format!("scale '{}'", name)))
    }

    fn clamp_track_scales(&mut self) {
        let Catalog { vocab, tracks, .. } = &mut *self;
        let changed = tracks
            .iter_mut()
            .map(|t| vocab.scales.ensure_track_scales(&mut t.scales))
            .filter(|changed| *changed)
            .count();
        debug!(changed, "Clamped track scales");
    }

    // ---- tracks ----

    /// Key components for a track with no tags: `unk` (or `unknown`) when
    /// the vocabulary offers it, else `unk`
    pub fn default_key_components(&self) -> KeyParts {
        let pick = |role: KeyRole| {
            let group = self.rules.protected_groups.group(role);
            ["unk", "unknown"]
                .into_iter()
                .find_map(|candidate| {
                    self.vocab
                        .tag_vocab
                        .values(group.as_str())
                        .iter()
                        .find(|v| v.to_lowercase() == candidate)
                        .cloned()
                })
                .unwrap_or_else(|| UNKNOWN_COMPONENT.to_string())
        };
        KeyParts {
            mood: pick(KeyRole::Mood),
            context: pick(KeyRole::Context),
            instrument: pick(KeyRole::Instrument),
            style: pick(KeyRole::Style),
        }
    }

    /// Insert a track supplied by the scan layer
    ///
    /// Tags and scales are backfilled and a blank or colliding key is
    /// reallocated. Tracks without a known cluster get a fresh one named
    /// after their final key.
    pub fn admit_track(&mut self, track: Track) -> Result<TrackEdit> {
        if self.track(track.track_id).is_some() {
            return Err(Error::InvalidArgument(format!(
                "track {} is already in the catalog",
                track.track_id
            )));
        }
        let track_id = track.track_id;
        let old_key = track.virtual_key.clone();
        self.transaction("admit_track", |catalog| {
            let mut track = track;
            let cluster_known = track
                .cluster_id
                .is_some_and(|id| catalog.cluster(id).is_some());
            for group in catalog.vocab.tag_vocab.group_names() {
                track.tags.entry(group.clone()).or_default();
            }
            catalog.vocab.scales.ensure_track_scales(&mut track.scales);
            track.backfill_path_hints();

            let needs_key = track.virtual_key.trim().is_empty()
                || catalog.track_by_key(&track.virtual_key).is_some();
            catalog.tracks.push(track);

            let mut warnings = Vec::new();
            if needs_key {
                let Catalog {
                    vocab,
                    rules,
                    tracks,
                    ..
                } = &mut *catalog;
                let protected = &rules.protected_groups;
                let parts = tracks
                    .last()
                    .map(|t| KeyParts::from_track(t, protected))
                    .unwrap_or_default();
                let outcome = VirtualKeyBuilder::new(&vocab.tag_vocab, protected)
                    .rebuild(tracks, track_id, &parts, false)?;
                warnings = outcome.warnings;
            }

            if !cluster_known {
                if let Some(admitted) = catalog.tracks.last_mut() {
                    let cluster = Cluster::new(admitted.virtual_key.clone());
                    admitted.cluster_id = Some(cluster.cluster_id);
                    catalog.clusters.push(cluster);
                }
            }

            let admitted = catalog.require_track(track_id)?.clone();
            debug!(track_id = %track_id, key = %admitted.virtual_key, "Admitted track");
            Ok(TrackEdit {
                key_changed: admitted.virtual_key != old_key,
                old_key: old_key.clone(),
                track: admitted,
                tags_changed: false,
                dirty: true,
                warnings,
            })
        })
    }

    /// Manually assign a key
    pub fn set_virtual_key(&mut self, track_id: Uuid, key: &str) -> Result<TrackEdit> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidArgument("virtual key cannot be empty".to_string()));
        }
        self.require_track(track_id)?;
        if let Some(holder) = self
            .tracks
            .iter()
            .find(|t| t.virtual_key == key && t.track_id != track_id)
        {
            return Err(Error::KeyConflict {
                key: key.to_string(),
                holder: holder.track_id,
            });
        }
        self.transaction("set_virtual_key", |catalog| {
            let track = catalog
                .tracks
                .iter_mut()
                .find(|t| t.track_id == track_id)
                .ok_or_else(|| Error::NotFound(format!("track {}", track_id)))?;
            let old_key = std::mem::replace(&mut track.virtual_key, key.to_string());
            let key_changed = old_key != key;
            Ok(TrackEdit {
                track: track.clone(),
                old_key,
                key_changed,
                tags_changed: false,
                dirty: key_changed,
                warnings: Vec::new(),
            })
        })
    }

    /// Remove a track and clear `duplicate_of` references to it
    pub fn remove_track(&mut self, track_id: Uuid) -> Result<Track> {
        self.require_track(track_id)?;
        self.transaction("remove_track", |catalog| {
            let idx = catalog
                .tracks
                .iter()
                .position(|t| t.track_id == track_id)
                .ok_or_else(|| Error::NotFound(format!("track {}", track_id)))?;
            let removed = catalog.tracks.remove(idx);
            let mut cleared = 0;
            for track in catalog.tracks.iter_mut() {
                if track.duplicate_of == Some(track_id) {
                    track.duplicate_of = None;
                    cleared += 1;
                }
            }
            info!(track_id = %track_id, cleared, "Removed track");
            Ok(removed)
        })
    }

    /// Tracks flagged as missing on disk
    pub fn missing_tracks(&self) -> Vec<&Track> {
        self.tracks.iter().filter(|t| t.missing_file).collect()
    }

    /// Ids of clusters that currently have no members
    pub fn empty_clusters(&self) -> Vec<Uuid> {
        let occupied: HashSet<Uuid> = self.tracks.iter().filter_map(|t| t.cluster_id).collect();
        self.clusters
            .iter()
            .map(|c| c.cluster_id)
            .filter(|id| !occupied.contains(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(mood: &str, extra: Option<&str>) -> Track {
        let mut track = Track::new(Uuid::new_v4(), "");
        let mut moods = vec![mood.to_string()];
        moods.extend(extra.map(str::to_string));
        track.tags.insert(GroupName::new("moods").unwrap(), moods);
        track
    }

    #[test]
    fn test_admit_assigns_cluster_and_key() {
        let mut catalog = Catalog::default();
        let edit = catalog.admit_track(tagged("calm", None)).unwrap();
        assert_eq!(edit.track.virtual_key, "calm_unk_unk_unk_001");
        assert!(edit.key_changed);
        let cluster_id = edit.track.cluster_id.unwrap();
        assert!(catalog.cluster(cluster_id).is_some());
        assert!(edit.track.tags.contains_key("for_game_settings"));
        assert_eq!(edit.track.scales.get("energy"), Some(&0));
    }

    #[test]
    fn test_admit_reallocates_colliding_key() {
        let mut catalog = Catalog::default();
        let first = catalog.admit_track(tagged("calm", None)).unwrap();
        let mut second = tagged("calm", None);
        second.virtual_key = first.track.virtual_key.clone();
        let edit = catalog.admit_track(second).unwrap();
        assert_eq!(edit.track.virtual_key, "calm_unk_unk_unk_002");
    }

    #[test]
    fn test_admit_rejects_duplicate_id() {
        let mut catalog = Catalog::default();
        let track = tagged("calm", None);
        catalog.admit_track(track.clone()).unwrap();
        assert!(matches!(
            catalog.admit_track(track),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_delete_protected_group_rejected() {
        let mut catalog = Catalog::default();
        let err = catalog.delete_tag_group("moods").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_delete_group_counts_assignments() {
        let mut catalog = Catalog::default();
        let edit = catalog.admit_track(tagged("calm", None)).unwrap();
        catalog
            .toggle_tag_membership(edit.track.track_id, "for_game_settings", "fantasy", true)
            .unwrap();
        assert_eq!(catalog.delete_tag_group("for_game_settings").unwrap(), 1);
        assert!(!catalog.vocab().tag_vocab.contains_group("for_game_settings"));
        assert!(!catalog.tracks()[0].tags.contains_key("for_game_settings"));
    }

    #[test]
    fn test_add_tag_group_reaches_every_track() {
        let mut catalog = Catalog::default();
        catalog.admit_track(tagged("calm", None)).unwrap();
        let group = catalog.add_tag_group("weather").unwrap();
        assert!(catalog.tracks()[0].tags.contains_key(group.as_str()));
        assert!(catalog.add_tag_group("weather").is_err());
        assert!(catalog.add_tag_value("weather", "rain").unwrap());
        assert!(!catalog.add_tag_value("weather", "RAIN").unwrap());
    }

    #[test]
    fn test_delete_identity_value_rebuilds_key() {
        let mut catalog = Catalog::default();
        let edit = catalog.admit_track(tagged("calm", Some("tense"))).unwrap();
        let removal = catalog.delete_tag_value("moods", "CALM").unwrap();
        assert_eq!(removal.vocab_entries_removed, 1);
        assert_eq!(removal.assignments_removed, 1);
        assert_eq!(removal.changed_keys.len(), 1);
        let track = catalog.track(edit.track.track_id).unwrap();
        assert_eq!(track.virtual_key, "tense_unk_unk_unk_001");
        assert!(!catalog.vocab().tag_vocab.contains_value("moods", "calm"));
    }

    #[test]
    fn test_scale_lifecycle() {
        let mut catalog = Catalog::default();
        let id = catalog.admit_track(tagged("calm", None)).unwrap().track.track_id;

        let def = catalog.add_scale("weight", 10, 1, 20).unwrap();
        assert_eq!(def, ScaleDefinition { min: 1, max: 10, default: 10 });
        assert_eq!(catalog.scale_value(id, "weight").unwrap(), 10);
        assert!(catalog.add_scale("bad name", 0, 5, 0).is_err());

        catalog.update_scale("weight", None, Some(4), None).unwrap();
        assert_eq!(catalog.scale_value(id, "weight").unwrap(), 4);

        assert_eq!(catalog.delete_scale("weight").unwrap(), 1);
        assert!(matches!(
            catalog.scale_value(id, "weight"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(catalog.delete_scale("weight"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_set_virtual_key_conflict() {
        let mut catalog = Catalog::default();
        let a = catalog.admit_track(tagged("calm", None)).unwrap().track;
        let b = catalog.admit_track(tagged("tense", None)).unwrap().track;

        let err = catalog.set_virtual_key(b.track_id, &a.virtual_key).unwrap_err();
        match err {
            Error::KeyConflict { holder, .. } => assert_eq!(holder, a.track_id),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            catalog.set_virtual_key(b.track_id, "   "),
            Err(Error::InvalidArgument(_))
        ));
        let edit = catalog.set_virtual_key(b.track_id, "boss_theme_final").unwrap();
        assert!(edit.key_changed);
    }

    #[test]
    fn test_remove_track_clears_duplicate_refs() {
        let mut catalog = Catalog::default();
        let original = catalog.admit_track(tagged("calm", None)).unwrap().track;
        let mut copy = tagged("calm", None);
        copy.duplicate_of = Some(original.track_id);
        let copy_id = catalog.admit_track(copy).unwrap().track.track_id;

        catalog.remove_track(original.track_id).unwrap();
        assert!(catalog.track(copy_id).unwrap().duplicate_of.is_none());
        assert_eq!(catalog.empty_clusters().len(), 1);
        assert!(matches!(
            catalog.remove_track(original.track_id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_default_key_components_prefer_vocab_spelling() {
        let mut catalog = Catalog::default();
        catalog.add_tag_value("styles", "Unknown").unwrap();
        let parts = catalog.default_key_components();
        assert_eq!(parts.style, "Unknown");
        assert_eq!(parts.mood, "unk");
    }
}
