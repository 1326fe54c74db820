//! Tag group membership
//!
//! Within a protected group, index 0 is the identity value that feeds the
//! virtual key; later entries are extras. Membership edits keep that split
//! coherent and rebuild the key whenever the identity value moves.

use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::Warning;
use crate::models::{GroupName, Track};
use crate::vkey::{KeyParts, RebuildOutcome, VirtualKeyBuilder};
use crate::vocab::{ProtectedGroups, TagVocabulary};
use crate::{Error, Result};

/// Make `value` the identity value of a group
///
/// A blank value clears the group. Otherwise every case-insensitively equal
/// entry is removed and `value` is inserted verbatim at index 0. Returns true
/// when the sequence changed.
pub fn set_identity_value(values: &mut Vec<String>, value: &str) -> bool {
    let before = values.clone();
    if value.trim().is_empty() {
        values.clear();
    } else {
        let folded = value.to_lowercase();
        values.retain(|v| v.to_lowercase() != folded);
        values.insert(0, value.to_string());
    }
    *values != before
}

/// Clean a value sequence: trim, apply aliases, drop blanks and
/// case-insensitive duplicates (first occurrence wins)
///
/// Alias keys are lower-case source values.
pub fn normalize_values(values: &[String], aliases: &BTreeMap<String, String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(values.len());
    let mut out = Vec::with_capacity(values.len());
    for raw in values {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let canonical = aliases
            .get(&trimmed.to_lowercase())
            .map(|alias| alias.trim())
            .filter(|alias| !alias.is_empty())
            .unwrap_or(trimmed);
        let folded = canonical.to_lowercase();
        if seen.contains(&folded) {
            continue;
        }
        seen.push(folded);
        out.push(canonical.to_string());
    }
    out
}

/// Result of a membership toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub track_id: Uuid,
    /// The group's value sequence changed
    pub tags_changed: bool,
    /// Present when the identity value moved and the key was rebuilt
    pub rebuild: Option<RebuildOutcome>,
    pub warnings: Vec<Warning>,
}

impl ToggleOutcome {
    pub fn key_changed(&self) -> bool {
        self.rebuild.as_ref().is_some_and(RebuildOutcome::key_changed)
    }
}

/// Keeps identity/extra values and virtual keys in step
pub struct TagGroupSynchronizer<'a> {
    vocab: &'a TagVocabulary,
    protected: &'a ProtectedGroups,
    unknown_sentinel: &'a str,
}

impl<'a> TagGroupSynchronizer<'a> {
    pub fn new(
        vocab: &'a TagVocabulary,
        protected: &'a ProtectedGroups,
        unknown_sentinel: &'a str,
    ) -> Self {
        Self {
            vocab,
            protected,
            unknown_sentinel,
        }
    }

    /// Add or remove one exact value
    ///
    /// Added values must belong to the group's vocabulary. A group emptied by
    /// the toggle is reseeded with the sentinel when the vocabulary carries it.
    /// For protected groups the key is rebuilt (without forcing a new serial)
    /// whenever the identity value changed.
    pub fn toggle(
        &self,
        tracks: &mut [Track],
        track_id: Uuid,
        group: &GroupName,
        value: &str,
        included: bool,
    ) -> Result<ToggleOutcome> {
        if included {
            if value.trim().is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "cannot add a blank value to tag group '{}'",
                    group
                )));
            }
            if !self.vocab.contains_value(group.as_str(), value) {
                return Err(Error::InvalidArgument(format!(
                    "'{}' is not a value of tag group '{}'",
                    value, group
                )));
            }
        }

        let track = tracks
            .iter_mut()
            .find(|t| t.track_id == track_id)
            .ok_or_else(|| Error::NotFound(format!("track {}", track_id)))?;

        let values = track.tags.entry(group.clone()).or_default();
        let before = values.clone();
        if included {
            if !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
        } else {
            values.retain(|v| v != value);
        }
        if values.is_empty() {
            if let Some(sentinel) = self.vocab_sentinel(group) {
                values.push(sentinel);
            }
        }
        let tags_changed = *values != before;
        let identity_changed = values.first() != before.first();

        debug!(
            track_id = %track_id,
            group = %group,
            value,
            included,
            tags_changed,
            identity_changed,
            "Toggled tag membership"
        );

        let rebuild = if identity_changed && self.protected.is_protected(group.as_str()) {
            let parts = KeyParts::from_track(track, self.protected);
            let builder = VirtualKeyBuilder::new(self.vocab, self.protected);
            Some(builder.rebuild(tracks, track_id, &parts, false)?)
        } else {
            None
        };
        let warnings = rebuild
            .as_ref()
            .map(|r| r.warnings.clone())
            .unwrap_or_default();

        Ok(ToggleOutcome {
            track_id,
            tags_changed,
            rebuild,
            warnings,
        })
    }

    /// The vocabulary's spelling of the sentinel, if the group carries it
    fn vocab_sentinel(&self, group: &GroupName) -> Option<String> {
        let sentinel = self.unknown_sentinel.to_lowercase();
        self.vocab
            .values(group.as_str())
            .iter()
            .find(|v| v.to_lowercase() == sentinel)
            .cloned()
    }
}
