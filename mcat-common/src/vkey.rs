//! Virtual key derivation
//!
//! A virtual key is `mood_context_instrument_style_NNN`: four slugged
//! identity values followed by a serial that makes the key unique within the
//! catalog. Serials are at least three digits wide; wider serials are written
//! unpadded.

use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Warning;
use crate::models::Track;
use crate::tags::set_identity_value;
use crate::vocab::{KeyRole, ProtectedGroups, TagVocabulary};
use crate::{Error, Result};

/// Slug used for absent or blank components
pub const UNKNOWN_COMPONENT: &str = "unk";

/// Reduce a raw tag value to a key component
///
/// Lower-cases, replaces each run of characters outside `[a-z0-9]` with a
/// single hyphen and trims hyphens from both ends. Empty results become
/// [`UNKNOWN_COMPONENT`].
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_hyphen = false;
    for c in raw.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    if slug.is_empty() {
        UNKNOWN_COMPONENT.to_string()
    } else {
        slug
    }
}

/// Raw identity values for the four key components
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyParts {
    pub mood: String,
    pub context: String,
    pub instrument: String,
    pub style: String,
}

impl KeyParts {
    pub fn new(
        mood: impl Into<String>,
        context: impl Into<String>,
        instrument: impl Into<String>,
        style: impl Into<String>,
    ) -> Self {
        Self {
            mood: mood.into(),
            context: context.into(),
            instrument: instrument.into(),
            style: style.into(),
        }
    }

    /// Current identity values of a track's protected groups
    pub fn from_track(track: &Track, protected: &ProtectedGroups) -> Self {
        let value = |role| track.identity_value(protected.group(role).as_str()).to_string();
        Self {
            mood: value(KeyRole::Mood),
            context: value(KeyRole::Context),
            instrument: value(KeyRole::Instrument),
            style: value(KeyRole::Style),
        }
    }

    pub fn get(&self, role: KeyRole) -> &str {
        match role {
            KeyRole::Mood => &self.mood,
            KeyRole::Context => &self.context,
            KeyRole::Instrument => &self.instrument,
            KeyRole::Style => &self.style,
        }
    }

    /// `slug(mood)_slug(context)_slug(instrument)_slug(style)_`
    pub fn prefix(&self) -> String {
        let mut prefix = String::new();
        for role in KeyRole::ALL {
            prefix.push_str(&slugify(self.get(role)));
            prefix.push('_');
        }
        prefix
    }
}

/// Serial rendered with at least three digits
pub fn format_serial(serial: u64) -> String {
    format!("{:03}", serial)
}

/// Serial of `key` when it is exactly `prefix` followed by digits
pub fn parse_serial(key: &str, prefix: &str) -> Option<u64> {
    let digits = key.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Overlong digit runs cannot collide with anything we allocate
    digits.parse().ok()
}

/// Smallest serial >= 1 not used under `prefix` by any track except `exclude`
pub fn allocate_serial(tracks: &[Track], exclude: Option<Uuid>, prefix: &str) -> u64 {
    let used: HashSet<u64> = tracks
        .iter()
        .filter(|t| Some(t.track_id) != exclude)
        .filter_map(|t| parse_serial(&t.virtual_key, prefix))
        .collect();
    (1..).find(|serial| !used.contains(serial)).unwrap_or(1)
}

/// Result of a single key rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildOutcome {
    pub track_id: Uuid,
    pub old_key: String,
    pub new_key: String,
    pub serial: u64,
    /// Protected group values were rewritten
    pub tags_changed: bool,
    /// Key or protected tags were modified; the caller should persist
    pub dirty: bool,
    pub warnings: Vec<Warning>,
}

impl RebuildOutcome {
    pub fn key_changed(&self) -> bool {
        self.old_key != self.new_key
    }
}

/// Derives and assigns virtual keys
pub struct VirtualKeyBuilder<'a> {
    vocab: &'a TagVocabulary,
    protected: &'a ProtectedGroups,
}

impl<'a> VirtualKeyBuilder<'a> {
    pub fn new(vocab: &'a TagVocabulary, protected: &'a ProtectedGroups) -> Self {
        Self { vocab, protected }
    }

    /// Rebuild one track's key from raw identity values
    ///
    /// Unless `force_new_serial` is set, the track keeps its current serial
    /// when its key already sits under the new prefix and no other track holds
    /// the resulting key. The raw values are then written back as the
    /// identity values of the protected groups (blank clears the group).
    ///
    /// Blank or absent values degrade to `unk`; the only error is an unknown
    /// track id.
    pub fn rebuild(
        &self,
        tracks: &mut [Track],
        track_id: Uuid,
        parts: &KeyParts,
        force_new_serial: bool,
    ) -> Result<RebuildOutcome> {
        let idx = tracks
            .iter()
            .position(|t| t.track_id == track_id)
            .ok_or_else(|| Error::NotFound(format!("track {}", track_id)))?;

        let warnings = self.vocabulary_warnings();
        let prefix = parts.prefix();
        let old_key = tracks[idx].virtual_key.clone();

        let kept = if force_new_serial {
            None
        } else {
            parse_serial(&old_key, &prefix).filter(|serial| {
                let candidate = format!("{}{}", prefix, format_serial(*serial));
                !tracks
                    .iter()
                    .any(|t| t.track_id != track_id && t.virtual_key == candidate)
            })
        };
        let serial = match kept {
            Some(serial) => serial,
            None => allocate_serial(tracks, Some(track_id), &prefix),
        };
        let new_key = format!("{}{}", prefix, format_serial(serial));

        let track = &mut tracks[idx];
        let mut tags_changed = false;
        for (role, group) in self.protected.iter() {
            let values = track.tags.entry(group.clone()).or_default();
            tags_changed |= set_identity_value(values, parts.get(role));
        }
        track.virtual_key = new_key.clone();

        let dirty = tags_changed || old_key != new_key;
        debug!(
            track_id = %track_id,
            old_key = %old_key,
            new_key = %new_key,
            kept_serial = kept.is_some(),
            dirty,
            "Rebuilt virtual key"
        );

        Ok(RebuildOutcome {
            track_id,
            old_key,
            new_key,
            serial,
            tags_changed,
            dirty,
            warnings,
        })
    }

    fn vocabulary_warnings(&self) -> Vec<Warning> {
        self.protected
            .iter()
            .filter(|(_, group)| self.vocab.values(group.as_str()).is_empty())
            .map(|(_, group)| {
                warn!(group = %group, "Protected tag group has no vocabulary");
                Warning::VocabularyMissing {
                    group: group.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_with_key(key: &str) -> Track {
        Track::new(Uuid::new_v4(), key)
    }

    fn chill() -> KeyParts {
        KeyParts::new("calm", "menu", "piano", "ambient")
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Chill Beats!!"), "chill-beats");
        assert_eq!(slugify(""), "unk");
        assert_eq!(slugify("__"), "unk");
        assert_eq!(slugify("  Sci-Fi / Space  "), "sci-fi-space");
        assert_eq!(slugify("folk_acoustic"), "folk-acoustic");
        assert_eq!(slugify("Café"), "caf");
    }

    #[test]
    fn test_prefix_uses_unk_for_blank_parts() {
        let parts = KeyParts::new("Tense", "", "  ", "Horror");
        assert_eq!(parts.prefix(), "tense_unk_unk_horror_");
    }

    #[test]
    fn test_format_serial_pads_to_three() {
        assert_eq!(format_serial(7), "007");
        assert_eq!(format_serial(42), "042");
        assert_eq!(format_serial(1000), "1000");
    }

    #[test]
    fn test_parse_serial_requires_exact_prefix_and_digits() {
        let prefix = "calm_menu_piano_ambient_";
        assert_eq!(parse_serial("calm_menu_piano_ambient_003", prefix), Some(3));
        assert_eq!(parse_serial("calm_menu_piano_ambient_1200", prefix), Some(1200));
        assert_eq!(parse_serial("calm_menu_piano_ambient_", prefix), None);
        assert_eq!(parse_serial("calm_menu_piano_ambient_01a", prefix), None);
        assert_eq!(parse_serial("xcalm_menu_piano_ambient_001", prefix), None);
    }

    #[test]
    fn test_allocate_fills_smallest_gap() {
        let tracks = vec![
            track_with_key("calm_menu_piano_ambient_001"),
            track_with_key("calm_menu_piano_ambient_003"),
            track_with_key("tense_menu_piano_ambient_002"),
        ];
        assert_eq!(allocate_serial(&tracks, None, "calm_menu_piano_ambient_"), 2);
        assert_eq!(
            allocate_serial(&tracks, Some(tracks[0].track_id), "calm_menu_piano_ambient_"),
            1
        );
    }

    #[test]
    fn test_unforced_rebuild_keeps_serial() {
        let vocab = TagVocabulary::with_defaults();
        let protected = ProtectedGroups::default();
        let builder = VirtualKeyBuilder::new(&vocab, &protected);

        let mut tracks = vec![
            track_with_key("calm_menu_piano_ambient_001"),
            track_with_key("calm_menu_piano_ambient_003"),
        ];
        let id = tracks[1].track_id;

        let outcome = builder.rebuild(&mut tracks, id, &chill(), false).unwrap();
        assert_eq!(outcome.new_key, "calm_menu_piano_ambient_003");
        assert!(!outcome.key_changed());
        assert!(outcome.dirty, "identity values were written");

        let forced = builder.rebuild(&mut tracks, id, &chill(), true).unwrap();
        assert_eq!(forced.new_key, "calm_menu_piano_ambient_002");
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let vocab = TagVocabulary::with_defaults();
        let protected = ProtectedGroups::default();
        let builder = VirtualKeyBuilder::new(&vocab, &protected);

        let mut tracks = vec![track_with_key("x")];
        let id = tracks[0].track_id;
        let first = builder.rebuild(&mut tracks, id, &chill(), false).unwrap();
        assert_eq!(first.new_key, "calm_menu_piano_ambient_001");

        let snapshot = tracks.clone();
        let second = builder.rebuild(&mut tracks, id, &chill(), false).unwrap();
        assert!(!second.dirty);
        assert_eq!(tracks, snapshot);
    }

    #[test]
    fn test_rebuild_writes_identity_values() {
        let vocab = TagVocabulary::with_defaults();
        let protected = ProtectedGroups::default();
        let builder = VirtualKeyBuilder::new(&vocab, &protected);

        let mut track = track_with_key("old");
        track
            .tags
            .insert(protected.mood.clone(), vec!["tense".into(), "Calm".into()]);
        let id = track.track_id;
        let mut tracks = vec![track];

        let parts = KeyParts::new("calm", "", "piano", "ambient");
        builder.rebuild(&mut tracks, id, &parts, false).unwrap();
        assert_eq!(tracks[0].tag_values("moods"), &["calm", "tense"]);
        assert!(tracks[0].tag_values("usable_in_contexts").is_empty());
        assert_eq!(tracks[0].virtual_key, "calm_unk_piano_ambient_001");
    }

    #[test]
    fn test_empty_protected_vocabulary_warns() {
        let vocab = TagVocabulary::from_groups([("moods", Vec::<String>::new())]).unwrap();
        let protected = ProtectedGroups::default();
        let builder = VirtualKeyBuilder::new(&vocab, &protected);

        let mut tracks = vec![track_with_key("")];
        let id = tracks[0].track_id;
        let outcome = builder
            .rebuild(&mut tracks, id, &KeyParts::default(), false)
            .unwrap();
        assert_eq!(outcome.new_key, "unk_unk_unk_unk_001");
        assert_eq!(outcome.warnings.len(), 4);
    }

    #[test]
    fn test_unknown_track_is_not_found() {
        let vocab = TagVocabulary::with_defaults();
        let protected = ProtectedGroups::default();
        let builder = VirtualKeyBuilder::new(&vocab, &protected);
        let mut tracks: Vec<Track> = Vec::new();
        let err = builder
            .rebuild(&mut tracks, Uuid::new_v4(), &chill(), false)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
