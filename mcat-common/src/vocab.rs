//! Tag vocabulary and protected group configuration
//!
//! The vocabulary lists every valid tag group and its allowed values. Four
//! groups are *protected*: their identity values feed the virtual key, one per
//! [`KeyRole`], and they cannot be deleted. Which group plays which role is
//! configuration, not code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::GroupName;
use crate::scales::ScaleRegistry;
use crate::{Error, Result};

/// Default role vocabulary
pub const DEFAULT_PRIMARY_ROLES: &[&str] = &[
    "menu",
    "exploration",
    "town",
    "combat",
    "boss",
    "cutscene",
    "ending",
    "ambient",
];

/// Position of a component inside the virtual key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    Mood,
    Context,
    Instrument,
    Style,
}

impl KeyRole {
    /// Roles in key order
    pub const ALL: [KeyRole; 4] = [
        KeyRole::Mood,
        KeyRole::Context,
        KeyRole::Instrument,
        KeyRole::Style,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRole::Mood => "mood",
            KeyRole::Context => "context",
            KeyRole::Instrument => "instrument",
            KeyRole::Style => "style",
        }
    }
}

/// Role -> tag group mapping for the four key components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectedGroups {
    pub mood: GroupName,
    pub context: GroupName,
    pub instrument: GroupName,
    pub style: GroupName,
}

impl Default for ProtectedGroups {
    fn default() -> Self {
        Self {
            mood: builtin_group("moods"),
            context: builtin_group("usable_in_contexts"),
            instrument: builtin_group("instruments"),
            style: builtin_group("styles"),
        }
    }
}

impl ProtectedGroups {
    /// Group configured for a role
    pub fn group(&self, role: KeyRole) -> &GroupName {
        match role {
            KeyRole::Mood => &self.mood,
            KeyRole::Context => &self.context,
            KeyRole::Instrument => &self.instrument,
            KeyRole::Style => &self.style,
        }
    }

    /// Role played by a group, if it is protected
    pub fn role_of(&self, group: &str) -> Option<KeyRole> {
        KeyRole::ALL
            .into_iter()
            .find(|role| self.group(*role).as_str() == group)
    }

    pub fn is_protected(&self, group: &str) -> bool {
        self.role_of(group).is_some()
    }

    /// `(role, group)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (KeyRole, &GroupName)> + '_ {
        KeyRole::ALL.into_iter().map(move |role| (role, self.group(role)))
    }

    /// Each role must map to a distinct group
    pub fn validate(&self) -> Result<()> {
        for (i, (role_a, group_a)) in self.iter().enumerate() {
            for (role_b, group_b) in self.iter().skip(i + 1) {
                if group_a == group_b {
                    return Err(Error::Config(format!(
                        "protected group '{}' is assigned to both {} and {}",
                        group_a,
                        role_a.as_str(),
                        role_b.as_str()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn builtin_group(name: &'static str) -> GroupName {
    GroupName::from_static(name)
}

/// Tag groups and their allowed values
///
/// Value order is the default UI/selection precedence; it is not used for
/// uniqueness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagVocabulary {
    groups: BTreeMap<GroupName, Vec<String>>,
}

impl TagVocabulary {
    /// Vocabulary shipped with new catalogs
    pub fn with_defaults() -> Self {
        let defaults: &[(&str, &[&str])] = &[
            (
                "moods",
                &[
                    "calm", "cozy", "playful", "lighthearted", "hopeful", "romantic",
                    "mysterious", "suspenseful", "tense", "eerie", "ominous", "melancholic",
                    "heroic", "triumphant", "epic",
                ],
            ),
            (
                "styles",
                &[
                    "cinematic", "orchestral", "ambient", "minimalist", "electronic",
                    "synthwave", "chiptune", "lofi", "rock", "jazz", "folk_acoustic", "world",
                    "industrial", "horror",
                ],
            ),
            (
                "usable_in_contexts",
                &[
                    "menu", "loading", "exploration", "hub", "town", "puzzle", "stealth",
                    "combat", "boss", "cutscene", "game_over", "ending", "credits",
                ],
            ),
            (
                "instruments",
                &[
                    "orchestral", "piano", "strings", "guitar", "bass", "percussion", "synth",
                    "choir", "ethnic",
                ],
            ),
            (
                "for_game_settings",
                &[
                    "fantasy", "sci-fi", "modern", "historical", "post-apocalyptic",
                    "cyberpunk", "steampunk",
                ],
            ),
        ];

        let mut vocab = Self::default();
        for (group, values) in defaults {
            vocab.groups.insert(
                builtin_group(group),
                values.iter().map(|v| v.to_string()).collect(),
            );
        }
        vocab
    }

    /// Build a vocabulary from `(group, values)` pairs
    pub fn from_groups<G, V, S>(groups: G) -> Result<Self>
    where
        G: IntoIterator<Item = (S, V)>,
        V: IntoIterator,
        V::Item: Into<String>,
        S: Into<String>,
    {
        let mut vocab = Self::default();
        for (group, values) in groups {
            let name = GroupName::new(group)?;
            vocab
                .groups
                .insert(name, values.into_iter().map(Into::into).collect());
        }
        Ok(vocab)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Validate a group name against the vocabulary
    ///
    /// Unknown names are rejected so typos never become silent no-ops.
    pub fn group(&self, name: &str) -> Result<GroupName> {
        self.groups
            .get_key_value(name.trim())
            .map(|(key, _)| key.clone())
            .ok_or_else(|| Error::InvalidArgument(format!("unknown tag group: '{}'", name)))
    }

    pub fn contains_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &GroupName> {
        self.groups.keys()
    }

    /// Allowed values of a group (empty when the group is unknown)
    pub fn values(&self, group: &str) -> &[String] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Case-insensitive membership test
    pub fn contains_value(&self, group: &str, value: &str) -> bool {
        self.values(group)
            .iter()
            .any(|v| v.to_lowercase() == value.to_lowercase())
    }

    /// Add an empty group; returns false if it already exists
    pub fn add_group(&mut self, group: GroupName) -> bool {
        if self.groups.contains_key(group.as_str()) {
            return false;
        }
        self.groups.insert(group, Vec::new());
        true
    }

    pub fn remove_group(&mut self, group: &str) -> bool {
        self.groups.remove(group).is_some()
    }

    /// Append a value (exact match dedupe); returns false if already present
    pub fn add_value(&mut self, group: &GroupName, value: &str) -> bool {
        let values = self.groups.entry(group.clone()).or_default();
        if values.iter().any(|v| v == value) {
            return false;
        }
        values.push(value.to_string());
        true
    }

    /// Remove a value case-insensitively; returns the number of entries removed
    pub fn remove_value(&mut self, group: &str, value: &str) -> usize {
        let target = value.to_lowercase();
        match self.groups.get_mut(group) {
            Some(values) => {
                let before = values.len();
                values.retain(|v| v.to_lowercase() != target);
                before - values.len()
            }
            None => 0,
        }
    }

    /// Ensure every protected group exists (possibly empty)
    pub fn ensure_protected(&mut self, protected: &ProtectedGroups) {
        for (_, group) in protected.iter() {
            self.groups.entry(group.clone()).or_default();
        }
    }
}

/// Everything a catalog's vocabulary section carries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vocab {
    #[serde(default)]
    pub primary_roles: Vec<String>,
    #[serde(default)]
    pub tag_vocab: TagVocabulary,
    #[serde(flatten)]
    pub scales: ScaleRegistry,
}

impl Vocab {
    /// Vocabulary for a brand-new catalog
    pub fn with_defaults() -> Self {
        Self {
            primary_roles: DEFAULT_PRIMARY_ROLES.iter().map(|r| r.to_string()).collect(),
            tag_vocab: TagVocabulary::with_defaults(),
            scales: ScaleRegistry::with_defaults(),
        }
    }

    /// True when the catalog carried no tag or scale vocabulary at all
    pub fn is_blank(&self) -> bool {
        self.tag_vocab.is_empty() && self.scales.is_blank()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_protected_groups() {
        let protected = ProtectedGroups::default();
        assert_eq!(protected.group(KeyRole::Mood).as_str(), "moods");
        assert_eq!(protected.role_of("usable_in_contexts"), Some(KeyRole::Context));
        assert_eq!(protected.role_of("for_game_settings"), None);
        assert!(protected.validate().is_ok());
    }

    #[test]
    fn test_duplicate_protected_group_rejected() {
        let mut protected = ProtectedGroups::default();
        protected.style = protected.mood.clone();
        let err = protected.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_group_rejected_at_boundary() {
        let vocab = TagVocabulary::with_defaults();
        assert!(vocab.group("moods").is_ok());
        let err = vocab.group("mods").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_remove_value_is_case_insensitive() {
        let mut vocab = TagVocabulary::from_groups([("moods", vec!["Calm", "calm", "tense"])]).unwrap();
        assert_eq!(vocab.remove_value("moods", "CALM"), 2);
        assert_eq!(vocab.values("moods"), &["tense".to_string()]);
    }

    #[test]
    fn test_add_value_dedupes_exact_matches() {
        let mut vocab = TagVocabulary::with_defaults();
        let moods = vocab.group("moods").unwrap();
        assert!(!vocab.add_value(&moods, "calm"));
        assert!(vocab.add_value(&moods, "dreamy"));
        assert_eq!(vocab.values("moods").last().map(String::as_str), Some("dreamy"));
    }

    #[test]
    fn test_ensure_protected_adds_missing_groups() {
        let mut vocab = TagVocabulary::default();
        vocab.ensure_protected(&ProtectedGroups::default());
        assert!(vocab.contains_group("styles"));
        assert!(vocab.values("styles").is_empty());
    }
}
