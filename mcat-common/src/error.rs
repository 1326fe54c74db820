//! Common error types for the catalog engine

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::GroupName;

/// Common result type for catalog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by catalog operations
///
/// Every variant except `ConsistencyViolation` is raised before the catalog is
/// touched. `ConsistencyViolation` is raised after a staged mutation fails its
/// post-condition check; the staged copy is discarded in that case.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied argument failed a precondition
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested track or scale does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Manual virtual key edit collides with another track
    #[error("Virtual key conflict: '{key}' is already assigned to track {holder}")]
    KeyConflict {
        /// The rejected key
        key: String,
        /// Track currently holding the key
        holder: Uuid,
    },

    /// Post-condition check failed after a mutation (mutation rolled back)
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML configuration
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Soft conditions reported alongside a successful result
///
/// Warnings never abort an operation. Callers surface them to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A protected group has no vocabulary entries (and therefore no `unk`
    /// sentinel); its key component degraded to `unk`
    VocabularyMissing {
        /// The protected group without vocabulary
        group: GroupName,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::VocabularyMissing { group } => write!(
                f,
                "protected tag group '{}' has no vocabulary; key component degraded to 'unk'",
                group
            ),
        }
    }
}
