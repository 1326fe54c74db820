//! # Music Catalog Common Library
//!
//! Virtual key and consistency engine for a music catalog:
//! - Entity models (tracks, clusters) and the tag/scale vocabulary
//! - Virtual key derivation and serial allocation
//! - Tag group membership with identity values
//! - Cluster merge/split
//! - Transactional catalog context with a consistency audit
//! - Configuration loading and change events

pub mod catalog;
pub mod clusters;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod scales;
pub mod service;
pub mod tags;
pub mod vkey;
pub mod vocab;

pub use catalog::{Catalog, TrackEdit};
pub use error::{Error, Result, Warning};
pub use service::CatalogService;
pub use vkey::KeyParts;
