//! Shared catalog handle
//!
//! [`CatalogService`] is the single writer for one catalog. Each mutation
//! holds the write lock for its whole duration and runs as a catalog
//! transaction, so readers see either the state before or after it. Committed
//! changes are published on the [`EventBus`].

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};
use uuid::Uuid;

use crate::catalog::{Catalog, ConsistencyReport, NormalizeReport, TrackEdit, ValueRemoval};
use crate::clusters::{ClusterSummary, KeyChange, MergeOutcome, SplitOutcome};
use crate::config::EngineConfig;
use crate::events::{CatalogEvent, EventBus};
use crate::models::Track;
use crate::vkey::KeyParts;
use crate::{Error, Result};

/// Cloneable handle to a catalog and its event bus
#[derive(Clone)]
pub struct CatalogService {
    catalog: Arc<RwLock<Catalog>>,
    events: EventBus,
}

impl CatalogService {
    /// Wrap a loaded catalog, applying the engine rules and normalizing it
    pub fn new(mut catalog: Catalog, config: &EngineConfig) -> Result<(Self, NormalizeReport)> {
        config.validate()?;
        catalog.set_rules(config.catalog.clone())?;
        let report = catalog.normalize()?;
        info!(
            tracks = catalog.tracks().len(),
            clusters = catalog.clusters().len(),
            "Catalog service ready"
        );
        let service = Self {
            catalog: Arc::new(RwLock::new(catalog)),
            events: EventBus::new(config.events.capacity),
        };
        Ok((service, report))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Copy of the current catalog (e.g. for persistence)
    pub async fn snapshot(&self) -> Catalog {
        self.catalog.read().await.clone()
    }

    pub async fn track(&self, track_id: Uuid) -> Option<Track> {
        self.catalog.read().await.track(track_id).cloned()
    }

    pub async fn roster(&self) -> Vec<ClusterSummary> {
        self.catalog.read().await.roster()
    }

    pub async fn check_consistency(&self) -> ConsistencyReport {
        self.catalog.read().await.check_consistency()
    }

    pub async fn rebuild_virtual_key(
        &self,
        track_id: Uuid,
        parts: KeyParts,
        force_new_serial: bool,
    ) -> Result<TrackEdit> {
        let result = self
            .catalog
            .write()
            .await
            .rebuild_virtual_key(track_id, &parts, force_new_serial);
        let edit = self.observe("rebuild_virtual_key", result)?;
        self.publish_edit(&edit, None);
        Ok(edit)
    }

    pub async fn toggle_tag_membership(
        &self,
        track_id: Uuid,
        group: &str,
        value: &str,
        included: bool,
    ) -> Result<TrackEdit> {
        let result = self
            .catalog
            .write()
            .await
            .toggle_tag_membership(track_id, group, value, included);
        let edit = self.observe("toggle_tag_membership", result)?;
        self.publish_edit(&edit, Some(group));
        Ok(edit)
    }

    pub async fn merge_clusters(&self, target: Uuid, source: Uuid) -> Result<MergeOutcome> {
        let result = self.catalog.write().await.merge_clusters(target, source);
        let outcome = self.observe("merge_clusters", result)?;
        self.events.emit_lossy(CatalogEvent::ClustersMerged {
            target_cluster_id: outcome.target_cluster_id,
            removed_cluster_id: outcome.removed_cluster_id,
            moved_track_ids: outcome.moved_track_ids.clone(),
            timestamp: Utc::now(),
        });
        self.publish_key_changes(&outcome.changed_keys);
        Ok(outcome)
    }

    pub async fn split_cluster(
        &self,
        source: Uuid,
        track_ids: &[Uuid],
        new_name: &str,
    ) -> Result<SplitOutcome> {
        let result = self
            .catalog
            .write()
            .await
            .split_cluster(source, track_ids, new_name);
        let outcome = self.observe("split_cluster", result)?;
        self.events.emit_lossy(CatalogEvent::ClusterSplit {
            source_cluster_id: outcome.source_cluster_id,
            new_cluster_id: outcome.new_cluster_id,
            moved_track_ids: outcome.moved_track_ids.clone(),
            timestamp: Utc::now(),
        });
        self.publish_key_changes(&outcome.changed_keys);
        Ok(outcome)
    }

    pub async fn admit_track(&self, track: Track) -> Result<TrackEdit> {
        let result = self.catalog.write().await.admit_track(track);
        let edit = self.observe("admit_track", result)?;
        self.publish_edit(&edit, None);
        Ok(edit)
    }

    pub async fn remove_track(&self, track_id: Uuid) -> Result<Track> {
        let result = self.catalog.write().await.remove_track(track_id);
        let removed = self.observe("remove_track", result)?;
        self.events.emit_lossy(CatalogEvent::TrackRemoved {
            track_id,
            timestamp: Utc::now(),
        });
        Ok(removed)
    }

    pub async fn set_virtual_key(&self, track_id: Uuid, key: &str) -> Result<TrackEdit> {
        let result = self.catalog.write().await.set_virtual_key(track_id, key);
        let edit = self.observe("set_virtual_key", result)?;
        self.publish_edit(&edit, None);
        Ok(edit)
    }

    pub async fn add_tag_value(&self, group: &str, value: &str) -> Result<bool> {
        let result = self.catalog.write().await.add_tag_value(group, value);
        let added = self.observe("add_tag_value", result)?;
        if added {
            self.publish_vocabulary(group, "value added");
        }
        Ok(added)
    }

    pub async fn delete_tag_value(&self, group: &str, value: &str) -> Result<ValueRemoval> {
        let result = self.catalog.write().await.delete_tag_value(group, value);
        let removal = self.observe("delete_tag_value", result)?;
        self.publish_vocabulary(group, "value deleted");
        self.publish_key_changes(&removal.changed_keys);
        Ok(removal)
    }

    pub async fn delete_tag_group(&self, group: &str) -> Result<usize> {
        let result = self.catalog.write().await.delete_tag_group(group);
        let removed = self.observe("delete_tag_group", result)?;
        self.publish_vocabulary(group, "group deleted");
        Ok(removed)
    }

    /// Log rollbacks and report them on the bus
    fn observe<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(Error::ConsistencyViolation(message)) = &result {
            error!(operation, %message, "Catalog mutation rolled back");
            self.events.emit_lossy(CatalogEvent::ConsistencyViolation {
                operation: operation.to_string(),
                message: message.clone(),
                timestamp: Utc::now(),
            });
        }
        result
    }

    fn publish_edit(&self, edit: &TrackEdit, group: Option<&str>) {
        if let (true, Some(group)) = (edit.tags_changed, group) {
            self.events.emit_lossy(CatalogEvent::TagsChanged {
                track_id: edit.track.track_id,
                group: group.to_string(),
                timestamp: Utc::now(),
            });
        }
        if edit.key_changed {
            self.events.emit_lossy(CatalogEvent::VirtualKeyChanged {
                track_id: edit.track.track_id,
                old_key: edit.old_key.clone(),
                new_key: edit.track.virtual_key.clone(),
                timestamp: Utc::now(),
            });
        }
    }

    fn publish_key_changes(&self, changes: &[KeyChange]) {
        for change in changes {
            self.events.emit_lossy(CatalogEvent::VirtualKeyChanged {
                track_id: change.track_id,
                old_key: change.old_key.clone(),
                new_key: change.new_key.clone(),
                timestamp: Utc::now(),
            });
        }
    }

    fn publish_vocabulary(&self, subject: &str, change: &str) {
        self.events.emit_lossy(CatalogEvent::VocabularyChanged {
            subject: subject.to_string(),
            change: change.to_string(),
            timestamp: Utc::now(),
        });
    }
}
