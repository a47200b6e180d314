//! Container Cache: the authoritative in-memory map of local containers plus
//! a separate map of failure placeholders for creates that never produced an
//! engine-side object.
//!
//! Grounded in `server/manager.rs`'s `DashMap<String, Arc<Server>>`
//! collection idiom. Documented deviation from spec.md §4.F's "single
//! read/write mutex" wording: `DashMap` already shards its locking per key,
//! so two independent `DashMap`s give the same externally observable
//! contract (atomic snapshot per heartbeat, no torn reads) with finer
//! internal lock granularity — consistent with how the teacher already
//! trusts `DashMap` instead of wrapping a `Mutex<HashMap<_, _>>` itself.
//!
//! The one-heartbeat grace period owed to a `Removed` record (spec.md §4.F
//! invariant 2) is not bookkept here: the Event Reconciler marks a record
//! `Removed`, triggers the heartbeat that reports it, then calls [`Self::remove`]
//! itself, matching the literal dispatch-table sequence in §4.G.

use std::time::Duration;

use dashmap::DashMap;

use crate::runtime::{ListFilter, RuntimeAdapter};
use crate::types::{ContainerRecord, FailurePlaceholder, MappedState};

pub struct ContainerCache {
    by_id: DashMap<String, ContainerRecord>,
    by_name: DashMap<String, FailurePlaceholder>,
}

impl ContainerCache {
    pub fn new() -> Self {
        Self { by_id: DashMap::new(), by_name: DashMap::new() }
    }

    /// Drains `listContainers(all=true)`, replacing the current contents
    /// wholesale. Used at startup.
    pub async fn load_all(&self, runtime: &dyn RuntimeAdapter, deadline: Duration) -> crate::error::Result<()> {
        let records = runtime.list_containers(ListFilter { all: true }, deadline).await?;
        self.by_id.clear();
        for record in records {
            self.upsert_from_inspect(record);
        }
        Ok(())
    }

    pub fn upsert_from_inspect(&self, record: ContainerRecord) {
        self.by_id.insert(record.id.clone(), record);
    }

    /// Marks an id `Removed` in place. No-op if the id is already absent.
    pub fn mark_removed(&self, id: &str) {
        if let Some(mut record) = self.by_id.get_mut(id) {
            record.state = MappedState::Removed;
        }
    }

    /// Drops an id entirely. Called by the reconciler after the one
    /// heartbeat emission a `Removed` transition is owed.
    pub fn remove(&self, id: &str) {
        self.by_id.remove(id);
    }

    pub fn get(&self, id: &str) -> Option<ContainerRecord> {
        self.by_id.get(id).map(|r| r.clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<ContainerRecord> {
        self.by_id.iter().find(|r| r.name == name).map(|r| r.clone())
    }

    /// Purges any cache entry sharing `name` regardless of id — used on the
    /// recreate path where the old id would otherwise linger (spec.md §4.G
    /// "recreate-purge" rationale).
    pub fn purge_by_name(&self, name: &str) {
        let stale: Vec<String> =
            self.by_id.iter().filter(|r| r.name == name).map(|r| r.key().clone()).collect();
        for id in stale {
            self.by_id.remove(&id);
        }
    }

    pub fn record_failure(&self, placeholder: FailurePlaceholder) {
        self.by_name.insert(placeholder.name.clone(), placeholder);
    }

    /// Removes a failure placeholder for `name`. Called unconditionally on
    /// `ContainerDelete` even if the engine reports "not found" for the id,
    /// so a stuck placeholder cannot survive its own delete (testable
    /// property 5).
    pub fn clear_failure(&self, name: &str) {
        self.by_name.remove(name);
    }

    /// Assembles the heartbeat view: overlays each failure placeholder onto
    /// a same-named real record for this call only (the overlay is never
    /// written back into `byId`), and emits any placeholder with no
    /// matching real record as its own synthetic `Failed` entry — the
    /// no-container-ever-existed case spec.md §3 names as the placeholder's
    /// whole purpose.
    pub fn snapshot(&self) -> Vec<ContainerRecord> {
        let mut overlaid_names = std::collections::HashSet::new();
        let mut records: Vec<ContainerRecord> = self
            .by_id
            .iter()
            .map(|entry| {
                let mut record = entry.value().clone();
                if let Some(placeholder) = self.by_name.get(&record.name) {
                    record.overlay_failure(&placeholder);
                    overlaid_names.insert(record.name.clone());
                }
                record
            })
            .collect();

        for entry in self.by_name.iter() {
            if !overlaid_names.contains(entry.key()) {
                records.push(entry.value().as_record());
            }
        }

        records
    }
}

impl Default for ContainerCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn record(id: &str, name: &str, state: MappedState) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            name: name.to_string(),
            state,
            status: "Up".to_string(),
            image: "nginx:latest".to_string(),
            labels: HashMap::new(),
            env: vec![],
            mounts: vec![],
            command: vec![],
            ports: vec![],
            networks: vec![],
            created_at: Some(Utc::now()),
            started_at: Some(Utc::now()),
            finished_at: None,
            error_msg: None,
            restart_count: None,
            network_mode: None,
        }
    }

    #[test]
    fn mark_removed_then_remove_drops_entry() {
        let cache = ContainerCache::new();
        cache.upsert_from_inspect(record("c1", "web", MappedState::Running));
        cache.mark_removed("c1");

        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].state, MappedState::Removed);

        cache.remove("c1");
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn placeholder_overlays_without_persisting() {
        let cache = ContainerCache::new();
        cache.upsert_from_inspect(record("c1", "web", MappedState::Running));
        cache.record_failure(FailurePlaceholder::new("web", "pull failed"));

        let snap = cache.snapshot();
        assert_eq!(snap[0].state, MappedState::Failed);
        assert_eq!(snap[0].error_msg.as_deref(), Some("pull failed"));

        // Not persisted in by_id: the underlying record keeps its real state.
        assert_eq!(cache.get("c1").unwrap().state, MappedState::Running);
    }

    #[test]
    fn delete_clears_placeholder_even_if_id_unknown() {
        let cache = ContainerCache::new();
        cache.record_failure(FailurePlaceholder::new("web", "create failed"));
        cache.clear_failure("web");

        let snap = cache.snapshot();
        assert!(snap.is_empty());
    }

    #[test]
    fn standalone_placeholder_surfaces_without_a_real_record() {
        let cache = ContainerCache::new();
        cache.record_failure(FailurePlaceholder::new("web", "image pull failed"));

        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, "");
        assert_eq!(snap[0].name, "web");
        assert_eq!(snap[0].state, MappedState::Failed);
        assert_eq!(snap[0].error_msg.as_deref(), Some("image pull failed"));
    }

    #[test]
    fn purge_by_name_drops_stale_id_on_recreate() {
        let cache = ContainerCache::new();
        cache.upsert_from_inspect(record("old-id", "web", MappedState::Running));
        cache.purge_by_name("web");
        cache.upsert_from_inspect(record("new-id", "web", MappedState::Running));

        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, "new-id");
    }
}
