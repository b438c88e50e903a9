use tokio::sync::oneshot;
use tracing::debug;

use crate::limits::*;
use crate::model::*;

use super::conflict::check_conflicts;
use super::store::Store;
use super::validate::{EventDraft, EventForm, ResourceForm};
use super::{Engine, EngineError, EntityKind, WalCommand};

impl Engine {
    pub async fn create_resource(&self, form: ResourceForm) -> Result<Id, EngineError> {
        let mut store = self.store.write().await;
        if store.resource_count() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let resource = form.into_resource(store.peek_resource_id())?;
        let id = resource.id;
        self.commit(&mut store, Txn::new(vec![Change::ResourceCreated(resource)]))
            .await?;
        debug!(resource_id = id, "resource created");
        Ok(id)
    }

    pub async fn update_resource(&self, id: Id, form: ResourceForm) -> Result<(), EngineError> {
        let mut store = self.store.write().await;
        let current = store.resource(id).ok_or(EngineError::NotFound {
            kind: EntityKind::Resource,
            id,
        })?;
        let resource = form.merge(current)?;
        self.commit(&mut store, Txn::new(vec![Change::ResourceUpdated(resource)]))
            .await?;
        debug!(resource_id = id, "resource updated");
        Ok(())
    }

    /// Delete a resource and, in the same transaction, every allocation on it.
    /// Returns the number of allocations removed.
    pub async fn delete_resource(&self, id: Id) -> Result<usize, EngineError> {
        let mut store = self.store.write().await;
        if store.resource(id).is_none() {
            return Err(EngineError::NotFound {
                kind: EntityKind::Resource,
                id,
            });
        }
        let mut changes: Vec<Change> = store
            .allocations_for_resource(id)
            .map(|a| Change::AllocationRemoved { id: a.id })
            .collect();
        let removed = changes.len();
        changes.push(Change::ResourceDeleted { id });

        self.commit(&mut store, Txn::new(changes)).await?;
        debug!(resource_id = id, removed, "resource deleted");
        Ok(removed)
    }

    /// Validate, conflict-check and commit a new event with its allocations.
    pub async fn create_event(&self, form: EventForm) -> Result<Id, EngineError> {
        let draft = form.into_draft()?;
        let mut store = self.store.write().await;
        if store.event_count() >= MAX_EVENTS {
            return Err(EngineError::LimitExceeded("too many events"));
        }
        ensure_bookable(&store, &draft, None)?;

        let id = store.peek_event_id();
        let resource_ids = draft.resource_ids.clone();
        let mut changes = vec![Change::EventCreated(draft.into_event(id))];
        changes.extend(new_allocations(&store, id, &resource_ids));

        self.commit(&mut store, Txn::new(changes)).await?;
        debug!(event_id = id, resources = resource_ids.len(), "event created");
        Ok(id)
    }

    /// Edit an event. The new resource set is checked in full before anything
    /// changes; on success the event's allocations are replaced wholesale.
    pub async fn update_event(&self, id: Id, form: EventForm) -> Result<(), EngineError> {
        let mut store = self.store.write().await;
        let current = store.event(id).ok_or(EngineError::NotFound {
            kind: EntityKind::Event,
            id,
        })?;
        let draft = form.merge(current, &store.resource_ids_for_event(id))?;
        ensure_bookable(&store, &draft, Some(id))?;

        let resource_ids = draft.resource_ids.clone();
        let mut changes = vec![Change::EventUpdated(draft.into_event(id))];
        changes.extend(
            store
                .allocations_for_event(id)
                .map(|a| Change::AllocationRemoved { id: a.id }),
        );
        changes.extend(new_allocations(&store, id, &resource_ids));

        self.commit(&mut store, Txn::new(changes)).await?;
        debug!(event_id = id, resources = resource_ids.len(), "event updated");
        Ok(())
    }

    /// Delete an event and, in the same transaction, all of its allocations.
    pub async fn delete_event(&self, id: Id) -> Result<usize, EngineError> {
        let mut store = self.store.write().await;
        if store.event(id).is_none() {
            return Err(EngineError::NotFound {
                kind: EntityKind::Event,
                id,
            });
        }
        let mut changes: Vec<Change> = store
            .allocations_for_event(id)
            .map(|a| Change::AllocationRemoved { id: a.id })
            .collect();
        let removed = changes.len();
        changes.push(Change::EventDeleted { id });

        self.commit(&mut store, Txn::new(changes)).await?;
        debug!(event_id = id, removed, "event deleted");
        Ok(removed)
    }

    /// Rewrite the WAL as a single snapshot transaction.
    ///
    /// Holds the write lock until the swap completes: mutations append while
    /// holding the same lock, so nothing can land in the old file after the
    /// snapshot is taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let store = self.store.write().await;
        let txns = store.snapshot();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { txns, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(store);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Range, referential and conflict checks for a draft about to be committed.
fn ensure_bookable(store: &Store, draft: &EventDraft, id: Option<Id>) -> Result<(), EngineError> {
    if draft.start >= draft.end {
        return Err(EngineError::InvalidRange {
            start: draft.start,
            end: draft.end,
        });
    }
    if let Some(&missing) = draft
        .resource_ids
        .iter()
        .find(|rid| store.resource(**rid).is_none())
    {
        return Err(EngineError::NotFound {
            kind: EntityKind::Resource,
            id: missing,
        });
    }

    let conflicts = check_conflicts(store, &draft.candidate(id), &draft.resource_ids);
    if !conflicts.is_empty() {
        metrics::counter!(crate::observability::CONFLICTS_REJECTED_TOTAL).increment(1);
        return Err(EngineError::Conflicts(conflicts));
    }
    Ok(())
}

/// One allocation per distinct requested resource, first occurrence wins.
fn new_allocations(store: &Store, event_id: Id, resource_ids: &[Id]) -> Vec<Change> {
    let mut seen = std::collections::HashSet::new();
    let mut next_id = store.peek_allocation_id();
    let mut changes = Vec::new();
    for &resource_id in resource_ids {
        if !seen.insert(resource_id) {
            continue;
        }
        changes.push(Change::AllocationAdded(Allocation {
            id: next_id,
            event_id,
            resource_id,
        }));
        next_id += 1;
    }
    changes
}
