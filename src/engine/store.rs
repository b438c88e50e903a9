use std::collections::{BTreeMap, BTreeSet};

use crate::model::*;

/// Indexed in-memory state. Events and resources are keyed by id;
/// allocations hold foreign ids only and are reachable through the two
/// secondary indices.
#[derive(Debug, Clone)]
pub struct Store {
    events: BTreeMap<Id, Event>,
    resources: BTreeMap<Id, Resource>,
    allocations: BTreeMap<Id, Allocation>,
    by_event: BTreeMap<Id, BTreeSet<Id>>,
    by_resource: BTreeMap<Id, BTreeSet<Id>>,
    next_event: Id,
    next_resource: Id,
    next_allocation: Id,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            events: BTreeMap::new(),
            resources: BTreeMap::new(),
            allocations: BTreeMap::new(),
            by_event: BTreeMap::new(),
            by_resource: BTreeMap::new(),
            next_event: 1,
            next_resource: 1,
            next_allocation: 1,
        }
    }

    // ── Events ───────────────────────────────────────────────

    pub fn event(&self, id: Id) -> Option<&Event> {
        self.events.get(&id)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// All events, in id order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource(&self, id: Id) -> Option<&Resource> {
        self.resources.get(&id)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// All resources, in id order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    // ── Allocations ──────────────────────────────────────────

    /// All allocations, in id order.
    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.values()
    }

    pub fn allocations_for_event(&self, event_id: Id) -> impl Iterator<Item = &Allocation> {
        self.indexed(&self.by_event, event_id)
    }

    pub fn allocations_for_resource(&self, resource_id: Id) -> impl Iterator<Item = &Allocation> {
        self.indexed(&self.by_resource, resource_id)
    }

    fn indexed<'a>(
        &'a self,
        index: &'a BTreeMap<Id, BTreeSet<Id>>,
        key: Id,
    ) -> impl Iterator<Item = &'a Allocation> {
        index
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.allocations.get(id))
    }

    /// Resource ids allocated to an event, in allocation order.
    pub fn resource_ids_for_event(&self, event_id: Id) -> Vec<Id> {
        self.allocations_for_event(event_id)
            .map(|a| a.resource_id)
            .collect()
    }

    // ── Id sequences ─────────────────────────────────────────

    /// Id the next created event will receive.
    pub fn peek_event_id(&self) -> Id {
        self.next_event
    }

    pub fn peek_resource_id(&self) -> Id {
        self.next_resource
    }

    /// First of a run of consecutive free allocation ids.
    pub fn peek_allocation_id(&self) -> Id {
        self.next_allocation
    }

    // ── Change application ───────────────────────────────────

    pub fn apply_txn(&mut self, txn: &Txn) {
        for change in &txn.changes {
            self.apply(change);
        }
    }

    pub fn apply(&mut self, change: &Change) {
        match change {
            Change::EventCreated(event) | Change::EventUpdated(event) => {
                self.next_event = self.next_event.max(event.id + 1);
                self.events.insert(event.id, event.clone());
            }
            Change::EventDeleted { id } => {
                debug_assert!(
                    !self.by_event.contains_key(id),
                    "event deleted while allocations remain"
                );
                self.events.remove(id);
            }
            Change::ResourceCreated(resource) | Change::ResourceUpdated(resource) => {
                self.next_resource = self.next_resource.max(resource.id + 1);
                self.resources.insert(resource.id, resource.clone());
            }
            Change::ResourceDeleted { id } => {
                debug_assert!(
                    !self.by_resource.contains_key(id),
                    "resource deleted while allocations remain"
                );
                self.resources.remove(id);
            }
            Change::AllocationAdded(alloc) => {
                self.next_allocation = self.next_allocation.max(alloc.id + 1);
                self.allocations.insert(alloc.id, *alloc);
                self.by_event.entry(alloc.event_id).or_default().insert(alloc.id);
                self.by_resource
                    .entry(alloc.resource_id)
                    .or_default()
                    .insert(alloc.id);
            }
            Change::AllocationRemoved { id } => {
                if let Some(alloc) = self.allocations.remove(id) {
                    unindex(&mut self.by_event, alloc.event_id, alloc.id);
                    unindex(&mut self.by_resource, alloc.resource_id, alloc.id);
                }
            }
            Change::Sequences {
                next_event,
                next_resource,
                next_allocation,
            } => {
                self.next_event = self.next_event.max(*next_event);
                self.next_resource = self.next_resource.max(*next_resource);
                self.next_allocation = self.next_allocation.max(*next_allocation);
            }
        }
    }

    /// Minimal transaction list that recreates this state, sequences included.
    pub fn snapshot(&self) -> Vec<Txn> {
        let mut changes = vec![Change::Sequences {
            next_event: self.next_event,
            next_resource: self.next_resource,
            next_allocation: self.next_allocation,
        }];
        changes.extend(self.resources.values().cloned().map(Change::ResourceCreated));
        changes.extend(self.events.values().cloned().map(Change::EventCreated));
        changes.extend(self.allocations.values().copied().map(Change::AllocationAdded));
        vec![Txn::new(changes)]
    }
}

fn unindex(index: &mut BTreeMap<Id, BTreeSet<Id>>, key: Id, alloc_id: Id) {
    if let Some(ids) = index.get_mut(&key) {
        ids.remove(&alloc_id);
        if ids.is_empty() {
            index.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: Id, start: Ms, end: Ms) -> Change {
        Change::EventCreated(Event {
            id,
            title: format!("event {id}"),
            start,
            end,
            description: None,
        })
    }

    fn resource(id: Id) -> Change {
        Change::ResourceCreated(Resource {
            id,
            name: format!("resource {id}"),
            kind: "room".into(),
        })
    }

    fn alloc(id: Id, event_id: Id, resource_id: Id) -> Change {
        Change::AllocationAdded(Allocation { id, event_id, resource_id })
    }

    #[test]
    fn indices_follow_allocations() {
        let mut store = Store::new();
        for c in [resource(1), resource(2), event(1, 0, 10), alloc(1, 1, 1), alloc(2, 1, 2)] {
            store.apply(&c);
        }
        assert_eq!(store.resource_ids_for_event(1), vec![1, 2]);
        assert_eq!(store.allocations_for_resource(2).count(), 1);

        store.apply(&Change::AllocationRemoved { id: 1 });
        assert_eq!(store.resource_ids_for_event(1), vec![2]);
        assert_eq!(store.allocations_for_resource(1).count(), 0);
    }

    #[test]
    fn sequences_only_move_forward() {
        let mut store = Store::new();
        store.apply(&resource(5));
        assert_eq!(store.peek_resource_id(), 6);
        store.apply(&Change::AllocationRemoved { id: 99 });
        store.apply(&Change::ResourceDeleted { id: 5 });
        assert_eq!(store.peek_resource_id(), 6);
        store.apply(&Change::Sequences {
            next_event: 3,
            next_resource: 2,
            next_allocation: 10,
        });
        assert_eq!(store.peek_event_id(), 3);
        assert_eq!(store.peek_resource_id(), 6);
        assert_eq!(store.peek_allocation_id(), 10);
    }

    #[test]
    fn snapshot_recreates_state() {
        let mut store = Store::new();
        for c in [resource(1), event(1, 0, 10), event(2, 5, 15), alloc(1, 1, 1), alloc(2, 2, 1)] {
            store.apply(&c);
        }
        store.apply(&Change::AllocationRemoved { id: 2 });
        store.apply(&Change::EventDeleted { id: 2 });

        let mut rebuilt = Store::new();
        for txn in store.snapshot() {
            rebuilt.apply_txn(&txn);
        }
        assert_eq!(rebuilt.events().collect::<Vec<_>>(), store.events().collect::<Vec<_>>());
        assert_eq!(rebuilt.allocations().collect::<Vec<_>>(), store.allocations().collect::<Vec<_>>());
        assert_eq!(rebuilt.peek_event_id(), 3);
        assert_eq!(rebuilt.peek_allocation_id(), 3);
    }
}
