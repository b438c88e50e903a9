use crate::datetime::now_ms;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_conflicts, scan_conflicts};
use super::report::utilisation_report;
use super::store::Store;
use super::validate::{check_input, report_window};
use super::{Engine, EngineError, EntityKind};

impl Engine {
    pub async fn get_resource(&self, id: Id) -> Result<Resource, EngineError> {
        let store = self.store.read().await;
        store.resource(id).cloned().ok_or(EngineError::NotFound {
            kind: EntityKind::Resource,
            id,
        })
    }

    /// All resources, in id order.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let store = self.store.read().await;
        store.resources().cloned().collect()
    }

    pub async fn get_event(&self, id: Id) -> Result<EventInfo, EngineError> {
        let store = self.store.read().await;
        let event = store.event(id).ok_or(EngineError::NotFound {
            kind: EntityKind::Event,
            id,
        })?;
        Ok(event_info(&store, event))
    }

    /// All events ordered by start time (ties by id), with their resource ids.
    pub async fn list_events(&self) -> Vec<EventInfo> {
        let store = self.store.read().await;
        events_by_start(&store)
            .into_iter()
            .map(|e| event_info(&store, e))
            .collect()
    }

    /// Allocations in id order, optionally narrowed to one event and/or resource.
    pub async fn list_allocations(
        &self,
        event_id: Option<Id>,
        resource_id: Option<Id>,
    ) -> Vec<Allocation> {
        let store = self.store.read().await;
        store
            .allocations()
            .filter(|a| event_id.is_none_or(|id| a.event_id == id))
            .filter(|a| resource_id.is_none_or(|id| a.resource_id == id))
            .copied()
            .collect()
    }

    /// Dry-run conflict check. With `event_id`, the range is checked as an
    /// edit of that event: its own bookings are excluded and fields not
    /// submitted fall back to its current values.
    pub async fn check(
        &self,
        start_time: Option<&str>,
        end_time: Option<&str>,
        resources: Option<&str>,
        event_id: Option<Id>,
    ) -> Result<Vec<String>, EngineError> {
        let store = self.store.read().await;
        let current_resources;
        let current = match event_id {
            Some(id) => {
                let event = store.event(id).ok_or(EngineError::NotFound {
                    kind: EntityKind::Event,
                    id,
                })?;
                current_resources = store.resource_ids_for_event(id);
                Some((event, current_resources.as_slice()))
            }
            None => None,
        };
        let (candidate, resource_ids) = check_input(start_time, end_time, resources, current)?;
        Ok(check_conflicts(&store, &candidate, &resource_ids))
    }

    pub async fn conflicts(&self) -> Vec<ConflictPair> {
        let store = self.store.read().await;
        scan_conflicts(&store)
    }

    /// Utilisation between two `YYYY-MM-DD` dates, both inclusive.
    pub async fn utilisation(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<UtilisationReport, EngineError> {
        let window = report_window(start_date, end_date)?;
        let store = self.store.read().await;
        Ok(utilisation_report(&store, window, now_ms()))
    }

    pub async fn dashboard(&self) -> Dashboard {
        let store = self.store.read().await;
        Dashboard {
            events_count: store.event_count(),
            resources_count: store.resource_count(),
            next_events: events_by_start(&store)
                .into_iter()
                .take(DASHBOARD_EVENTS)
                .cloned()
                .collect(),
        }
    }
}

fn events_by_start(store: &Store) -> Vec<&Event> {
    let mut events: Vec<&Event> = store.events().collect();
    events.sort_by_key(|e| (e.start, e.id));
    events
}

fn event_info(store: &Store, event: &Event) -> EventInfo {
    EventInfo {
        event: event.clone(),
        resource_ids: store.resource_ids_for_event(event.id),
    }
}
