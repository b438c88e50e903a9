use crate::datetime::display;
use crate::model::*;

use super::store::Store;

pub const INVALID_RANGE_MESSAGE: &str = "Event start time must be before end time.";

/// Describe every existing booking on `resource_ids` that overlaps `candidate`.
///
/// An invalid range yields exactly one message and no resource is looked at.
/// Allocations belonging to the candidate itself (same event id) are skipped,
/// so re-checking an event being edited never reports its own prior bookings.
/// Duplicate ids in `resource_ids` are checked independently.
pub fn check_conflicts(store: &Store, candidate: &Candidate, resource_ids: &[Id]) -> Vec<String> {
    if candidate.start >= candidate.end {
        return vec![INVALID_RANGE_MESSAGE.to_string()];
    }

    let mut conflicts = Vec::new();
    for &resource_id in resource_ids {
        for alloc in store.allocations_for_resource(resource_id) {
            let Some(other) = store.event(alloc.event_id) else {
                continue;
            };
            if Some(other.id) == candidate.id {
                continue;
            }
            if overlaps(candidate.start, candidate.end, other.start, other.end) {
                let name = store
                    .resource(alloc.resource_id)
                    .map_or("?", |r| r.name.as_str());
                conflicts.push(format!(
                    "Resource '{name}' is already booked by event '{}' from {} to {}.",
                    other.title,
                    display(other.start),
                    display(other.end),
                ));
            }
        }
    }
    conflicts
}

/// Audit the whole allocation set for overlapping pairs on a shared resource.
///
/// Every unordered pair is compared once, in allocation-id order, so the
/// output is stable for unchanged data. Cost is quadratic in the number of
/// allocations; grouping by resource and sweeping by start time would report
/// the same pairs faster if data sets ever grow.
pub fn scan_conflicts(store: &Store) -> Vec<ConflictPair> {
    let allocations: Vec<&Allocation> = store.allocations().collect();
    let mut pairs = Vec::new();

    for i in 0..allocations.len() {
        for j in (i + 1)..allocations.len() {
            let (a, b) = (allocations[i], allocations[j]);
            if a.resource_id != b.resource_id {
                continue;
            }
            let (Some(first), Some(second)) = (store.event(a.event_id), store.event(b.event_id))
            else {
                continue;
            };
            if first.span().overlaps(&second.span()) {
                pairs.push(ConflictPair {
                    resource_id: a.resource_id,
                    resource_name: store
                        .resource(a.resource_id)
                        .map(|r| r.name.clone())
                        .unwrap_or_default(),
                    first: first.clone(),
                    second: second.clone(),
                });
            }
        }
    }
    pairs
}
