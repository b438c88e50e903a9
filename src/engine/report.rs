use crate::model::*;

use super::store::Store;

/// Booked hours per resource inside the closed `window`, plus upcoming bookings.
///
/// An event contributes when it touches the window at all (closed bounds);
/// its hours are clipped to the window, so an event ending exactly at
/// `window.start` contributes zero. Contributing events starting at or after
/// `now` are listed as upcoming.
pub fn utilisation_report(store: &Store, window: Span, now: Ms) -> UtilisationReport {
    let mut resources = Vec::with_capacity(store.resource_count());

    for resource in store.resources() {
        let mut total_ms: Ms = 0;
        let mut upcoming = Vec::new();

        for alloc in store.allocations_for_resource(resource.id) {
            let Some(event) = store.event(alloc.event_id) else {
                continue;
            };
            let span = event.span();
            if !span.intersects_closed(&window) {
                continue;
            }
            if let Some(clipped) = span.clip(&window) {
                total_ms += clipped.duration_ms();
            }
            if event.start >= now {
                upcoming.push(event.clone());
            }
        }

        upcoming.sort_by_key(|e| e.start);
        resources.push(ResourceUtilisation {
            resource: resource.clone(),
            total_hours: round_hours(total_ms),
            upcoming,
        });
    }

    let upcoming = resources
        .iter()
        .flat_map(|r| {
            r.upcoming.iter().map(|event| UpcomingBooking {
                resource: r.resource.clone(),
                event: event.clone(),
            })
        })
        .collect();

    UtilisationReport {
        window,
        resources,
        upcoming,
    }
}

/// Milliseconds to hours, rounded to 2 decimals.
pub fn round_hours(ms: Ms) -> f64 {
    let hours = ms as f64 / MS_PER_HOUR as f64;
    (hours * 100.0).round() / 100.0
}
