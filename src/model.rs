use serde::{Deserialize, Serialize};

/// Milliseconds of a naive timestamp since 1970-01-01T00:00. The only time type.
pub type Ms = i64;

/// Engine-assigned identifier. Each entity kind has its own sequence.
pub type Id = i64;

pub const MS_PER_HOUR: Ms = 3_600_000;

/// Strict overlap of `[start_a, end_a)` and `[start_b, end_b)`.
/// Ranges that only touch at a boundary do not overlap.
pub fn overlaps(start_a: Ms, end_a: Ms, start_b: Ms, end_b: Ms) -> bool {
    start_a < end_b && start_b < end_a
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn hours(&self) -> f64 {
        self.duration_ms() as f64 / MS_PER_HOUR as f64
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// Closed-interval test: touching at either edge counts.
    pub fn intersects_closed(&self, other: &Span) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Intersection with `window`, or `None` when it has zero width.
    pub fn clip(&self, window: &Span) -> Option<Span> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then(|| Span::new(start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Id,
    pub title: String,
    pub start: Ms,
    pub end: Ms,
    pub description: Option<String>,
}

impl Event {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn duration_hours(&self) -> f64 {
        self.span().hours()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Id,
    pub name: String,
    /// Free-form category, e.g. "room" or "projector".
    pub kind: String,
}

/// Join record: `resource_id` is committed to `event_id` for the event's full duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Id,
    pub event_id: Id,
    pub resource_id: Id,
}

/// A proposed event range. `id` is `None` until the event has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: Option<Id>,
    pub start: Ms,
    pub end: Ms,
}

/// A single state change. Changes are only ever logged inside a [`Txn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    EventCreated(Event),
    EventUpdated(Event),
    EventDeleted { id: Id },
    ResourceCreated(Resource),
    ResourceUpdated(Resource),
    ResourceDeleted { id: Id },
    AllocationAdded(Allocation),
    AllocationRemoved { id: Id },
    /// Next identifiers to hand out. Written by compaction so that ids
    /// of deleted records are never reused after a restart.
    Sequences {
        next_event: Id,
        next_resource: Id,
        next_allocation: Id,
    },
}

/// The WAL record format: every change in a transaction is applied or none is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txn {
    pub changes: Vec<Change>,
}

impl Txn {
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Two allocations on the same resource whose events overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPair {
    pub resource_id: Id,
    pub resource_name: String,
    pub first: Event,
    pub second: Event,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUtilisation {
    pub resource: Resource,
    /// Booked hours inside the window, rounded to 2 decimals.
    pub total_hours: f64,
    /// Contributing events starting at or after "now", by start time.
    pub upcoming: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingBooking {
    pub resource: Resource,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtilisationReport {
    /// Closed window `[start, end]`.
    pub window: Span,
    pub resources: Vec<ResourceUtilisation>,
    pub upcoming: Vec<UpcomingBooking>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInfo {
    pub event: Event,
    pub resource_ids: Vec<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dashboard {
    pub events_count: usize,
    pub resources_count: usize,
    pub next_events: Vec<Event>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn span_basics() {
        let s = Span::new(0, 2 * MS_PER_HOUR);
        assert_eq!(s.duration_ms(), 2 * MS_PER_HOUR);
        assert_eq!(s.hours(), 2.0);
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contained_overlaps() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn closed_intersection_counts_touching() {
        let a = Span::new(100, 200);
        let b = Span::new(200, 300);
        assert!(a.intersects_closed(&b));
        assert!(b.intersects_closed(&a));
        assert!(!a.intersects_closed(&Span::new(201, 300)));
    }

    #[test]
    fn clip_to_window() {
        let window = Span::new(100, 200);
        assert_eq!(Span::new(50, 150).clip(&window), Some(Span::new(100, 150)));
        assert_eq!(Span::new(150, 250).clip(&window), Some(Span::new(150, 200)));
        assert_eq!(Span::new(120, 130).clip(&window), Some(Span::new(120, 130)));
        assert_eq!(Span::new(200, 300).clip(&window), None);
        assert_eq!(Span::new(0, 100).clip(&window), None);
    }

    #[test]
    fn event_duration() {
        let e = Event {
            id: 1,
            title: "Workshop".into(),
            start: 0,
            end: 90 * 60_000,
            description: None,
        };
        assert_eq!(e.duration_hours(), 1.5);
    }

    #[test]
    fn txn_serialization_roundtrip() {
        let txn = Txn::new(vec![
            Change::ResourceCreated(Resource {
                id: 1,
                name: "Room A".into(),
                kind: "room".into(),
            }),
            Change::AllocationAdded(Allocation {
                id: 1,
                event_id: 4,
                resource_id: 1,
            }),
        ]);
        let bytes = bincode::serialize(&txn).unwrap();
        let decoded: Txn = bincode::deserialize(&bytes).unwrap();
        assert_eq!(txn, decoded);
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(
            a in -10_000i64..10_000, la in 1i64..5_000,
            b in -10_000i64..10_000, lb in 1i64..5_000,
        ) {
            prop_assert_eq!(overlaps(a, a + la, b, b + lb), overlaps(b, b + lb, a, a + la));
        }

        #[test]
        fn valid_range_overlaps_itself(start in -100_000i64..100_000, len in 1i64..100_000) {
            prop_assert!(overlaps(start, start + len, start, start + len));
        }

        #[test]
        fn touching_ranges_never_overlap(start in -100_000i64..100_000, la in 1i64..1_000, lb in 1i64..1_000) {
            let mid = start + la;
            prop_assert!(!overlaps(start, mid, mid, mid + lb));
        }
    }
}
