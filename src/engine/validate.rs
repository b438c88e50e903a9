//! Raw, string-typed input to validated drafts.
//!
//! Every problem found is reported, not just the first one, so a caller can
//! hand the whole list back alongside the values that were submitted.

use crate::datetime::{end_of_day, parse_date, parse_timestamp, start_of_day};
use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Event fields as submitted. `None` means "not submitted": a new event
/// treats it as missing, an edit keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventForm {
    pub title: Option<String>,
    /// `Some(None)` clears the description on edit.
    pub description: Option<Option<String>>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    /// Comma-separated resource ids.
    pub resources: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub title: String,
    pub description: Option<String>,
    pub start: Ms,
    pub end: Ms,
    /// In submission order; may contain duplicates.
    pub resource_ids: Vec<Id>,
}

impl EventDraft {
    pub fn candidate(&self, id: Option<Id>) -> Candidate {
        Candidate {
            id,
            start: self.start,
            end: self.end,
        }
    }

    pub fn into_event(self, id: Id) -> Event {
        Event {
            id,
            title: self.title,
            start: self.start,
            end: self.end,
            description: self.description,
        }
    }
}

impl EventForm {
    pub fn into_draft(self) -> Result<EventDraft, EngineError> {
        self.build(None)
    }

    /// Validate an edit of `current`, whose allocations point at `current_resources`.
    pub fn merge(self, current: &Event, current_resources: &[Id]) -> Result<EventDraft, EngineError> {
        self.build(Some((current, current_resources)))
    }

    fn build(self, current: Option<(&Event, &[Id])>) -> Result<EventDraft, EngineError> {
        let mut problems = Vec::new();

        let title = match self.title {
            Some(t) => t,
            None => current.map(|(e, _)| e.title.clone()).unwrap_or_default(),
        };
        if title.trim().is_empty() {
            problems.push("title is required".to_string());
        } else if title.chars().count() > MAX_TITLE_LEN {
            problems.push(format!("title exceeds {MAX_TITLE_LEN} characters"));
        }

        let start = timestamp_field(
            "start_time",
            self.start_time.as_deref(),
            current.map(|(e, _)| e.start),
            &mut problems,
        );
        let end = timestamp_field(
            "end_time",
            self.end_time.as_deref(),
            current.map(|(e, _)| e.end),
            &mut problems,
        );

        let description = match self.description {
            Some(d) => d,
            None => current.and_then(|(e, _)| e.description.clone()),
        }
        .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            problems.push(format!("description exceeds {MAX_DESCRIPTION_LEN} characters"));
        }

        let resource_ids = match self.resources {
            Some(list) => parse_id_list(&list, &mut problems),
            None => current.map(|(_, ids)| ids.to_vec()).unwrap_or_default(),
        };
        if resource_ids.len() > MAX_RESOURCES_PER_EVENT {
            problems.push(format!(
                "at most {MAX_RESOURCES_PER_EVENT} resources may be allocated to one event"
            ));
        }

        match (start, end) {
            (Some(start), Some(end)) if problems.is_empty() => Ok(EventDraft {
                title,
                description,
                start,
                end,
                resource_ids,
            }),
            _ => Err(EngineError::Invalid(problems)),
        }
    }
}

/// Range and resource list only, for a dry-run conflict check. Fields not
/// submitted fall back to `current`, as an edit would.
pub fn check_input(
    start_time: Option<&str>,
    end_time: Option<&str>,
    resources: Option<&str>,
    current: Option<(&Event, &[Id])>,
) -> Result<(Candidate, Vec<Id>), EngineError> {
    let mut problems = Vec::new();
    let start = timestamp_field(
        "start_time",
        start_time,
        current.map(|(e, _)| e.start),
        &mut problems,
    );
    let end = timestamp_field("end_time", end_time, current.map(|(e, _)| e.end), &mut problems);
    let resource_ids = match resources {
        Some(list) => parse_id_list(list, &mut problems),
        None => current.map(|(_, ids)| ids.to_vec()).unwrap_or_default(),
    };

    match (start, end) {
        (Some(start), Some(end)) if problems.is_empty() => Ok((
            Candidate {
                id: current.map(|(e, _)| e.id),
                start,
                end,
            },
            resource_ids,
        )),
        _ => Err(EngineError::Invalid(problems)),
    }
}

fn timestamp_field(
    name: &str,
    raw: Option<&str>,
    current: Option<Ms>,
    problems: &mut Vec<String>,
) -> Option<Ms> {
    match raw {
        Some("") => {
            problems.push(format!("{name} is required"));
            None
        }
        Some(value) => {
            let parsed = parse_timestamp(value);
            if parsed.is_none() {
                problems.push(format!(
                    "{name} must be formatted as YYYY-MM-DDTHH:MM, got '{value}'"
                ));
            }
            parsed
        }
        None => {
            if current.is_none() {
                problems.push(format!("{name} is required"));
            }
            current
        }
    }
}

fn parse_id_list(list: &str, problems: &mut Vec<String>) -> Vec<Id> {
    let mut ids = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<Id>() {
            Ok(id) => ids.push(id),
            Err(_) => problems.push(format!("resource id '{part}' is not an integer")),
        }
    }
    ids
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceForm {
    pub name: Option<String>,
    pub kind: Option<String>,
}

impl ResourceForm {
    pub fn into_resource(self, id: Id) -> Result<Resource, EngineError> {
        self.build(id, None)
    }

    pub fn merge(self, current: &Resource) -> Result<Resource, EngineError> {
        self.build(current.id, Some(current))
    }

    fn build(self, id: Id, current: Option<&Resource>) -> Result<Resource, EngineError> {
        let mut problems = Vec::new();
        let name = self
            .name
            .or_else(|| current.map(|r| r.name.clone()))
            .unwrap_or_default();
        let kind = self
            .kind
            .or_else(|| current.map(|r| r.kind.clone()))
            .unwrap_or_default();

        if name.trim().is_empty() {
            problems.push("resource name is required".to_string());
        } else if name.chars().count() > MAX_NAME_LEN {
            problems.push(format!("resource name exceeds {MAX_NAME_LEN} characters"));
        }
        if kind.trim().is_empty() {
            problems.push("resource type is required".to_string());
        } else if kind.chars().count() > MAX_TYPE_LEN {
            problems.push(format!("resource type exceeds {MAX_TYPE_LEN} characters"));
        }

        if problems.is_empty() {
            Ok(Resource { id, name, kind })
        } else {
            Err(EngineError::Invalid(problems))
        }
    }
}

/// Closed report window from two `YYYY-MM-DD` dates: the start date's first
/// millisecond through the end date's last.
pub fn report_window(start_date: Option<&str>, end_date: Option<&str>) -> Result<Span, EngineError> {
    let mut problems = Vec::new();
    let start = date_field("start_date", start_date, &mut problems);
    let end = date_field("end_date", end_date, &mut problems);

    let (Some(start), Some(end)) = (start, end) else {
        return Err(EngineError::Invalid(problems));
    };
    if start > end {
        return Err(EngineError::Invalid(vec![
            "start_date must not be after end_date".to_string(),
        ]));
    }
    if (end - start).num_days() >= MAX_REPORT_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("report window too wide"));
    }
    Ok(Span::new(start_of_day(start), end_of_day(end)))
}

fn date_field(name: &str, raw: Option<&str>, problems: &mut Vec<String>) -> Option<chrono::NaiveDate> {
    match raw {
        None | Some("") => {
            problems.push(format!("{name} is required"));
            None
        }
        Some(value) => {
            let parsed = parse_date(value);
            if parsed.is_none() {
                problems.push(format!("{name} must be formatted as YYYY-MM-DD, got '{value}'"));
            }
            parsed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(title: &str, start: &str, end: &str, resources: &str) -> EventForm {
        EventForm {
            title: Some(title.into()),
            description: None,
            start_time: Some(start.into()),
            end_time: Some(end.into()),
            resources: Some(resources.into()),
        }
    }

    fn problems(err: EngineError) -> Vec<String> {
        match err {
            EngineError::Invalid(p) => p,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn valid_form_builds_draft() {
        let draft = form("Review", "2025-01-01T09:00", "2025-01-01T10:00", "3, 1,3")
            .into_draft()
            .unwrap();
        assert_eq!(draft.title, "Review");
        assert_eq!(draft.resource_ids, vec![3, 1, 3]);
        assert_eq!(draft.end - draft.start, MS_PER_HOUR);
        assert_eq!(draft.description, None);
    }

    #[test]
    fn every_missing_field_is_reported() {
        let p = problems(EventForm::default().into_draft().unwrap_err());
        assert_eq!(
            p,
            vec![
                "title is required",
                "start_time is required",
                "end_time is required",
            ]
        );
    }

    #[test]
    fn malformed_values_are_reported() {
        let p = problems(
            form("x", "2025-01-01 09:00", "2025-01-01T10:00:00", "1,two")
                .into_draft()
                .unwrap_err(),
        );
        assert_eq!(p.len(), 3);
        assert!(p[0].starts_with("start_time must be formatted"));
        assert!(p[1].starts_with("end_time must be formatted"));
        assert_eq!(p[2], "resource id 'two' is not an integer");
    }

    #[test]
    fn reversed_range_is_left_to_the_conflict_check() {
        let draft = form("x", "2025-01-01T14:00", "2025-01-01T13:00", "")
            .into_draft()
            .unwrap();
        assert!(draft.start > draft.end);
        assert!(draft.resource_ids.is_empty());
    }

    #[test]
    fn merge_keeps_unsubmitted_fields() {
        let current = Event {
            id: 5,
            title: "Old".into(),
            start: 0,
            end: MS_PER_HOUR,
            description: Some("notes".into()),
        };
        let draft = EventForm {
            title: Some("New".into()),
            ..Default::default()
        }
        .merge(&current, &[2, 4])
        .unwrap();
        assert_eq!(draft.title, "New");
        assert_eq!(draft.start, 0);
        assert_eq!(draft.end, MS_PER_HOUR);
        assert_eq!(draft.description.as_deref(), Some("notes"));
        assert_eq!(draft.resource_ids, vec![2, 4]);

        let cleared = EventForm {
            description: Some(None),
            resources: Some(String::new()),
            ..Default::default()
        }
        .merge(&current, &[2, 4])
        .unwrap();
        assert_eq!(cleared.description, None);
        assert!(cleared.resource_ids.is_empty());
    }

    #[test]
    fn merge_rejects_cleared_title() {
        let current = Event {
            id: 5,
            title: "Old".into(),
            start: 0,
            end: MS_PER_HOUR,
            description: None,
        };
        let p = problems(
            EventForm {
                title: Some("  ".into()),
                start_time: Some(String::new()),
                ..Default::default()
            }
            .merge(&current, &[])
            .unwrap_err(),
        );
        assert_eq!(p, vec!["title is required", "start_time is required"]);
    }

    #[test]
    fn title_length_limit() {
        let long = "x".repeat(MAX_TITLE_LEN + 1);
        let p = problems(
            form(&long, "2025-01-01T09:00", "2025-01-01T10:00", "")
                .into_draft()
                .unwrap_err(),
        );
        assert_eq!(p, vec![format!("title exceeds {MAX_TITLE_LEN} characters")]);
    }

    #[test]
    fn resource_form_requires_both_fields() {
        let p = problems(ResourceForm::default().into_resource(1).unwrap_err());
        assert_eq!(p, vec!["resource name is required", "resource type is required"]);

        let r = ResourceForm {
            name: Some("Room A".into()),
            kind: Some("room".into()),
        }
        .into_resource(7)
        .unwrap();
        assert_eq!(r.id, 7);

        let renamed = ResourceForm {
            name: Some("Room B".into()),
            kind: None,
        }
        .merge(&r)
        .unwrap();
        assert_eq!(renamed.name, "Room B");
        assert_eq!(renamed.kind, "room");
    }

    #[test]
    fn check_input_falls_back_to_current_event() {
        let current = Event {
            id: 5,
            title: "Standup".into(),
            start: 0,
            end: MS_PER_HOUR,
            description: None,
        };
        let (candidate, ids) =
            check_input(None, Some("1970-01-01T02:00"), None, Some((&current, &[3][..]))).unwrap();
        assert_eq!(candidate.id, Some(5));
        assert_eq!(candidate.start, 0);
        assert_eq!(candidate.end, 2 * MS_PER_HOUR);
        assert_eq!(ids, vec![3]);

        let p = problems(check_input(None, None, Some("x"), None).unwrap_err());
        assert_eq!(
            p,
            vec![
                "start_time is required",
                "end_time is required",
                "resource id 'x' is not an integer",
            ]
        );
    }

    #[test]
    fn report_window_covers_whole_end_date() {
        let w = report_window(Some("2025-01-01"), Some("2025-01-01")).unwrap();
        assert_eq!(w.start, parse_timestamp("2025-01-01T00:00").unwrap());
        assert_eq!(w.end, parse_timestamp("2025-01-02T00:00").unwrap() - 1);
    }

    #[test]
    fn report_window_rejects_bad_dates() {
        let p = problems(report_window(None, Some("2025-13-01")).unwrap_err());
        assert_eq!(p.len(), 2);
        assert_eq!(p[0], "start_date is required");
        assert!(p[1].starts_with("end_date must be formatted"));

        assert!(matches!(
            report_window(Some("2025-02-01"), Some("2025-01-01")),
            Err(EngineError::Invalid(_))
        ));
        assert!(matches!(
            report_window(Some("2000-01-01"), Some("2025-01-01")),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
