use crate::model::{Id, Ms};

use crate::datetime::display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Event,
    Resource,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Event => f.write_str("event"),
            EntityKind::Resource => f.write_str("resource"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound { kind: EntityKind, id: Id },
    /// Missing or malformed input; one message per problem.
    Invalid(Vec<String>),
    InvalidRange { start: Ms, end: Ms },
    /// One message per conflicting allocation.
    Conflicts(Vec<String>),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Every user-facing reason carried by this error.
    pub fn messages(&self) -> Vec<String> {
        match self {
            EngineError::Invalid(msgs) | EngineError::Conflicts(msgs) => msgs.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            EngineError::Invalid(msgs) => write!(f, "invalid input: {}", msgs.join("; ")),
            EngineError::InvalidRange { start, end } => write!(
                f,
                "event start time must be before end time ({} >= {})",
                display(*start),
                display(*end)
            ),
            EngineError::Conflicts(msgs) => write!(f, "booking conflict: {}", msgs.join(" ")),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
