use ulid::Ulid;

use crate::model::{ParseError, Status};
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Ulid),
    InvalidState { id: Ulid, status: Status },
    EventEnded(Ulid),
    AlreadyBooked { id: Ulid, user_id: String },
    NotBooked { id: Ulid, user_id: String },
    Full { id: Ulid, capacity: u32 },
    LimitExceeded(&'static str),
    Storage(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::NotFound(id) => write!(f, "timeslot not found: {id}"),
            EngineError::InvalidState { id, status } => {
                write!(f, "timeslot {id} is {status}")
            }
            EngineError::EventEnded(id) => write!(f, "event has ended: {id}"),
            EngineError::AlreadyBooked { id, user_id } => {
                write!(f, "{user_id} already holds a seat on {id}")
            }
            EngineError::NotBooked { id, user_id } => {
                write!(f, "{user_id} holds no seat on {id}")
            }
            EngineError::Full { id, capacity } => {
                write!(f, "timeslot {id} is full: all {capacity} seats taken")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Storage(e)
    }
}

impl From<ParseError> for EngineError {
    fn from(e: ParseError) -> Self {
        EngineError::Validation(e.to_string())
    }
}
