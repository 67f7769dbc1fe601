use chrono::NaiveDateTime;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_window(start: SlotTime, end: SlotTime) -> Result<(), EngineError> {
    if start >= end {
        return Err(EngineError::Validation(format!(
            "start_time {start} must be before end_time {end}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_capacity(capacity: u32) -> Result<(), EngineError> {
    if capacity == 0 {
        return Err(EngineError::Validation("capacity must be at least 1".into()));
    }
    if capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    Ok(())
}

pub(crate) fn validate_user(user_id: &str) -> Result<(), EngineError> {
    if user_id.trim().is_empty() {
        return Err(EngineError::Validation("user id must not be empty".into()));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id too long"));
    }
    Ok(())
}

/// Booking preconditions after the slot is known to exist. The first
/// failing check decides the error.
pub(crate) fn check_admission(
    slot: &Timeslot,
    user_id: &str,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    if !slot.status.is_bookable() {
        return Err(EngineError::InvalidState {
            id: slot.id,
            status: slot.status,
        });
    }
    if slot.ends_at() < now {
        return Err(EngineError::EventEnded(slot.id));
    }
    if slot.holds_seat(user_id) {
        return Err(EngineError::AlreadyBooked {
            id: slot.id,
            user_id: user_id.to_string(),
        });
    }
    if slot.booked_by.len() >= slot.capacity as usize {
        return Err(EngineError::Full {
            id: slot.id,
            capacity: slot.capacity,
        });
    }
    Ok(())
}

pub(crate) fn check_transition(slot: &Timeslot, next: Status) -> Result<(), EngineError> {
    if !slot.status.can_transition_to(next) {
        return Err(EngineError::InvalidState {
            id: slot.id,
            status: slot.status,
        });
    }
    Ok(())
}
