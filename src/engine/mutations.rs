use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::admission::{check_admission, check_transition, validate_capacity, validate_user, validate_window};
use super::{BookingEngine, EngineError};

impl BookingEngine {
    pub async fn create(
        &self,
        category: Category,
        date: SlotDate,
        start_time: SlotTime,
        end_time: SlotTime,
        capacity: u32,
    ) -> Result<Timeslot, EngineError> {
        self.run_detached("create", move |engine| async move {
            validate_window(start_time, end_time)?;
            validate_capacity(capacity)?;
            let _creating = engine.creates.lock().await;
            if engine.repo.count().await? >= engine.max_timeslots {
                return Err(EngineError::LimitExceeded("too many timeslots"));
            }

            let slot = Timeslot::new(Ulid::new(), category, date, start_time, end_time, capacity);
            let slot = engine.repo.put(slot, None).await?;
            info!(
                "timeslot {} created: {} {} {}-{}, {} seats",
                slot.id, slot.category, slot.date, slot.start_time, slot.end_time, slot.capacity
            );
            Ok(slot)
        })
        .await
    }

    pub async fn book(&self, id: Ulid, user_id: &str) -> Result<Timeslot, EngineError> {
        let user_id = user_id.to_string();
        self.run_detached("book", move |engine| async move {
            validate_user(&user_id)?;
            let permit = engine.guard.acquire(id).await;
            let mut slot = engine.load(&permit).await?;

            if let Err(e) = check_admission(&slot, &user_id, engine.clock.now()) {
                debug!("booking rejected for {user_id} on {id}: {e}");
                return Err(e);
            }

            slot.booked_by.push(user_id.clone());
            let slot = engine.commit(&permit, slot).await?;
            metrics::counter!(crate::observability::SEATS_BOOKED_TOTAL).increment(1);
            debug!("{user_id} booked {id}, {} seats left", slot.seats_left());

            engine.emit(DomainEvent::BookingCreated { slot_id: id, user_id });
            Ok(slot)
        })
        .await
    }

    /// Release a held seat. Allowed in any status, including cancelled and ended slots.
    pub async fn unbook(&self, id: Ulid, user_id: &str) -> Result<Timeslot, EngineError> {
        let user_id = user_id.to_string();
        self.run_detached("unbook", move |engine| async move {
            let permit = engine.guard.acquire(id).await;
            let mut slot = engine.load(&permit).await?;

            if !slot.holds_seat(&user_id) {
                return Err(EngineError::NotBooked { id, user_id });
            }
            slot.booked_by.retain(|u| *u != user_id);
            let slot = engine.commit(&permit, slot).await?;
            debug!("{user_id} released seat on {id}, {} seats left", slot.seats_left());
            Ok(slot)
        })
        .await
    }

    /// Mark a slot cancelled. Participants stay recorded so they can be told.
    pub async fn cancel(&self, id: Ulid) -> Result<Timeslot, EngineError> {
        self.run_detached("cancel", move |engine| async move {
            let permit = engine.guard.acquire(id).await;
            let mut slot = engine.load(&permit).await?;
            check_transition(&slot, Status::Cancelled)?;

            slot.status = Status::Cancelled;
            let slot = engine.commit(&permit, slot).await?;
            info!("timeslot {id} cancelled, {} participants to notify", slot.booked_by.len());

            engine.emit(DomainEvent::SlotCancelled {
                slot_id: id,
                participants: slot.booked_by.clone(),
            });
            Ok(slot)
        })
        .await
    }

    /// Move a slot to a new date/time in place. Bookings carry over and the
    /// status stays `Rescheduled` from then on.
    pub async fn reschedule(
        &self,
        id: Ulid,
        new_date: SlotDate,
        new_start: SlotTime,
        new_end: SlotTime,
    ) -> Result<Timeslot, EngineError> {
        self.run_detached("reschedule", move |engine| async move {
            validate_window(new_start, new_end)?;
            let permit = engine.guard.acquire(id).await;
            let mut slot = engine.load(&permit).await?;
            check_transition(&slot, Status::Rescheduled)?;

            slot.date = new_date;
            slot.start_time = new_start;
            slot.end_time = new_end;
            slot.status = Status::Rescheduled;
            let slot = engine.commit(&permit, slot).await?;
            info!(
                "timeslot {id} rescheduled to {new_date} {new_start}-{new_end}, {} participants to notify",
                slot.booked_by.len()
            );

            engine.emit(DomainEvent::SlotRescheduled {
                slot_id: id,
                participants: slot.booked_by.clone(),
                new_date,
                new_start,
                new_end,
            });
            Ok(slot)
        })
        .await
    }

    /// Hard-delete a slot. Emits nothing.
    pub async fn delete(&self, id: Ulid) -> Result<(), EngineError> {
        self.run_detached("delete", move |engine| async move {
            let _permit = engine.guard.acquire(id).await;
            let removed = engine.repo.remove(&id).await?.ok_or(EngineError::NotFound(id))?;
            engine.sink.slot_removed(id);
            info!("timeslot {id} deleted with {} seats held", removed.booked_by.len());
            Ok(())
        })
        .await
    }
}
