use crate::domain::ports::{AppointmentStoreRef, SlotStoreRef};
use crate::domain::slot::Slot;
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use log::info;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

/// Holds bookable slots per provider and answers availability queries.
///
/// Bookings claim a slot under a shared guard. Deleting or rewriting a slot
/// takes the guard exclusively, so the "not booked" check and the write can't
/// interleave with a booking.
#[derive(Clone)]
pub struct ScheduleRegistry {
    slots: SlotStoreRef,
    appointments: AppointmentStoreRef,
    slot_guard: Arc<RwLock<()>>,
}

impl ScheduleRegistry {
    pub fn new(slots: SlotStoreRef, appointments: AppointmentStoreRef) -> Self {
        Self {
            slots,
            appointments,
            slot_guard: Arc::new(RwLock::new(())),
        }
    }

    /// Held while a booking or reschedule links an appointment to a slot.
    pub(crate) async fn claim_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.slot_guard.read().await
    }

    /// Slots of `provider_id` that no live appointment references, earliest first.
    pub async fn list_available_slots(&self, provider_id: u64) -> Result<Vec<Slot>> {
        let mut available = Vec::new();
        for slot in self.slots.get_by_provider(provider_id).await? {
            if self.appointments.find_by_slot(slot.id).await?.is_none() {
                available.push(slot);
            }
        }
        available.sort_by_key(|s| (s.start_time, s.id));
        Ok(available)
    }

    pub async fn get_slot(&self, slot_id: u64) -> Result<Slot> {
        self.slots
            .get(slot_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Slot", slot_id))
    }

    pub async fn create_slot(
        &self,
        provider_id: u64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<Slot> {
        let candidate = Slot {
            id: 0,
            provider_id,
            start_time,
            end_time,
            notes,
        };
        candidate.validate()?;
        let slot = Slot {
            id: self.slots.next_id().await?,
            ..candidate
        };
        self.slots.store(slot.clone()).await?;
        info!("Slot {} created for provider {}", slot.id, provider_id);
        Ok(slot)
    }

    /// Inserts or replaces a slot by id. Used for idempotent seeding.
    ///
    /// A booked slot keeps its provider and times; rewriting them fails with
    /// `SlotUnavailable`.
    pub async fn upsert_slot(&self, slot: Slot) -> Result<()> {
        slot.validate()?;
        let _exclusive = self.slot_guard.write().await;
        if let Some(existing) = self.slots.get(slot.id).await?
            && (existing.provider_id, existing.start_time, existing.end_time)
                != (slot.provider_id, slot.start_time, slot.end_time)
            && self.appointments.find_by_slot(slot.id).await?.is_some()
        {
            return Err(CoreError::SlotUnavailable(slot.id));
        }
        self.slots.store(slot).await
    }

    /// Deletes a slot. A slot held by a live appointment cannot be deleted.
    pub async fn delete_slot(&self, slot_id: u64) -> Result<()> {
        let _exclusive = self.slot_guard.write().await;
        if self.appointments.find_by_slot(slot_id).await?.is_some() {
            return Err(CoreError::SlotUnavailable(slot_id));
        }
        if !self.slots.delete(slot_id).await? {
            return Err(CoreError::not_found("Slot", slot_id));
        }
        info!("Slot {slot_id} deleted");
        Ok(())
    }
}
