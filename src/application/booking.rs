use super::schedule::ScheduleRegistry;
use crate::domain::appointment::{Appointment, AppointmentStatus};
use crate::domain::medical_record::{MedicalData, MedicalRecord};
use crate::domain::payment::{PaymentFilter, PaymentStatus};
use crate::domain::ports::{
    AppointmentStoreRef, MedicalRecordStoreRef, PaymentStoreRef, ServiceStoreRef,
};
use crate::error::{CoreError, Result};
use chrono::Utc;
use log::{debug, info, warn};

/// How many times a versioned update is retried after losing a race.
const MAX_UPDATE_ATTEMPTS: usize = 5;

/// A booking request for a specific slot.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub patient_id: u64,
    pub provider_id: u64,
    pub slot_id: u64,
    pub reason: Option<String>,
    pub service_id: Option<u64>,
}

/// Turns slot selections into appointments and drives their lifecycle.
///
/// Every check-then-set goes through a versioned store update, so two
/// concurrent writers on the same appointment can never both succeed.
#[derive(Clone)]
pub struct BookingEngine {
    schedule: ScheduleRegistry,
    appointments: AppointmentStoreRef,
    records: MedicalRecordStoreRef,
    services: ServiceStoreRef,
    payments: PaymentStoreRef,
}

impl BookingEngine {
    pub fn new(
        schedule: ScheduleRegistry,
        appointments: AppointmentStoreRef,
        records: MedicalRecordStoreRef,
        services: ServiceStoreRef,
        payments: PaymentStoreRef,
    ) -> Self {
        Self {
            schedule,
            appointments,
            records,
            services,
            payments,
        }
    }

    pub fn schedule(&self) -> &ScheduleRegistry {
        &self.schedule
    }

    /// Books a free slot. A missing, foreign or already booked slot is
    /// reported as `SlotUnavailable`.
    pub async fn book_appointment(&self, request: BookingRequest) -> Result<Appointment> {
        let _claim = self.schedule.claim_guard().await;
        let slot = match self.schedule.get_slot(request.slot_id).await {
            Ok(slot) if slot.provider_id == request.provider_id => slot,
            Ok(_) | Err(CoreError::NotFound { .. }) => {
                return Err(CoreError::SlotUnavailable(request.slot_id));
            }
            Err(e) => return Err(e),
        };

        if let Some(service_id) = request.service_id
            && self.services.get(service_id).await?.is_none()
        {
            return Err(CoreError::not_found("Service", service_id));
        }

        let appointment = Appointment {
            id: self.appointments.next_id().await?,
            patient_id: request.patient_id,
            provider_id: request.provider_id,
            slot_id: Some(slot.id),
            service_id: request.service_id,
            scheduled_at: slot.start_time,
            reason: request.reason,
            status: AppointmentStatus::Pending,
            paid: false,
            version: 0,
        };

        if let Err(e) = self.appointments.insert(appointment.clone()).await {
            warn!("Booking slot {} for patient {} failed: {e}", slot.id, request.patient_id);
            return Err(e);
        }

        info!(
            "Appointment {} booked for patient {} on slot {}",
            appointment.id, appointment.patient_id, slot.id
        );
        Ok(appointment)
    }

    pub async fn get_appointment(&self, appointment_id: u64) -> Result<Appointment> {
        self.appointments
            .get(appointment_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Appointment", appointment_id))
    }

    pub async fn list_for_provider(&self, provider_id: u64) -> Result<Vec<Appointment>> {
        let mut appointments = self.appointments.get_by_provider(provider_id).await?;
        appointments.sort_by_key(|a| (a.scheduled_at, a.id));
        Ok(appointments)
    }

    /// Re-reads, applies `change` and writes back, retrying when another
    /// writer got there first. `change` sees the fresh row on every attempt.
    async fn modify<F>(&self, appointment_id: u64, mut change: F) -> Result<Appointment>
    where
        F: FnMut(&mut Appointment) -> Result<()> + Send,
    {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let mut appointment = self.get_appointment(appointment_id).await?;
            change(&mut appointment)?;
            match self.appointments.update(appointment).await {
                Err(CoreError::VersionConflict { .. }) => {
                    debug!("Appointment {appointment_id} changed underneath us, retrying");
                }
                other => return other,
            }
        }
        Err(CoreError::VersionConflict {
            entity: "Appointment",
            id: appointment_id,
        })
    }

    pub async fn accept_appointment(&self, appointment_id: u64) -> Result<Appointment> {
        self.modify(appointment_id, |a| a.accept()).await
    }

    pub async fn cancel_appointment(&self, appointment_id: u64) -> Result<Appointment> {
        let appointment = self.modify(appointment_id, |a| a.cancel()).await?;
        info!("Appointment {appointment_id} cancelled");
        Ok(appointment)
    }

    /// Completes the appointment and creates exactly one medical record.
    ///
    /// Only the caller whose update wins the version check writes the record;
    /// every later call sees `AlreadyCompleted`.
    pub async fn complete_appointment(
        &self,
        appointment_id: u64,
        medical_data: MedicalData,
    ) -> Result<(Appointment, MedicalRecord)> {
        let appointment = self.modify(appointment_id, |a| a.complete()).await?;

        let record = MedicalRecord {
            id: self.records.next_id().await?,
            patient_id: appointment.patient_id,
            doctor_id: appointment.provider_id,
            appointment_id: appointment.id,
            data: medical_data,
            created_at: Utc::now(),
        };
        self.records.insert(record.clone()).await?;

        info!(
            "Appointment {} completed, medical record {} created",
            appointment.id, record.id
        );
        Ok((appointment, record))
    }

    /// Moves the appointment to another slot of the same provider. The new
    /// slot's exclusivity is checked atomically by the store.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: u64,
        new_slot_id: u64,
        reason: Option<String>,
    ) -> Result<Appointment> {
        let _claim = self.schedule.claim_guard().await;
        let current = self.get_appointment(appointment_id).await?;
        let slot = match self.schedule.get_slot(new_slot_id).await {
            Ok(slot) if slot.provider_id == current.provider_id => slot,
            Ok(_) | Err(CoreError::NotFound { .. }) => {
                return Err(CoreError::SlotUnavailable(new_slot_id));
            }
            Err(e) => return Err(e),
        };

        let appointment = self
            .modify(appointment_id, |a| {
                a.reschedule(slot.id, slot.start_time, reason.clone())
            })
            .await?;
        info!("Appointment {appointment_id} moved to slot {new_slot_id}");
        Ok(appointment)
    }

    /// Flags the appointment as paid once a completed payment references it.
    pub async fn mark_paid(&self, appointment_id: u64) -> Result<Appointment> {
        let filter = PaymentFilter {
            status: Some(PaymentStatus::Completed),
            appointment_id: Some(appointment_id),
            ..Default::default()
        };
        if self.payments.get_all(&filter).await?.is_empty() {
            return Err(CoreError::InvalidTransition {
                from: "unpaid".to_string(),
                to: "paid".to_string(),
            });
        }

        self.modify(appointment_id, |a| {
            if a.status == AppointmentStatus::Cancelled {
                return Err(CoreError::InvalidTransition {
                    from: a.status.to_string(),
                    to: "paid".to_string(),
                });
            }
            a.paid = true;
            Ok(())
        })
        .await
    }

    pub async fn medical_records(&self, appointment_id: u64) -> Result<Vec<MedicalRecord>> {
        self.records.get_by_appointment(appointment_id).await
    }
}
