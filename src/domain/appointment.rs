use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    #[default]
    Pending,
    #[serde(alias = "confirmed")]
    Accepted,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A patient's booking against a slot.
///
/// `version` is bumped by the store on every successful update and is used
/// to reject concurrent check-then-set sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: u64,
    pub patient_id: u64,
    pub provider_id: u64,
    pub slot_id: Option<u64>,
    pub service_id: Option<u64>,
    pub scheduled_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub version: u64,
}

impl Appointment {
    fn transition_error(&self, to: AppointmentStatus) -> CoreError {
        CoreError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    pub fn accept(&mut self) -> Result<(), CoreError> {
        match self.status {
            AppointmentStatus::Pending => {
                self.status = AppointmentStatus::Accepted;
                Ok(())
            }
            AppointmentStatus::Accepted => Ok(()),
            _ => Err(self.transition_error(AppointmentStatus::Accepted)),
        }
    }

    /// Marks the appointment completed. Completion never happens twice.
    pub fn complete(&mut self) -> Result<(), CoreError> {
        match self.status {
            AppointmentStatus::Pending | AppointmentStatus::Accepted => {
                self.status = AppointmentStatus::Completed;
                Ok(())
            }
            AppointmentStatus::Completed => Err(CoreError::AlreadyCompleted(self.id)),
            AppointmentStatus::Cancelled => {
                Err(self.transition_error(AppointmentStatus::Completed))
            }
        }
    }

    /// Cancels the appointment and releases its slot.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        match self.status {
            AppointmentStatus::Pending | AppointmentStatus::Accepted => {
                self.status = AppointmentStatus::Cancelled;
                self.slot_id = None;
                Ok(())
            }
            _ => Err(self.transition_error(AppointmentStatus::Cancelled)),
        }
    }

    pub fn reschedule(
        &mut self,
        slot_id: u64,
        scheduled_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<(), CoreError> {
        if !matches!(
            self.status,
            AppointmentStatus::Pending | AppointmentStatus::Accepted
        ) {
            return Err(self.transition_error(self.status));
        }
        self.slot_id = Some(slot_id);
        self.scheduled_at = scheduled_at;
        if reason.is_some() {
            self.reason = reason;
        }
        Ok(())
    }
}
