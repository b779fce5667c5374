use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bookable time window offered by a provider.
///
/// A slot stays available until a live appointment references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: u64,
    pub provider_id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Slot {
    pub fn new(
        id: u64,
        provider_id: u64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<Self, CoreError> {
        let slot = Self {
            id,
            provider_id,
            start_time,
            end_time,
            notes,
        };
        slot.validate()?;
        Ok(slot)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.end_time <= self.start_time {
            return Err(CoreError::validation(
                "end_time",
                "end_time must be after start_time",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_slot_requires_positive_window() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();

        assert!(Slot::new(1, 5, start, end, None).is_ok());
        assert!(matches!(
            Slot::new(1, 5, start, start, None),
            Err(CoreError::Validation { .. })
        ));
        assert!(Slot::new(1, 5, end, start, None).is_err());
    }
}
