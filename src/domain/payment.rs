use super::money::{Amount, PhoneNumber};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Reversed,
    /// The push may or may not have reached the gateway.
    Unknown,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Reversed
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Reversed => "reversed",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "reversed" => Ok(Self::Reversed),
            "unknown" => Ok(Self::Unknown),
            other => Err(CoreError::validation(
                "status",
                format!("Unknown payment status `{other}`"),
            )),
        }
    }
}

/// Final result of a push as reported by the gateway, either through the
/// asynchronous callback or through a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PaymentOutcome {
    Completed {
        receipt: Option<String>,
        result_code: i64,
        result_desc: String,
    },
    Failed {
        result_code: i64,
        result_desc: String,
    },
}

/// What applying an outcome did to a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// The payment was already terminal; nothing changed.
    Unchanged,
}

/// A mobile-money transaction tied to a service and, optionally, an appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: u64,
    pub appointment_id: Option<u64>,
    pub service_id: u64,
    pub patient_id: u64,
    pub amount: Amount,
    pub phone_number: PhoneNumber,
    /// Locally generated unique reference, also sent as the account reference.
    pub transaction_ref: String,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub mpesa_receipt: Option<String>,
    pub status: PaymentStatus,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Payment {
    fn transition_error(&self, to: PaymentStatus) -> CoreError {
        CoreError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    pub fn matches(&self, merchant_request_id: &str, checkout_request_id: &str) -> bool {
        (!merchant_request_id.is_empty() && self.merchant_request_id == merchant_request_id)
            || (!checkout_request_id.is_empty() && self.checkout_request_id == checkout_request_id)
    }

    /// The gateway accepted the push and returned its correlation ids.
    pub fn mark_processing(
        &mut self,
        merchant_request_id: String,
        checkout_request_id: String,
        description: Option<String>,
    ) -> Result<(), CoreError> {
        match self.status {
            PaymentStatus::Pending | PaymentStatus::Unknown => {
                self.status = PaymentStatus::Processing;
                self.merchant_request_id = merchant_request_id;
                self.checkout_request_id = checkout_request_id;
                self.result_desc = description;
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.transition_error(PaymentStatus::Processing)),
        }
    }

    /// The gateway explicitly refused the push.
    pub fn mark_rejected(&mut self, description: String) -> Result<(), CoreError> {
        match self.status {
            PaymentStatus::Pending | PaymentStatus::Unknown => {
                self.status = PaymentStatus::Failed;
                self.result_desc = Some(description);
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.transition_error(PaymentStatus::Failed)),
        }
    }

    /// No answer came back from the gateway.
    pub fn mark_unknown(&mut self, description: String) -> Result<(), CoreError> {
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Unknown;
                self.result_desc = Some(description);
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.transition_error(PaymentStatus::Unknown)),
        }
    }

    /// Applies a final gateway outcome. Terminal payments are left untouched so
    /// a re-delivered callback cannot overwrite the receipt or the audit fields.
    pub fn apply_outcome(&mut self, outcome: &PaymentOutcome, now: DateTime<Utc>) -> Applied {
        if self.status.is_terminal() {
            return Applied::Unchanged;
        }
        match outcome {
            PaymentOutcome::Completed {
                receipt,
                result_code,
                result_desc,
            } => {
                self.status = PaymentStatus::Completed;
                self.mpesa_receipt = receipt.clone();
                self.result_code = Some(*result_code);
                self.result_desc = Some(result_desc.clone());
                self.paid_at = Some(now);
            }
            PaymentOutcome::Failed {
                result_code,
                result_desc,
            } => {
                self.status = PaymentStatus::Failed;
                self.result_code = Some(*result_code);
                self.result_desc = Some(result_desc.clone());
            }
        }
        self.updated_at = now;
        Applied::Updated
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            payment_id: self.id,
            status: self.status,
            terminal: self.status.is_terminal(),
            description: self.result_desc.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Read model returned by a status check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub payment_id: u64,
    pub status: PaymentStatus,
    pub terminal: bool,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for payment listings. The date bounds apply to `created_at` and
/// are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub patient_id: Option<u64>,
    pub appointment_id: Option<u64>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl PaymentFilter {
    pub fn validate(&self) -> Result<(), CoreError> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to)
            && to < from
        {
            return Err(CoreError::validation(
                "date_to",
                "date_to must not be before date_from",
            ));
        }
        Ok(())
    }

    pub fn matches(&self, payment: &Payment) -> bool {
        self.status.is_none_or(|s| payment.status == s)
            && self.patient_id.is_none_or(|p| payment.patient_id == p)
            && self
                .appointment_id
                .is_none_or(|a| payment.appointment_id == Some(a))
            && self.date_from.is_none_or(|from| payment.created_at >= from)
            && self.date_to.is_none_or(|to| payment.created_at <= to)
    }
}

pub const DEFAULT_PER_PAGE: usize = 15;
pub const MAX_PER_PAGE: usize = 100;

/// 1-based page selection for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default = "PageRequest::first_page")]
    pub page: usize,
    #[serde(default = "PageRequest::default_per_page")]
    pub per_page: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    fn first_page() -> usize {
        1
    }

    fn default_per_page() -> usize {
        DEFAULT_PER_PAGE
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.page == 0 {
            return Err(CoreError::validation("page", "page starts at 1"));
        }
        if !(1..=MAX_PER_PAGE).contains(&self.per_page) {
            return Err(CoreError::validation(
                "per_page",
                format!("per_page must be between 1 and {MAX_PER_PAGE}"),
            ));
        }
        Ok(())
    }

    /// Cuts one page out of `items`, which are already in listing order.
    pub fn slice<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len();
        let data = items
            .into_iter()
            .skip((self.page - 1) * self.per_page)
            .take(self.per_page)
            .collect();
        Page {
            data,
            current_page: self.page,
            per_page: self.per_page,
            total,
            last_page: total.div_ceil(self.per_page).max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub current_page: usize,
    pub per_page: usize,
    pub total: usize,
    pub last_page: usize,
}
