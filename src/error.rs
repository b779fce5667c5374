use thiserror::Error;

/// Failure reported by the payment gateway integration.
///
/// `ambiguous` is set when no answer was received from the gateway, so the
/// push may or may not have been delivered.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Gateway error: {message}")]
pub struct GatewayError {
    pub message: String,
    pub ambiguous: bool,
}

impl GatewayError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ambiguous: false,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ambiguous: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation error on `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("Slot {0} is not available")]
    SlotUnavailable(u64),
    #[error("Appointment {0} is already completed")]
    AlreadyCompleted(u64),
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Concurrent update on {entity} {id}")]
    VersionConflict { entity: &'static str, id: u64 },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("Payment {payment_id} was not initiated: {source}")]
    PaymentNotInitiated {
        payment_id: u64,
        #[source]
        source: GatewayError,
    },
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl CoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True for errors the caller resolves by re-reading state and resubmitting.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::SlotUnavailable(_)
                | Self::AlreadyCompleted(_)
                | Self::InvalidTransition { .. }
                | Self::VersionConflict { .. }
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for CoreError {
    fn from(e: rocksdb::Error) -> Self {
        Self::InternalError(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
