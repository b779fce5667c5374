use crate::error::CoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde::{Deserialize, Serialize};

/// JSON body of every non-2xx API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Set when a payment row was created but the gateway push did not succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<u64>,
}

/// Maps a [`CoreError`] to an HTTP status and an [`ErrorBody`].
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_conflict() => StatusCode::CONFLICT,
            CoreError::Gateway(_) | CoreError::PaymentNotInitiated { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.0 {
            CoreError::Validation { field, message } => ErrorBody {
                error: message.clone(),
                field: Some(field.clone()),
                payment_id: None,
            },
            CoreError::PaymentNotInitiated { payment_id, .. } => ErrorBody {
                error: self.0.to_string(),
                field: None,
                payment_id: Some(*payment_id),
            },
            e if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!("Request failed: {e}");
                ErrorBody {
                    error: "Internal server error".to_string(),
                    field: None,
                    payment_id: None,
                }
            }
            e => ErrorBody {
                error: e.to_string(),
                field: None,
                payment_id: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
