use super::error::ErrorBody;
use super::{InitiatePayment, InitiatedPayment};
use crate::application::payments::PaymentRequest;
use crate::application::reconciliation::{CheckoutApi, StatusSource};
use crate::domain::payment::StatusReport;
use crate::error::{CoreError, GatewayError, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Talks to a running `serve` instance. Used by the `pay` command to drive a
/// checkout from the outside, the way the dashboard does.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::InternalError(Box::new(e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decodes a success body, or turns an error body back into a [`CoreError`].
    async fn decode<T: DeserializeOwned>(
        response: Response,
        entity: &'static str,
        id: u64,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| CoreError::InternalError(Box::new(e)));
        }

        let body: ErrorBody = response.json().await.unwrap_or_else(|_| ErrorBody {
            error: format!("Server responded with {status}"),
            field: None,
            payment_id: None,
        });
        debug!("API error {status}: {}", body.error);
        Err(match status {
            StatusCode::NOT_FOUND => CoreError::not_found(entity, id),
            StatusCode::UNPROCESSABLE_ENTITY => {
                CoreError::validation(body.field.unwrap_or_default(), body.error)
            }
            StatusCode::CONFLICT => CoreError::InvalidTransition {
                from: entity.to_string(),
                to: body.error,
            },
            StatusCode::BAD_GATEWAY => match body.payment_id {
                Some(payment_id) => CoreError::PaymentNotInitiated {
                    payment_id,
                    source: GatewayError::rejected(body.error),
                },
                None => GatewayError::rejected(body.error).into(),
            },
            _ => CoreError::InternalError(body.error.into()),
        })
    }

    fn transport(e: reqwest::Error) -> CoreError {
        CoreError::InternalError(Box::new(e))
    }
}

#[async_trait]
impl StatusSource for ApiClient {
    async fn check_status(&self, payment_id: u64) -> Result<StatusReport> {
        let response = self
            .client
            .get(self.url(&format!("/payments/status/{payment_id}")))
            .send()
            .await
            .map_err(Self::transport)?;
        Self::decode(response, "Payment", payment_id).await
    }
}

#[async_trait]
impl CheckoutApi for ApiClient {
    async fn initiate(&self, request: PaymentRequest) -> Result<u64> {
        let service_id = request.service_id;
        let response = self
            .client
            .post(self.url("/payments/mpesa"))
            .json(&InitiatePayment::from(request))
            .send()
            .await
            .map_err(Self::transport)?;
        let initiated: InitiatedPayment = Self::decode(response, "Service", service_id).await?;
        if !initiated.customer_message.is_empty() {
            info!("{}", initiated.customer_message);
        }
        Ok(initiated.payment_id)
    }

    async fn mark_paid(&self, appointment_id: u64) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/appointments/{appointment_id}/paid")))
            .send()
            .await
            .map_err(Self::transport)?;
        Self::decode::<serde_json::Value>(response, "Appointment", appointment_id)
            .await
            .map(|_| ())
    }
}
