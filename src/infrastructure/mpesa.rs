use crate::config::MpesaConfig;
use crate::domain::gateway::{PushRequest, PushResponse, QueryResult, code_from_number_or_string};
use crate::domain::payment::PaymentOutcome;
use crate::domain::ports::PaymentGateway;
use crate::error::{CoreError, GatewayError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{TimeDelta, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Error code the query endpoint returns while the customer has not answered.
const QUERY_IN_PROGRESS: &str = "500.001.1001";
/// Error code for an unknown CheckoutRequestID.
const QUERY_INVALID_ID: &str = "400.002.02";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: u32,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryResponse {
    #[serde(deserialize_with = "code_from_number_or_string")]
    result_code: i64,
    #[serde(default)]
    result_desc: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

impl ApiErrorBody {
    /// Whether the gateway itself answered with an error, as opposed to a
    /// proxy or load balancer in front of it.
    fn is_gateway_error(&self) -> bool {
        !self.error_code.is_empty() || !self.error_message.is_empty()
    }

    fn message(&self) -> &str {
        if self.error_message.is_empty() {
            &self.error_code
        } else {
            &self.error_message
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

/// HTTP client for the Daraja STK push and STK query endpoints.
pub struct MpesaGateway {
    client: reqwest::Client,
    config: MpesaConfig,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CoreError::InternalError(Box::new(e)))?;
        Ok(Self { client, config })
    }

    /// `YYYYMMDDHHmmss` in East Africa Time, as the gateway expects.
    fn timestamp() -> String {
        (Utc::now() + TimeDelta::hours(3))
            .format("%Y%m%d%H%M%S")
            .to_string()
    }

    pub fn password(&self, timestamp: &str) -> String {
        STANDARD.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ))
    }

    /// Fetches an OAuth token. Failing here means nothing was pushed, so the
    /// error is never ambiguous.
    async fn access_token(&self) -> Result<String, GatewayError> {
        let response = self
            .client
            .get(&self.config.auth_url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| GatewayError::rejected(format!("Failed to generate M-Pesa access token: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::rejected(format!(
                "Failed to generate M-Pesa access token: HTTP {}",
                response.status()
            )));
        }

        let token: AccessToken = response
            .json()
            .await
            .map_err(|e| GatewayError::rejected(format!("Malformed access token response: {e}")))?;
        Ok(token.access_token)
    }

    async fn error_body(response: reqwest::Response) -> ApiErrorBody {
        response.json::<ApiErrorBody>().await.unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = Self::timestamp();
        let body = StkPushBody {
            business_short_code: &self.config.shortcode,
            password: self.password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: request.amount,
            party_a: &request.phone_number,
            party_b: &self.config.shortcode,
            phone_number: &request.phone_number,
            callback_url: &self.config.callback_url,
            account_reference: &request.account_reference,
            transaction_desc: &request.description,
        };

        debug!("STK push for {} ({})", request.phone_number, request.account_reference);

        // Once the request has left, silence from the gateway is ambiguous.
        let response = self
            .client
            .post(&self.config.stk_url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::transport(format!("M-Pesa request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = Self::error_body(response).await;
            if status.is_client_error() && error.is_gateway_error() {
                warn!("STK push rejected: {}", error.message());
                return Err(GatewayError::rejected(error.message()));
            }
            // 5xx or an unrecognised body: the push may still reach the payer.
            let message = format!("M-Pesa push answered HTTP {status}");
            warn!("{message}, outcome unknown");
            return Err(GatewayError::transport(message));
        }

        response
            .json::<PushResponse>()
            .await
            .map_err(|e| GatewayError::transport(format!("Unreadable M-Pesa response: {e}")))
    }

    async fn query(&self, checkout_request_id: &str) -> Result<QueryResult, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = Self::timestamp();
        let body = StkQueryBody {
            business_short_code: &self.config.shortcode,
            password: self.password(&timestamp),
            timestamp,
            checkout_request_id,
        };

        let response = self
            .client
            .post(&self.config.query_url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::transport(format!("M-Pesa query failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = Self::error_body(response).await;
            return match error.error_code.as_str() {
                QUERY_IN_PROGRESS => Ok(QueryResult::InProgress),
                QUERY_INVALID_ID => Ok(QueryResult::NotFound(error.error_message)),
                _ if status.is_client_error() && error.is_gateway_error() => {
                    Err(GatewayError::rejected(error.message()))
                }
                _ => Err(GatewayError::transport(format!(
                    "M-Pesa query answered HTTP {status}"
                ))),
            };
        }

        let answer: StkQueryResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::transport(format!("Unreadable M-Pesa query response: {e}")))?;

        let outcome = if answer.result_code == 0 {
            PaymentOutcome::Completed {
                receipt: None,
                result_code: answer.result_code,
                result_desc: answer.result_desc,
            }
        } else {
            PaymentOutcome::Failed {
                result_code: answer.result_code,
                result_desc: answer.result_desc,
            }
        };
        Ok(QueryResult::Final(outcome))
    }
}
