//! Messages exchanged with the mobile-money gateway.
//!
//! Field names follow the gateway's JSON contract, hence the PascalCase renames.

use super::payment::PaymentOutcome;
use serde::{Deserialize, Deserializer, Serialize};

/// Everything the coordinator knows when asking for a push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub amount: u32,
    pub phone_number: String,
    pub account_reference: String,
    pub description: String,
}

/// Synchronous answer to a push request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: String,
    #[serde(default)]
    pub response_code: String,
    #[serde(default)]
    pub response_description: String,
    #[serde(default)]
    pub customer_message: String,
}

impl PushResponse {
    pub fn accepted(&self) -> bool {
        self.response_code == "0"
    }
}

/// Answer of the gateway's status query for a single push.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Final(PaymentOutcome),
    /// The customer has not acted on the prompt yet.
    InProgress,
    /// The gateway has no record of the push.
    NotFound(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: String,
    #[serde(deserialize_with = "code_from_number_or_string")]
    pub result_code: i64,
    #[serde(default)]
    pub result_desc: String,
    #[serde(default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    /// Looks up a metadata item by name; values may be numbers or strings.
    pub fn metadata(&self, name: &str) -> Option<String> {
        let item = self
            .callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)?;
        match item.value.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn outcome(&self) -> PaymentOutcome {
        if self.result_code == 0 {
            PaymentOutcome::Completed {
                receipt: self.metadata("MpesaReceiptNumber"),
                result_code: self.result_code,
                result_desc: self.result_desc.clone(),
            }
        } else {
            PaymentOutcome::Failed {
                result_code: self.result_code,
                result_desc: self.result_desc.clone(),
            }
        }
    }
}

pub(crate) fn code_from_number_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(i64),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Number(n) => Ok(n),
        Code::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Acknowledgement body returned to the gateway for every callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackAck {
    pub result_code: i64,
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            result_code: 1,
            result_desc: "Payment not found".to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            result_code: 1,
            result_desc: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_callback_extracts_receipt_by_name() {
        let payload = json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "m-1",
                "CheckoutRequestID": "c-1",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": 500},
                    {"Name": "MpesaReceiptNumber", "Value": "REC123"},
                    {"Name": "Balance"},
                    {"Name": "PhoneNumber", "Value": 254712345678u64}
                ]}
            }}
        });
        let envelope: CallbackEnvelope = serde_json::from_value(payload).unwrap();
        let callback = envelope.body.stk_callback;

        assert_eq!(callback.metadata("PhoneNumber").as_deref(), Some("254712345678"));
        assert_eq!(callback.metadata("Balance"), None);
        assert_eq!(
            callback.outcome(),
            PaymentOutcome::Completed {
                receipt: Some("REC123".into()),
                result_code: 0,
                result_desc: "The service request is processed successfully.".into(),
            }
        );
    }

    #[test]
    fn test_failure_callback_accepts_string_code() {
        let payload = json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "m-1",
                "CheckoutRequestID": "c-1",
                "ResultCode": "1032",
                "ResultDesc": "Request cancelled by user"
            }}
        });
        let envelope: CallbackEnvelope = serde_json::from_value(payload).unwrap();
        assert!(matches!(
            envelope.body.stk_callback.outcome(),
            PaymentOutcome::Failed { result_code: 1032, .. }
        ));
    }

    #[test]
    fn test_push_response_acceptance() {
        let response: PushResponse = serde_json::from_value(json!({
            "MerchantRequestID": "m-1",
            "CheckoutRequestID": "c-1",
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        }))
        .unwrap();
        assert!(response.accepted());
        assert_eq!(response.checkout_request_id, "c-1");
    }
}
