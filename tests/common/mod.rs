#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use medibook::application::Clinic;
use medibook::domain::gateway::{PushRequest, PushResponse, QueryResult};
use medibook::domain::money::Amount;
use medibook::domain::ports::PaymentGateway;
use medibook::domain::service::Service;
use medibook::domain::slot::Slot;
use medibook::error::GatewayError;
use medibook::infrastructure::Stores;
use rand::Rng;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const PROVIDER: u64 = 5;
pub const PATIENT: u64 = 42;
pub const SERVICE: u64 = 1;
pub const PHONE: &str = "0712345678";

/// How the stub answers the next push.
#[derive(Debug, Clone)]
pub enum PushBehaviour {
    Accept,
    Reject(String),
    Transport,
}

/// In-process gateway with scripted answers. Accepted pushes get the ids
/// `mr-<n>` / `ws_CO_<n>`, counting from 1.
pub struct StubGateway {
    behaviour: Mutex<PushBehaviour>,
    queries: Mutex<VecDeque<Result<QueryResult, GatewayError>>>,
    counter: AtomicU64,
    pub pushes: Mutex<Vec<PushRequest>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            behaviour: Mutex::new(PushBehaviour::Accept),
            queries: Mutex::new(VecDeque::new()),
            counter: AtomicU64::new(0),
            pushes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behaviour(&self, behaviour: PushBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn queue_query(&self, answer: Result<QueryResult, GatewayError>) {
        self.queries.lock().unwrap().push_back(answer);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }
}

pub fn merchant_id(n: u64) -> String {
    format!("mr-{n}")
}

pub fn checkout_id(n: u64) -> String {
    format!("ws_CO_{n}")
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, GatewayError> {
        self.pushes.lock().unwrap().push(request.clone());
        let behaviour = self.behaviour.lock().unwrap().clone();
        match behaviour {
            PushBehaviour::Accept => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(PushResponse {
                    merchant_request_id: merchant_id(n),
                    checkout_request_id: checkout_id(n),
                    response_code: "0".to_string(),
                    response_description: "Success. Request accepted for processing".to_string(),
                    customer_message: "Success. Request accepted for processing".to_string(),
                })
            }
            PushBehaviour::Reject(message) => Err(GatewayError::rejected(message)),
            PushBehaviour::Transport => Err(GatewayError::transport("connection reset")),
        }
    }

    async fn query(&self, _checkout_request_id: &str) -> Result<QueryResult, GatewayError> {
        self.queries
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(QueryResult::InProgress))
    }
}

pub struct Harness {
    pub clinic: Clinic,
    pub gateway: Arc<StubGateway>,
}

pub fn slot_start(index: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(30 * index)
}

/// A clinic over in-memory stores with service 1 (KES 500) and three
/// half-hour slots (ids 1..=3) for provider 5.
pub async fn harness() -> Harness {
    let gateway = Arc::new(StubGateway::new());
    let clinic = Clinic::new(Stores::in_memory(), gateway.clone());

    clinic
        .stores
        .services
        .store(Service {
            id: SERVICE,
            name: "Consultation".to_string(),
            price: Amount::new(dec!(500)).unwrap(),
        })
        .await
        .unwrap();

    for id in 1..=3u64 {
        let start = slot_start(id as i64 - 1);
        let slot = Slot::new(id, PROVIDER, start, start + Duration::minutes(30), None).unwrap();
        clinic.schedule.upsert_slot(slot).await.unwrap();
    }

    Harness { clinic, gateway }
}

/// Gateway callback body in the Daraja shape.
pub fn callback(merchant: &str, checkout: &str, result_code: i64, receipt: Option<&str>) -> Value {
    let desc = if result_code == 0 {
        "The service request is processed successfully."
    } else {
        "Request cancelled by user"
    };
    let mut stk = json!({
        "MerchantRequestID": merchant,
        "CheckoutRequestID": checkout,
        "ResultCode": result_code,
        "ResultDesc": desc,
    });
    if let Some(receipt) = receipt {
        stk["CallbackMetadata"] = json!({
            "Item": [
                { "Name": "Amount", "Value": 500 },
                { "Name": "MpesaReceiptNumber", "Value": receipt },
                { "Name": "TransactionDate", "Value": 20250301091500u64 },
                { "Name": "PhoneNumber", "Value": 254712345678u64 }
            ]
        });
    }
    json!({ "Body": { "stkCallback": stk } })
}

/// Writes `rows` slots for `providers` random providers, back to back.
pub fn generate_slots_csv(path: &Path, rows: usize, providers: u64) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    let mut rng = rand::thread_rng();

    wtr.write_record(["id", "provider_id", "start_time", "end_time", "notes"])?;
    for i in 1..=rows {
        let provider = rng.gen_range(1..=providers);
        let start = slot_start(i as i64);
        wtr.write_record([
            i.to_string(),
            provider.to_string(),
            start.to_rfc3339(),
            (start + Duration::minutes(30)).to_rfc3339(),
            String::new(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
