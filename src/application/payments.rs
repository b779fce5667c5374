use crate::domain::appointment::AppointmentStatus;
use crate::domain::gateway::{CallbackAck, CallbackEnvelope, PushRequest, PushResponse, QueryResult};
use crate::domain::money::PhoneNumber;
use crate::domain::payment::{
    Applied, Page, PageRequest, Payment, PaymentFilter, PaymentOutcome, PaymentStatus,
    StatusReport,
};
use crate::domain::ports::{
    AppointmentStoreRef, PaymentGatewayRef, PaymentStoreRef, ServiceStoreRef,
};
use crate::error::{CoreError, GatewayError, Result};
use chrono::{TimeDelta, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// How many times a versioned payment update is retried after losing a race.
const MAX_UPDATE_ATTEMPTS: usize = 5;
/// Upper bound on callbacks held for payments that have not recorded their ids yet.
const MAX_PARKED_CALLBACKS: usize = 1024;
/// How long a parked callback waits for its payment to record the gateway ids.
/// Longer than the push timeout, since the callback can beat the push response.
const PARKED_CALLBACK_TTL: Duration = Duration::from_secs(120);
/// Result code recorded when the gateway reports it never saw a push.
pub const RESULT_UNKNOWN_AT_GATEWAY: i64 = -1;
/// Number of entries returned by [`PaymentCoordinator::recent_payments`].
const RECENT_PAYMENTS: usize = 5;

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub service_id: u64,
    pub patient_id: u64,
    pub phone_number: String,
    pub appointment_id: Option<u64>,
}

/// A payment the gateway accepted, with the gateway's synchronous answer.
#[derive(Debug, Clone)]
pub struct Initiation {
    pub payment: Payment,
    pub response: PushResponse,
}

/// Counters reported by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub resolved: usize,
    pub in_progress: usize,
    pub needs_review: usize,
    pub errors: usize,
}

/// A callback that arrived before its payment stored the gateway's ids.
#[derive(Debug, Clone)]
struct ParkedCallback {
    outcome: PaymentOutcome,
    parked_at: Instant,
    seq: u64,
}

impl ParkedCallback {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.parked_at) < PARKED_CALLBACK_TTL
    }
}

/// Callbacks waiting for their payment, keyed by merchant and checkout id.
///
/// Expired entries are dropped before every insert. When the map is still
/// full the oldest entry makes room, so unmatched callbacks can never lock
/// out a genuine early one.
#[derive(Debug, Default)]
struct ParkedCallbacks {
    entries: HashMap<String, ParkedCallback>,
    next_seq: u64,
}

impl ParkedCallbacks {
    fn park(&mut self, keys: [&str; 2], outcome: &PaymentOutcome) {
        let now = Instant::now();
        self.entries.retain(|_, parked| parked.is_fresh(now));

        for key in keys.into_iter().filter(|k| !k.is_empty()) {
            if !self.entries.contains_key(key) {
                while self.entries.len() >= MAX_PARKED_CALLBACKS {
                    let Some(oldest) = self
                        .entries
                        .iter()
                        .min_by_key(|(_, parked)| parked.seq)
                        .map(|(key, _)| key.clone())
                    else {
                        break;
                    };
                    debug!("Evicting parked callback {oldest}");
                    self.entries.remove(&oldest);
                }
            }
            self.next_seq += 1;
            self.entries.insert(
                key.to_string(),
                ParkedCallback {
                    outcome: outcome.clone(),
                    parked_at: now,
                    seq: self.next_seq,
                },
            );
        }
    }

    /// Removes both keys and returns the outcome if it has not expired.
    fn take(&mut self, checkout_request_id: &str, merchant_request_id: &str) -> Option<PaymentOutcome> {
        let now = Instant::now();
        let by_checkout = self.entries.remove(checkout_request_id);
        let by_merchant = self.entries.remove(merchant_request_id);
        by_checkout
            .or(by_merchant)
            .filter(|parked| parked.is_fresh(now))
            .map(|parked| parked.outcome)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Drives push payments through the gateway and reconciles their
/// asynchronous outcomes.
///
/// Initiation and callback handling both write the payment row. Each write is
/// a versioned update, and the short window in which a callback can arrive
/// before initiation has stored the gateway's ids is covered by parking the
/// callback under `parked` until initiation picks it up.
#[derive(Clone)]
pub struct PaymentCoordinator {
    services: ServiceStoreRef,
    appointments: AppointmentStoreRef,
    payments: PaymentStoreRef,
    gateway: PaymentGatewayRef,
    parked: Arc<Mutex<ParkedCallbacks>>,
}

impl PaymentCoordinator {
    pub fn new(
        services: ServiceStoreRef,
        appointments: AppointmentStoreRef,
        payments: PaymentStoreRef,
        gateway: PaymentGatewayRef,
    ) -> Self {
        Self {
            services,
            appointments,
            payments,
            gateway,
            parked: Arc::new(Mutex::new(ParkedCallbacks::default())),
        }
    }

    fn new_transaction_ref() -> String {
        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        format!("MB{}", &id[..10])
    }

    pub async fn get_payment(&self, payment_id: u64) -> Result<Payment> {
        self.payments
            .get(payment_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Payment", payment_id))
    }

    /// Re-reads, applies `change` and writes back, retrying on version conflicts.
    async fn modify<F>(&self, payment_id: u64, mut change: F) -> Result<Payment>
    where
        F: FnMut(&mut Payment) -> Result<()> + Send,
    {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let mut payment = self.get_payment(payment_id).await?;
            change(&mut payment)?;
            match self.payments.update(payment).await {
                Err(CoreError::VersionConflict { .. }) => {
                    debug!("Payment {payment_id} changed underneath us, retrying");
                }
                other => return other,
            }
        }
        Err(CoreError::VersionConflict {
            entity: "Payment",
            id: payment_id,
        })
    }

    /// Applies a final outcome unless the payment is already terminal.
    async fn apply_outcome(&self, payment_id: u64, outcome: &PaymentOutcome) -> Result<Applied> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let mut payment = self.get_payment(payment_id).await?;
            if payment.apply_outcome(outcome, Utc::now()) == Applied::Unchanged {
                return Ok(Applied::Unchanged);
            }
            match self.payments.update(payment).await {
                Ok(payment) => {
                    info!("Payment {} is now {}", payment.id, payment.status);
                    return Ok(Applied::Updated);
                }
                Err(CoreError::VersionConflict { .. }) => {
                    debug!("Payment {payment_id} changed underneath us, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::VersionConflict {
            entity: "Payment",
            id: payment_id,
        })
    }

    /// Creates a payment for the service's price and asks the gateway to push
    /// it to the payer's phone.
    ///
    /// Explicit rejections leave the payment `failed`; transport failures leave
    /// it `unknown` because the push may still have gone through.
    pub async fn initiate_payment(&self, request: PaymentRequest) -> Result<Initiation> {
        let service = self
            .services
            .get(request.service_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Service", request.service_id))?;

        if let Some(appointment_id) = request.appointment_id {
            let appointment = self
                .appointments
                .get(appointment_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Appointment", appointment_id))?;
            if appointment.status == AppointmentStatus::Cancelled {
                return Err(CoreError::InvalidTransition {
                    from: appointment.status.to_string(),
                    to: "paid".to_string(),
                });
            }
        }

        let phone_number = PhoneNumber::parse(&request.phone_number)?;
        let units = service.price.to_push_units()?;

        let now = Utc::now();
        let transaction_ref = Self::new_transaction_ref();
        let payment = Payment {
            id: self.payments.next_id().await?,
            appointment_id: request.appointment_id,
            service_id: service.id,
            patient_id: request.patient_id,
            amount: service.price,
            phone_number,
            transaction_ref: transaction_ref.clone(),
            merchant_request_id: String::new(),
            checkout_request_id: String::new(),
            mpesa_receipt: None,
            status: PaymentStatus::Pending,
            result_code: None,
            result_desc: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.payments.insert(payment.clone()).await?;
        info!(
            "Payment {} created for service {} ({})",
            payment.id, service.id, service.price
        );

        let description = match request.appointment_id {
            Some(appointment_id) => format!("Payment for appointment #{appointment_id}"),
            None => format!("Payment for {}", service.name),
        };
        let push = PushRequest {
            amount: units,
            phone_number: payment.phone_number.to_string(),
            account_reference: transaction_ref,
            description,
        };

        match self.gateway.push(&push).await {
            Ok(response) if response.accepted() => {
                let payment = self.record_acceptance(payment.id, &response).await?;
                Ok(Initiation { payment, response })
            }
            Ok(response) => {
                let reason = if response.response_description.is_empty() {
                    format!("Gateway responded with code {}", response.response_code)
                } else {
                    response.response_description
                };
                self.fail_initiation(payment.id, GatewayError::rejected(reason))
                    .await
            }
            Err(e) => self.fail_initiation(payment.id, e).await,
        }
    }

    async fn record_acceptance(&self, payment_id: u64, response: &PushResponse) -> Result<Payment> {
        // Held until parked callbacks for these ids have been taken, so a
        // callback racing this update either finds the ids or gets parked first.
        let mut parked = self.parked.lock().await;
        let payment = self
            .modify(payment_id, |p| {
                p.mark_processing(
                    response.merchant_request_id.clone(),
                    response.checkout_request_id.clone(),
                    Some(response.customer_message.clone()).filter(|m| !m.is_empty()),
                )
            })
            .await?;
        info!(
            "Payment {} accepted by gateway (checkout {})",
            payment.id, payment.checkout_request_id
        );

        let early = parked.take(&payment.checkout_request_id, &payment.merchant_request_id);
        drop(parked);

        if let Some(outcome) = early {
            info!("Applying early callback to payment {}", payment.id);
            self.apply_outcome(payment.id, &outcome).await?;
            return self.get_payment(payment.id).await;
        }
        Ok(payment)
    }

    async fn fail_initiation<T>(&self, payment_id: u64, cause: GatewayError) -> Result<T> {
        if cause.ambiguous {
            warn!("Payment {payment_id}: gateway outcome unknown: {}", cause.message);
            self.modify(payment_id, |p| p.mark_unknown(cause.message.clone()))
                .await?;
        } else {
            warn!("Payment {payment_id} rejected by gateway: {}", cause.message);
            self.modify(payment_id, |p| p.mark_rejected(cause.message.clone()))
                .await?;
        }
        Err(CoreError::PaymentNotInitiated {
            payment_id,
            source: cause,
        })
    }

    /// Applies a gateway callback. Always produces an acknowledgement; the
    /// gateway retries anything that is not a 200.
    pub async fn handle_callback(&self, payload: serde_json::Value) -> CallbackAck {
        info!("M-Pesa callback: {payload}");
        let envelope: CallbackEnvelope = match serde_json::from_value(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Malformed M-Pesa callback: {e}");
                return CallbackAck::rejected(format!("Malformed callback: {e}"));
            }
        };
        let callback = envelope.body.stk_callback;
        let outcome = callback.outcome();

        let payment = {
            let mut parked = self.parked.lock().await;
            let found = match self
                .payments
                .find_by_request_ids(&callback.merchant_request_id, &callback.checkout_request_id)
                .await
            {
                Ok(found) => found,
                Err(e) => {
                    error!("Payment lookup for callback failed: {e}");
                    return CallbackAck::rejected("Internal error");
                }
            };
            let Some(payment) = found else {
                warn!(
                    "No payment for callback (merchant {}, checkout {})",
                    callback.merchant_request_id, callback.checkout_request_id
                );
                parked.park(
                    [&callback.merchant_request_id, &callback.checkout_request_id],
                    &outcome,
                );
                debug!("{} callback keys parked", parked.len());
                return CallbackAck::not_found();
            };
            payment
        };

        match self.apply_outcome(payment.id, &outcome).await {
            Ok(Applied::Updated) => CallbackAck::accepted(),
            Ok(Applied::Unchanged) => {
                info!(
                    "Duplicate callback for payment {} ignored (status {})",
                    payment.id, payment.status
                );
                CallbackAck::accepted()
            }
            Err(e) => {
                error!("Applying callback to payment {} failed: {e}", payment.id);
                CallbackAck::rejected("Internal error")
            }
        }
    }

    pub async fn check_status(&self, payment_id: u64) -> Result<StatusReport> {
        Ok(self.get_payment(payment_id).await?.status_report())
    }

    pub async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        filter.validate()?;
        self.payments.get_all(filter).await
    }

    /// One page of matching payments, newest first.
    pub async fn page_payments(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> Result<Page<Payment>> {
        page.validate()?;
        Ok(page.slice(self.list_payments(filter).await?))
    }

    pub async fn recent_payments(&self, patient_id: u64) -> Result<Vec<Payment>> {
        let filter = PaymentFilter {
            patient_id: Some(patient_id),
            ..Default::default()
        };
        let mut payments = self.payments.get_all(&filter).await?;
        payments.truncate(RECENT_PAYMENTS);
        Ok(payments)
    }

    /// Asks the gateway about payments whose outcome is still open: every
    /// `unknown` payment and `processing` payments idle for `stale_after`.
    pub async fn reconcile(&self, stale_after: TimeDelta) -> Result<ReconcileSummary> {
        let cutoff = Utc::now() - stale_after;
        let mut summary = ReconcileSummary::default();

        let candidates: Vec<Payment> = self
            .payments
            .get_all(&PaymentFilter::default())
            .await?
            .into_iter()
            .filter(|p| match p.status {
                PaymentStatus::Unknown => true,
                PaymentStatus::Processing => p.updated_at <= cutoff,
                _ => false,
            })
            .collect();

        for payment in candidates {
            summary.checked += 1;
            if payment.checkout_request_id.is_empty() {
                warn!(
                    "Payment {} has no gateway reference and needs manual review",
                    payment.id
                );
                summary.needs_review += 1;
                continue;
            }

            match self.gateway.query(&payment.checkout_request_id).await {
                Ok(QueryResult::Final(outcome)) => {
                    self.resolve(payment.id, &outcome, &mut summary).await;
                }
                Ok(QueryResult::InProgress) => summary.in_progress += 1,
                Ok(QueryResult::NotFound(message)) => {
                    let outcome = PaymentOutcome::Failed {
                        result_code: RESULT_UNKNOWN_AT_GATEWAY,
                        result_desc: message,
                    };
                    self.resolve(payment.id, &outcome, &mut summary).await;
                }
                Err(e) => {
                    warn!("Status query for payment {} failed: {e}", payment.id);
                    summary.errors += 1;
                }
            }
        }

        if summary.checked > 0 {
            info!("Reconciliation pass: {summary:?}");
        }
        Ok(summary)
    }

    /// Applies a queried outcome. A failure is counted and the pass moves on.
    async fn resolve(&self, payment_id: u64, outcome: &PaymentOutcome, summary: &mut ReconcileSummary) {
        match self.apply_outcome(payment_id, outcome).await {
            Ok(_) => summary.resolved += 1,
            Err(e) => {
                error!("Recording the queried outcome of payment {payment_id} failed: {e}");
                summary.errors += 1;
            }
        }
    }
}
