//! JSON HTTP API over a [`Clinic`].

pub mod client;
pub mod error;

use crate::application::Clinic;
use crate::application::booking::BookingRequest;
use crate::application::payments::PaymentRequest;
use crate::domain::appointment::Appointment;
use crate::domain::gateway::CallbackAck;
use crate::domain::medical_record::{MedicalData, MedicalRecord};
use crate::domain::payment::{
    DEFAULT_PER_PAGE, Page, PageRequest, Payment, PaymentFilter, PaymentStatus, StatusReport,
};
use crate::domain::slot::Slot;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use error::ApiError;
use log::warn;
use serde::{Deserialize, Serialize};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSlot {
    pub provider_id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointment {
    pub patient_id: u64,
    pub provider_id: u64,
    pub slot_id: u64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub service_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reschedule {
    pub slot_id: u64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub appointment: Appointment,
    pub medical_record: MedicalRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePayment {
    pub service_id: u64,
    pub patient_id: u64,
    pub phone_number: String,
    #[serde(default)]
    pub appointment_id: Option<u64>,
}

impl From<InitiatePayment> for PaymentRequest {
    fn from(body: InitiatePayment) -> Self {
        Self {
            service_id: body.service_id,
            patient_id: body.patient_id,
            phone_number: body.phone_number,
            appointment_id: body.appointment_id,
        }
    }
}

impl From<PaymentRequest> for InitiatePayment {
    fn from(request: PaymentRequest) -> Self {
        Self {
            service_id: request.service_id,
            patient_id: request.patient_id,
            phone_number: request.phone_number,
            appointment_id: request.appointment_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatedPayment {
    pub payment_id: u64,
    pub status: PaymentStatus,
    pub transaction_ref: String,
    pub checkout_request_id: String,
    pub customer_message: String,
}

pub fn router(clinic: Clinic) -> Router {
    Router::new()
        .route("/slots", post(create_slot))
        .route("/slots/{slot_id}", delete(delete_slot))
        .route("/providers/{provider_id}/slots/available", get(available_slots))
        .route("/providers/{provider_id}/appointments", get(provider_appointments))
        .route("/appointments", post(book_appointment))
        .route("/appointments/{appointment_id}", get(get_appointment))
        .route("/appointments/{appointment_id}/accept", post(accept_appointment))
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
        .route("/appointments/{appointment_id}/complete", post(complete_appointment))
        .route("/appointments/{appointment_id}/reschedule", post(reschedule_appointment))
        .route("/appointments/{appointment_id}/paid", post(mark_paid))
        .route("/payments", get(list_payments))
        .route("/patients/{patient_id}/payments/recent", get(recent_payments))
        .route("/payments/mpesa", post(initiate_payment))
        .route("/payments/mpesa-callback", post(mpesa_callback))
        .route("/payments/status/{payment_id}", get(payment_status))
        .with_state(clinic)
}

async fn create_slot(
    State(clinic): State<Clinic>,
    Json(body): Json<CreateSlot>,
) -> ApiResult<(StatusCode, Json<Slot>)> {
    let slot = clinic
        .schedule
        .create_slot(body.provider_id, body.start_time, body.end_time, body.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

async fn delete_slot(
    State(clinic): State<Clinic>,
    Path(slot_id): Path<u64>,
) -> ApiResult<StatusCode> {
    clinic.schedule.delete_slot(slot_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn available_slots(
    State(clinic): State<Clinic>,
    Path(provider_id): Path<u64>,
) -> ApiResult<Json<Vec<Slot>>> {
    Ok(Json(clinic.schedule.list_available_slots(provider_id).await?))
}

async fn provider_appointments(
    State(clinic): State<Clinic>,
    Path(provider_id): Path<u64>,
) -> ApiResult<Json<Vec<Appointment>>> {
    Ok(Json(clinic.booking.list_for_provider(provider_id).await?))
}

async fn book_appointment(
    State(clinic): State<Clinic>,
    Json(body): Json<BookAppointment>,
) -> ApiResult<(StatusCode, Json<Appointment>)> {
    let appointment = clinic
        .booking
        .book_appointment(BookingRequest {
            patient_id: body.patient_id,
            provider_id: body.provider_id,
            slot_id: body.slot_id,
            reason: body.reason,
            service_id: body.service_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn get_appointment(
    State(clinic): State<Clinic>,
    Path(appointment_id): Path<u64>,
) -> ApiResult<Json<Appointment>> {
    Ok(Json(clinic.booking.get_appointment(appointment_id).await?))
}

async fn accept_appointment(
    State(clinic): State<Clinic>,
    Path(appointment_id): Path<u64>,
) -> ApiResult<Json<Appointment>> {
    Ok(Json(clinic.booking.accept_appointment(appointment_id).await?))
}

async fn cancel_appointment(
    State(clinic): State<Clinic>,
    Path(appointment_id): Path<u64>,
) -> ApiResult<Json<Appointment>> {
    Ok(Json(clinic.booking.cancel_appointment(appointment_id).await?))
}

async fn complete_appointment(
    State(clinic): State<Clinic>,
    Path(appointment_id): Path<u64>,
    Json(data): Json<MedicalData>,
) -> ApiResult<Json<Completion>> {
    let (appointment, medical_record) = clinic
        .booking
        .complete_appointment(appointment_id, data)
        .await?;
    Ok(Json(Completion {
        appointment,
        medical_record,
    }))
}

async fn reschedule_appointment(
    State(clinic): State<Clinic>,
    Path(appointment_id): Path<u64>,
    Json(body): Json<Reschedule>,
) -> ApiResult<Json<Appointment>> {
    let appointment = clinic
        .booking
        .reschedule_appointment(appointment_id, body.slot_id, body.reason)
        .await?;
    Ok(Json(appointment))
}

async fn mark_paid(
    State(clinic): State<Clinic>,
    Path(appointment_id): Path<u64>,
) -> ApiResult<Json<Appointment>> {
    Ok(Json(clinic.booking.mark_paid(appointment_id).await?))
}

/// Query string of `GET /payments`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentQuery {
    pub status: Option<PaymentStatus>,
    pub patient_id: Option<u64>,
    pub appointment_id: Option<u64>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl PaymentQuery {
    fn split(self) -> (PaymentFilter, PageRequest) {
        let filter = PaymentFilter {
            status: self.status,
            patient_id: self.patient_id,
            appointment_id: self.appointment_id,
            date_from: self.date_from,
            date_to: self.date_to,
        };
        let page = PageRequest {
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(DEFAULT_PER_PAGE),
        };
        (filter, page)
    }
}

async fn list_payments(
    State(clinic): State<Clinic>,
    Query(query): Query<PaymentQuery>,
) -> ApiResult<Json<Page<Payment>>> {
    let (filter, page) = query.split();
    Ok(Json(clinic.payments.page_payments(&filter, page).await?))
}

async fn recent_payments(
    State(clinic): State<Clinic>,
    Path(patient_id): Path<u64>,
) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(clinic.payments.recent_payments(patient_id).await?))
}

async fn initiate_payment(
    State(clinic): State<Clinic>,
    Json(body): Json<InitiatePayment>,
) -> ApiResult<(StatusCode, Json<InitiatedPayment>)> {
    let initiation = clinic.payments.initiate_payment(body.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(InitiatedPayment {
            payment_id: initiation.payment.id,
            status: initiation.payment.status,
            transaction_ref: initiation.payment.transaction_ref,
            checkout_request_id: initiation.payment.checkout_request_id,
            customer_message: initiation.response.customer_message,
        }),
    ))
}

/// The gateway retries anything but a 200, so every outcome is acknowledged
/// with 200 and the result carried in the body.
async fn mpesa_callback(State(clinic): State<Clinic>, body: Bytes) -> Json<CallbackAck> {
    let payload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Unreadable M-Pesa callback body: {e}");
            return Json(CallbackAck::rejected(format!("Malformed callback: {e}")));
        }
    };
    Json(clinic.payments.handle_callback(payload).await)
}

async fn payment_status(
    State(clinic): State<Clinic>,
    Path(payment_id): Path<u64>,
) -> ApiResult<Json<StatusReport>> {
    Ok(Json(clinic.payments.check_status(payment_id).await?))
}
