use super::appointment::Appointment;
use super::gateway::{PushRequest, PushResponse, QueryResult};
use super::medical_record::MedicalRecord;
use super::payment::{Payment, PaymentFilter};
use super::service::Service;
use super::slot::Slot;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn next_id(&self) -> Result<u64>;
    /// Inserts or replaces the slot with the same id.
    async fn store(&self, slot: Slot) -> Result<()>;
    async fn get(&self, slot_id: u64) -> Result<Option<Slot>>;
    async fn get_by_provider(&self, provider_id: u64) -> Result<Vec<Slot>>;
    async fn delete(&self, slot_id: u64) -> Result<bool>;
}

/// Appointment persistence.
///
/// Implementations enforce slot exclusivity atomically: `insert` and `update`
/// fail with `SlotUnavailable` when another live appointment holds the slot.
/// `update` also fails with `VersionConflict` when the stored version differs
/// from the caller's, and bumps the version on success.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn next_id(&self) -> Result<u64>;
    async fn insert(&self, appointment: Appointment) -> Result<()>;
    async fn get(&self, appointment_id: u64) -> Result<Option<Appointment>>;
    async fn find_by_slot(&self, slot_id: u64) -> Result<Option<Appointment>>;
    async fn get_by_provider(&self, provider_id: u64) -> Result<Vec<Appointment>>;
    async fn update(&self, appointment: Appointment) -> Result<Appointment>;
}

#[async_trait]
pub trait MedicalRecordStore: Send + Sync {
    async fn next_id(&self) -> Result<u64>;
    async fn insert(&self, record: MedicalRecord) -> Result<()>;
    async fn get_by_appointment(&self, appointment_id: u64) -> Result<Vec<MedicalRecord>>;
}

#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn store(&self, service: Service) -> Result<()>;
    async fn get(&self, service_id: u64) -> Result<Option<Service>>;
    async fn get_all(&self) -> Result<Vec<Service>>;
}

/// Payment persistence with the same versioned `update` contract as
/// [`AppointmentStore`].
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn next_id(&self) -> Result<u64>;
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, payment_id: u64) -> Result<Option<Payment>>;
    /// Finds the payment whose merchant OR checkout request id matches.
    async fn find_by_request_ids(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>>;
    /// Matching payments, newest first.
    async fn get_all(&self, filter: &PaymentFilter) -> Result<Vec<Payment>>;
    async fn update(&self, payment: Payment) -> Result<Payment>;
}

/// Outbound port to the mobile-money push-payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn push(&self, request: &PushRequest) -> std::result::Result<PushResponse, GatewayError>;
    async fn query(&self, checkout_request_id: &str)
    -> std::result::Result<QueryResult, GatewayError>;
}

pub type SlotStoreRef = Arc<dyn SlotStore>;
pub type AppointmentStoreRef = Arc<dyn AppointmentStore>;
pub type MedicalRecordStoreRef = Arc<dyn MedicalRecordStore>;
pub type ServiceStoreRef = Arc<dyn ServiceStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
