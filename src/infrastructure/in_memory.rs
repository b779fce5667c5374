use crate::domain::appointment::Appointment;
use crate::domain::medical_record::MedicalRecord;
use crate::domain::payment::{Payment, PaymentFilter};
use crate::domain::ports::{
    AppointmentStore, MedicalRecordStore, PaymentStore, ServiceStore, SlotStore,
};
use crate::domain::service::Service;
use crate::domain::slot::Slot;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Rows keyed by id plus the highest id handed out so far.
#[derive(Debug)]
struct Table<T> {
    rows: BTreeMap<u64, T>,
    last_id: u64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            last_id: 0,
        }
    }
}

impl<T> Table<T> {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn put(&mut self, id: u64, row: T) {
        self.last_id = self.last_id.max(id);
        self.rows.insert(id, row);
    }
}

/// A thread-safe in-memory store for slots.
///
/// Uses `Arc<RwLock<..>>` to allow shared concurrent access.
#[derive(Default, Clone)]
pub struct InMemorySlotStore {
    slots: Arc<RwLock<Table<Slot>>>,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn next_id(&self) -> Result<u64> {
        Ok(self.slots.write().await.next_id())
    }

    async fn store(&self, slot: Slot) -> Result<()> {
        self.slots.write().await.put(slot.id, slot);
        Ok(())
    }

    async fn get(&self, slot_id: u64) -> Result<Option<Slot>> {
        Ok(self.slots.read().await.rows.get(&slot_id).cloned())
    }

    async fn get_by_provider(&self, provider_id: u64) -> Result<Vec<Slot>> {
        let slots = self.slots.read().await;
        Ok(slots
            .rows
            .values()
            .filter(|s| s.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, slot_id: u64) -> Result<bool> {
        Ok(self.slots.write().await.rows.remove(&slot_id).is_some())
    }
}

/// A thread-safe in-memory store for appointments.
///
/// The write guard is held across the exclusivity check and the write, which
/// makes booking a slot atomic with respect to other bookings.
#[derive(Default, Clone)]
pub struct InMemoryAppointmentStore {
    appointments: Arc<RwLock<Table<Appointment>>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn slot_taken(rows: &BTreeMap<u64, Appointment>, candidate: &Appointment) -> bool {
    let Some(slot_id) = candidate.slot_id else {
        return false;
    };
    rows.values().any(|a| {
        a.id != candidate.id && a.slot_id == Some(slot_id) && a.status.is_live()
    })
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn next_id(&self) -> Result<u64> {
        Ok(self.appointments.write().await.next_id())
    }

    async fn insert(&self, appointment: Appointment) -> Result<()> {
        let mut table = self.appointments.write().await;
        if slot_taken(&table.rows, &appointment) {
            return Err(CoreError::SlotUnavailable(appointment.slot_id.unwrap_or_default()));
        }
        table.put(appointment.id, appointment);
        Ok(())
    }

    async fn get(&self, appointment_id: u64) -> Result<Option<Appointment>> {
        Ok(self.appointments.read().await.rows.get(&appointment_id).cloned())
    }

    async fn find_by_slot(&self, slot_id: u64) -> Result<Option<Appointment>> {
        let table = self.appointments.read().await;
        Ok(table
            .rows
            .values()
            .find(|a| a.slot_id == Some(slot_id) && a.status.is_live())
            .cloned())
    }

    async fn get_by_provider(&self, provider_id: u64) -> Result<Vec<Appointment>> {
        let table = self.appointments.read().await;
        Ok(table
            .rows
            .values()
            .filter(|a| a.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn update(&self, mut appointment: Appointment) -> Result<Appointment> {
        let mut table = self.appointments.write().await;
        let current = table
            .rows
            .get(&appointment.id)
            .ok_or_else(|| CoreError::not_found("Appointment", appointment.id))?;
        if current.version != appointment.version {
            return Err(CoreError::VersionConflict {
                entity: "Appointment",
                id: appointment.id,
            });
        }
        if slot_taken(&table.rows, &appointment) {
            return Err(CoreError::SlotUnavailable(appointment.slot_id.unwrap_or_default()));
        }
        appointment.version += 1;
        table.put(appointment.id, appointment.clone());
        Ok(appointment)
    }
}

/// A thread-safe in-memory store for medical records.
#[derive(Default, Clone)]
pub struct InMemoryMedicalRecordStore {
    records: Arc<RwLock<Table<MedicalRecord>>>,
}

impl InMemoryMedicalRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MedicalRecordStore for InMemoryMedicalRecordStore {
    async fn next_id(&self) -> Result<u64> {
        Ok(self.records.write().await.next_id())
    }

    async fn insert(&self, record: MedicalRecord) -> Result<()> {
        self.records.write().await.put(record.id, record);
        Ok(())
    }

    async fn get_by_appointment(&self, appointment_id: u64) -> Result<Vec<MedicalRecord>> {
        let records = self.records.read().await;
        Ok(records
            .rows
            .values()
            .filter(|r| r.appointment_id == appointment_id)
            .cloned()
            .collect())
    }
}

/// A thread-safe in-memory service catalog.
#[derive(Default, Clone)]
pub struct InMemoryServiceStore {
    services: Arc<RwLock<BTreeMap<u64, Service>>>,
}

impl InMemoryServiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceStore for InMemoryServiceStore {
    async fn store(&self, service: Service) -> Result<()> {
        self.services.write().await.insert(service.id, service);
        Ok(())
    }

    async fn get(&self, service_id: u64) -> Result<Option<Service>> {
        Ok(self.services.read().await.get(&service_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Service>> {
        Ok(self.services.read().await.values().cloned().collect())
    }
}

/// A thread-safe in-memory store for payments.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<Table<Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn next_id(&self) -> Result<u64> {
        Ok(self.payments.write().await.next_id())
    }

    async fn insert(&self, payment: Payment) -> Result<()> {
        self.payments.write().await.put(payment.id, payment);
        Ok(())
    }

    async fn get(&self, payment_id: u64) -> Result<Option<Payment>> {
        Ok(self.payments.read().await.rows.get(&payment_id).cloned())
    }

    async fn find_by_request_ids(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>> {
        let table = self.payments.read().await;
        Ok(table
            .rows
            .values()
            .find(|p| p.matches(merchant_request_id, checkout_request_id))
            .cloned())
    }

    async fn get_all(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let table = self.payments.read().await;
        Ok(table
            .rows
            .values()
            .rev()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn update(&self, mut payment: Payment) -> Result<Payment> {
        let mut table = self.payments.write().await;
        let current = table
            .rows
            .get(&payment.id)
            .ok_or_else(|| CoreError::not_found("Payment", payment.id))?;
        if current.version != payment.version {
            return Err(CoreError::VersionConflict {
                entity: "Payment",
                id: payment.id,
            });
        }
        payment.version += 1;
        table.put(payment.id, payment.clone());
        Ok(payment)
    }
}
