//! Adapters behind the domain ports: in-memory and RocksDB storage, and the
//! M-Pesa gateway client.

pub mod in_memory;
pub mod mpesa;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;

use crate::domain::ports::{
    AppointmentStoreRef, MedicalRecordStoreRef, PaymentStoreRef, ServiceStoreRef, SlotStoreRef,
};
use in_memory::{
    InMemoryAppointmentStore, InMemoryMedicalRecordStore, InMemoryPaymentStore,
    InMemoryServiceStore, InMemorySlotStore,
};
use std::sync::Arc;

/// One handle per store, all backed by the same storage engine.
#[derive(Clone)]
pub struct Stores {
    pub slots: SlotStoreRef,
    pub appointments: AppointmentStoreRef,
    pub records: MedicalRecordStoreRef,
    pub services: ServiceStoreRef,
    pub payments: PaymentStoreRef,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            slots: Arc::new(InMemorySlotStore::new()),
            appointments: Arc::new(InMemoryAppointmentStore::new()),
            records: Arc::new(InMemoryMedicalRecordStore::new()),
            services: Arc::new(InMemoryServiceStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
        }
    }

    #[cfg(feature = "storage-rocksdb")]
    pub fn rocksdb(store: rocksdb::RocksDBStore) -> Self {
        Self {
            slots: Arc::new(store.clone()),
            appointments: Arc::new(store.clone()),
            records: Arc::new(store.clone()),
            services: Arc::new(store.clone()),
            payments: Arc::new(store),
        }
    }
}
