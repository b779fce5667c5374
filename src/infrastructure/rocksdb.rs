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
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for slots.
pub const CF_SLOTS: &str = "slots";
/// Column Family for appointments.
pub const CF_APPOINTMENTS: &str = "appointments";
/// Column Family for medical records.
pub const CF_MEDICAL_RECORDS: &str = "medical_records";
/// Column Family for the service catalog.
pub const CF_SERVICES: &str = "services";
/// Column Family for payments.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for id counters, keyed by the column family they count for.
pub const CF_META: &str = "meta";

const ALL_CFS: [&str; 6] = [
    CF_SLOTS,
    CF_APPOINTMENTS,
    CF_MEDICAL_RECORDS,
    CF_SERVICES,
    CF_PAYMENTS,
    CF_META,
];

/// A persistent store implementation using RocksDB.
///
/// Every entity lives in its own Column Family, keyed by big-endian id and
/// encoded as JSON. Read-check-write sequences (id counters, slot exclusivity,
/// versioned updates) are serialised by `write_lock`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// column families on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            CoreError::InternalError(Box::new(std::io::Error::other(format!(
                "Column family `{name}` not found"
            ))))
        })
    }

    fn put_json<T: Serialize>(&self, cf_name: &str, id: u64, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(cf, id.to_be_bytes(), bytes)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, id: u64) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn last_id(&self, cf_name: &str) -> Result<u64> {
        let meta = self.cf(CF_META)?;
        match self.db.get_pinned_cf(meta, cf_name.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    CoreError::InternalError(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Corrupt id counter for `{cf_name}`"),
                    )))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn bump_last_id(&self, cf_name: &str, id: u64) -> Result<()> {
        if id > self.last_id(cf_name)? {
            let meta = self.cf(CF_META)?;
            self.db.put_cf(meta, cf_name.as_bytes(), id.to_be_bytes())?;
        }
        Ok(())
    }

    async fn allocate_id(&self, cf_name: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let id = self.last_id(cf_name)? + 1;
        self.bump_last_id(cf_name, id)?;
        Ok(id)
    }

    async fn upsert<T: Serialize + Sync>(&self, cf_name: &str, id: u64, value: &T) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.put_json(cf_name, id, value)?;
        self.bump_last_id(cf_name, id)
    }

    fn slot_taken(&self, candidate: &Appointment) -> Result<bool> {
        let Some(slot_id) = candidate.slot_id else {
            return Ok(false);
        };
        let appointments: Vec<Appointment> = self.scan_json(CF_APPOINTMENTS)?;
        Ok(appointments.iter().any(|a| {
            a.id != candidate.id && a.slot_id == Some(slot_id) && a.status.is_live()
        }))
    }
}

#[async_trait]
impl SlotStore for RocksDBStore {
    async fn next_id(&self) -> Result<u64> {
        self.allocate_id(CF_SLOTS).await
    }

    async fn store(&self, slot: Slot) -> Result<()> {
        self.upsert(CF_SLOTS, slot.id, &slot).await
    }

    async fn get(&self, slot_id: u64) -> Result<Option<Slot>> {
        self.get_json(CF_SLOTS, slot_id)
    }

    async fn get_by_provider(&self, provider_id: u64) -> Result<Vec<Slot>> {
        let slots: Vec<Slot> = self.scan_json(CF_SLOTS)?;
        Ok(slots
            .into_iter()
            .filter(|s| s.provider_id == provider_id)
            .collect())
    }

    async fn delete(&self, slot_id: u64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_SLOTS)?;
        let existed = self.db.get_pinned_cf(cf, slot_id.to_be_bytes())?.is_some();
        if existed {
            self.db.delete_cf(cf, slot_id.to_be_bytes())?;
        }
        Ok(existed)
    }
}

#[async_trait]
impl AppointmentStore for RocksDBStore {
    async fn next_id(&self) -> Result<u64> {
        self.allocate_id(CF_APPOINTMENTS).await
    }

    async fn insert(&self, appointment: Appointment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.slot_taken(&appointment)? {
            return Err(CoreError::SlotUnavailable(appointment.slot_id.unwrap_or_default()));
        }
        self.put_json(CF_APPOINTMENTS, appointment.id, &appointment)?;
        self.bump_last_id(CF_APPOINTMENTS, appointment.id)
    }

    async fn get(&self, appointment_id: u64) -> Result<Option<Appointment>> {
        self.get_json(CF_APPOINTMENTS, appointment_id)
    }

    async fn find_by_slot(&self, slot_id: u64) -> Result<Option<Appointment>> {
        let appointments: Vec<Appointment> = self.scan_json(CF_APPOINTMENTS)?;
        Ok(appointments
            .into_iter()
            .find(|a| a.slot_id == Some(slot_id) && a.status.is_live()))
    }

    async fn get_by_provider(&self, provider_id: u64) -> Result<Vec<Appointment>> {
        let appointments: Vec<Appointment> = self.scan_json(CF_APPOINTMENTS)?;
        Ok(appointments
            .into_iter()
            .filter(|a| a.provider_id == provider_id)
            .collect())
    }

    async fn update(&self, mut appointment: Appointment) -> Result<Appointment> {
        let _guard = self.write_lock.lock().await;
        let current: Appointment = self
            .get_json(CF_APPOINTMENTS, appointment.id)?
            .ok_or_else(|| CoreError::not_found("Appointment", appointment.id))?;
        if current.version != appointment.version {
            return Err(CoreError::VersionConflict {
                entity: "Appointment",
                id: appointment.id,
            });
        }
        if self.slot_taken(&appointment)? {
            return Err(CoreError::SlotUnavailable(appointment.slot_id.unwrap_or_default()));
        }
        appointment.version += 1;
        self.put_json(CF_APPOINTMENTS, appointment.id, &appointment)?;
        Ok(appointment)
    }
}

#[async_trait]
impl MedicalRecordStore for RocksDBStore {
    async fn next_id(&self) -> Result<u64> {
        self.allocate_id(CF_MEDICAL_RECORDS).await
    }

    async fn insert(&self, record: MedicalRecord) -> Result<()> {
        self.upsert(CF_MEDICAL_RECORDS, record.id, &record).await
    }

    async fn get_by_appointment(&self, appointment_id: u64) -> Result<Vec<MedicalRecord>> {
        let records: Vec<MedicalRecord> = self.scan_json(CF_MEDICAL_RECORDS)?;
        Ok(records
            .into_iter()
            .filter(|r| r.appointment_id == appointment_id)
            .collect())
    }
}

#[async_trait]
impl ServiceStore for RocksDBStore {
    async fn store(&self, service: Service) -> Result<()> {
        self.upsert(CF_SERVICES, service.id, &service).await
    }

    async fn get(&self, service_id: u64) -> Result<Option<Service>> {
        self.get_json(CF_SERVICES, service_id)
    }

    async fn get_all(&self) -> Result<Vec<Service>> {
        self.scan_json(CF_SERVICES)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn next_id(&self) -> Result<u64> {
        self.allocate_id(CF_PAYMENTS).await
    }

    async fn insert(&self, payment: Payment) -> Result<()> {
        self.upsert(CF_PAYMENTS, payment.id, &payment).await
    }

    async fn get(&self, payment_id: u64) -> Result<Option<Payment>> {
        self.get_json(CF_PAYMENTS, payment_id)
    }

    async fn find_by_request_ids(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>> {
        let payments: Vec<Payment> = self.scan_json(CF_PAYMENTS)?;
        Ok(payments
            .into_iter()
            .find(|p| p.matches(merchant_request_id, checkout_request_id)))
    }

    async fn get_all(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let payments: Vec<Payment> = self.scan_json(CF_PAYMENTS)?;
        Ok(payments
            .into_iter()
            .rev()
            .filter(|p| filter.matches(p))
            .collect())
    }

    async fn update(&self, mut payment: Payment) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;
        let current: Payment = self
            .get_json(CF_PAYMENTS, payment.id)?
            .ok_or_else(|| CoreError::not_found("Payment", payment.id))?;
        if current.version != payment.version {
            return Err(CoreError::VersionConflict {
                entity: "Payment",
                id: payment.id,
            });
        }
        payment.version += 1;
        self.put_json(CF_PAYMENTS, payment.id, &payment)?;
        Ok(payment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::appointment::AppointmentStatus;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in ALL_CFS {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_slot_store_and_counter() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let slot = Slot::new(10, 5, start, end, None).unwrap();
        SlotStore::store(&store, slot.clone()).await.unwrap();

        assert_eq!(SlotStore::get(&store, 10).await.unwrap(), Some(slot));
        assert_eq!(SlotStore::next_id(&store).await.unwrap(), 11);
        assert_eq!(SlotStore::get_by_provider(&store, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_appointment_exclusivity() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let appointment = Appointment {
            id: 1,
            patient_id: 1,
            provider_id: 5,
            slot_id: Some(10),
            service_id: None,
            scheduled_at: Utc::now(),
            reason: None,
            status: AppointmentStatus::Pending,
            paid: false,
            version: 0,
        };
        AppointmentStore::insert(&store, appointment.clone()).await.unwrap();

        let second = Appointment {
            id: 2,
            ..appointment
        };
        let result = AppointmentStore::insert(&store, second).await;
        assert!(matches!(result, Err(CoreError::SlotUnavailable(10))));
    }
}
