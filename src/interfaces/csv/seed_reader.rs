use crate::application::Clinic;
use crate::domain::service::Service;
use crate::domain::slot::Slot;
use crate::error::{CoreError, Result};
use log::{info, warn};
use serde::de::DeserializeOwned;
use std::io::Read;

/// Reads seed records (slots or services) from a CSV source.
///
/// Wraps `csv::Reader` and yields one `Result` per row, so a malformed row
/// never stops the rest of the file from loading.
pub struct SeedReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> SeedReader<R> {
    /// Creates a new `SeedReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn records<T: DeserializeOwned>(self) -> impl Iterator<Item = Result<T>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(CoreError::from))
    }

    /// Rows of `id, provider_id, start_time, end_time, notes` with RFC 3339 times.
    pub fn slots(self) -> impl Iterator<Item = Result<Slot>> {
        self.records::<Slot>()
            .map(|row| row.and_then(|slot| slot.validate().map(|_| slot)))
    }

    /// Rows of `id, name, price`.
    pub fn services(self) -> impl Iterator<Item = Result<Service>> {
        self.records::<Service>()
    }
}

/// How many seed rows were written and how many were skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Upserts slots by id. Running it twice over the same file is a no-op.
pub async fn seed_slots<R: Read>(clinic: &Clinic, reader: SeedReader<R>) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    for row in reader.slots() {
        match row {
            Ok(slot) => {
                let id = slot.id;
                match clinic.schedule.upsert_slot(slot).await {
                    Ok(()) => report.loaded += 1,
                    Err(CoreError::SlotUnavailable(_)) => {
                        warn!("Slot {id} is booked, keeping its stored times");
                        report.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => {
                warn!("Error reading slot: {e}");
                report.skipped += 1;
            }
        }
    }
    info!("Seeded {} slots ({} skipped)", report.loaded, report.skipped);
    Ok(report)
}

/// Upserts services by id. Running it twice over the same file is a no-op.
pub async fn seed_services<R: Read>(clinic: &Clinic, reader: SeedReader<R>) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    for row in reader.services() {
        match row {
            Ok(service) => {
                clinic.stores.services.store(service).await?;
                report.loaded += 1;
            }
            Err(e) => {
                warn!("Error reading service: {e}");
                report.skipped += 1;
            }
        }
    }
    info!("Seeded {} services ({} skipped)", report.loaded, report.skipped);
    Ok(report)
}
