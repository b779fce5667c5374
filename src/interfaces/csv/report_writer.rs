use crate::domain::payment::Payment;
use crate::domain::slot::Slot;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    id: u64,
    appointment_id: Option<u64>,
    service_id: u64,
    patient_id: u64,
    amount: Decimal,
    phone_number: &'a str,
    transaction_ref: &'a str,
    status: String,
    mpesa_receipt: Option<&'a str>,
    result_code: Option<i64>,
    result_desc: Option<&'a str>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a Payment> for PaymentRow<'a> {
    fn from(p: &'a Payment) -> Self {
        Self {
            id: p.id,
            appointment_id: p.appointment_id,
            service_id: p.service_id,
            patient_id: p.patient_id,
            amount: p.amount.value(),
            phone_number: p.phone_number.as_str(),
            transaction_ref: &p.transaction_ref,
            status: p.status.to_string(),
            mpesa_receipt: p.mpesa_receipt.as_deref(),
            result_code: p.result_code,
            result_desc: p.result_desc.as_deref(),
            paid_at: p.paid_at,
            created_at: p.created_at,
        }
    }
}

/// Writes slot and payment listings as CSV.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_slots(&mut self, slots: &[Slot]) -> Result<()> {
        for slot in slots {
            self.writer.serialize(slot)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_payments(&mut self, payments: &[Payment]) -> Result<()> {
        for payment in payments {
            self.writer.serialize(PaymentRow::from(payment))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_write_slots() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let slots = vec![Slot::new(7, 2, start, end, Some("room 4".into())).unwrap()];

        let mut buf = Vec::new();
        ReportWriter::new(&mut buf).write_slots(&slots).unwrap();
        let out = String::from_utf8(buf).unwrap();

        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("id,provider_id,start_time,end_time,notes"));
        assert_eq!(
            lines.next(),
            Some("7,2,2025-03-01T09:00:00Z,2025-03-01T09:30:00Z,room 4")
        );
    }
}
