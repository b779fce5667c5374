//! Application layer containing the scheduling and payment workflows.
//!
//! `Clinic` wires the four components together over one set of stores and a
//! payment gateway. It is cheap to clone and shared by the HTTP handlers.

pub mod booking;
pub mod payments;
pub mod reconciliation;
pub mod schedule;

use crate::domain::ports::PaymentGatewayRef;
use crate::error::Result;
use crate::infrastructure::Stores;
use async_trait::async_trait;
use booking::BookingEngine;
use payments::{PaymentCoordinator, PaymentRequest};
use reconciliation::{CheckoutApi, StatusSource};
use schedule::ScheduleRegistry;

#[derive(Clone)]
pub struct Clinic {
    pub schedule: ScheduleRegistry,
    pub booking: BookingEngine,
    pub payments: PaymentCoordinator,
    pub stores: Stores,
}

impl Clinic {
    pub fn new(stores: Stores, gateway: PaymentGatewayRef) -> Self {
        let schedule = ScheduleRegistry::new(stores.slots.clone(), stores.appointments.clone());
        let booking = BookingEngine::new(
            schedule.clone(),
            stores.appointments.clone(),
            stores.records.clone(),
            stores.services.clone(),
            stores.payments.clone(),
        );
        let payments = PaymentCoordinator::new(
            stores.services.clone(),
            stores.appointments.clone(),
            stores.payments.clone(),
            gateway,
        );
        Self {
            schedule,
            booking,
            payments,
            stores,
        }
    }
}

#[async_trait]
impl StatusSource for Clinic {
    async fn check_status(&self, payment_id: u64) -> Result<crate::domain::payment::StatusReport> {
        self.payments.check_status(payment_id).await
    }
}

#[async_trait]
impl CheckoutApi for Clinic {
    async fn initiate(&self, request: PaymentRequest) -> Result<u64> {
        Ok(self.payments.initiate_payment(request).await?.payment.id)
    }

    async fn mark_paid(&self, appointment_id: u64) -> Result<()> {
        self.booking.mark_paid(appointment_id).await.map(|_| ())
    }
}
