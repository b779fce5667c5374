use super::payments::{PaymentCoordinator, PaymentRequest};
use crate::config::PollConfig;
use crate::domain::payment::{PaymentStatus, StatusReport};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::watch;

/// Anything that can report a payment's current status.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn check_status(&self, payment_id: u64) -> Result<StatusReport>;
}

/// The calls the checkout flow needs besides status checks.
#[async_trait]
pub trait CheckoutApi: StatusSource {
    /// Starts a push payment and returns its id.
    async fn initiate(&self, request: PaymentRequest) -> Result<u64>;
    async fn mark_paid(&self, appointment_id: u64) -> Result<()>;
}

#[async_trait]
impl StatusSource for PaymentCoordinator {
    async fn check_status(&self, payment_id: u64) -> Result<StatusReport> {
        PaymentCoordinator::check_status(self, payment_id).await
    }
}

/// Cooperative cancellation for a polling loop.
#[derive(Clone)]
pub struct Cancellation(watch::Receiver<bool>);

impl Cancellation {
    /// Returns a token together with the handle that triggers it.
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// A token that is never triggered.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                // Sender gone: nobody can cancel any more.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(StatusReport),
    /// Any terminal status other than completed.
    Failed(StatusReport),
    /// Attempts exhausted. The payment may still settle; check again later.
    TimedOut {
        attempts: u32,
        last: Option<StatusReport>,
    },
    Cancelled,
}

/// Polls a payment's status on a fixed interval until it reaches a terminal
/// state, the attempts run out, or the caller cancels.
///
/// Each check completes before the next delay starts, so checks never overlap.
#[derive(Debug, Clone, Copy)]
pub struct StatusPoller {
    interval: Duration,
    max_attempts: u32,
}

impl StatusPoller {
    pub fn new(config: PollConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts,
        }
    }

    pub async fn poll<S>(
        &self,
        source: &S,
        payment_id: u64,
        mut cancel: Cancellation,
    ) -> Result<PollOutcome>
    where
        S: StatusSource + ?Sized,
    {
        let mut last = None;
        for attempt in 1..=self.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => {
                    debug!("Polling payment {payment_id} cancelled after {} attempts", attempt - 1);
                    return Ok(PollOutcome::Cancelled);
                }
            }

            let report = match source.check_status(payment_id).await {
                Ok(report) => report,
                Err(e @ CoreError::NotFound { .. }) => return Err(e),
                Err(e) => {
                    warn!("Status check {attempt} for payment {payment_id} failed: {e}");
                    continue;
                }
            };

            debug!(
                "Payment {payment_id} status {} (attempt {attempt}/{})",
                report.status, self.max_attempts
            );
            if report.terminal {
                return Ok(if report.status == PaymentStatus::Completed {
                    PollOutcome::Completed(report)
                } else {
                    PollOutcome::Failed(report)
                });
            }
            last = Some(report);
        }

        info!(
            "Payment {payment_id} not settled after {} checks; its outcome is unknown for now",
            self.max_attempts
        );
        Ok(PollOutcome::TimedOut {
            attempts: self.max_attempts,
            last,
        })
    }
}

/// Result of a full checkout: the payment id and how polling ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutResult {
    pub payment_id: u64,
    pub outcome: PollOutcome,
    pub appointment_marked_paid: bool,
}

/// Initiates a payment, waits for its outcome and, once it completed, marks
/// the appointment it pays for as paid.
pub async fn checkout<A>(
    api: &A,
    poller: &StatusPoller,
    request: PaymentRequest,
    cancel: Cancellation,
) -> Result<CheckoutResult>
where
    A: CheckoutApi + ?Sized,
{
    let appointment_id = request.appointment_id;
    let payment_id = api.initiate(request).await?;
    info!("Payment {payment_id} initiated, waiting for the payer");

    let outcome = poller.poll(api, payment_id, cancel).await?;
    let mut appointment_marked_paid = false;
    if let (PollOutcome::Completed(_), Some(appointment_id)) = (&outcome, appointment_id) {
        api.mark_paid(appointment_id).await?;
        appointment_marked_paid = true;
    }

    Ok(CheckoutResult {
        payment_id,
        outcome,
        appointment_marked_paid,
    })
}
