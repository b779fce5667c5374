mod common;

use common::{PATIENT, PHONE, PROVIDER, SERVICE, callback, checkout_id, harness, merchant_id};
use medibook::application::booking::BookingRequest;
use medibook::application::payments::PaymentRequest;
use medibook::application::reconciliation::{Cancellation, PollOutcome, StatusPoller, checkout};
use medibook::config::PollConfig;
use medibook::domain::payment::PaymentStatus;
use std::time::Duration;

fn pay(appointment_id: Option<u64>) -> PaymentRequest {
    PaymentRequest {
        service_id: SERVICE,
        patient_id: PATIENT,
        phone_number: PHONE.to_string(),
        appointment_id,
    }
}

#[tokio::test(start_paused = true)]
async fn test_polling_times_out_without_touching_payment() {
    let h = harness().await;
    let payment = h.clinic.payments.initiate_payment(pay(None)).await.unwrap().payment;

    let poller = StatusPoller::new(PollConfig::default());
    let started = tokio::time::Instant::now();
    let outcome = poller
        .poll(&h.clinic, payment.id, Cancellation::never())
        .await
        .unwrap();

    match outcome {
        PollOutcome::TimedOut { attempts, last } => {
            assert_eq!(attempts, 20);
            assert_eq!(last.unwrap().status, PaymentStatus::Processing);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(started.elapsed(), Duration::from_secs(60));

    let after = h.clinic.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(after, payment);
}

#[tokio::test(start_paused = true)]
async fn test_checkout_marks_appointment_paid() {
    let h = harness().await;
    let appointment = h
        .clinic
        .booking
        .book_appointment(BookingRequest {
            patient_id: PATIENT,
            provider_id: PROVIDER,
            slot_id: 1,
            reason: None,
            service_id: Some(SERVICE),
        })
        .await
        .unwrap();

    let payments = h.clinic.payments.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        payments
            .handle_callback(callback(&merchant_id(1), &checkout_id(1), 0, Some("NLJ7RT61SV")))
            .await;
    });

    let poller = StatusPoller::new(PollConfig::default());
    let result = checkout(&h.clinic, &poller, pay(Some(appointment.id)), Cancellation::never())
        .await
        .unwrap();

    assert!(matches!(result.outcome, PollOutcome::Completed(_)));
    assert!(result.appointment_marked_paid);
    assert!(h.clinic.booking.get_appointment(appointment.id).await.unwrap().paid);
}

#[tokio::test(start_paused = true)]
async fn test_checkout_reports_failure() {
    let h = harness().await;

    let payments = h.clinic.payments.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(4)).await;
        payments
            .handle_callback(callback(&merchant_id(1), &checkout_id(1), 1032, None))
            .await;
    });

    let poller = StatusPoller::new(PollConfig::default());
    let result = checkout(&h.clinic, &poller, pay(None), Cancellation::never())
        .await
        .unwrap();

    match result.outcome {
        PollOutcome::Failed(report) => {
            assert_eq!(report.status, PaymentStatus::Failed);
            assert_eq!(report.description.as_deref(), Some("Request cancelled by user"));
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    assert!(!result.appointment_marked_paid);
}
