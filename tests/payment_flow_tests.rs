mod common;

use chrono::TimeDelta;
use common::{
    PATIENT, PHONE, PROVIDER, PushBehaviour, SERVICE, callback, checkout_id, harness, merchant_id,
};
use medibook::application::booking::BookingRequest;
use medibook::application::payments::{PaymentRequest, RESULT_UNKNOWN_AT_GATEWAY};
use medibook::domain::gateway::{CallbackAck, QueryResult};
use medibook::domain::money::Amount;
use medibook::domain::payment::{PaymentFilter, PaymentOutcome, PaymentStatus};
use medibook::domain::service::Service;
use medibook::error::{CoreError, GatewayError};
use rust_decimal_macros::dec;
use serde_json::json;

fn pay(appointment_id: Option<u64>) -> PaymentRequest {
    PaymentRequest {
        service_id: SERVICE,
        patient_id: PATIENT,
        phone_number: PHONE.to_string(),
        appointment_id,
    }
}

async fn booked(h: &common::Harness, slot_id: u64) -> u64 {
    h.clinic
        .booking
        .book_appointment(BookingRequest {
            patient_id: PATIENT,
            provider_id: PROVIDER,
            slot_id,
            reason: None,
            service_id: Some(SERVICE),
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_successful_payment_scenario() {
    let h = harness().await;
    let appointment_id = booked(&h, 1).await;

    let initiation = h
        .clinic
        .payments
        .initiate_payment(pay(Some(appointment_id)))
        .await
        .unwrap();
    let payment = initiation.payment;
    assert_eq!(payment.status, PaymentStatus::Processing);
    assert_eq!(payment.amount.value(), dec!(500));
    assert_eq!(payment.phone_number.as_str(), "254712345678");
    assert_eq!(payment.merchant_request_id, merchant_id(1));
    assert_eq!(payment.checkout_request_id, checkout_id(1));

    {
        let pushes = h.gateway.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].amount, 500);
        assert_eq!(pushes[0].phone_number, "254712345678");
        assert_eq!(pushes[0].account_reference, payment.transaction_ref);
    }

    let ack = h
        .clinic
        .payments
        .handle_callback(callback(&merchant_id(1), &checkout_id(1), 0, Some("NLJ7RT61SV")))
        .await;
    assert_eq!(ack, CallbackAck::accepted());

    let settled = h.clinic.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(settled.status, PaymentStatus::Completed);
    assert_eq!(settled.mpesa_receipt.as_deref(), Some("NLJ7RT61SV"));
    assert_eq!(settled.result_code, Some(0));
    assert!(settled.paid_at.is_some());

    let appointment = h.clinic.booking.mark_paid(appointment_id).await.unwrap();
    assert!(appointment.paid);
}

#[tokio::test]
async fn test_failed_payment_scenario() {
    let h = harness().await;
    let payment = h.clinic.payments.initiate_payment(pay(None)).await.unwrap().payment;

    let ack = h
        .clinic
        .payments
        .handle_callback(callback("", &checkout_id(1), 1032, None))
        .await;
    assert_eq!(ack.result_code, 0);

    let report = h.clinic.payments.check_status(payment.id).await.unwrap();
    assert_eq!(report.status, PaymentStatus::Failed);
    assert!(report.terminal);
    assert_eq!(report.description.as_deref(), Some("Request cancelled by user"));

    // A late success for a failed payment changes nothing.
    h.clinic
        .payments
        .handle_callback(callback(&merchant_id(1), &checkout_id(1), 0, Some("LATE")))
        .await;
    let payment = h.clinic.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.mpesa_receipt, None);
}

#[tokio::test]
async fn test_duplicate_callback_is_idempotent() {
    let h = harness().await;
    let payment = h.clinic.payments.initiate_payment(pay(None)).await.unwrap().payment;

    let first = callback(&merchant_id(1), &checkout_id(1), 0, Some("FIRST"));
    let second = callback(&merchant_id(1), &checkout_id(1), 0, Some("SECOND"));
    assert_eq!(h.clinic.payments.handle_callback(first).await, CallbackAck::accepted());
    let settled = h.clinic.payments.get_payment(payment.id).await.unwrap();

    assert_eq!(h.clinic.payments.handle_callback(second).await, CallbackAck::accepted());
    let after = h.clinic.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(after.mpesa_receipt.as_deref(), Some("FIRST"));
    assert_eq!(after.version, settled.version);
    assert_eq!(after.paid_at, settled.paid_at);
}

#[tokio::test]
async fn test_callback_matches_on_merchant_id_only() {
    let h = harness().await;
    let payment = h.clinic.payments.initiate_payment(pay(None)).await.unwrap().payment;

    let ack = h
        .clinic
        .payments
        .handle_callback(callback(&merchant_id(1), "", 0, Some("BYMERCHANT")))
        .await;
    assert_eq!(ack, CallbackAck::accepted());
    let payment = h.clinic.payments.get_payment(payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_callback_before_initiation_is_applied() {
    let h = harness().await;

    // The gateway's callback wins the race against the initiation update.
    let ack = h
        .clinic
        .payments
        .handle_callback(callback(&merchant_id(1), &checkout_id(1), 0, Some("EARLY")))
        .await;
    assert_eq!(ack, CallbackAck::not_found());

    let initiation = h.clinic.payments.initiate_payment(pay(None)).await.unwrap();
    assert_eq!(initiation.payment.status, PaymentStatus::Completed);
    assert_eq!(initiation.payment.mpesa_receipt.as_deref(), Some("EARLY"));
}

#[tokio::test]
async fn test_stray_callbacks_do_not_crowd_out_an_early_one() {
    let h = harness().await;

    for n in 0..600 {
        let ack = h
            .clinic
            .payments
            .handle_callback(callback(&format!("stray-{n}"), &format!("ws_CO_stray_{n}"), 1032, None))
            .await;
        assert_eq!(ack, CallbackAck::not_found());
    }

    h.clinic
        .payments
        .handle_callback(callback(&merchant_id(1), &checkout_id(1), 0, Some("EARLY")))
        .await;

    let initiation = h.clinic.payments.initiate_payment(pay(None)).await.unwrap();
    assert_eq!(initiation.payment.status, PaymentStatus::Completed);
    assert_eq!(initiation.payment.mpesa_receipt.as_deref(), Some("EARLY"));
}

#[tokio::test]
async fn test_unknown_callback_is_acknowledged() {
    let h = harness().await;
    let ack = h
        .clinic
        .payments
        .handle_callback(callback("nope", "nope", 0, None))
        .await;
    assert_eq!(ack, CallbackAck::not_found());

    let ack = h.clinic.payments.handle_callback(json!({ "Body": {} })).await;
    assert_eq!(ack.result_code, 1);
    assert!(ack.result_desc.starts_with("Malformed callback"));
}

#[tokio::test]
async fn test_transport_failure_leaves_payment_unknown() {
    let h = harness().await;
    h.gateway.set_behaviour(PushBehaviour::Transport);

    let result = h.clinic.payments.initiate_payment(pay(None)).await;
    let (payment_id, source) = match result {
        Err(CoreError::PaymentNotInitiated { payment_id, source }) => (payment_id, source),
        other => panic!("expected PaymentNotInitiated, got {other:?}"),
    };
    assert!(source.ambiguous);

    let payment = h.clinic.payments.get_payment(payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Unknown);
    assert!(!payment.status.is_terminal());

    // Without a gateway reference there is nothing to query.
    let summary = h.clinic.payments.reconcile(TimeDelta::zero()).await.unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.needs_review, 1);
    let payment = h.clinic.payments.get_payment(payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Unknown);
}

#[tokio::test]
async fn test_rejected_push_fails_payment() {
    let h = harness().await;
    h.gateway
        .set_behaviour(PushBehaviour::Reject("Invalid PhoneNumber".to_string()));

    let result = h.clinic.payments.initiate_payment(pay(None)).await;
    let (payment_id, source) = match result {
        Err(CoreError::PaymentNotInitiated { payment_id, source }) => (payment_id, source),
        other => panic!("expected PaymentNotInitiated, got {other:?}"),
    };
    assert!(!source.ambiguous);

    let payment = h.clinic.payments.get_payment(payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.result_desc.as_deref(), Some("Invalid PhoneNumber"));
}

#[tokio::test]
async fn test_initiation_validates_before_pushing() {
    let h = harness().await;
    h.clinic
        .stores
        .services
        .store(Service {
            id: 2,
            name: "Surgery".to_string(),
            price: Amount::new(dec!(80000)).unwrap(),
        })
        .await
        .unwrap();

    let too_large = PaymentRequest {
        service_id: 2,
        ..pay(None)
    };
    let result = h.clinic.payments.initiate_payment(too_large).await;
    assert!(matches!(result, Err(CoreError::Validation { .. })));

    let bad_phone = PaymentRequest {
        phone_number: "07-12ab".to_string(),
        ..pay(None)
    };
    let result = h.clinic.payments.initiate_payment(bad_phone).await;
    assert!(matches!(result, Err(CoreError::Validation { ref field, .. }) if field == "phone_number"));

    let no_service = PaymentRequest {
        service_id: 9,
        ..pay(None)
    };
    let result = h.clinic.payments.initiate_payment(no_service).await;
    assert!(matches!(result, Err(CoreError::NotFound { .. })));

    assert_eq!(h.gateway.push_count(), 0);
    let all = h.clinic.payments.list_payments(&PaymentFilter::default()).await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn test_cancelled_appointment_cannot_be_paid() {
    let h = harness().await;
    let appointment_id = booked(&h, 2).await;
    h.clinic.booking.cancel_appointment(appointment_id).await.unwrap();

    let result = h.clinic.payments.initiate_payment(pay(Some(appointment_id))).await;
    assert!(matches!(result, Err(CoreError::InvalidTransition { .. })));
    assert_eq!(h.gateway.push_count(), 0);
}

#[tokio::test]
async fn test_reconcile_resolves_stale_processing_payments() {
    let h = harness().await;
    let completed = h.clinic.payments.initiate_payment(pay(None)).await.unwrap().payment;
    let missing = h.clinic.payments.initiate_payment(pay(None)).await.unwrap().payment;
    let waiting = h.clinic.payments.initiate_payment(pay(None)).await.unwrap().payment;

    // Candidates are visited newest first.
    h.gateway.queue_query(Ok(QueryResult::InProgress));
    h.gateway
        .queue_query(Ok(QueryResult::NotFound("Invalid CheckoutRequestID".to_string())));
    h.gateway.queue_query(Ok(QueryResult::Final(PaymentOutcome::Completed {
        receipt: None,
        result_code: 0,
        result_desc: "The service request is processed successfully.".to_string(),
    })));

    let summary = h.clinic.payments.reconcile(TimeDelta::zero()).await.unwrap();
    assert_eq!(summary.checked, 3);
    assert_eq!(summary.resolved, 2);
    assert_eq!(summary.in_progress, 1);

    let status = |id| {
        let payments = h.clinic.payments.clone();
        async move { payments.get_payment(id).await.unwrap() }
    };
    assert_eq!(status(completed.id).await.status, PaymentStatus::Completed);
    let missing = status(missing.id).await;
    assert_eq!(missing.status, PaymentStatus::Failed);
    assert_eq!(missing.result_code, Some(RESULT_UNKNOWN_AT_GATEWAY));
    assert_eq!(status(waiting.id).await.status, PaymentStatus::Processing);
}

#[tokio::test]
async fn test_reconcile_skips_fresh_processing_payments() {
    let h = harness().await;
    h.clinic.payments.initiate_payment(pay(None)).await.unwrap();
    h.gateway.queue_query(Err(GatewayError::transport("down")));

    let summary = h.clinic.payments.reconcile(TimeDelta::minutes(5)).await.unwrap();
    assert_eq!(summary.checked, 0);
}

#[tokio::test]
async fn test_recent_payments_newest_first() {
    let h = harness().await;
    for _ in 0..6 {
        h.clinic.payments.initiate_payment(pay(None)).await.unwrap();
    }

    let recent = h.clinic.payments.recent_payments(PATIENT).await.unwrap();
    assert_eq!(recent.len(), 5);
    assert_eq!(recent.iter().map(|p| p.id).collect::<Vec<_>>(), vec![6, 5, 4, 3, 2]);
    assert!(h.clinic.payments.recent_payments(PATIENT + 1).await.unwrap().is_empty());

    let filter = PaymentFilter {
        status: Some(PaymentStatus::Processing),
        ..Default::default()
    };
    assert_eq!(h.clinic.payments.list_payments(&filter).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_status_of_missing_payment() {
    let h = harness().await;
    let result = h.clinic.payments.check_status(404).await;
    assert!(matches!(result, Err(CoreError::NotFound { entity: "Payment", .. })));
}
