//! End-to-end payment lifecycle tests against the in-memory store and a
//! scripted provider adapter, exercising capture, refunds, idempotent
//! submission, and webhook reconciliation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rentpay_backend::domain::{PaymentStatus, RefundStatus};
use rentpay_backend::error::{AppError, AppResult};
use rentpay_backend::idempotency::IdempotencyGuard;
use rentpay_backend::orchestrator::{
    CreateSessionRequest, PaymentOrchestrator, ProcessPaymentRequest, RefundOrchestrator,
    RefundRequest,
};
use rentpay_backend::providers::registry::{ProviderName, ProviderRegistry};
use rentpay_backend::providers::traits::PaymentProvider;
use rentpay_backend::providers::types::{
    CaptureOutcome, CaptureRequest, EventKind, ProviderSession, RefundCall, RefundOutcome,
    RemoteStatus, SessionRequest, WebhookEvent,
};
use rentpay_backend::reconciler::{ReconcileOutcome, WebhookReconciler};
use rentpay_backend::reservations::{Reservation, ReservationDirectory};
use rentpay_backend::store::memory::InMemoryPaymentStore;
use rentpay_backend::store::payments::{NewRefund, PaymentStore};

/// Provider whose responses are scripted per test, with call counters.
struct ScriptedProvider {
    session_seq: AtomicU32,
    capture_calls: AtomicU32,
    status_calls: AtomicU32,
    refund_calls: AtomicU32,
    capture_result: Mutex<CaptureOutcome>,
    refund_result: Mutex<RefundOutcome>,
    remote_status: Mutex<Option<RemoteStatus>>,
    verify_ok: AtomicBool,
    next_event: Mutex<Option<WebhookEvent>>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            session_seq: AtomicU32::new(0),
            capture_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            refund_calls: AtomicU32::new(0),
            capture_result: Mutex::new(CaptureOutcome::Approved {
                transaction_id: "txn-1".to_string(),
            }),
            refund_result: Mutex::new(RefundOutcome::Processed {
                external_refund_id: "ref-1".to_string(),
            }),
            remote_status: Mutex::new(None),
            verify_ok: AtomicBool::new(true),
            next_event: Mutex::new(None),
        }
    }

    fn set_capture(&self, outcome: CaptureOutcome) {
        *self.capture_result.lock().unwrap() = outcome;
    }

    fn set_refund(&self, outcome: RefundOutcome) {
        *self.refund_result.lock().unwrap() = outcome;
    }

    fn set_remote_status(&self, status: Option<RemoteStatus>) {
        *self.remote_status.lock().unwrap() = status;
    }

    fn set_event(&self, event: WebhookEvent) {
        *self.next_event.lock().unwrap() = Some(event);
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn name(&self) -> ProviderName {
        ProviderName::CardDirect
    }

    async fn create_session(&self, _request: SessionRequest) -> AppResult<ProviderSession> {
        let n = self.session_seq.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderSession {
            session_id: format!("sess-{}", n),
            checkout_url: format!("https://pay.example/checkout/sess-{}", n),
        })
    }

    async fn capture(&self, _request: CaptureRequest) -> AppResult<CaptureOutcome> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.capture_result.lock().unwrap().clone())
    }

    async fn fetch_status(&self, _transaction_id: &str) -> AppResult<Option<RemoteStatus>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.remote_status.lock().unwrap())
    }

    async fn refund(&self, _call: RefundCall) -> AppResult<RefundOutcome> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.refund_result.lock().unwrap().clone())
    }

    async fn verify_webhook(&self, _headers: &HeaderMap, _payload: &[u8]) -> AppResult<bool> {
        Ok(self.verify_ok.load(Ordering::SeqCst))
    }

    fn parse_event(&self, _payload: &[u8]) -> AppResult<WebhookEvent> {
        self.next_event
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AppError::validation("unparseable event payload"))
    }
}

struct FixedDirectory {
    reservations: HashMap<i64, Reservation>,
}

#[async_trait]
impl ReservationDirectory for FixedDirectory {
    async fn find(&self, reservation_id: i64) -> AppResult<Option<Reservation>> {
        Ok(self.reservations.get(&reservation_id).cloned())
    }
}

struct Harness {
    provider: Arc<ScriptedProvider>,
    store: Arc<InMemoryPaymentStore>,
    payments: Arc<PaymentOrchestrator>,
    refunds: Arc<RefundOrchestrator>,
    reconciler: Arc<WebhookReconciler>,
}

fn harness() -> Harness {
    let provider = Arc::new(ScriptedProvider::new());
    let store = Arc::new(InMemoryPaymentStore::new());
    let registry = Arc::new(ProviderRegistry::new().register(provider.clone()));
    let directory = Arc::new(FixedDirectory {
        reservations: HashMap::from([
            (
                1,
                Reservation {
                    id: 1,
                    total_amount: dec!(100.00),
                    currency: "USD".to_string(),
                    customer_email: Some("renter@example.com".to_string()),
                },
            ),
            (
                2,
                Reservation {
                    id: 2,
                    total_amount: dec!(250.50),
                    currency: "EUR".to_string(),
                    customer_email: None,
                },
            ),
        ]),
    });
    let idempotency = Arc::new(IdempotencyGuard::new(Duration::from_secs(3600)));

    let store_dyn: Arc<dyn PaymentStore> = store.clone();
    let payments = Arc::new(PaymentOrchestrator::new(
        store_dyn.clone(),
        registry.clone(),
        directory,
        idempotency,
    ));
    let refunds = Arc::new(RefundOrchestrator::new(store_dyn.clone(), registry.clone()));
    let reconciler = Arc::new(WebhookReconciler::new(store_dyn, registry));

    Harness {
        provider,
        store,
        payments,
        refunds,
        reconciler,
    }
}

fn session_request(reservation_id: i64) -> CreateSessionRequest {
    CreateSessionRequest {
        reservation_id,
        provider: ProviderName::CardDirect,
        amount: dec!(100.00),
        currency: "USD".to_string(),
        success_url: "https://rental.example/done".to_string(),
        cancel_url: "https://rental.example/cancel".to_string(),
    }
}

fn process_request(reservation_id: i64) -> ProcessPaymentRequest {
    ProcessPaymentRequest {
        reservation_id,
        provider: ProviderName::CardDirect,
        amount: dec!(100.00),
        currency: "USD".to_string(),
        payment_method_ref: "card-tok-1".to_string(),
    }
}

async fn captured_payment(h: &Harness) -> Uuid {
    let session = h.payments.create_session(session_request(1)).await.unwrap();
    let receipt = h
        .payments
        .process_payment(process_request(1), None)
        .await
        .unwrap();
    assert_eq!(receipt.payment_id, session.payment_id);
    assert_eq!(receipt.status, PaymentStatus::Completed);
    receipt.payment_id
}

#[tokio::test]
async fn session_capture_and_status_round_trip() {
    let h = harness();

    let session = h.payments.create_session(session_request(1)).await.unwrap();
    assert!(session.checkout_url.contains(&session.session_id));

    let stored = h
        .store
        .payment_by_id(session.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert_eq!(stored.transaction_id.as_deref(), Some("sess-0"));

    let receipt = h
        .payments
        .process_payment(process_request(1), None)
        .await
        .unwrap();
    assert_eq!(receipt.status, PaymentStatus::Completed);
    assert_eq!(receipt.transaction_id.as_deref(), Some("txn-1"));

    // Settled payments answer from the local record alone.
    let payment = h
        .payments
        .get_payment_status(session.payment_id)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(h.provider.status_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn session_amount_mismatch_is_rejected() {
    let h = harness();
    let mut request = session_request(1);
    request.amount = dec!(99.00);

    let err = h.payments.create_session(request).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(h
        .store
        .payment_by_reservation(1)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn session_for_unknown_reservation_is_not_found() {
    let h = harness();
    let err = h
        .payments
        .create_session(session_request(999))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
async fn second_session_for_claimed_reservation_conflicts() {
    let h = harness();
    h.payments.create_session(session_request(1)).await.unwrap();

    let err = h
        .payments
        .create_session(session_request(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
}

#[tokio::test]
async fn declined_capture_marks_payment_failed() {
    let h = harness();
    h.payments.create_session(session_request(1)).await.unwrap();
    h.provider.set_capture(CaptureOutcome::Declined {
        transaction_id: None,
        reason: "insufficient funds".to_string(),
    });

    let receipt = h
        .payments
        .process_payment(process_request(1), None)
        .await
        .unwrap();
    assert_eq!(receipt.status, PaymentStatus::Failed);
    assert_eq!(receipt.decline_reason.as_deref(), Some("insufficient funds"));

    // FAILED is terminal; a second submission is a state conflict.
    let err = h
        .payments
        .process_payment(process_request(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
    assert_eq!(h.provider.capture_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pending_approval_leaves_payment_pending() {
    let h = harness();
    h.payments.create_session(session_request(1)).await.unwrap();
    h.provider.set_capture(CaptureOutcome::PendingApproval {
        transaction_id: "txn-appr".to_string(),
        approval_url: "https://pay.example/approve/txn-appr".to_string(),
    });

    let receipt = h
        .payments
        .process_payment(process_request(1), None)
        .await
        .unwrap();
    assert_eq!(receipt.status, PaymentStatus::Pending);
    assert!(receipt.approval_url.is_some());

    let payment = h.store.payment_by_reservation(1).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.transaction_id.as_deref(), Some("txn-appr"));
}

#[tokio::test]
async fn duplicate_submission_with_same_key_charges_once() {
    let h = harness();
    h.payments.create_session(session_request(1)).await.unwrap();

    let first = h
        .payments
        .process_payment(process_request(1), Some("req-abc"))
        .await
        .unwrap();
    let second = h
        .payments
        .process_payment(process_request(1), Some("req-abc"))
        .await
        .unwrap();

    assert_eq!(h.provider.capture_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.transaction_id, second.transaction_id);
    assert_eq!(second.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn concurrent_submissions_with_same_key_charge_once() {
    let h = harness();
    h.payments.create_session(session_request(1)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let payments = h.payments.clone();
        handles.push(tokio::spawn(async move {
            payments
                .process_payment(process_request(1), Some("req-xyz"))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let receipt = handle.await.unwrap();
        assert_eq!(receipt.status, PaymentStatus::Completed);
        assert_eq!(receipt.transaction_id.as_deref(), Some("txn-1"));
    }
    assert_eq!(h.provider.capture_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resubmission_with_fresh_key_hits_state_guard() {
    let h = harness();
    h.payments.create_session(session_request(1)).await.unwrap();
    h.payments
        .process_payment(process_request(1), Some("key-1"))
        .await
        .unwrap();

    let err = h
        .payments
        .process_payment(process_request(1), Some("key-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
    assert_eq!(h.provider.capture_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn full_refund_makes_payment_refunded_and_terminal() {
    let h = harness();
    let payment_id = captured_payment(&h).await;

    let receipt = h
        .refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(100.00),
            reason: "trip cancelled".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(receipt.status, RefundStatus::Processed);

    let payment = h.store.payment_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);

    // REFUNDED is terminal: no further refunds, no backwards webhook edges.
    let err = h
        .refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(1.00),
            reason: "again".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));

    h.provider.set_event(WebhookEvent {
        kind: EventKind::PaymentFailed,
        transaction_id: "txn-1".to_string(),
        external_refund_id: None,
    });
    let outcome = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::StaleIgnored);
    let payment = h.store.payment_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn partial_refunds_accumulate_up_to_the_cap() {
    let h = harness();
    let payment_id = captured_payment(&h).await;

    h.provider.set_refund(RefundOutcome::Processed {
        external_refund_id: "ref-a".to_string(),
    });
    h.refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(30.00),
            reason: "late pickup".to_string(),
        })
        .await
        .unwrap();
    let payment = h.store.payment_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);

    // 30 + 80 > 100 is rejected before the provider is contacted.
    let calls_before = h.provider.refund_calls.load(Ordering::SeqCst);
    let err = h
        .refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(80.00),
            reason: "goodwill".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.provider.refund_calls.load(Ordering::SeqCst), calls_before);

    h.provider.set_refund(RefundOutcome::Processed {
        external_refund_id: "ref-b".to_string(),
    });
    h.refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(70.00),
            reason: "remainder".to_string(),
        })
        .await
        .unwrap();
    let payment = h.store.payment_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn refund_validation_happens_before_any_provider_call() {
    let h = harness();
    let payment_id = captured_payment(&h).await;

    let err = h
        .refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(0),
            reason: "zero".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = h
        .refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(10.00),
            reason: "   ".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.provider.refund_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn declined_refund_is_recorded_not_errored() {
    let h = harness();
    let payment_id = captured_payment(&h).await;
    h.provider.set_refund(RefundOutcome::Declined {
        reason: "window closed".to_string(),
    });

    let receipt = h
        .refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(50.00),
            reason: "customer request".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(receipt.status, RefundStatus::Declined);
    assert_eq!(receipt.decline_reason.as_deref(), Some("window closed"));

    // The payment is untouched by a declined refund.
    let payment = h.store.payment_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    let refund = h.store.refund_by_id(receipt.refund_id).await.unwrap().unwrap();
    assert_eq!(refund.status, RefundStatus::Declined);
}

#[tokio::test]
async fn status_read_through_advances_pending_payment() {
    let h = harness();
    let session = h.payments.create_session(session_request(1)).await.unwrap();
    h.provider.set_remote_status(Some(RemoteStatus::Completed));

    let payment = h
        .payments
        .get_payment_status(session.payment_id)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(h.provider.status_calls.load(Ordering::SeqCst), 1);

    // Once settled, further reads never touch the provider.
    h.payments
        .get_payment_status(session.payment_id)
        .await
        .unwrap();
    assert_eq!(h.provider.status_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn webhook_completes_pending_payment_exactly_once() {
    let h = harness();
    let session = h.payments.create_session(session_request(1)).await.unwrap();

    h.provider.set_event(WebhookEvent {
        kind: EventKind::PaymentCompleted,
        transaction_id: "sess-0".to_string(),
        external_refund_id: None,
    });

    let first = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(first, ReconcileOutcome::Applied);
    let payment = h
        .store
        .payment_by_id(session.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    // Redelivery of the same event is acknowledged without effect.
    let second = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(second, ReconcileOutcome::AlreadyCurrent);
}

#[tokio::test]
async fn webhook_for_unknown_transaction_is_acknowledged() {
    let h = harness();
    h.provider.set_event(WebhookEvent {
        kind: EventKind::PaymentCompleted,
        transaction_id: "txn-nobody".to_string(),
        external_refund_id: None,
    });

    let outcome = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::UnknownTransaction);
}

#[tokio::test]
async fn unverified_webhook_mutates_nothing() {
    let h = harness();
    let session = h.payments.create_session(session_request(1)).await.unwrap();
    h.provider.verify_ok.store(false, Ordering::SeqCst);
    h.provider.set_event(WebhookEvent {
        kind: EventKind::PaymentCompleted,
        transaction_id: "sess-0".to_string(),
        external_refund_id: None,
    });

    let err = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::WebhookVerificationFailed));

    let payment = h
        .store
        .payment_by_id(session.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn webhook_for_unregistered_provider_is_rejected() {
    let h = harness();
    let err = h
        .reconciler
        .handle("spacebucks", &HeaderMap::new(), b"{}")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownProvider(_)));
}

#[tokio::test]
async fn refund_webhook_settles_async_refund_and_payment() {
    let h = harness();
    let payment_id = captured_payment(&h).await;

    h.provider.set_refund(RefundOutcome::Pending {
        external_refund_id: "ref-async".to_string(),
    });
    let receipt = h
        .refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(100.00),
            reason: "booking error".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(receipt.status, RefundStatus::Pending);
    let payment = h.store.payment_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    h.provider.set_event(WebhookEvent {
        kind: EventKind::RefundProcessed,
        transaction_id: "txn-1".to_string(),
        external_refund_id: Some("ref-async".to_string()),
    });
    let outcome = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let refund = h.store.refund_by_id(receipt.refund_id).await.unwrap().unwrap();
    assert_eq!(refund.status, RefundStatus::Processed);
    assert!(refund.processed_at.is_some());
    let payment = h.store.payment_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);

    // Duplicate settlement notification is a no-op.
    let again = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(again, ReconcileOutcome::AlreadyCurrent);
}

#[tokio::test]
async fn pending_refund_reserves_the_refundable_amount() {
    let h = harness();
    let payment_id = captured_payment(&h).await;

    h.provider.set_refund(RefundOutcome::Pending {
        external_refund_id: "ref-p1".to_string(),
    });
    let first = h
        .refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(100.00),
            reason: "booking error".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(first.status, RefundStatus::Pending);

    // The full amount is spoken for while the first refund is in flight,
    // so a second full refund never reaches the provider.
    let calls_before = h.provider.refund_calls.load(Ordering::SeqCst);
    let err = h
        .refunds
        .refund(RefundRequest {
            payment_id,
            amount: dec!(100.00),
            reason: "booking error".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.provider.refund_calls.load(Ordering::SeqCst), calls_before);

    // Settling the one in-flight refund lands exactly at the cap.
    h.provider.set_event(WebhookEvent {
        kind: EventKind::RefundProcessed,
        transaction_id: "txn-1".to_string(),
        external_refund_id: Some("ref-p1".to_string()),
    });
    let outcome = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);
    let payment = h.store.payment_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(
        h.store.processed_refund_total(payment_id).await.unwrap(),
        dec!(100.00)
    );
}

#[tokio::test]
async fn settlement_past_the_captured_amount_marks_refund_failed() {
    let h = harness();
    let payment_id = captured_payment(&h).await;

    // Two full-amount refunds recorded as in flight, as rows predating the
    // reservation check would be. Settling both must not double the payout.
    for ext in ["ref-dup-1", "ref-dup-2"] {
        h.store
            .insert_refund(NewRefund {
                payment_id,
                external_refund_id: Some(ext.to_string()),
                amount: dec!(100.00),
                currency: "USD".to_string(),
                reason: "booking error".to_string(),
                status: RefundStatus::Pending,
                processed_at: None,
            })
            .await
            .unwrap();
    }

    h.provider.set_event(WebhookEvent {
        kind: EventKind::RefundProcessed,
        transaction_id: "txn-1".to_string(),
        external_refund_id: Some("ref-dup-1".to_string()),
    });
    let first = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(first, ReconcileOutcome::Applied);

    h.provider.set_event(WebhookEvent {
        kind: EventKind::RefundProcessed,
        transaction_id: "txn-1".to_string(),
        external_refund_id: Some("ref-dup-2".to_string()),
    });
    let second = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(second, ReconcileOutcome::OverRefundRejected);

    let rejected = h
        .store
        .refund_by_external_id("ref-dup-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rejected.status, RefundStatus::Failed);
    assert_eq!(
        h.store.processed_refund_total(payment_id).await.unwrap(),
        dec!(100.00)
    );
    let payment = h.store.payment_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn cancellation_webhook_closes_pending_payment() {
    let h = harness();
    let session = h.payments.create_session(session_request(1)).await.unwrap();

    h.provider.set_event(WebhookEvent {
        kind: EventKind::PaymentCancelled,
        transaction_id: "sess-0".to_string(),
        external_refund_id: None,
    });
    let outcome = h
        .reconciler
        .handle("card_direct", &HeaderMap::new(), b"{}")
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let payment = h
        .store
        .payment_by_id(session.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Cancelled);

    // CANCELLED is terminal; the reservation can no longer be charged.
    let err = h
        .payments
        .process_payment(process_request(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
    assert_eq!(h.provider.capture_calls.load(Ordering::SeqCst), 0);
}
