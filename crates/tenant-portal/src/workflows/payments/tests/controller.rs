use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use super::common::*;
use crate::workflows::payments::controller::{FailureReason, PaymentError, PaymentOutcome};
use crate::workflows::payments::domain::{
    GatewayStatus, InitiationReceipt, PaymentRequest, PaymentStatus, StatusReport,
    TransactionRef, ValidationError,
};

#[tokio::test(start_paused = true)]
async fn first_successful_poll_settles_payment() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx123").with_statuses([Ok(
        StatusReport::success(),
    )]));
    let controller = controller(&gateway, 24);

    controller.start(request()).expect("valid request");
    assert_eq!(controller.status(), PaymentStatus::Initiating);

    let outcome = controller.wait_settled().await.expect("settled");

    assert_eq!(
        outcome,
        PaymentOutcome::Succeeded {
            transaction_ref: TransactionRef("tx123".to_string()),
            message: None,
        }
    );
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status, PaymentStatus::Success);
    assert_eq!(snapshot.attempts, 1);
    assert_eq!(snapshot.external_id.as_deref(), Some("lease-deposit-7"));
    assert_eq!(snapshot.payer.as_deref(), Some(PAYER));

    tokio::time::sleep(INTERVAL * 4).await;
    assert_eq!(gateway.status_calls(), 1);
    assert_eq!(gateway.token_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn times_out_after_exactly_max_attempts() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-slow"));
    let controller = controller(&gateway, 5);

    controller.start(request()).expect("valid request");
    let outcome = controller.wait_settled().await.expect("settled");

    assert_eq!(
        outcome,
        PaymentOutcome::TimedOut {
            transaction_ref: TransactionRef("tx-slow".to_string()),
            attempts: 5,
        }
    );
    assert_eq!(controller.status(), PaymentStatus::Timeout);
    assert_eq!(gateway.status_calls(), 5);

    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(gateway.status_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_bounded_by_interval_times_attempts() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-bounded"));
    let controller = controller(&gateway, 4);
    let started = tokio::time::Instant::now();

    controller.start(request()).expect("valid request");
    controller.wait_settled().await.expect("settled");

    assert!(started.elapsed() <= controller.policy().deadline() + Duration::from_millis(1));
}

#[tokio::test(start_paused = true)]
async fn hung_status_checks_time_out_at_the_deadline() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-hung").hanging());
    let controller = controller(&gateway, 5);

    controller.start(request()).expect("valid request");
    wait_for_status(&controller, PaymentStatus::PendingConfirmation).await;
    let entered = tokio::time::Instant::now();
    let outcome = controller.wait_settled().await.expect("settled");

    assert_eq!(
        outcome,
        PaymentOutcome::TimedOut {
            transaction_ref: TransactionRef("tx-hung".to_string()),
            attempts: 5,
        }
    );
    assert!(entered.elapsed() <= controller.policy().deadline() + Duration::from_millis(1));
    assert_eq!(gateway.status_calls(), 5);

    tokio::time::sleep(controller.policy().deadline() * 10).await;
    assert_eq!(controller.status(), PaymentStatus::Timeout);
    assert_eq!(gateway.status_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn slow_status_checks_do_not_stretch_the_schedule() {
    let gateway = Arc::new(
        ScriptedGateway::accepting("tx-slow-answers").with_status_delay(Duration::from_secs(1)),
    );
    let controller = controller(&gateway, 4);

    controller.start(request()).expect("valid request");
    wait_for_status(&controller, PaymentStatus::PendingConfirmation).await;
    let entered = tokio::time::Instant::now();
    let outcome = controller.wait_settled().await.expect("settled");

    assert_eq!(outcome.status(), PaymentStatus::Timeout);
    assert_eq!(controller.snapshot().attempts, 4);
    assert!(entered.elapsed() <= controller.policy().deadline());
}

#[tokio::test]
async fn non_positive_amount_fails_before_any_gateway_call() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-never"));
    let controller = controller(&gateway, 24);

    let err = controller
        .start(PaymentRequest::new(dec!(0), "XAF", PAYER))
        .expect_err("zero amount");

    assert!(matches!(
        err,
        PaymentError::Validation(ValidationError::NonPositiveAmount(_))
    ));
    assert_eq!(controller.status(), PaymentStatus::Idle);
    assert_eq!(gateway.token_calls(), 0);
    assert_eq!(gateway.initiate_calls(), 0);
}

#[test]
fn start_requires_a_runtime() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-none"));
    let controller = controller(&gateway, 24);

    assert!(matches!(
        controller.start(request()),
        Err(PaymentError::NoRuntime)
    ));
    assert_eq!(controller.status(), PaymentStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn terminal_status_never_changes_without_reset() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-done").with_statuses([Ok(
        StatusReport::success(),
    )]));
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");
    controller.wait_settled().await.expect("settled");

    assert!(matches!(
        controller.start(request()),
        Err(PaymentError::InvalidState {
            status: PaymentStatus::Success,
            action: "start",
        })
    ));
    assert!(matches!(
        controller.cancel(),
        Err(PaymentError::InvalidState { .. })
    ));

    tokio::time::sleep(INTERVAL * 30).await;
    assert_eq!(controller.status(), PaymentStatus::Success);
    assert_eq!(gateway.status_calls(), 1);
    assert_eq!(gateway.initiate_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn provider_failure_settles_as_declined() {
    let gateway = Arc::new(
        ScriptedGateway::accepting("tx-declined")
            .with_statuses([Ok(StatusReport::pending()), Ok(StatusReport::failed("LOW_BALANCE"))]),
    );
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");

    let outcome = controller.wait_settled().await.expect("settled");
    assert_eq!(
        outcome,
        PaymentOutcome::Failed {
            transaction_ref: Some(TransactionRef("tx-declined".to_string())),
            reason: FailureReason::Declined {
                message: "LOW_BALANCE".to_string(),
            },
        }
    );
    assert_eq!(gateway.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn initiation_error_fails_without_polling() {
    let gateway = Arc::new(ScriptedGateway::new(Err("payer not found".to_string())));
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");

    let outcome = controller.wait_settled().await.expect("settled");
    match outcome {
        PaymentOutcome::Failed {
            transaction_ref: None,
            reason: FailureReason::Initiation { message },
        } => assert!(message.contains("payer not found"), "{message}"),
        other => panic!("expected initiation failure, got {other:?}"),
    }
    assert_eq!(controller.status(), PaymentStatus::Failed);
    assert_eq!(gateway.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn token_failure_fails_initiation() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-token").with_token_failure("bad secret"));
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");

    let outcome = controller.wait_settled().await.expect("settled");
    assert!(matches!(
        outcome,
        PaymentOutcome::Failed {
            reason: FailureReason::Initiation { .. },
            ..
        }
    ));
    assert_eq!(gateway.initiate_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn immediate_gateway_answers_skip_polling() {
    let gateway = Arc::new(ScriptedGateway::new(Ok(InitiationReceipt {
        transaction_ref: TransactionRef("tx-instant".to_string()),
        initial_status: GatewayStatus::Success,
        message: Some("paid".to_string()),
    })));
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");

    let outcome = controller.wait_settled().await.expect("settled");
    assert_eq!(outcome.status(), PaymentStatus::Success);
    assert_eq!(gateway.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn poll_errors_count_as_pending_attempts() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-flaky").with_statuses([
        Err("connection reset".to_string()),
        Err("502 bad gateway".to_string()),
        Ok(StatusReport::success()),
    ]));
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");

    let outcome = controller.wait_settled().await.expect("settled");
    assert_eq!(outcome.status(), PaymentStatus::Success);
    assert_eq!(controller.snapshot().attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn poll_errors_still_exhaust_the_budget() {
    let gateway = Arc::new(
        ScriptedGateway::accepting("tx-down")
            .with_statuses((0..3).map(|_| Err::<StatusReport, _>("unreachable".to_string()))),
    );
    let controller = controller(&gateway, 3);
    controller.start(request()).expect("valid request");

    let outcome = controller.wait_settled().await.expect("settled");
    assert_eq!(outcome.status(), PaymentStatus::Timeout);
    assert_eq!(gateway.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn expired_tokens_are_refreshed_before_polling() {
    let gateway = Arc::new(
        ScriptedGateway::accepting("tx-refresh")
            .with_token_ttl(10)
            .with_statuses([
                Ok(StatusReport::pending()),
                Ok(StatusReport::pending()),
                Ok(StatusReport::success()),
            ]),
    );
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");
    controller.wait_settled().await.expect("settled");

    assert_eq!(gateway.token_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_polling_and_keeps_status() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-cancel"));
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");
    wait_for_status(&controller, PaymentStatus::PendingConfirmation).await;
    tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(100)).await;

    let notice = controller.cancel().expect("cancellable");
    assert_eq!(notice.status, PaymentStatus::PendingConfirmation);
    assert_eq!(
        notice.transaction_ref,
        Some(TransactionRef("tx-cancel".to_string()))
    );
    assert!(!notice.warning.is_empty());

    let polled = gateway.status_calls();
    tokio::time::sleep(INTERVAL * 20).await;
    assert_eq!(gateway.status_calls(), polled);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status, PaymentStatus::PendingConfirmation);
    assert!(snapshot.cancelled);
    assert!(snapshot.outcome.is_none());
    assert_eq!(controller.wait_settled().await, None);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_initiation_discards_late_receipt() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let gateway = Arc::new(ScriptedGateway::accepting("tx-late").with_initiate_gate(gate.clone()));
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");

    let notice = controller.cancel().expect("cancellable while initiating");
    assert_eq!(notice.status, PaymentStatus::Initiating);
    gate.notify_one();

    let mut receiver = controller.subscribe();
    receiver
        .wait_for(|snapshot| snapshot.transaction_ref.is_some())
        .await
        .expect("controller alive");

    tokio::time::sleep(INTERVAL * 5).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status, PaymentStatus::Initiating);
    assert_eq!(
        snapshot.transaction_ref,
        Some(TransactionRef("tx-late".to_string()))
    );
    assert!(snapshot.cancelled);
    assert_eq!(gateway.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_returns_to_idle_and_allows_restart() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-reset"));
    let controller = controller(&gateway, 24);
    controller.start(request()).expect("valid request");
    wait_for_status(&controller, PaymentStatus::PendingConfirmation).await;
    tokio::time::sleep(INTERVAL + Duration::from_millis(100)).await;

    controller.reset();
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status, PaymentStatus::Idle);
    assert_eq!(snapshot.transaction_ref, None);
    assert_eq!(snapshot.attempts, 0);
    assert!(!snapshot.cancelled);

    let polled = gateway.status_calls();
    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(gateway.status_calls(), polled);
    assert_eq!(controller.status(), PaymentStatus::Idle);

    controller.start(request()).expect("restart from idle");
    assert_eq!(controller.status(), PaymentStatus::Initiating);
    wait_for_status(&controller, PaymentStatus::PendingConfirmation).await;
    assert_eq!(gateway.initiate_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn observer_sees_each_outcome_once() {
    let observer = Arc::new(RecordingObserver::default());
    let gateway = Arc::new(ScriptedGateway::accepting("tx-observed").with_statuses([
        Ok(StatusReport::pending()),
        Ok(StatusReport::success()),
    ]));
    let controller = controller(&gateway, 24).with_observer(observer.clone());

    controller.start(request()).expect("valid request");
    controller.wait_settled().await.expect("settled");
    tokio::time::sleep(INTERVAL * 5).await;

    let seen = observer.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status, PaymentStatus::Success);
    assert_eq!(seen[0].attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn subscribers_observe_each_transition() {
    let gateway = Arc::new(ScriptedGateway::accepting("tx-watch").with_statuses([
        Ok(StatusReport::pending()),
        Ok(StatusReport::success()),
    ]));
    let controller = controller(&gateway, 24);
    let mut receiver = controller.subscribe();
    assert_eq!(receiver.borrow_and_update().status, PaymentStatus::Idle);

    controller.start(request()).expect("valid request");
    let mut seen = vec![receiver.borrow_and_update().status];
    while !seen.last().is_some_and(|status| status.is_terminal()) {
        receiver.changed().await.expect("controller alive");
        let status = receiver.borrow_and_update().status;
        if seen.last() != Some(&status) {
            seen.push(status);
        }
    }

    assert_eq!(
        seen,
        vec![
            PaymentStatus::Initiating,
            PaymentStatus::PendingConfirmation,
            PaymentStatus::Success,
        ]
    );
}
