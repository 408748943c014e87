use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use microlending_ledger::sandbox::{RecordingNotifier, SandboxGateway, ScriptedOutcome};
use microlending_ledger::{
    Decision, ErrorKind, Event, InMemoryStore, LedgerConfig, LendingEngine, Loan, LoanApplication,
    LoanStatus, Money, PaymentError, Rate, RepaymentStatus, SafeTimeProvider, TimeSource,
};

struct Harness {
    engine: Arc<LendingEngine>,
    gateway: Arc<SandboxGateway>,
    store: Arc<InMemoryStore>,
    time: SafeTimeProvider,
}

fn harness_with(config: LedgerConfig) -> Harness {
    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let gateway = Arc::new(SandboxGateway::new());
    let store = Arc::new(InMemoryStore::new());
    let engine = LendingEngine::builder()
        .store(store.clone())
        .charger(gateway.clone())
        .disburser(gateway.clone())
        .notifier(Arc::new(RecordingNotifier::new()))
        .time(time.clone())
        .config(config)
        .build()
        .unwrap();
    Harness {
        engine: Arc::new(engine),
        gateway,
        store,
        time,
    }
}

/// zero interest so totals equal principal
fn flat_harness() -> Harness {
    let mut config = LedgerConfig::default();
    config.interest_config.daily_rate = Rate::ZERO;
    harness_with(config)
}

async fn disbursed(h: &Harness, borrower: &str, principal: i64, application: Option<LoanApplication>) -> Loan {
    let application = application
        .unwrap_or_else(|| LoanApplication::new(borrower, Money::from_major(principal), 30).payout_to("ba_1"));
    let loan = h.engine.apply_for_loan(application).await.unwrap();
    let outcome = h.engine.decide_loan(loan.id, Decision::Approve).await.unwrap();
    assert_eq!(outcome.loan().status, LoanStatus::Disbursed);
    outcome.loan().clone()
}

#[tokio::test]
async fn test_priced_at_application() {
    let h = harness_with(LedgerConfig::default());
    let loan = h
        .engine
        .apply_for_loan(LoanApplication::new("alice", Money::from_major(1_000), 30))
        .await
        .unwrap();
    assert_eq!(loan.total_repayment, Money::from_str_exact("1012.07").unwrap());
}

#[tokio::test]
async fn test_second_approval_is_invalid_and_disburses_once() {
    let h = flat_harness();
    let loan = disbursed(&h, "alice", 500, None).await;

    let err = h.engine.decide_loan(loan.id, Decision::Approve).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(h.gateway.disbursements().len(), 1);
}

#[tokio::test]
async fn test_overpayment_leaves_loan_unchanged() {
    let h = flat_harness();
    let loan = disbursed(&h, "alice", 500, None).await;
    h.engine.apply_repayment(loan.id, Money::from_major(450)).await.unwrap();
    let before = h.engine.get_loan(loan.id).await.unwrap();

    let err = h.engine.apply_repayment(loan.id, Money::from_major(100)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.remaining_balance(), Some(Money::from_major(50)));
    assert_eq!(err.to_body().remaining_balance, Some(Money::from_major(50)));

    assert_eq!(h.engine.get_loan(loan.id).await.unwrap(), before);
}

#[tokio::test]
async fn test_exact_final_payment_repays() {
    let h = flat_harness();
    let loan = disbursed(&h, "alice", 500, None).await;
    h.engine.apply_repayment(loan.id, Money::from_major(450)).await.unwrap();

    let loan = h.engine.apply_repayment(loan.id, Money::from_major(50)).await.unwrap();
    assert_eq!(loan.repaid_amount, Money::from_major(500));
    assert_eq!(loan.status, LoanStatus::Repaid);
}

#[tokio::test]
async fn test_settled_loan_is_read_only() {
    let h = flat_harness();
    let loan = disbursed(&h, "alice", 500, None).await;
    h.engine.apply_repayment(loan.id, Money::from_major(500)).await.unwrap();
    let settled = h.engine.get_loan(loan.id).await.unwrap();

    let err = h.engine.apply_repayment(loan.id, Money::from_major(1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadySettled);

    let after = h.engine.get_loan(loan.id).await.unwrap();
    assert_eq!(after.repaid_amount, Money::from_major(500));
    assert_eq!(after.version, settled.version);
}

#[tokio::test]
async fn test_overdue_penalty_applied_once() {
    let h = flat_harness();
    let loan = disbursed(&h, "alice", 500, None).await;
    let due = h.time.now() + Duration::days(5);
    let repayment = h.engine.schedule_repayment(loan.id, Money::from_major(200), due).await.unwrap();

    h.time.test_control().unwrap().advance(Duration::days(6));
    let first = h.engine.run_cycle().await;
    let second = h.engine.run_cycle().await;
    assert_eq!(first.installments_marked_late, 1);
    assert_eq!(second.installments_marked_late, 0);

    let history = h.engine.get_repayment_history(loan.id).await.unwrap();
    assert_eq!(history[0].id, repayment.id);
    assert_eq!(history[0].status, RepaymentStatus::Late);
    assert_eq!(history[0].penalty, Money::from_major(10));

    let details = h.engine.get_loan_details(loan.id).await.unwrap();
    assert_eq!(details.total_repayment, Money::from_major(510));
    assert_eq!(details.total_penalty, Money::from_major(10));
    assert!(details.penalty_applied);
}

#[tokio::test]
async fn test_auto_debit_paid_installment_not_penalized() {
    let h = flat_harness();
    let application = LoanApplication::new("alice", Money::from_major(300), 30)
        .auto_debit("pm_alice")
        .payout_to("ba_alice");
    let loan = disbursed(&h, "alice", 300, Some(application)).await;
    h.engine
        .schedule_repayment(loan.id, Money::from_major(100), h.time.now() + Duration::days(1))
        .await
        .unwrap();

    // well past due by the time the cycle runs
    h.time.test_control().unwrap().advance(Duration::days(3));
    let report = h.engine.run_cycle().await;

    assert_eq!(report.charges_succeeded, 1);
    assert_eq!(report.installments_marked_late, 0);
    let history = h.engine.get_repayment_history(loan.id).await.unwrap();
    assert_eq!(history[0].status, RepaymentStatus::Paid);
    assert_eq!(h.engine.get_loan(loan.id).await.unwrap().total_repayment, Money::from_major(300));
}

#[tokio::test]
async fn test_concurrent_overpay_exactly_one_wins() {
    let h = flat_harness();
    let loan = disbursed(&h, "alice", 500, None).await;
    h.engine.apply_repayment(loan.id, Money::from_major(400)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.apply_repayment(loan.id, Money::from_major(60)).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind(), ErrorKind::Validation);
    assert_eq!(failures[0].remaining_balance(), Some(Money::from_major(40)));
}

#[tokio::test(start_paused = true)]
async fn test_charge_confirmed_during_store_outage_is_recorded() {
    let h = flat_harness();
    let application = LoanApplication::new("alice", Money::from_major(100), 30)
        .auto_debit("pm_alice")
        .payout_to("ba_alice");
    let loan = disbursed(&h, "alice", 100, Some(application)).await;
    h.engine
        .schedule_repayment(loan.id, Money::from_major(100), h.time.now())
        .await
        .unwrap();

    h.store.fail_next_writes(4);
    let report = h.engine.run_cycle().await;

    assert_eq!(report.charges_succeeded, 1);
    assert!(report.failures.is_empty());
    assert_eq!(h.gateway.charges().len(), 1);
    assert_eq!(h.engine.get_loan(loan.id).await.unwrap().status, LoanStatus::Repaid);
}

#[tokio::test(start_paused = true)]
async fn test_hung_disbursement_times_out_into_degraded_approval() {
    let h = flat_harness();
    h.gateway.script_disburse(ScriptedOutcome::Hang);
    let loan = h
        .engine
        .apply_for_loan(LoanApplication::new("alice", Money::from_major(100), 30).payout_to("ba_alice"))
        .await
        .unwrap();

    let outcome = h.engine.decide_loan(loan.id, Decision::Approve).await.unwrap();
    assert!(outcome.is_degraded());
    assert!(matches!(
        outcome,
        microlending_ledger::DecisionOutcome::DisbursementFailed { error: PaymentError::Timeout(_), .. }
    ));
    assert_eq!(h.engine.get_loan(loan.id).await.unwrap().status, LoanStatus::Approved);
    assert_eq!(
        h.engine.events().count(|e| matches!(e, Event::DisbursementFailed { .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_manual_payment_waits_for_in_flight_auto_debit() {
    let h = flat_harness();
    let application = LoanApplication::new("alice", Money::from_major(300), 30)
        .auto_debit("pm_alice")
        .payout_to("ba_alice");
    let loan = disbursed(&h, "alice", 300, Some(application)).await;
    h.engine
        .schedule_repayment(loan.id, Money::from_major(100), h.time.now())
        .await
        .unwrap();

    // the charge is still at the gateway when the manual payment arrives
    h.gateway.script_charge(ScriptedOutcome::Delay(std::time::Duration::from_secs(5)));
    let engine = h.engine.clone();
    let cycle = tokio::spawn(async move { engine.run_cycle().await });
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(h.gateway.charges().len(), 1);

    // sees the balance after the charge settled, not before
    let err = h.engine.apply_repayment(loan.id, Money::from_major(250)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.remaining_balance(), Some(Money::from_major(200)));

    let report = cycle.await.unwrap();
    assert_eq!(report.charges_succeeded, 1);
    assert_eq!(report.amount_collected, Money::from_major(100));

    let repaid = h.engine.apply_repayment(loan.id, Money::from_major(200)).await.unwrap();
    assert_eq!(repaid.repaid_amount, Money::from_major(300));
    assert_eq!(repaid.repaid_amount, repaid.total_repayment);
    assert_eq!(repaid.status, LoanStatus::Repaid);
}
