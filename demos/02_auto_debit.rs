/// auto debit - scheduled collection with a declined charge
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use microlending_ledger::sandbox::{RecordingNotifier, SandboxGateway, ScriptedOutcome};
use microlending_ledger::{
    Decision, LendingEngine, LoanApplication, Money, PaymentError, SafeTimeProvider, TimeSource,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("microlending_ledger=info"))
        .init();

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
    let controller = time.test_control().unwrap();

    let gateway = Arc::new(SandboxGateway::new());
    let engine = LendingEngine::builder()
        .charger(gateway.clone())
        .disburser(gateway.clone())
        .notifier(Arc::new(RecordingNotifier::new()))
        .time(time.clone())
        .build()?;

    let loan = engine
        .apply_for_loan(
            LoanApplication::new("borrower-9", Money::from_major(400), 28)
                .auto_debit("pm_card_9")
                .payout_to("ba_9"),
        )
        .await?;
    engine.decide_loan(loan.id, Decision::Approve).await?;
    engine.schedule_installments(loan.id, 4).await?;

    // week one collects, week two is declined
    gateway.script_charge(ScriptedOutcome::Succeed);
    gateway.script_charge(ScriptedOutcome::Fail(PaymentError::Declined("insufficient funds".to_string())));

    for week in 1..=4 {
        controller.advance(Duration::days(7));
        let report = engine.run_cycle().await;
        println!(
            "week {}: collected ${}, declined {}, late {}",
            week, report.amount_collected, report.charges_failed, report.installments_marked_late
        );
    }

    for repayment in engine.get_repayment_history(loan.id).await? {
        println!(
            "  {} ${} paid ${} {:?}",
            repayment.due_date.format("%Y-%m-%d"),
            repayment.amount_due,
            repayment.amount_paid,
            repayment.status
        );
    }
    let loan = engine.get_loan(loan.id).await?;
    println!("remaining ${} status {:?}", loan.remaining_balance(), loan.status);
    println!("charges attempted: {}", gateway.charges().len());

    Ok(())
}
