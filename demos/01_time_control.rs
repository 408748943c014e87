/// time control - deterministic overdue handling with a test clock
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use microlending_ledger::sandbox::{RecordingNotifier, SandboxGateway};
use microlending_ledger::{Decision, LendingEngine, LoanApplication, Money, SafeTimeProvider, TimeSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== time control example ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let controller = time.test_control().unwrap();

    let gateway = Arc::new(SandboxGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = LendingEngine::builder()
        .charger(gateway.clone())
        .disburser(gateway)
        .notifier(notifier.clone())
        .time(time.clone())
        .build()?;

    let loan = engine
        .apply_for_loan(LoanApplication::new("borrower-7", Money::from_major(600), 30).payout_to("ba_7"))
        .await?;
    engine.decide_loan(loan.id, Decision::Approve).await?;
    let installments = engine.schedule_installments(loan.id, 3).await?;
    println!("starting date: {}", time.now().format("%Y-%m-%d"));
    for installment in &installments {
        println!("  ${} due {}", installment.amount_due, installment.due_date.format("%Y-%m-%d"));
    }

    // pay the first installment on time
    controller.advance(Duration::days(10));
    engine.apply_repayment(loan.id, installments[0].amount_due).await?;
    println!("\npaid first installment on {}", time.now().format("%Y-%m-%d"));

    // miss the second one
    controller.advance(Duration::days(11));
    let report = engine.run_cycle().await;
    println!("\nreconciled on {}", time.now().format("%Y-%m-%d"));
    println!("  marked late: {}", report.installments_marked_late);
    println!("  penalties: ${}", report.penalties_applied);

    let details = engine.get_loan_details(loan.id).await?;
    println!("\ntotal repayment now ${}", details.total_repayment);
    println!("remaining balance ${}", details.remaining_balance);
    for message in notifier.sent() {
        println!("notified {}: {}", message.recipient, message.body);
    }

    Ok(())
}
