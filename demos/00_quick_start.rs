/// quick start - apply, approve, repay
use std::sync::Arc;

use microlending_ledger::sandbox::{RecordingNotifier, SandboxGateway};
use microlending_ledger::{Decision, LendingEngine, LoanApplication, Money};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let gateway = Arc::new(SandboxGateway::new());
    let engine = LendingEngine::builder()
        .charger(gateway.clone())
        .disburser(gateway)
        .notifier(Arc::new(RecordingNotifier::new()))
        .build()?;

    // a $1,000 loan over 30 days
    let loan = engine
        .apply_for_loan(LoanApplication::new("borrower-42", Money::from_major(1_000), 30).payout_to("ba_42"))
        .await?;
    println!("applied: total repayment ${} due {}", loan.total_repayment, loan.due_date.format("%Y-%m-%d"));

    let outcome = engine.decide_loan(loan.id, Decision::Approve).await?;
    println!("decision: {:?}", outcome.loan().status);

    // pay part, then the rest
    engine.apply_repayment(loan.id, Money::from_major(500)).await?;
    let remaining = engine.get_loan(loan.id).await?.remaining_balance();
    let loan = engine.apply_repayment(loan.id, remaining).await?;
    println!("final status: {:?}", loan.status);

    Ok(())
}
