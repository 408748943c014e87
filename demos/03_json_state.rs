/// json state - loan details, events and error bodies as json
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use microlending_ledger::sandbox::{RecordingNotifier, SandboxGateway};
use microlending_ledger::{
    Decision, LedgerConfig, LendingEngine, LoanApplication, Money, SafeTimeProvider, TimeSource,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== json state serialization ===\n");

    let config = LedgerConfig::from_json_str(
        r#"{
            "interest_config": { "daily_rate": "0.0005" },
            "penalty_config": { "flat_amount": "15.00" }
        }"#,
    )?;
    println!("config:\n{}\n", serde_json::to_string_pretty(&config)?);

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let gateway = Arc::new(SandboxGateway::new());
    let engine = LendingEngine::builder()
        .charger(gateway.clone())
        .disburser(gateway)
        .notifier(Arc::new(RecordingNotifier::new()))
        .time(time)
        .config(config)
        .build()?;

    let loan = engine
        .apply_for_loan(LoanApplication::new("borrower-3", Money::from_major(250), 14).payout_to("ba_3"))
        .await?;
    engine.decide_loan(loan.id, Decision::Approve).await?;
    engine.apply_repayment(loan.id, Money::from_major(100)).await?;

    println!("loan details:\n{}\n", serde_json::to_string_pretty(&engine.get_loan_details(loan.id).await?)?);

    // an overpayment comes back with the balance still owed
    if let Err(e) = engine.apply_repayment(loan.id, Money::from_major(1_000)).await {
        println!("error body:\n{}\n", serde_json::to_string_pretty(&e.to_body())?);
    }

    println!("events:\n{}", serde_json::to_string_pretty(&engine.take_events())?);

    Ok(())
}
