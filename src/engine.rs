use std::sync::Arc;

use chrono::{DateTime, Utc};
use hourglass_rs::{SafeTimeProvider, TimeSource};

use crate::capabilities::{ChargeCapability, DisburseCapability, NotificationCapability};
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventLog};
use crate::ledger::{DecisionOutcome, LedgerContext, LoanApplication, LoanLedger};
use crate::payments::{LoanDetails, RepaymentProcessor};
use crate::scheduler::{CycleReport, ReconciliationScheduler, SchedulerHandle};
use crate::state::{Loan, Repayment};
use crate::store::{InMemoryStore, LoanStore};
use crate::types::{Decision, LoanId};

/// the ledger with all of its collaborators wired together
pub struct LendingEngine {
    ledger: LoanLedger,
    processor: RepaymentProcessor,
    scheduler: Arc<ReconciliationScheduler>,
    ctx: LedgerContext,
}

impl LendingEngine {
    pub fn builder() -> LendingEngineBuilder {
        LendingEngineBuilder::default()
    }

    pub async fn apply_for_loan(&self, application: LoanApplication) -> Result<Loan> {
        self.ledger.apply_for_loan(application).await
    }

    pub async fn decide_loan(&self, loan_id: LoanId, decision: Decision) -> Result<DecisionOutcome> {
        self.ledger.decide_loan(loan_id, decision).await
    }

    pub async fn retry_disbursement(&self, loan_id: LoanId) -> Result<DecisionOutcome> {
        self.ledger.retry_disbursement(loan_id).await
    }

    pub async fn schedule_repayment(
        &self,
        loan_id: LoanId,
        amount_due: Money,
        due_date: DateTime<Utc>,
    ) -> Result<Repayment> {
        self.ledger.schedule_repayment(loan_id, amount_due, due_date).await
    }

    pub async fn schedule_installments(&self, loan_id: LoanId, count: u32) -> Result<Vec<Repayment>> {
        self.ledger.schedule_installments(loan_id, count).await
    }

    pub async fn get_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.ledger.get_loan(loan_id).await
    }

    pub async fn loans_for_borrower(&self, borrower_id: &str) -> Result<Vec<Loan>> {
        self.ledger.loans_for_borrower(borrower_id).await
    }

    pub async fn active_loan(&self, borrower_id: &str) -> Result<Option<Loan>> {
        self.ledger.active_loan(borrower_id).await
    }

    pub async fn apply_repayment(&self, loan_id: LoanId, amount: Money) -> Result<Loan> {
        self.processor.apply_repayment(loan_id, amount).await
    }

    pub async fn apply_repayment_for_borrower(&self, borrower_id: &str, amount: Money) -> Result<Loan> {
        self.processor.apply_repayment_for_borrower(borrower_id, amount).await
    }

    pub async fn get_repayment_history(&self, loan_id: LoanId) -> Result<Vec<Repayment>> {
        self.processor.get_repayment_history(loan_id).await
    }

    pub async fn get_loan_details(&self, loan_id: LoanId) -> Result<LoanDetails> {
        self.processor.get_loan_details(loan_id).await
    }

    pub async fn borrower_summary(&self, borrower_id: &str) -> Result<Vec<LoanDetails>> {
        self.processor.borrower_summary(borrower_id).await
    }

    /// one reconciliation cycle at the engine's current time
    pub async fn run_cycle(&self) -> CycleReport {
        self.scheduler.run_cycle().await
    }

    /// start periodic reconciliation on the tokio runtime
    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        self.scheduler.clone().spawn()
    }

    pub fn ledger(&self) -> &LoanLedger {
        &self.ledger
    }

    pub fn processor(&self) -> &RepaymentProcessor {
        &self.processor
    }

    pub fn events(&self) -> &EventLog {
        &self.ctx.events
    }

    pub fn take_events(&self) -> Vec<Event> {
        self.ctx.events.take_events()
    }

    pub fn time(&self) -> &SafeTimeProvider {
        &self.ctx.time
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.ctx.config
    }
}

/// builder for [`LendingEngine`]
#[derive(Default)]
pub struct LendingEngineBuilder {
    store: Option<Arc<dyn LoanStore>>,
    charger: Option<Arc<dyn ChargeCapability>>,
    disburser: Option<Arc<dyn DisburseCapability>>,
    notifier: Option<Arc<dyn NotificationCapability>>,
    time: Option<SafeTimeProvider>,
    config: Option<LedgerConfig>,
}

impl LendingEngineBuilder {
    /// defaults to an [`InMemoryStore`]
    pub fn store(mut self, store: Arc<dyn LoanStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn charger(mut self, charger: Arc<dyn ChargeCapability>) -> Self {
        self.charger = Some(charger);
        self
    }

    pub fn disburser(mut self, disburser: Arc<dyn DisburseCapability>) -> Self {
        self.disburser = Some(disburser);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationCapability>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// defaults to the system clock
    pub fn time(mut self, time: SafeTimeProvider) -> Self {
        self.time = Some(time);
        self
    }

    pub fn config(mut self, config: LedgerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<LendingEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let charger = self.charger.ok_or_else(|| missing("charge capability"))?;
        let disburser = self.disburser.ok_or_else(|| missing("disburse capability"))?;
        let notifier = self.notifier.ok_or_else(|| missing("notification capability"))?;
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let time = self
            .time
            .unwrap_or_else(|| SafeTimeProvider::new(TimeSource::System));

        let ctx = LedgerContext::new(store, time, config);
        let processor = RepaymentProcessor::new(ctx.clone());
        let ledger = LoanLedger::new(ctx.clone(), disburser, notifier.clone());
        let scheduler = Arc::new(ReconciliationScheduler::new(
            ctx.clone(),
            processor.clone(),
            charger,
            notifier,
        ));

        tracing::debug!(
            daily_rate = %ctx.config.interest_config.daily_rate,
            penalty = %ctx.config.penalty_config.flat_amount,
            interval_secs = ctx.config.scheduler_config.interval_secs,
            "lending engine built"
        );

        Ok(LendingEngine {
            ledger,
            processor,
            scheduler,
            ctx,
        })
    }
}

fn missing(what: &str) -> LedgerError {
    LedgerError::InvalidConfiguration {
        message: format!("lending engine needs a {}", what),
    }
}
