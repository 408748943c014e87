//! Time-driven reconciliation.
//!
//! One cycle runs two passes in order. The auto-debit pass charges every
//! due installment of active auto-debit loans. The overdue pass then marks
//! installments that are still pending past their due date as late and
//! applies the flat penalty. Because the passes run in sequence, an
//! installment the first pass paid is never penalized by the second.
//!
//! A failure on one loan is recorded in the [`CycleReport`] and the cycle
//! moves on.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::capabilities::{self, ChargeCapability, NotificationCapability};
use crate::decimal::Money;
use crate::errors::{ErrorKind, LedgerError, Result};
use crate::events::Event;
use crate::interest::PenaltyEngine;
use crate::ledger::LedgerContext;
use crate::payments::RepaymentProcessor;
use crate::store::{LoanQuery, RepaymentQuery, WriteBatch};
use crate::types::{LoanId, LoanStatus, RepaymentId, RepaymentMethod, RepaymentStatus};

/// one item the cycle could not process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleFailure {
    pub loan_id: Option<LoanId>,
    pub kind: ErrorKind,
    pub message: String,
}

/// what a reconciliation cycle did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub loans_swept: usize,
    pub charges_attempted: usize,
    pub charges_succeeded: usize,
    pub charges_failed: usize,
    pub amount_collected: Money,
    pub installments_marked_late: usize,
    pub penalties_applied: Money,
    pub loans_defaulted: usize,
    pub failures: Vec<CycleFailure>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            loans_swept: 0,
            charges_attempted: 0,
            charges_succeeded: 0,
            charges_failed: 0,
            amount_collected: Money::ZERO,
            installments_marked_late: 0,
            penalties_applied: Money::ZERO,
            loans_defaulted: 0,
            failures: Vec::new(),
        }
    }

    fn record_failure(&mut self, loan_id: Option<LoanId>, error: &LedgerError) {
        self.failures.push(CycleFailure {
            loan_id,
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

enum DebitOutcome {
    /// nothing due or loan no longer eligible
    Skipped,
    Charged(Money),
    Declined,
}

/// drives auto-debit collection and overdue penalties
pub struct ReconciliationScheduler {
    ctx: LedgerContext,
    processor: RepaymentProcessor,
    charger: Arc<dyn ChargeCapability>,
    notifier: Arc<dyn NotificationCapability>,
    penalties: PenaltyEngine,
}

impl ReconciliationScheduler {
    pub fn new(
        ctx: LedgerContext,
        processor: RepaymentProcessor,
        charger: Arc<dyn ChargeCapability>,
        notifier: Arc<dyn NotificationCapability>,
    ) -> Self {
        let penalties = PenaltyEngine::new(ctx.config.penalty_config.clone());
        Self {
            ctx,
            processor,
            charger,
            notifier,
            penalties,
        }
    }

    /// run both passes once against the current clock
    #[tracing::instrument(name = "reconciliation", skip(self), fields(at = %self.ctx.now()))]
    pub async fn run_cycle(&self) -> CycleReport {
        let now = self.ctx.now();
        let mut report = CycleReport::new(now);

        self.auto_debit_pass(now, &mut report).await;
        let late_loans = self.overdue_pass(now, &mut report).await;
        if let Some(threshold) = self.ctx.config.scheduler_config.default_after_late_installments {
            self.default_pass(late_loans, threshold, now, &mut report).await;
        }

        tracing::info!(
            swept = report.loans_swept,
            charged = report.charges_succeeded,
            declined = report.charges_failed,
            collected = %report.amount_collected,
            marked_late = report.installments_marked_late,
            penalties = %report.penalties_applied,
            defaulted = report.loans_defaulted,
            failures = report.failures.len(),
            "reconciliation cycle complete"
        );
        report
    }

    async fn auto_debit_pass(&self, now: DateTime<Utc>, report: &mut CycleReport) {
        let query = LoanQuery::default()
            .with_statuses(&LoanStatus::ACTIVE)
            .with_method(RepaymentMethod::AutoDebit);
        let loans = match self.ctx.store.query_loans(&query).await {
            Ok(loans) => loans,
            Err(e) => {
                let error = LedgerError::from(e);
                tracing::error!(%error, "auto-debit sweep could not list loans");
                report.record_failure(None, &error);
                return;
            }
        };

        for loan in loans {
            report.loans_swept += 1;
            match self.collect_due_installment(loan.id, now).await {
                Ok(DebitOutcome::Skipped) => {}
                Ok(DebitOutcome::Charged(amount)) => {
                    report.charges_attempted += 1;
                    report.charges_succeeded += 1;
                    report.amount_collected += amount;
                }
                Ok(DebitOutcome::Declined) => {
                    report.charges_attempted += 1;
                    report.charges_failed += 1;
                }
                Err(error) => {
                    tracing::error!(loan_id = %loan.id, %error, "auto-debit failed");
                    report.record_failure(Some(loan.id), &error);
                }
            }
        }
    }

    /// charge the earliest due pending installment of one loan
    async fn collect_due_installment(&self, loan_id: LoanId, now: DateTime<Utc>) -> Result<DebitOutcome> {
        // held across the charge so a manual payment cannot interleave
        let _loan_guard = self.ctx.loan_locks.lock(&loan_id).await;

        let loan = self.ctx.load_loan(loan_id).await?;
        if !loan.status.is_active() || loan.repayment_method != RepaymentMethod::AutoDebit {
            return Ok(DebitOutcome::Skipped);
        }

        let due = self
            .ctx
            .store
            .query_repayments(
                &RepaymentQuery::loan(loan_id)
                    .with_statuses(&[RepaymentStatus::Pending])
                    .due_before(now + chrono::Duration::nanoseconds(1)),
            )
            .await?;
        let Some(installment) = due.into_iter().next() else {
            return Ok(DebitOutcome::Skipped);
        };

        let amount = installment.outstanding().min(loan.remaining_balance());
        if amount.is_zero() {
            return Ok(DebitOutcome::Skipped);
        }

        let method_ref = loan.payment_method_ref.clone().unwrap_or_default();
        let charge = if method_ref.is_empty() {
            Err(crate::capabilities::PaymentError::MissingReference(format!(
                "loan {} has no payment method",
                loan_id
            )))
        } else {
            capabilities::bounded(self.ctx.config.call_timeout(), self.charger.charge(&method_ref, amount)).await
        };

        match charge {
            Ok(receipt) => {
                self.processor
                    .settle_charged_installment(loan, installment, amount, &receipt)
                    .await
                    .map_err(|error| {
                        tracing::error!(
                            loan_id = %loan_id,
                            reference = %receipt.reference,
                            %error,
                            "charge confirmed but settlement was not recorded"
                        );
                        error
                    })?;
                Ok(DebitOutcome::Charged(amount))
            }
            Err(error) => {
                tracing::warn!(loan_id = %loan_id, repayment_id = %installment.id, %error, "auto-debit charge failed");
                self.ctx.events.emit(Event::AutoDebitFailed {
                    loan_id,
                    repayment_id: installment.id,
                    reason: error.to_string(),
                    timestamp: now,
                });
                Ok(DebitOutcome::Declined)
            }
        }
    }

    /// returns the loans that gained a late installment
    async fn overdue_pass(&self, now: DateTime<Utc>, report: &mut CycleReport) -> BTreeSet<LoanId> {
        let mut late_loans = BTreeSet::new();
        let query = RepaymentQuery::default()
            .with_statuses(&[RepaymentStatus::Pending])
            .due_before(now);
        let overdue = match self.ctx.store.query_repayments(&query).await {
            Ok(overdue) => overdue,
            Err(e) => {
                let error = LedgerError::from(e);
                tracing::error!(%error, "overdue pass could not list installments");
                report.record_failure(None, &error);
                return late_loans;
            }
        };

        for installment in overdue {
            match self.mark_late(installment.loan_id, installment.id, now).await {
                Ok(Some(penalty)) => {
                    report.installments_marked_late += 1;
                    report.penalties_applied += penalty;
                    late_loans.insert(installment.loan_id);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::error!(
                        loan_id = %installment.loan_id,
                        repayment_id = %installment.id,
                        %error,
                        "could not mark installment late"
                    );
                    report.record_failure(Some(installment.loan_id), &error);
                }
            }
        }
        late_loans
    }

    /// pending -> late with the flat penalty; `None` when nothing changed
    async fn mark_late(&self, loan_id: LoanId, repayment_id: RepaymentId, now: DateTime<Utc>) -> Result<Option<Money>> {
        let guard = self.ctx.loan_locks.lock(&loan_id).await;

        let mut installment = self
            .ctx
            .store
            .get_repayment(repayment_id)
            .await?
            .ok_or(LedgerError::RepaymentNotFound { id: repayment_id })?;
        if !installment.is_overdue(now) {
            return Ok(None);
        }
        let mut loan = self.ctx.load_loan(loan_id).await?;
        if !loan.status.is_active() {
            return Ok(None);
        }

        let assessment = self.penalties.assess(installment.penalty, loan.total_repayment);
        installment.mark_late(assessment.installment_penalty);
        loan.add_penalty(assessment.loan_total, now);

        let committed = self
            .ctx
            .store
            .commit(WriteBatch::loan(loan).with_repayment(installment.clone()))
            .await?;
        drop(guard);

        let committed_loan = committed
            .loan
            .ok_or(LedgerError::LoanNotFound { id: loan_id })?;
        let new_total = committed_loan.total_repayment;
        self.ctx.events.emit(Event::RepaymentLate {
            loan_id,
            repayment_id,
            penalty: assessment.amount,
            new_total_repayment: new_total,
            timestamp: now,
        });
        tracing::info!(
            loan_id = %loan_id,
            repayment_id = %repayment_id,
            penalty = %assessment.amount,
            new_total = %new_total,
            "installment marked late"
        );

        capabilities::notify_best_effort(
            self.notifier.as_ref(),
            self.ctx.config.call_timeout(),
            &committed_loan.borrower_id,
            &format!(
                "Your repayment of ${} is overdue. A penalty of ${} has been added.",
                installment.amount_due, assessment.amount
            ),
        )
        .await;

        Ok(Some(assessment.amount))
    }

    async fn default_pass(
        &self,
        loan_ids: BTreeSet<LoanId>,
        threshold: u32,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        for loan_id in loan_ids {
            match self.escalate(loan_id, threshold, now).await {
                Ok(true) => report.loans_defaulted += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(loan_id = %loan_id, %error, "default escalation failed");
                    report.record_failure(Some(loan_id), &error);
                }
            }
        }
    }

    /// default a loan once it carries `threshold` late installments
    async fn escalate(&self, loan_id: LoanId, threshold: u32, now: DateTime<Utc>) -> Result<bool> {
        let guard = self.ctx.loan_locks.lock(&loan_id).await;

        let mut loan = self.ctx.load_loan(loan_id).await?;
        if !loan.status.is_active() {
            return Ok(false);
        }
        let late = self
            .ctx
            .store
            .query_repayments(&RepaymentQuery::loan(loan_id).with_statuses(&[RepaymentStatus::Late]))
            .await?;
        if (late.len() as u64) < u64::from(threshold) {
            return Ok(false);
        }

        let old_status = loan.status;
        loan.update_status(LoanStatus::Defaulted, now);
        let late_count = late.len() as u32;
        let defaulted = late.into_iter().map(|mut installment| {
            installment.status = RepaymentStatus::Defaulted;
            installment
        });
        let committed = self
            .ctx
            .store
            .commit(WriteBatch::loan(loan).with_repayments(defaulted))
            .await?;
        drop(guard);

        let borrower_id = committed.loan.map(|l| l.borrower_id).unwrap_or_default();
        self.ctx.events.emit(Event::StatusChanged {
            loan_id,
            old_status,
            new_status: LoanStatus::Defaulted,
            timestamp: now,
        });
        self.ctx.events.emit(Event::LoanDefaulted {
            loan_id,
            late_installments: late_count,
            timestamp: now,
        });
        tracing::warn!(loan_id = %loan_id, late_installments = late_count, "loan defaulted");

        capabilities::notify_best_effort(
            self.notifier.as_ref(),
            self.ctx.config.call_timeout(),
            &borrower_id,
            "Your loan has been marked as defaulted after repeated missed repayments.",
        )
        .await;

        Ok(true)
    }

    /// run a cycle every configured interval until the handle is shut down
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let interval = self.ctx.config.scheduler_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("reconciliation scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

/// handle to a spawned scheduler loop
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// stop after the cycle in flight, if any, and wait for the task
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "scheduler task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::PaymentError;
    use crate::config::LedgerConfig;
    use crate::decimal::Rate;
    use crate::interest::LoanTerms;
    use crate::sandbox::{RecordingNotifier, SandboxGateway, ScriptedOutcome};
    use crate::state::{Loan, Repayment};
    use crate::store::{InMemoryStore, LoanStore, StoreError, StoreResult};
    use chrono::{Duration, TimeZone};
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    struct Fixture {
        scheduler: Arc<ReconciliationScheduler>,
        store: Arc<InMemoryStore>,
        gateway: Arc<SandboxGateway>,
        notifier: Arc<RecordingNotifier>,
        time: SafeTimeProvider,
        ctx: LedgerContext,
    }

    fn fixture_with(config: LedgerConfig) -> Fixture {
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new());
        let ctx = LedgerContext::new(store.clone(), time.clone(), config);
        let gateway = Arc::new(SandboxGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = Arc::new(ReconciliationScheduler::new(
            ctx.clone(),
            RepaymentProcessor::new(ctx.clone()),
            gateway.clone(),
            notifier.clone(),
        ));
        Fixture {
            scheduler,
            store,
            gateway,
            notifier,
            time,
            ctx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(LedgerConfig::default())
    }

    async fn active_loan(fx: &Fixture, method: RepaymentMethod, principal: i64) -> Loan {
        let now = fx.time.now();
        let terms = LoanTerms::quote(Money::from_major(principal), Rate::ZERO, 30, now).unwrap();
        let mut loan = Loan::new("alice".to_string(), &terms, method, now);
        loan.status = LoanStatus::Disbursed;
        if method == RepaymentMethod::AutoDebit {
            loan.payment_method_ref = Some("pm_alice".to_string());
        }
        fx.store.insert_loan(&loan).await.unwrap()
    }

    async fn installment(fx: &Fixture, loan: &Loan, amount: i64, due_in_days: i64) -> Repayment {
        let now = fx.time.now();
        let r = Repayment::new(loan.id, Money::from_major(amount), now + Duration::days(due_in_days), now);
        fx.store.insert_repayment(&r).await.unwrap()
    }

    fn advance_days(fx: &Fixture, days: i64) {
        fx.time.test_control().unwrap().advance(Duration::days(days));
    }

    #[tokio::test]
    async fn test_auto_debit_charges_due_installment() {
        let fx = fixture();
        let loan = active_loan(&fx, RepaymentMethod::AutoDebit, 300).await;
        let due = installment(&fx, &loan, 100, 1).await;
        let later = installment(&fx, &loan, 200, 30).await;

        // not yet due
        let report = fx.scheduler.run_cycle().await;
        assert_eq!(report.charges_attempted, 0);

        advance_days(&fx, 1);
        let report = fx.scheduler.run_cycle().await;
        assert_eq!(report.charges_succeeded, 1);
        assert_eq!(report.amount_collected, Money::from_major(100));
        assert_eq!(report.installments_marked_late, 0);

        let paid = fx.store.get_repayment(due.id).await.unwrap().unwrap();
        assert_eq!(paid.status, RepaymentStatus::Paid);
        assert_eq!(paid.amount_paid, Money::from_major(100));
        let untouched = fx.store.get_repayment(later.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, RepaymentStatus::Pending);

        let stored = fx.ctx.load_loan(loan.id).await.unwrap();
        assert_eq!(stored.repaid_amount, Money::from_major(100));
        assert_eq!(fx.gateway.charges()[0].reference_in, "pm_alice");
    }

    #[tokio::test]
    async fn test_final_charge_repays_loan_against_total() {
        let fx = fixture();
        let loan = active_loan(&fx, RepaymentMethod::AutoDebit, 100).await;
        installment(&fx, &loan, 100, 0).await;

        fx.scheduler.run_cycle().await;

        let stored = fx.ctx.load_loan(loan.id).await.unwrap();
        assert_eq!(stored.status, LoanStatus::Repaid);
        assert!(stored.is_settled());
    }

    #[tokio::test]
    async fn test_failed_charge_leaves_installment_for_penalty() {
        let fx = fixture();
        let loan = active_loan(&fx, RepaymentMethod::AutoDebit, 300).await;
        let due = installment(&fx, &loan, 100, 1).await;
        advance_days(&fx, 2);

        fx.gateway.script_charge(ScriptedOutcome::Fail(PaymentError::Declined("card expired".into())));
        let report = fx.scheduler.run_cycle().await;

        assert_eq!(report.charges_failed, 1);
        assert_eq!(report.installments_marked_late, 1);
        assert!(report.failures.is_empty());

        let late = fx.store.get_repayment(due.id).await.unwrap().unwrap();
        assert_eq!(late.status, RepaymentStatus::Late);
        assert_eq!(late.penalty, Money::from_major(10));
        let stored = fx.ctx.load_loan(loan.id).await.unwrap();
        assert_eq!(stored.total_repayment, Money::from_major(310));
        assert!(stored.penalty_applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_charge_times_out() {
        let fx = fixture();
        let loan = active_loan(&fx, RepaymentMethod::AutoDebit, 300).await;
        let due = installment(&fx, &loan, 100, 0).await;

        fx.gateway.script_charge(ScriptedOutcome::Hang);
        let report = fx.scheduler.run_cycle().await;

        assert_eq!(report.charges_failed, 1);
        let pending = fx.store.get_repayment(due.id).await.unwrap().unwrap();
        assert_eq!(pending.status, RepaymentStatus::Pending);
        assert_eq!(fx.ctx.load_loan(loan.id).await.unwrap().repaid_amount, Money::ZERO);
    }

    #[tokio::test]
    async fn test_penalty_applied_exactly_once() {
        let fx = fixture();
        let loan = active_loan(&fx, RepaymentMethod::Manual, 500).await;
        installment(&fx, &loan, 500, 1).await;
        advance_days(&fx, 3);

        let first = fx.scheduler.run_cycle().await;
        let second = fx.scheduler.run_cycle().await;

        assert_eq!(first.installments_marked_late, 1);
        assert_eq!(first.penalties_applied, Money::from_major(10));
        assert_eq!(second.installments_marked_late, 0);

        let stored = fx.ctx.load_loan(loan.id).await.unwrap();
        assert_eq!(stored.total_repayment, Money::from_major(510));
        assert_eq!(fx.notifier.sent().len(), 1);
        assert!(fx.notifier.sent()[0].body.contains("overdue"));
    }

    #[tokio::test]
    async fn test_inactive_loans_not_penalized() {
        let fx = fixture();
        let mut loan = active_loan(&fx, RepaymentMethod::Manual, 500).await;
        let due = installment(&fx, &loan, 500, 1).await;
        loan.status = LoanStatus::Repaid;
        fx.store.update_loan(&loan).await.unwrap();
        advance_days(&fx, 5);

        let report = fx.scheduler.run_cycle().await;
        assert_eq!(report.installments_marked_late, 0);
        let still = fx.store.get_repayment(due.id).await.unwrap().unwrap();
        assert_eq!(still.status, RepaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_store_failure_on_one_loan_does_not_abort_cycle() {
        let fx = fixture();
        let first = active_loan(&fx, RepaymentMethod::Manual, 500).await;
        installment(&fx, &first, 100, 1).await;
        let second = active_loan(&fx, RepaymentMethod::Manual, 500).await;
        installment(&fx, &second, 100, 2).await;
        advance_days(&fx, 3);

        fx.store.fail_next_writes(1);
        let report = fx.scheduler.run_cycle().await;

        assert_eq!(report.installments_marked_late, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ErrorKind::Persistence);

        // the skipped installment is picked up next time
        let retry = fx.scheduler.run_cycle().await;
        assert_eq!(retry.installments_marked_late, 1);
    }

    #[tokio::test]
    async fn test_default_escalation_is_opt_in() {
        let mut config = LedgerConfig::default();
        config.scheduler_config.default_after_late_installments = Some(2);
        let fx = fixture_with(config);
        let loan = active_loan(&fx, RepaymentMethod::Manual, 500).await;
        installment(&fx, &loan, 100, 1).await;
        installment(&fx, &loan, 100, 2).await;

        advance_days(&fx, 2);
        let report = fx.scheduler.run_cycle().await;
        assert_eq!(report.loans_defaulted, 0);

        advance_days(&fx, 1);
        let report = fx.scheduler.run_cycle().await;
        assert_eq!(report.loans_defaulted, 1);

        let stored = fx.ctx.load_loan(loan.id).await.unwrap();
        assert_eq!(stored.status, LoanStatus::Defaulted);
        let history = fx.store.query_repayments(&RepaymentQuery::loan(loan.id)).await.unwrap();
        assert!(history.iter().all(|r| r.status == RepaymentStatus::Defaulted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_runs_and_stops() {
        let mut config = LedgerConfig::default();
        config.scheduler_config.interval_secs = 60;
        let fx = fixture_with(config);
        let loan = active_loan(&fx, RepaymentMethod::AutoDebit, 100).await;
        installment(&fx, &loan, 100, 0).await;

        let handle = fx.scheduler.clone().spawn();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        handle.shutdown().await;

        assert_eq!(fx.gateway.charges().len(), 1);
        assert_eq!(fx.ctx.load_loan(loan.id).await.unwrap().status, LoanStatus::Repaid);
    }

    /// loan reads fail once anything has been committed
    struct ReadsFailAfterCommit {
        inner: InMemoryStore,
        committed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl LoanStore for ReadsFailAfterCommit {
        async fn insert_loan(&self, loan: &Loan) -> StoreResult<Loan> {
            self.inner.insert_loan(loan).await
        }

        async fn get_loan(&self, id: LoanId) -> StoreResult<Option<Loan>> {
            if self.committed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Unavailable("read replica down".to_string()));
            }
            self.inner.get_loan(id).await
        }

        async fn query_loans(&self, query: &LoanQuery) -> StoreResult<Vec<Loan>> {
            self.inner.query_loans(query).await
        }

        async fn insert_repayment(&self, repayment: &Repayment) -> StoreResult<Repayment> {
            self.inner.insert_repayment(repayment).await
        }

        async fn get_repayment(&self, id: RepaymentId) -> StoreResult<Option<Repayment>> {
            self.inner.get_repayment(id).await
        }

        async fn query_repayments(&self, query: &RepaymentQuery) -> StoreResult<Vec<Repayment>> {
            self.inner.query_repayments(query).await
        }

        async fn commit(&self, batch: WriteBatch) -> StoreResult<WriteBatch> {
            let committed = self.inner.commit(batch).await?;
            self.committed.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(committed)
        }
    }

    #[tokio::test]
    async fn test_late_notice_uses_committed_loan() {
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(ReadsFailAfterCommit {
            inner: InMemoryStore::new(),
            committed: std::sync::atomic::AtomicBool::new(false),
        });
        let ctx = LedgerContext::new(store.clone(), time.clone(), LedgerConfig::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = ReconciliationScheduler::new(
            ctx.clone(),
            RepaymentProcessor::new(ctx.clone()),
            Arc::new(SandboxGateway::new()),
            notifier.clone(),
        );

        let now = time.now();
        let terms = LoanTerms::quote(Money::from_major(500), Rate::ZERO, 30, now).unwrap();
        let mut loan = Loan::new("alice".to_string(), &terms, RepaymentMethod::Manual, now);
        loan.status = LoanStatus::Disbursed;
        let loan = store.insert_loan(&loan).await.unwrap();
        let due = Repayment::new(loan.id, Money::from_major(100), now + Duration::days(1), now);
        let due = store.insert_repayment(&due).await.unwrap();
        time.test_control().unwrap().advance(Duration::days(2));

        let report = scheduler.run_cycle().await;

        assert_eq!(report.installments_marked_late, 1);
        assert!(report.failures.is_empty());
        let late = store.get_repayment(due.id).await.unwrap().unwrap();
        assert_eq!(late.status, RepaymentStatus::Late);
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.sent()[0].recipient, "alice");
    }
}
