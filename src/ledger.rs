use std::sync::Arc;

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};

use crate::capabilities::{self, DisburseCapability, NotificationCapability, PaymentError, PaymentReceipt};
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventLog};
use crate::interest::{split_installments, LoanTerms};
use crate::locks::KeyedLocks;
use crate::state::{Loan, Repayment};
use crate::store::{LoanQuery, LoanStore, RepaymentQuery, StoreError, WriteBatch};
use crate::types::{BorrowerId, Decision, LoanId, LoanStatus, RepaymentMethod, RepaymentStatus};

/// Everything the ledger components share: storage, the per-loan and
/// per-borrower locks, the clock, the event log and configuration.
#[derive(Clone)]
pub struct LedgerContext {
    pub store: Arc<dyn LoanStore>,
    pub loan_locks: Arc<KeyedLocks<LoanId>>,
    pub borrower_locks: Arc<KeyedLocks<BorrowerId>>,
    pub time: SafeTimeProvider,
    pub events: EventLog,
    pub config: Arc<LedgerConfig>,
}

impl LedgerContext {
    pub fn new(store: Arc<dyn LoanStore>, time: SafeTimeProvider, config: LedgerConfig) -> Self {
        Self {
            store,
            loan_locks: Arc::new(KeyedLocks::new()),
            borrower_locks: Arc::new(KeyedLocks::new()),
            time,
            events: EventLog::with_capacity(config.event_config.max_events),
            config: Arc::new(config),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub async fn load_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.store
            .get_loan(loan_id)
            .await?
            .ok_or(LedgerError::LoanNotFound { id: loan_id })
    }

    pub async fn active_loan(&self, borrower_id: &str) -> Result<Option<Loan>> {
        let loans = self
            .store
            .query_loans(&LoanQuery::borrower(borrower_id).with_statuses(&LoanStatus::ACTIVE))
            .await?;
        Ok(loans.into_iter().next())
    }

    /// installments still owing money, earliest due first
    pub async fn open_installments(&self, loan_id: LoanId) -> Result<Vec<Repayment>> {
        Ok(self
            .store
            .query_repayments(
                &RepaymentQuery::loan(loan_id)
                    .with_statuses(&[RepaymentStatus::Pending, RepaymentStatus::Late]),
            )
            .await?)
    }

    /// Commit a batch that records an external side effect which already
    /// happened. Unavailable-store errors are retried with backoff until the
    /// write lands or the retry policy gives up.
    pub async fn persist_durably(&self, batch: WriteBatch) -> Result<WriteBatch> {
        let policy = &self.config.retry_policy;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.store.commit(batch.clone()).await {
                Ok(committed) => return Ok(committed),
                Err(StoreError::Unavailable(reason)) if policy.allows(attempt) => {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(attempt, ?delay, %reason, "store unavailable, retrying settlement write");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// loan application request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub borrower_id: BorrowerId,
    pub principal: Money,
    pub tenure_days: u32,
    #[serde(default)]
    pub repayment_method: RepaymentMethod,
    #[serde(default)]
    pub payment_method_ref: Option<String>,
    #[serde(default)]
    pub payout_ref: Option<String>,
}

impl LoanApplication {
    pub fn new(borrower_id: impl Into<BorrowerId>, principal: Money, tenure_days: u32) -> Self {
        Self {
            borrower_id: borrower_id.into(),
            principal,
            tenure_days,
            repayment_method: RepaymentMethod::Manual,
            payment_method_ref: None,
            payout_ref: None,
        }
    }

    /// repay automatically by charging `method_ref`
    pub fn auto_debit(mut self, method_ref: impl Into<String>) -> Self {
        self.repayment_method = RepaymentMethod::AutoDebit;
        self.payment_method_ref = Some(method_ref.into());
        self
    }

    pub fn payout_to(mut self, destination_ref: impl Into<String>) -> Self {
        self.payout_ref = Some(destination_ref.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.borrower_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput {
                message: "borrower id is required".to_string(),
            });
        }
        if !self.principal.is_positive() {
            return Err(LedgerError::InvalidAmount {
                amount: self.principal,
                reason: "principal must be positive".to_string(),
            });
        }
        if self.tenure_days == 0 {
            return Err(LedgerError::InvalidTenure { days: self.tenure_days });
        }
        if self.repayment_method == RepaymentMethod::AutoDebit
            && self.payment_method_ref.as_deref().map_or(true, |r| r.trim().is_empty())
        {
            return Err(LedgerError::InvalidInput {
                message: "auto-debit requires a payment method".to_string(),
            });
        }
        Ok(())
    }
}

/// result of deciding on an application
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// approved and funds moved
    Disbursed { loan: Loan, receipt: PaymentReceipt },
    /// approved, but the transfer failed; the approval stands
    DisbursementFailed { loan: Loan, error: PaymentError },
    Rejected { loan: Loan },
}

impl DecisionOutcome {
    pub fn loan(&self) -> &Loan {
        match self {
            DecisionOutcome::Disbursed { loan, .. }
            | DecisionOutcome::DisbursementFailed { loan, .. }
            | DecisionOutcome::Rejected { loan } => loan,
        }
    }

    /// partial success: approved but no funds moved
    pub fn is_degraded(&self) -> bool {
        matches!(self, DecisionOutcome::DisbursementFailed { .. })
    }
}

/// loan lifecycle: application, decision, disbursement and scheduling
#[derive(Clone)]
pub struct LoanLedger {
    ctx: LedgerContext,
    disburser: Arc<dyn DisburseCapability>,
    notifier: Arc<dyn NotificationCapability>,
}

impl LoanLedger {
    pub fn new(
        ctx: LedgerContext,
        disburser: Arc<dyn DisburseCapability>,
        notifier: Arc<dyn NotificationCapability>,
    ) -> Self {
        Self {
            ctx,
            disburser,
            notifier,
        }
    }

    pub fn context(&self) -> &LedgerContext {
        &self.ctx
    }

    /// price and record a pending loan
    pub async fn apply_for_loan(&self, application: LoanApplication) -> Result<Loan> {
        application.validate()?;

        let _borrower = self.ctx.borrower_locks.lock(&application.borrower_id).await;
        if let Some(active) = self.ctx.active_loan(&application.borrower_id).await? {
            return Err(LedgerError::ActiveLoanExists {
                borrower_id: application.borrower_id,
                loan_id: active.id,
            });
        }

        let now = self.ctx.now();
        let terms = LoanTerms::quote(
            application.principal,
            self.ctx.config.interest_config.daily_rate,
            application.tenure_days,
            now,
        )?;

        let mut loan = Loan::new(application.borrower_id, &terms, application.repayment_method, now);
        loan.payment_method_ref = application.payment_method_ref;
        loan.payout_ref = application.payout_ref;
        let loan = self.ctx.store.insert_loan(&loan).await?;

        self.ctx.events.emit(Event::LoanApplied {
            loan_id: loan.id,
            borrower_id: loan.borrower_id.clone(),
            principal: loan.principal,
            total_repayment: loan.total_repayment,
            due_date: loan.due_date,
        });
        tracing::info!(
            loan_id = %loan.id,
            borrower_id = %loan.borrower_id,
            principal = %loan.principal,
            total_repayment = %loan.total_repayment,
            tenure_days = loan.tenure_days,
            "loan application recorded"
        );

        Ok(loan)
    }

    /// approve or reject a pending application
    pub async fn decide_loan(&self, loan_id: LoanId, decision: Decision) -> Result<DecisionOutcome> {
        // borrower id never changes, so it can be read before locking
        let borrower_id = self.ctx.load_loan(loan_id).await?.borrower_id;
        let _borrower = self.ctx.borrower_locks.lock(&borrower_id).await;
        let _loan_guard = self.ctx.loan_locks.lock(&loan_id).await;

        let mut loan = self.ctx.load_loan(loan_id).await?;
        if loan.status != LoanStatus::Pending {
            return Err(LedgerError::InvalidState {
                current: loan.status,
                expected: "pending".to_string(),
            });
        }

        let now = self.ctx.now();
        match decision {
            Decision::Reject => {
                loan.update_status(LoanStatus::Rejected, now);
                let loan = self.ctx.store.update_loan(&loan).await?;
                self.record_transition(&loan, LoanStatus::Pending, now);
                self.ctx.events.emit(Event::LoanRejected { loan_id, timestamp: now });
                tracing::info!(loan_id = %loan_id, "loan rejected");

                capabilities::notify_best_effort(
                    self.notifier.as_ref(),
                    self.ctx.config.call_timeout(),
                    &loan.borrower_id,
                    &format!("Your loan application for ${} has been rejected.", loan.principal),
                )
                .await;

                Ok(DecisionOutcome::Rejected { loan })
            }
            Decision::Approve => {
                if let Some(active) = self.ctx.active_loan(&loan.borrower_id).await? {
                    return Err(LedgerError::ActiveLoanExists {
                        borrower_id: loan.borrower_id,
                        loan_id: active.id,
                    });
                }

                loan.update_status(LoanStatus::Approved, now);
                let loan = self.ctx.store.update_loan(&loan).await?;
                self.record_transition(&loan, LoanStatus::Pending, now);
                self.ctx.events.emit(Event::LoanApproved { loan_id, timestamp: now });
                tracing::info!(loan_id = %loan_id, borrower_id = %loan.borrower_id, "loan approved");

                self.disburse_locked(loan).await
            }
        }
    }

    /// try again to move funds for an approved loan whose transfer failed
    pub async fn retry_disbursement(&self, loan_id: LoanId) -> Result<DecisionOutcome> {
        let _loan_guard = self.ctx.loan_locks.lock(&loan_id).await;
        let loan = self.ctx.load_loan(loan_id).await?;
        if loan.status != LoanStatus::Approved || loan.disbursement_reference.is_some() {
            return Err(LedgerError::InvalidState {
                current: loan.status,
                expected: "approved awaiting disbursement".to_string(),
            });
        }
        self.disburse_locked(loan).await
    }

    /// caller holds the loan lock
    async fn disburse_locked(&self, mut loan: Loan) -> Result<DecisionOutcome> {
        let now = self.ctx.now();
        let destination = loan
            .payout_ref
            .clone()
            .or_else(|| self.ctx.config.gateway_config.default_payout_ref.clone());

        self.ctx.events.emit(Event::DisbursementAttempted {
            loan_id: loan.id,
            amount: loan.principal,
            timestamp: now,
        });

        let result = match destination {
            Some(destination) => {
                capabilities::bounded(
                    self.ctx.config.call_timeout(),
                    self.disburser.disburse(loan.principal, &destination),
                )
                .await
            }
            None => Err(PaymentError::MissingReference(format!("no payout destination for loan {}", loan.id))),
        };

        match result {
            Ok(receipt) => {
                loan.disbursement_reference = Some(receipt.reference.clone());
                loan.update_status(LoanStatus::Disbursed, now);
                let committed = self.ctx.persist_durably(WriteBatch::loan(loan)).await?;
                let loan = committed.loan.ok_or(LedgerError::CalculationError {
                    message: "disbursement commit returned no loan".to_string(),
                })?;

                self.record_transition(&loan, LoanStatus::Approved, now);
                self.ctx.events.emit(Event::LoanDisbursed {
                    loan_id: loan.id,
                    amount: loan.principal,
                    reference: receipt.reference.clone(),
                    timestamp: now,
                });
                tracing::info!(loan_id = %loan.id, reference = %receipt.reference, amount = %loan.principal, "funds disbursed");

                Ok(DecisionOutcome::Disbursed { loan, receipt })
            }
            Err(error) => {
                self.ctx.events.emit(Event::DisbursementFailed {
                    loan_id: loan.id,
                    reason: error.to_string(),
                    timestamp: now,
                });
                tracing::warn!(loan_id = %loan.id, %error, "disbursement failed, loan stays approved");

                Ok(DecisionOutcome::DisbursementFailed { loan, error })
            }
        }
    }

    /// add one installment to an active loan
    pub async fn schedule_repayment(
        &self,
        loan_id: LoanId,
        amount_due: Money,
        due_date: DateTime<Utc>,
    ) -> Result<Repayment> {
        if !amount_due.is_positive() {
            return Err(LedgerError::InvalidAmount {
                amount: amount_due,
                reason: "installment must be positive".to_string(),
            });
        }

        let _loan_guard = self.ctx.loan_locks.lock(&loan_id).await;
        let loan = self.active_loan_by_id(loan_id).await?;

        let unscheduled = self.unscheduled_balance(&loan).await?;
        if amount_due > unscheduled {
            return Err(LedgerError::InvalidAmount {
                amount: amount_due,
                reason: format!("only {} of the balance is unscheduled", unscheduled),
            });
        }

        let repayment = Repayment::new(loan_id, amount_due, due_date, self.ctx.now());
        let repayment = self.ctx.store.insert_repayment(&repayment).await?;
        self.emit_scheduled(&repayment);

        Ok(repayment)
    }

    /// split the unscheduled balance into `count` installments due by the
    /// loan's due date
    pub async fn schedule_installments(&self, loan_id: LoanId, count: u32) -> Result<Vec<Repayment>> {
        let _loan_guard = self.ctx.loan_locks.lock(&loan_id).await;
        let loan = self.active_loan_by_id(loan_id).await?;

        let now = self.ctx.now();
        let unscheduled = self.unscheduled_balance(&loan).await?;
        let days_left = u32::try_from((loan.due_date - now).num_days().max(0)).unwrap_or(u32::MAX);
        let mut plans = split_installments(unscheduled, count, now, days_left)?;
        // whole days truncate a partial day, so pin the last one to the loan's own due date
        if let Some(last) = plans.last_mut() {
            last.due_date = loan.due_date.max(now);
        }

        let mut created = Vec::with_capacity(plans.len());
        for plan in plans {
            let repayment = Repayment::new(loan_id, plan.amount, plan.due_date, now);
            let repayment = self.ctx.store.insert_repayment(&repayment).await?;
            self.emit_scheduled(&repayment);
            created.push(repayment);
        }

        tracing::info!(loan_id = %loan_id, installments = created.len(), amount = %unscheduled, "installments scheduled");
        Ok(created)
    }

    pub async fn get_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.ctx.load_loan(loan_id).await
    }

    pub async fn loans_for_borrower(&self, borrower_id: &str) -> Result<Vec<Loan>> {
        Ok(self.ctx.store.query_loans(&LoanQuery::borrower(borrower_id)).await?)
    }

    pub async fn active_loan(&self, borrower_id: &str) -> Result<Option<Loan>> {
        self.ctx.active_loan(borrower_id).await
    }

    async fn active_loan_by_id(&self, loan_id: LoanId) -> Result<Loan> {
        let loan = self.ctx.load_loan(loan_id).await?;
        if !loan.status.is_active() {
            return Err(LedgerError::InvalidState {
                current: loan.status,
                expected: "approved or disbursed".to_string(),
            });
        }
        Ok(loan)
    }

    /// remaining balance not yet covered by open installments
    async fn unscheduled_balance(&self, loan: &Loan) -> Result<Money> {
        let scheduled: Money = self
            .ctx
            .open_installments(loan.id)
            .await?
            .iter()
            .map(Repayment::outstanding)
            .sum();
        Ok(loan.remaining_balance().saturating_sub(scheduled))
    }

    fn emit_scheduled(&self, repayment: &Repayment) {
        self.ctx.events.emit(Event::RepaymentScheduled {
            loan_id: repayment.loan_id,
            repayment_id: repayment.id,
            amount_due: repayment.amount_due,
            due_date: repayment.due_date,
        });
    }

    fn record_transition(&self, loan: &Loan, old_status: LoanStatus, now: DateTime<Utc>) {
        self.ctx.events.emit(Event::StatusChanged {
            loan_id: loan.id,
            old_status,
            new_status: loan.status,
            timestamp: now,
        });
    }
}
