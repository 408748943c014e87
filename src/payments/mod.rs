pub mod allocation;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::capabilities::PaymentReceipt;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::Event;
use crate::ledger::LedgerContext;
use crate::state::{Loan, Repayment};
use crate::store::{LoanQuery, RepaymentQuery, WriteBatch};
use crate::types::{LoanId, LoanStatus};

pub use allocation::{allocate, Allocation};

/// read model returned by [`RepaymentProcessor::get_loan_details`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanDetails {
    pub loan_id: LoanId,
    pub amount: Money,
    /// daily rate as a fraction, 0.0004 for 0.04% a day
    pub interest_rate: Rate,
    /// the same daily rate in percent, 0.04 for 0.04% a day
    pub interest_rate_percentage: Decimal,
    pub total_repayment: Money,
    pub due_date: DateTime<Utc>,
    pub status: LoanStatus,
    /// sum of penalties across all installments
    pub total_penalty: Money,
    pub repayments: Vec<Repayment>,
    pub penalty_applied: bool,
    pub repaid_amount: Money,
    pub remaining_balance: Money,
}

/// applies money to loans: borrower payments and confirmed auto-debit charges
#[derive(Clone)]
pub struct RepaymentProcessor {
    ctx: LedgerContext,
}

impl RepaymentProcessor {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Apply a borrower payment to an active loan.
    ///
    /// A settled loan reports [`LedgerError::AlreadySettled`]; any other loan
    /// outside approved or disbursed is not found. Payments above the
    /// remaining balance are refused with the balance attached.
    pub async fn apply_repayment(&self, loan_id: LoanId, amount: Money) -> Result<Loan> {
        let _loan_guard = self.ctx.loan_locks.lock(&loan_id).await;

        let mut loan = self.ctx.load_loan(loan_id).await?;
        if loan.is_settled() {
            return Err(LedgerError::AlreadySettled {
                total: loan.total_repayment,
                repaid: loan.repaid_amount,
            });
        }
        if !loan.status.is_active() {
            return Err(LedgerError::NoActiveLoan { id: loan_id });
        }
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount {
                amount,
                reason: "repayment must be positive".to_string(),
            });
        }
        let remaining = loan.remaining_balance();
        if amount > remaining {
            return Err(LedgerError::Overpayment {
                requested: amount,
                remaining,
            });
        }

        let now = self.ctx.now();
        let old_status = loan.status;
        let settled = loan.record_payment(amount, now);
        let allocation = allocate(self.ctx.open_installments(loan_id).await?, amount, now);

        let committed = self
            .ctx
            .store
            .commit(WriteBatch::loan(loan).with_repayments(allocation.touched.clone()))
            .await?;
        let loan = committed.loan.ok_or(LedgerError::CalculationError {
            message: "repayment commit returned no loan".to_string(),
        })?;

        self.ctx.events.emit(Event::PaymentReceived {
            loan_id,
            amount,
            new_repaid_amount: loan.repaid_amount,
            remaining_balance: loan.remaining_balance(),
            timestamp: now,
        });
        for (repayment_id, paid) in &allocation.settled {
            self.ctx.events.emit(Event::InstallmentPaid {
                loan_id,
                repayment_id: *repayment_id,
                amount: *paid,
                timestamp: now,
            });
        }
        if settled {
            self.emit_repaid(&loan, old_status, now);
        }

        tracing::info!(
            loan_id = %loan_id,
            amount = %amount,
            repaid = %loan.repaid_amount,
            remaining = %loan.remaining_balance(),
            allocated = %allocation.allocated(amount),
            settled,
            "repayment applied"
        );

        Ok(loan)
    }

    /// apply a payment to the borrower's single active loan
    pub async fn apply_repayment_for_borrower(&self, borrower_id: &str, amount: Money) -> Result<Loan> {
        let loan = self
            .ctx
            .active_loan(borrower_id)
            .await?
            .ok_or_else(|| LedgerError::NoActiveLoanForBorrower {
                borrower_id: borrower_id.to_string(),
            })?;
        self.apply_repayment(loan.id, amount).await
    }

    /// every installment of the loan, earliest due first; empty when none exist
    pub async fn get_repayment_history(&self, loan_id: LoanId) -> Result<Vec<Repayment>> {
        Ok(self.ctx.store.query_repayments(&RepaymentQuery::loan(loan_id)).await?)
    }

    pub async fn get_loan_details(&self, loan_id: LoanId) -> Result<LoanDetails> {
        let loan = self.ctx.load_loan(loan_id).await?;
        let repayments = self.get_repayment_history(loan_id).await?;
        let total_penalty = repayments.iter().map(|r| r.penalty).sum();

        Ok(LoanDetails {
            loan_id,
            amount: loan.principal,
            interest_rate: loan.interest_rate_per_day,
            interest_rate_percentage: loan.interest_rate_per_day.as_percentage(),
            total_repayment: loan.total_repayment,
            due_date: loan.due_date,
            status: loan.status,
            total_penalty,
            repayments,
            penalty_applied: loan.penalty_applied,
            repaid_amount: loan.repaid_amount,
            remaining_balance: loan.remaining_balance(),
        })
    }

    /// loans of one borrower with their balances
    pub async fn borrower_summary(&self, borrower_id: &str) -> Result<Vec<LoanDetails>> {
        let loans = self.ctx.store.query_loans(&LoanQuery::borrower(borrower_id)).await?;
        let mut details = Vec::with_capacity(loans.len());
        for loan in loans {
            details.push(self.get_loan_details(loan.id).await?);
        }
        Ok(details)
    }

    /// Record a charge the gateway already confirmed against `installment`.
    ///
    /// The caller holds the loan lock and passes the records it read under
    /// it. Money has moved, so the write is retried until the store accepts
    /// it.
    pub async fn settle_charged_installment(
        &self,
        mut loan: Loan,
        mut installment: Repayment,
        amount: Money,
        receipt: &PaymentReceipt,
    ) -> Result<Loan> {
        let now = self.ctx.now();
        let old_status = loan.status;
        let settled = loan.record_payment(amount, now);
        installment.apply(amount, now);
        let installment_paid = !installment.status.is_open();

        let committed = self
            .ctx
            .persist_durably(WriteBatch::loan(loan).with_repayment(installment.clone()))
            .await?;
        let loan = committed.loan.ok_or(LedgerError::CalculationError {
            message: "settlement commit returned no loan".to_string(),
        })?;

        self.ctx.events.emit(Event::AutoDebitCharged {
            loan_id: loan.id,
            repayment_id: installment.id,
            amount,
            reference: receipt.reference.clone(),
            timestamp: now,
        });
        self.ctx.events.emit(Event::PaymentReceived {
            loan_id: loan.id,
            amount,
            new_repaid_amount: loan.repaid_amount,
            remaining_balance: loan.remaining_balance(),
            timestamp: now,
        });
        if installment_paid {
            self.ctx.events.emit(Event::InstallmentPaid {
                loan_id: loan.id,
                repayment_id: installment.id,
                amount: installment.amount_paid,
                timestamp: now,
            });
        }
        if settled {
            self.emit_repaid(&loan, old_status, now);
        }

        tracing::info!(
            loan_id = %loan.id,
            repayment_id = %installment.id,
            amount = %amount,
            reference = %receipt.reference,
            settled,
            "auto-debit settled"
        );

        Ok(loan)
    }

    fn emit_repaid(&self, loan: &Loan, old_status: LoanStatus, now: DateTime<Utc>) {
        self.ctx.events.emit(Event::StatusChanged {
            loan_id: loan.id,
            old_status,
            new_status: LoanStatus::Repaid,
            timestamp: now,
        });
        self.ctx.events.emit(Event::LoanRepaid {
            loan_id: loan.id,
            total_repayment: loan.total_repayment,
            timestamp: now,
        });
        tracing::info!(loan_id = %loan.id, total = %loan.total_repayment, "loan fully repaid");
    }
}
