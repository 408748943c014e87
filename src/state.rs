use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::interest::LoanTerms;
use crate::types::{BorrowerId, LoanId, LoanStatus, RepaymentId, RepaymentMethod, RepaymentStatus};

/// loan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower_id: BorrowerId,

    // terms
    pub principal: Money,
    pub interest_rate_per_day: Rate,
    pub tenure_days: u32,
    pub due_date: DateTime<Utc>,

    // balances
    pub total_repayment: Money,
    pub repaid_amount: Money,

    pub status: LoanStatus,
    pub repayment_method: RepaymentMethod,

    // external references
    pub payment_method_ref: Option<String>,
    pub payout_ref: Option<String>,
    pub disbursement_reference: Option<String>,

    pub penalty_applied: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// bumped by the store on every successful update
    pub version: u64,
}

impl Loan {
    /// create a pending loan from priced terms
    pub fn new(
        borrower_id: BorrowerId,
        terms: &LoanTerms,
        repayment_method: RepaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            borrower_id,
            principal: terms.principal,
            interest_rate_per_day: terms.daily_rate,
            tenure_days: terms.tenure_days,
            due_date: terms.due_date,
            total_repayment: terms.total_repayment,
            repaid_amount: Money::ZERO,
            status: LoanStatus::Pending,
            repayment_method,
            payment_method_ref: None,
            payout_ref: None,
            disbursement_reference: None,
            penalty_applied: false,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// amount still owed
    pub fn remaining_balance(&self) -> Money {
        self.total_repayment.saturating_sub(self.repaid_amount)
    }

    /// repaid amount equals the total; never mutates
    pub fn is_settled(&self) -> bool {
        self.repaid_amount == self.total_repayment
    }

    pub fn update_status(&mut self, status: LoanStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    /// credit a payment; returns true when this payment settles the loan
    pub fn record_payment(&mut self, amount: Money, now: DateTime<Utc>) -> bool {
        self.repaid_amount += amount;
        self.updated_at = now;
        if self.repaid_amount >= self.total_repayment {
            self.status = LoanStatus::Repaid;
            return true;
        }
        false
    }

    /// raise the amount owed by a late penalty
    pub fn add_penalty(&mut self, new_total: Money, now: DateTime<Utc>) {
        debug_assert!(new_total >= self.total_repayment);
        self.total_repayment = new_total;
        self.penalty_applied = true;
        self.updated_at = now;
    }
}

/// repayment installment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repayment {
    pub id: RepaymentId,
    pub loan_id: LoanId,
    pub amount_due: Money,
    pub amount_paid: Money,
    pub due_date: DateTime<Utc>,
    pub status: RepaymentStatus,
    /// accumulated flat penalties
    pub penalty: Money,
    pub late_fee: Money,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Repayment {
    pub fn new(loan_id: LoanId, amount_due: Money, due_date: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            amount_due,
            amount_paid: Money::ZERO,
            due_date,
            status: RepaymentStatus::Pending,
            penalty: Money::ZERO,
            late_fee: Money::ZERO,
            paid_at: None,
            created_at: now,
            version: 0,
        }
    }

    /// what is still owed on this installment, penalties included
    pub fn outstanding(&self) -> Money {
        (self.amount_due + self.penalty).saturating_sub(self.amount_paid)
    }

    /// apply up to `amount`; returns the portion consumed
    pub fn apply(&mut self, amount: Money, now: DateTime<Utc>) -> Money {
        let applied = amount.min(self.outstanding());
        self.amount_paid += applied;
        if self.outstanding().is_zero() {
            self.status = RepaymentStatus::Paid;
            self.paid_at = Some(now);
        }
        applied
    }

    /// pending -> late, recording the new accumulated penalty
    pub fn mark_late(&mut self, penalty_total: Money) {
        self.status = RepaymentStatus::Late;
        self.late_fee = penalty_total - self.penalty;
        self.penalty = penalty_total;
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == RepaymentStatus::Pending && self.due_date < now
    }
}
