pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::state::{Loan, Repayment};
use crate::types::{BorrowerId, LoanId, LoanStatus, RepaymentId, RepaymentMethod, RepaymentStatus};

pub use memory::InMemoryStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("version conflict on {id}: expected {expected}, found {found}")]
    Conflict {
        id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("record not found: {0}")]
    Missing(Uuid),

    #[error("duplicate record: {0}")]
    Duplicate(Uuid),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// loan filter; empty fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoanQuery {
    pub borrower_id: Option<BorrowerId>,
    pub statuses: Vec<LoanStatus>,
    pub repayment_method: Option<RepaymentMethod>,
}

impl LoanQuery {
    pub fn borrower(borrower_id: impl Into<BorrowerId>) -> Self {
        Self {
            borrower_id: Some(borrower_id.into()),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[LoanStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_method(mut self, method: RepaymentMethod) -> Self {
        self.repayment_method = Some(method);
        self
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        self.borrower_id.as_ref().map_or(true, |b| *b == loan.borrower_id)
            && (self.statuses.is_empty() || self.statuses.contains(&loan.status))
            && self.repayment_method.map_or(true, |m| m == loan.repayment_method)
    }
}

/// installment filter; `due_before` is exclusive, `due_after` inclusive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepaymentQuery {
    pub loan_id: Option<LoanId>,
    pub statuses: Vec<RepaymentStatus>,
    pub due_after: Option<DateTime<Utc>>,
    pub due_before: Option<DateTime<Utc>>,
}

impl RepaymentQuery {
    pub fn loan(loan_id: LoanId) -> Self {
        Self {
            loan_id: Some(loan_id),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[RepaymentStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn due_before(mut self, at: DateTime<Utc>) -> Self {
        self.due_before = Some(at);
        self
    }

    pub fn due_after(mut self, at: DateTime<Utc>) -> Self {
        self.due_after = Some(at);
        self
    }

    pub fn matches(&self, repayment: &Repayment) -> bool {
        self.loan_id.map_or(true, |id| id == repayment.loan_id)
            && (self.statuses.is_empty() || self.statuses.contains(&repayment.status))
            && self.due_after.map_or(true, |at| repayment.due_date >= at)
            && self.due_before.map_or(true, |at| repayment.due_date < at)
    }
}

/// Durable storage for loans and their installments.
///
/// Updates are optimistic: the caller passes the record it read, and the
/// store rejects the write with [`StoreError::Conflict`] when the stored
/// `version` has moved on. A successful update returns the record with its
/// bumped version.
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn insert_loan(&self, loan: &Loan) -> StoreResult<Loan>;

    async fn get_loan(&self, id: LoanId) -> StoreResult<Option<Loan>>;

    async fn update_loan(&self, loan: &Loan) -> StoreResult<Loan> {
        let committed = self.commit(WriteBatch::loan(loan.clone())).await?;
        committed.loan.ok_or(StoreError::Missing(loan.id))
    }

    /// matching loans ordered by creation time
    async fn query_loans(&self, query: &LoanQuery) -> StoreResult<Vec<Loan>>;

    async fn insert_repayment(&self, repayment: &Repayment) -> StoreResult<Repayment>;

    async fn get_repayment(&self, id: RepaymentId) -> StoreResult<Option<Repayment>>;

    async fn update_repayment(&self, repayment: &Repayment) -> StoreResult<Repayment> {
        let committed = self
            .commit(WriteBatch::default().with_repayment(repayment.clone()))
            .await?;
        committed
            .repayments
            .into_iter()
            .next()
            .ok_or(StoreError::Missing(repayment.id))
    }

    /// matching installments ordered by due date ascending
    async fn query_repayments(&self, query: &RepaymentQuery) -> StoreResult<Vec<Repayment>>;

    /// apply every update in the batch or none of them
    async fn commit(&self, batch: WriteBatch) -> StoreResult<WriteBatch>;
}

/// updates to one loan and its installments that must land together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub loan: Option<Loan>,
    pub repayments: Vec<Repayment>,
}

impl WriteBatch {
    pub fn loan(loan: Loan) -> Self {
        Self {
            loan: Some(loan),
            repayments: Vec::new(),
        }
    }

    pub fn with_repayment(mut self, repayment: Repayment) -> Self {
        self.repayments.push(repayment);
        self
    }

    pub fn with_repayments(mut self, repayments: impl IntoIterator<Item = Repayment>) -> Self {
        self.repayments.extend(repayments);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.loan.is_none() && self.repayments.is_empty()
    }
}
