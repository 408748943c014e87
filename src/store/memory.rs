use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::state::{Loan, Repayment};
use crate::types::{LoanId, RepaymentId};

use super::{LoanQuery, LoanStore, RepaymentQuery, StoreError, StoreResult, WriteBatch};

#[derive(Debug, Default)]
struct Tables {
    loans: HashMap<LoanId, Loan>,
    repayments: HashMap<RepaymentId, Repayment>,
}

/// In-memory store for development and testing.
///
/// `fail_next_writes` makes the next N writes report the store as unavailable
/// without touching any data, which is how tests exercise retry paths.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    failing_writes: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

fn check_version(id: uuid::Uuid, expected: u64, found: u64) -> StoreResult<()> {
    if expected != found {
        return Err(StoreError::Conflict { id, expected, found });
    }
    Ok(())
}

#[async_trait]
impl LoanStore for InMemoryStore {
    async fn insert_loan(&self, loan: &Loan) -> StoreResult<Loan> {
        let mut tables = self.write()?;
        if tables.loans.contains_key(&loan.id) {
            return Err(StoreError::Duplicate(loan.id));
        }
        tables.loans.insert(loan.id, loan.clone());
        Ok(loan.clone())
    }

    async fn get_loan(&self, id: LoanId) -> StoreResult<Option<Loan>> {
        Ok(self.read()?.loans.get(&id).cloned())
    }

    async fn query_loans(&self, query: &LoanQuery) -> StoreResult<Vec<Loan>> {
        let tables = self.read()?;
        let mut loans: Vec<Loan> = tables
            .loans
            .values()
            .filter(|loan| query.matches(loan))
            .cloned()
            .collect();
        loans.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(loans)
    }

    async fn insert_repayment(&self, repayment: &Repayment) -> StoreResult<Repayment> {
        let mut tables = self.write()?;
        if !tables.loans.contains_key(&repayment.loan_id) {
            return Err(StoreError::Missing(repayment.loan_id));
        }
        if tables.repayments.contains_key(&repayment.id) {
            return Err(StoreError::Duplicate(repayment.id));
        }
        tables.repayments.insert(repayment.id, repayment.clone());
        Ok(repayment.clone())
    }

    async fn get_repayment(&self, id: RepaymentId) -> StoreResult<Option<Repayment>> {
        Ok(self.read()?.repayments.get(&id).cloned())
    }

    async fn query_repayments(&self, query: &RepaymentQuery) -> StoreResult<Vec<Repayment>> {
        let tables = self.read()?;
        let mut repayments: Vec<Repayment> = tables
            .repayments
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        repayments.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(repayments)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<WriteBatch> {
        let mut tables = self.write()?;

        // validate everything before touching anything
        if let Some(loan) = &batch.loan {
            let stored = tables.loans.get(&loan.id).ok_or(StoreError::Missing(loan.id))?;
            check_version(loan.id, loan.version, stored.version)?;
        }
        for repayment in &batch.repayments {
            let stored = tables
                .repayments
                .get(&repayment.id)
                .ok_or(StoreError::Missing(repayment.id))?;
            check_version(repayment.id, repayment.version, stored.version)?;
        }

        let mut committed = WriteBatch::default();
        if let Some(mut loan) = batch.loan {
            loan.version += 1;
            tables.loans.insert(loan.id, loan.clone());
            committed.loan = Some(loan);
        }
        for mut repayment in batch.repayments {
            repayment.version += 1;
            tables.repayments.insert(repayment.id, repayment.clone());
            committed.repayments.push(repayment);
        }

        Ok(committed)
    }
}
