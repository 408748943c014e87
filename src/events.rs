use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{BorrowerId, LoanId, LoanStatus, RepaymentId};

/// all events that can be emitted by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // lifecycle events
    LoanApplied {
        loan_id: LoanId,
        borrower_id: BorrowerId,
        principal: Money,
        total_repayment: Money,
        due_date: DateTime<Utc>,
    },
    LoanApproved {
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    LoanRejected {
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    DisbursementAttempted {
        loan_id: LoanId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    LoanDisbursed {
        loan_id: LoanId,
        amount: Money,
        reference: String,
        timestamp: DateTime<Utc>,
    },
    DisbursementFailed {
        loan_id: LoanId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    LoanRepaid {
        loan_id: LoanId,
        total_repayment: Money,
        timestamp: DateTime<Utc>,
    },
    LoanDefaulted {
        loan_id: LoanId,
        late_installments: u32,
        timestamp: DateTime<Utc>,
    },

    // installment events
    RepaymentScheduled {
        loan_id: LoanId,
        repayment_id: RepaymentId,
        amount_due: Money,
        due_date: DateTime<Utc>,
    },
    PaymentReceived {
        loan_id: LoanId,
        amount: Money,
        new_repaid_amount: Money,
        remaining_balance: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentPaid {
        loan_id: LoanId,
        repayment_id: RepaymentId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    // reconciliation events
    AutoDebitCharged {
        loan_id: LoanId,
        repayment_id: RepaymentId,
        amount: Money,
        reference: String,
        timestamp: DateTime<Utc>,
    },
    AutoDebitFailed {
        loan_id: LoanId,
        repayment_id: RepaymentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    RepaymentLate {
        loan_id: LoanId,
        repayment_id: RepaymentId,
        penalty: Money,
        new_total_repayment: Money,
        timestamp: DateTime<Utc>,
    },

    StatusChanged {
        loan_id: LoanId,
        old_status: LoanStatus,
        new_status: LoanStatus,
        timestamp: DateTime<Utc>,
    },
}

/// default number of events kept before the oldest are dropped
pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;

/// Event store for collecting events during operations. Holds at most
/// `capacity` events; once full the oldest is dropped for each new one.
#[derive(Debug)]
pub struct EventStore {
    events: VecDeque<Event>,
    capacity: usize,
    dropped: u64,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// a capacity of zero is treated as one
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn emit(&mut self, event: Event) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// events evicted since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// event store shared between the ledger components
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<EventStore>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventStore::with_capacity(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EventStore> {
        // a poisoned log is still a valid queue of events
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn emit(&self, event: Event) {
        let mut store = self.lock();
        let was_full = store.len() == store.capacity();
        store.emit(event);
        if was_full && store.dropped() == 1 {
            tracing::warn!(capacity = store.capacity(), "event log full, dropping oldest events");
        }
    }

    /// copy of everything still retained
    pub fn snapshot(&self) -> Vec<Event> {
        self.lock().events().cloned().collect()
    }

    pub fn take_events(&self) -> Vec<Event> {
        self.lock().take_events()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.lock().events().filter(|e| predicate(e)).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped()
    }
}
