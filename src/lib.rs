pub mod capabilities;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod interest;
pub mod ledger;
pub mod locks;
pub mod payments;
pub mod sandbox;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;

// re-export key types
pub use capabilities::{
    ChargeCapability, DisburseCapability, NotificationCapability, NotifyError, PaymentError,
    PaymentReceipt,
};
pub use config::{EventConfig, GatewayConfig, InterestConfig, LedgerConfig, RetryPolicy, SchedulerConfig};
pub use decimal::{Money, Rate};
pub use engine::{LendingEngine, LendingEngineBuilder};
pub use errors::{ErrorBody, ErrorKind, LedgerError, Result};
pub use events::{Event, EventLog, EventStore};
pub use interest::{LoanTerms, PenaltyConfig, PenaltyEngine};
pub use ledger::{DecisionOutcome, LedgerContext, LoanApplication, LoanLedger};
pub use payments::{LoanDetails, RepaymentProcessor};
pub use scheduler::{CycleFailure, CycleReport, ReconciliationScheduler, SchedulerHandle};
pub use state::{Loan, Repayment};
pub use store::{InMemoryStore, LoanQuery, LoanStore, RepaymentQuery, StoreError, WriteBatch};
pub use types::{
    BorrowerId, Decision, LoanId, LoanStatus, RepaymentId, RepaymentMethod, RepaymentStatus,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
