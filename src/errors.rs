use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::capabilities::PaymentError;
use crate::decimal::Money;
use crate::store::StoreError;
use crate::types::LoanStatus;

/// stable error classification surfaced to callers of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    AlreadySettled,
    Payment,
    Persistence,
    Configuration,
    Calculation,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::AlreadySettled => "ALREADY_SETTLED",
            ErrorKind::Payment => "PAYMENT_ERROR",
            ErrorKind::Persistence => "PERSISTENCE_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::Calculation => "CALCULATION_ERROR",
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid amount: {amount} ({reason})")]
    InvalidAmount {
        amount: Money,
        reason: String,
    },

    #[error("invalid tenure: {days} days")]
    InvalidTenure {
        days: u32,
    },

    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
    },

    #[error("overpayment of {requested}: the remaining balance is {remaining}")]
    Overpayment {
        requested: Money,
        remaining: Money,
    },

    #[error("loan not found: {id}")]
    LoanNotFound {
        id: Uuid,
    },

    #[error("no active loan for loan {id}")]
    NoActiveLoan {
        id: Uuid,
    },

    #[error("no active loan for borrower {borrower_id}")]
    NoActiveLoanForBorrower {
        borrower_id: String,
    },

    #[error("repayment not found: {id}")]
    RepaymentNotFound {
        id: Uuid,
    },

    #[error("invalid state: current {current:?}, expected {expected}")]
    InvalidState {
        current: LoanStatus,
        expected: String,
    },

    #[error("borrower {borrower_id} already has an active loan {loan_id}")]
    ActiveLoanExists {
        borrower_id: String,
        loan_id: Uuid,
    },

    #[error("loan already fully repaid: {repaid} of {total}")]
    AlreadySettled {
        total: Money,
        repaid: Money,
    },

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("calculation error: {message}")]
    CalculationError {
        message: String,
    },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount { .. }
            | LedgerError::InvalidTenure { .. }
            | LedgerError::InvalidInput { .. }
            | LedgerError::Overpayment { .. } => ErrorKind::Validation,
            LedgerError::LoanNotFound { .. }
            | LedgerError::NoActiveLoan { .. }
            | LedgerError::NoActiveLoanForBorrower { .. }
            | LedgerError::RepaymentNotFound { .. } => ErrorKind::NotFound,
            LedgerError::InvalidState { .. } | LedgerError::ActiveLoanExists { .. } => {
                ErrorKind::InvalidState
            }
            LedgerError::AlreadySettled { .. } => ErrorKind::AlreadySettled,
            LedgerError::Payment(_) => ErrorKind::Payment,
            LedgerError::Persistence(_) => ErrorKind::Persistence,
            LedgerError::InvalidConfiguration { .. } => ErrorKind::Configuration,
            LedgerError::CalculationError { .. } => ErrorKind::Calculation,
        }
    }

    /// remaining balance for errors that carry one
    pub fn remaining_balance(&self) -> Option<Money> {
        match self {
            LedgerError::Overpayment { remaining, .. } => Some(*remaining),
            LedgerError::AlreadySettled { .. } => Some(Money::ZERO),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Persistence(StoreError::Unavailable(_)))
    }

    /// structured payload for the transport layer
    pub fn to_body(&self) -> ErrorBody {
        let kind = self.kind();
        ErrorBody {
            kind,
            code: kind.code().to_string(),
            message: self.to_string(),
            remaining_balance: self.remaining_balance(),
        }
    }
}

/// serializable error payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_balance: Option<Money>,
}

pub type Result<T> = std::result::Result<T, LedgerError>;
