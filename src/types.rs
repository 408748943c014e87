use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unique identifier for a repayment installment
pub type RepaymentId = Uuid;

/// external borrower reference (owned by the identity layer)
pub type BorrowerId = String;

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// application received, awaiting decision
    Pending,
    /// approved, funds not yet confirmed as moved
    Approved,
    /// application turned down
    Rejected,
    /// funds transferred to the borrower
    Disbursed,
    /// total repayment collected
    Repaid,
    /// written off after repeated missed installments
    Defaulted,
}

impl LoanStatus {
    /// approved or disbursed: the loan is accruing obligations
    pub fn is_active(&self) -> bool {
        matches!(self, LoanStatus::Approved | LoanStatus::Disbursed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Rejected | LoanStatus::Repaid | LoanStatus::Defaulted
        )
    }

    pub const ACTIVE: [LoanStatus; 2] = [LoanStatus::Approved, LoanStatus::Disbursed];
}

/// repayment installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentStatus {
    Pending,
    Paid,
    Late,
    Defaulted,
}

impl RepaymentStatus {
    /// still owes money
    pub fn is_open(&self) -> bool {
        matches!(self, RepaymentStatus::Pending | RepaymentStatus::Late)
    }
}

/// how the borrower repays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RepaymentMethod {
    #[serde(rename = "auto-debit")]
    AutoDebit,
    #[default]
    #[serde(rename = "manual")]
    Manual,
}

/// admin decision on a pending application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}
