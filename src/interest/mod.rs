pub mod compound;
pub mod installments;
pub mod penalty;

pub use compound::{compute_due_date, compute_total_repayment, LoanTerms};
pub use installments::{split_installments, InstallmentPlan};
pub use penalty::{PenaltyAssessment, PenaltyConfig, PenaltyEngine};
