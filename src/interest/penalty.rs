use serde::{Deserialize, Serialize};

use crate::decimal::Money;

/// flat late penalty configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// fee added once when an installment turns late
    pub flat_amount: Money,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            flat_amount: Money::from_major(10),
        }
    }
}

/// engine for late penalties
pub struct PenaltyEngine {
    pub config: PenaltyConfig,
}

impl PenaltyEngine {
    pub fn new(config: PenaltyConfig) -> Self {
        Self { config }
    }

    /// penalty for an installment moving pending -> late
    pub fn assess(&self, installment_penalty: Money, loan_total: Money) -> PenaltyAssessment {
        let amount = self.config.flat_amount;
        PenaltyAssessment {
            amount,
            installment_penalty: installment_penalty + amount,
            loan_total: loan_total + amount,
        }
    }
}

/// penalty assessment result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyAssessment {
    pub amount: Money,
    /// accumulated penalty on the installment after this assessment
    pub installment_penalty: Money,
    /// loan total repayment after this assessment
    pub loan_total: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_penalty_inflates_both_totals() {
        let engine = PenaltyEngine::new(PenaltyConfig::default());
        let result = engine.assess(Money::ZERO, Money::from_major(500));

        assert_eq!(result.amount, Money::from_major(10));
        assert_eq!(result.installment_penalty, Money::from_major(10));
        assert_eq!(result.loan_total, Money::from_major(510));
    }

    #[test]
    fn test_penalty_accumulates() {
        let engine = PenaltyEngine::new(PenaltyConfig {
            flat_amount: Money::from_str_exact("2.50").unwrap(),
        });
        let first = engine.assess(Money::ZERO, Money::from_major(100));
        let second = engine.assess(first.installment_penalty, first.loan_total);

        assert_eq!(second.installment_penalty, Money::from_major(5));
        assert_eq!(second.loan_total, Money::from_major(105));
    }
}
