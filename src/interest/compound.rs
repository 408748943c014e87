use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};

/// total owed after compounding `daily_rate` once per day for `tenure_days`,
/// rounded half-up to cents
pub fn compute_total_repayment(principal: Money, daily_rate: Rate, tenure_days: u32) -> Result<Money> {
    let factor = compound_factor(daily_rate, tenure_days)?;
    let total = principal
        .as_decimal()
        .checked_mul(factor)
        .ok_or_else(|| overflow(principal, daily_rate, tenure_days))?;

    Ok(Money::from_decimal(total))
}

/// (1 + r)^n by repeated exact multiplication
fn compound_factor(daily_rate: Rate, periods: u32) -> Result<Decimal> {
    let base = Decimal::ONE + daily_rate.as_decimal();
    let mut factor = Decimal::ONE;
    for _ in 0..periods {
        factor = factor.checked_mul(base).ok_or_else(|| LedgerError::CalculationError {
            message: format!("compound factor overflow at rate {} over {} days", daily_rate, periods),
        })?;
    }
    Ok(factor)
}

fn overflow(principal: Money, daily_rate: Rate, tenure_days: u32) -> LedgerError {
    LedgerError::CalculationError {
        message: format!(
            "total repayment overflow for principal {} at {} over {} days",
            principal, daily_rate, tenure_days
        ),
    }
}

/// due date is `tenure_days` calendar days after `today`; a tenure that runs
/// past the representable calendar is rejected
pub fn compute_due_date(today: DateTime<Utc>, tenure_days: u32) -> Result<DateTime<Utc>> {
    Duration::try_days(i64::from(tenure_days))
        .and_then(|tenure| today.checked_add_signed(tenure))
        .ok_or(LedgerError::InvalidTenure { days: tenure_days })
}

/// priced loan terms, computed once at application time
#[derive(Debug, Clone, PartialEq)]
pub struct LoanTerms {
    pub principal: Money,
    pub daily_rate: Rate,
    pub tenure_days: u32,
    pub total_repayment: Money,
    pub due_date: DateTime<Utc>,
}

impl LoanTerms {
    pub fn quote(
        principal: Money,
        daily_rate: Rate,
        tenure_days: u32,
        today: DateTime<Utc>,
    ) -> Result<Self> {
        // date check first, it is cheap and bounds the compounding loop
        let due_date = compute_due_date(today, tenure_days)?;
        Ok(Self {
            principal,
            daily_rate,
            tenure_days,
            total_repayment: compute_total_repayment(principal, daily_rate, tenure_days)?,
            due_date,
        })
    }

    /// interest portion of the total
    pub fn interest(&self) -> Money {
        self.total_repayment - self.principal
    }
}
