use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};

/// one planned installment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstallmentPlan {
    pub number: u32,
    pub amount: Money,
    pub due_date: DateTime<Utc>,
}

/// split `total` into `count` equal installments spread over `tenure_days`
/// from `start`; the cent remainder goes on the last installment, which is
/// due on the final day of the tenure
pub fn split_installments(
    total: Money,
    count: u32,
    start: DateTime<Utc>,
    tenure_days: u32,
) -> Result<Vec<InstallmentPlan>> {
    if count == 0 {
        return Err(LedgerError::InvalidInput {
            message: "installment count must be at least 1".to_string(),
        });
    }
    if !total.is_positive() {
        return Err(LedgerError::InvalidAmount {
            amount: total,
            reason: "nothing left to schedule".to_string(),
        });
    }

    let base = Money::from_decimal(
        (total.as_decimal() / Decimal::from(count))
            .round_dp_with_strategy(Money::SCALE, RoundingStrategy::ToZero),
    );
    if base.is_zero() {
        return Err(LedgerError::InvalidInput {
            message: format!("{} is too small to split into {} installments", total, count),
        });
    }

    let mut plans = Vec::with_capacity(count as usize);
    let mut scheduled = Money::ZERO;
    for number in 1..=count {
        let amount = if number == count { total - scheduled } else { base };
        let offset = u64::from(tenure_days) * u64::from(number) / u64::from(count);
        plans.push(InstallmentPlan {
            number,
            amount,
            due_date: start + Duration::days(offset as i64),
        });
        scheduled += amount;
    }

    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_split_assigns_remainder_to_last() {
        let plans = split_installments(Money::from_str_exact("1012.07").unwrap(), 3, start(), 30).unwrap();

        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].amount, Money::from_str_exact("337.35").unwrap());
        assert_eq!(plans[1].amount, Money::from_str_exact("337.35").unwrap());
        assert_eq!(plans[2].amount, Money::from_str_exact("337.37").unwrap());

        let total: Money = plans.iter().map(|p| p.amount).sum();
        assert_eq!(total, Money::from_str_exact("1012.07").unwrap());
    }

    #[test]
    fn test_due_dates_spread_over_tenure() {
        let plans = split_installments(Money::from_major(300), 3, start(), 30).unwrap();

        assert_eq!(plans[0].due_date, start() + Duration::days(10));
        assert_eq!(plans[1].due_date, start() + Duration::days(20));
        assert_eq!(plans[2].due_date, start() + Duration::days(30));
    }

    #[test]
    fn test_single_installment() {
        let plans = split_installments(Money::from_major(120), 1, start(), 14).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].amount, Money::from_major(120));
        assert_eq!(plans[0].due_date, start() + Duration::days(14));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(split_installments(Money::from_major(100), 0, start(), 30).is_err());
        assert!(split_installments(Money::ZERO, 2, start(), 30).is_err());
        assert!(split_installments(Money::CENT, 2, start(), 30).is_err());
    }
}
