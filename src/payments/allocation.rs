use chrono::{DateTime, Utc};

use crate::decimal::Money;
use crate::state::Repayment;
use crate::types::RepaymentId;

/// where a payment went across the open installments
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Allocation {
    /// installments touched by the payment, updated in place
    pub touched: Vec<Repayment>,
    /// installments the payment brought to paid
    pub settled: Vec<(RepaymentId, Money)>,
    /// part of the payment not covered by any installment
    pub unallocated: Money,
}

impl Allocation {
    pub fn allocated(&self, total: Money) -> Money {
        total - self.unallocated
    }
}

/// Apply `amount` to `installments` oldest due first.
///
/// Late installments owe their penalty too, so a payment clears the
/// penalty before moving on to the next installment.
pub fn allocate(mut installments: Vec<Repayment>, amount: Money, now: DateTime<Utc>) -> Allocation {
    installments.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.created_at.cmp(&b.created_at)));

    let mut remaining = amount;
    let mut allocation = Allocation::default();

    for mut installment in installments {
        if remaining.is_zero() {
            break;
        }
        if !installment.status.is_open() {
            continue;
        }

        let applied = installment.apply(remaining, now);
        if applied.is_zero() {
            continue;
        }
        remaining -= applied;

        if !installment.status.is_open() {
            allocation.settled.push((installment.id, installment.amount_paid));
        }
        allocation.touched.push(installment);
    }

    allocation.unallocated = remaining;
    allocation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepaymentStatus;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn installment(loan_id: Uuid, amount: i64, due_in_days: i64) -> Repayment {
        Repayment::new(loan_id, Money::from_major(amount), now() + Duration::days(due_in_days), now())
    }

    #[test]
    fn test_oldest_installment_first() {
        let loan_id = Uuid::new_v4();
        let later = installment(loan_id, 100, 20);
        let earlier = installment(loan_id, 100, 10);

        let allocation = allocate(vec![later.clone(), earlier.clone()], Money::from_major(150), now());

        assert_eq!(allocation.touched.len(), 2);
        assert_eq!(allocation.touched[0].id, earlier.id);
        assert_eq!(allocation.touched[0].status, RepaymentStatus::Paid);
        assert_eq!(allocation.touched[1].id, later.id);
        assert_eq!(allocation.touched[1].amount_paid, Money::from_major(50));
        assert_eq!(allocation.settled, vec![(earlier.id, Money::from_major(100))]);
        assert_eq!(allocation.unallocated, Money::ZERO);
    }

    #[test]
    fn test_late_installment_owes_penalty_first() {
        let loan_id = Uuid::new_v4();
        let mut late = installment(loan_id, 100, -5);
        late.mark_late(Money::from_major(10));

        let allocation = allocate(vec![late], Money::from_major(105), now());
        assert_eq!(allocation.touched[0].status, RepaymentStatus::Late);
        assert_eq!(allocation.touched[0].outstanding(), Money::from_major(5));
        assert!(allocation.settled.is_empty());
    }

    #[test]
    fn test_payment_beyond_schedule_is_unallocated() {
        let loan_id = Uuid::new_v4();
        let allocation = allocate(vec![installment(loan_id, 40, 3)], Money::from_major(100), now());

        assert_eq!(allocation.unallocated, Money::from_major(60));
        assert_eq!(allocation.allocated(Money::from_major(100)), Money::from_major(40));
    }

    #[test]
    fn test_no_installments() {
        let allocation = allocate(Vec::new(), Money::from_major(25), now());
        assert!(allocation.touched.is_empty());
        assert_eq!(allocation.unallocated, Money::from_major(25));
    }
}
