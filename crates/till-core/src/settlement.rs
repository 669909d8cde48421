//! # Settlement
//!
//! Pure rules for attributing a payment to invoice lines and for deriving an
//! invoice's status from its lines.
//!
//! ## Greedy Allocation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Invoice ₹200:  line 1 ₹100 (unpaid)   line 2 ₹100 (unpaid)             │
//! │                                                                         │
//! │  pay ₹120  ──►  line 1: due 100, pay 100 ──► PAID          rem 20       │
//! │                 line 2: due 100, pay  20 ──► PARTIALLY_PAID rem  0      │
//! │                                                                         │
//! │  pay ₹80   ──►  line 1: due   0, skipped                                │
//! │                 line 2: due  80, pay  80 ──► PAID           rem  0      │
//! │                                                                         │
//! │  Lines are settled in insertion order, first line first. Never          │
//! │  proportional. Whatever is left after the last line is "unapplied".     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{InvoiceStatus, PaymentStatus};
use crate::validation::ValidationResult;

// =============================================================================
// Inputs / Outputs
// =============================================================================

/// The settlement-relevant slice of an invoice line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBalance {
    pub id: String,
    pub total: Money,
    pub paid_amount: Money,
}

impl LineBalance {
    pub fn new(id: impl Into<String>, total: Money, paid_amount: Money) -> Self {
        Self {
            id: id.into(),
            total,
            paid_amount,
        }
    }

    fn due(&self) -> Money {
        self.total - self.paid_amount
    }
}

/// A line that received part of a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSettlement {
    pub id: String,
    /// Portion of this payment applied to the line.
    pub applied: Money,
    /// New cumulative paid amount.
    pub paid_amount: Money,
    pub payment_status: PaymentStatus,
}

/// Result of running one payment through [`allocate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Allocation {
    /// Only the lines that received money, in settlement order.
    pub lines: Vec<LineSettlement>,
    pub applied: Money,
    /// Overpayment. Absorbed by the ledger; reported for the caller to act on.
    pub unapplied: Money,
}

/// Derived invoice figures after a recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceTotals {
    pub total: Money,
    pub paid: Money,
    pub balance: Money,
    pub status: InvoiceStatus,
}

// =============================================================================
// Rules
// =============================================================================

/// Walks `lines` in order and applies `amount` greedily.
///
/// ## Rules
/// - stop once nothing remains
/// - skip lines with nothing due (`total - paid <= 0`)
/// - otherwise pay `min(due, remaining)`
///
/// A non-positive `amount` allocates nothing.
pub fn allocate(lines: &[LineBalance], amount: Money) -> Allocation {
    let mut remaining = amount;
    let mut settled = Vec::new();

    for line in lines {
        if !remaining.is_positive() {
            break;
        }

        let due = line.due();
        if !due.is_positive() {
            continue;
        }

        let pay = due.min(remaining);
        let paid_amount = line.paid_amount + pay;
        remaining -= pay;

        settled.push(LineSettlement {
            id: line.id.clone(),
            applied: pay,
            paid_amount,
            payment_status: line_payment_status(line.total, paid_amount),
        });
    }

    let applied: Money = settled.iter().map(|line| line.applied).sum();
    Allocation {
        lines: settled,
        applied,
        unapplied: if amount.is_positive() {
            amount - applied
        } else {
            Money::zero()
        },
    }
}

/// Settlement state of a single line.
pub fn line_payment_status(total: Money, paid: Money) -> PaymentStatus {
    if paid >= total && paid.is_positive() {
        PaymentStatus::Paid
    } else if paid.is_positive() {
        PaymentStatus::PartiallyPaid
    } else {
        PaymentStatus::Unpaid
    }
}

/// Invoice status from summed line totals.
///
/// PAID iff `paid >= total`; PARTIALLY_PAID iff `0 < paid < total`;
/// otherwise PENDING. An invoice with no lines is therefore PAID.
pub fn derive_invoice_status(total: Money, paid: Money) -> InvoiceStatus {
    if paid >= total {
        InvoiceStatus::Paid
    } else if paid.is_positive() {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Pending
    }
}

/// Sums `(total, paid)` pairs and derives status and balance.
///
/// Fails with `OutOfRange` if either sum leaves `i64`.
pub fn invoice_totals<I>(lines: I) -> ValidationResult<InvoiceTotals>
where
    I: IntoIterator<Item = (Money, Money)>,
{
    let overflow = || ValidationError::OutOfRange {
        field: "invoice total".to_string(),
        min: 0,
        max: i64::MAX,
    };

    let mut total = Money::zero();
    let mut paid = Money::zero();
    for (line_total, line_paid) in lines {
        total = total.checked_add(line_total).ok_or_else(overflow)?;
        paid = paid.checked_add(line_paid).ok_or_else(overflow)?;
    }

    Ok(InvoiceTotals {
        total,
        paid,
        balance: total - paid,
        status: derive_invoice_status(total, paid),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rupees(r: i64) -> Money {
        Money::from_rupees(r)
    }

    fn two_lines() -> Vec<LineBalance> {
        vec![
            LineBalance::new("line-1", rupees(100), Money::zero()),
            LineBalance::new("line-2", rupees(100), Money::zero()),
        ]
    }

    #[test]
    fn test_first_line_settled_first() {
        let outcome = allocate(&two_lines(), rupees(120));

        assert_eq!(outcome.lines.len(), 2);
        assert_eq!(outcome.lines[0].paid_amount, rupees(100));
        assert_eq!(outcome.lines[0].payment_status, PaymentStatus::Paid);
        assert_eq!(outcome.lines[1].paid_amount, rupees(20));
        assert_eq!(outcome.lines[1].payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(outcome.applied, rupees(120));
        assert_eq!(outcome.unapplied, Money::zero());
    }

    #[test]
    fn test_settled_lines_are_skipped() {
        let lines = vec![
            LineBalance::new("line-1", rupees(100), rupees(100)),
            LineBalance::new("line-2", rupees(100), rupees(20)),
        ];
        let outcome = allocate(&lines, rupees(80));

        assert_eq!(outcome.lines.len(), 1);
        assert_eq!(outcome.lines[0].id, "line-2");
        assert_eq!(outcome.lines[0].paid_amount, rupees(100));
        assert_eq!(outcome.lines[0].payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_overpayment_is_reported_as_unapplied() {
        let outcome = allocate(&two_lines(), rupees(250));

        assert_eq!(outcome.applied, rupees(200));
        assert_eq!(outcome.unapplied, rupees(50));
    }

    #[test]
    fn test_applied_is_min_of_amount_and_total_due() {
        let lines = vec![
            LineBalance::new("a", rupees(30), rupees(10)),
            LineBalance::new("b", rupees(50), rupees(60)),
            LineBalance::new("c", rupees(40), Money::zero()),
        ];
        // due: 20, -10 (ignored), 40 → total due 60
        for amount in [5, 20, 45, 60, 90] {
            let outcome = allocate(&lines, rupees(amount));
            assert_eq!(outcome.applied, rupees(amount.min(60)));
            assert!(outcome.lines.iter().all(|l| l.id != "b"));
        }
    }

    #[test]
    fn test_non_positive_amount_allocates_nothing() {
        assert_eq!(allocate(&two_lines(), Money::zero()), Allocation::default());
        let outcome = allocate(&two_lines(), Money::from_paise(-100));
        assert!(outcome.lines.is_empty());
        assert_eq!(outcome.unapplied, Money::zero());
    }

    #[test]
    fn test_derive_invoice_status() {
        assert_eq!(derive_invoice_status(rupees(200), Money::zero()), InvoiceStatus::Pending);
        assert_eq!(derive_invoice_status(rupees(200), rupees(120)), InvoiceStatus::PartiallyPaid);
        assert_eq!(derive_invoice_status(rupees(200), rupees(200)), InvoiceStatus::Paid);
        assert_eq!(derive_invoice_status(rupees(200), rupees(250)), InvoiceStatus::Paid);
        assert_eq!(derive_invoice_status(Money::zero(), Money::zero()), InvoiceStatus::Paid);
    }

    #[test]
    fn test_invoice_totals() {
        let totals = invoice_totals([(rupees(100), rupees(100)), (rupees(100), rupees(20))]).unwrap();
        assert_eq!(totals.total, rupees(200));
        assert_eq!(totals.paid, rupees(120));
        assert_eq!(totals.balance, rupees(80));
        assert_eq!(totals.status, InvoiceStatus::PartiallyPaid);

        let half = Money::from_paise(i64::MAX / 2 + 1);
        assert!(matches!(
            invoice_totals([(half, Money::zero()), (half, Money::zero())]),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_line_payment_status() {
        assert_eq!(line_payment_status(rupees(10), Money::zero()), PaymentStatus::Unpaid);
        assert_eq!(line_payment_status(rupees(10), rupees(3)), PaymentStatus::PartiallyPaid);
        assert_eq!(line_payment_status(rupees(10), rupees(10)), PaymentStatus::Paid);
    }
}
