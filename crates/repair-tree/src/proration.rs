//! Day-based proration of amounts.
//!
//! A piece of an item is worth `amount × days(piece) / days(span)` where
//! `span` is the item's own full service period. Results are rounded to the
//! policy's number of decimals. When an amount is cut in two, only the
//! earlier piece is rounded; the later piece is the exact remainder, so the
//! two always add back up to the original amount.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::interval::Interval;

/// How a prorated amount is rounded to the policy's precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Midpoint away from zero (`2.705` → `2.71`, `-2.705` → `-2.71`).
    #[default]
    HalfUp,
    /// Banker's rounding.
    HalfEven,
    /// Truncate toward zero.
    Down,
}

impl RoundingMode {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingMode::Down => RoundingStrategy::ToZero,
        }
    }
}

/// Precision and rounding used whenever an amount is spread over days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProrationPolicy {
    /// Digits after the decimal point (2 for most currencies).
    pub decimals: u32,
    pub rounding: RoundingMode,
}

impl Default for ProrationPolicy {
    fn default() -> Self {
        Self {
            decimals: 2,
            rounding: RoundingMode::HalfUp,
        }
    }
}

impl ProrationPolicy {
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.decimals, self.rounding.strategy())
    }

    /// Smallest representable amount at this precision (`0.01` for 2 decimals).
    pub fn minor_unit(&self) -> Decimal {
        Decimal::new(1, self.decimals)
    }

    /// Value of `piece` when `amount` pays for the whole of `span`.
    ///
    /// `piece` is expected to lie inside `span`; the full span returns
    /// `amount` untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use repair_tree::{Interval, ProrationPolicy};
    /// use rust_decimal::Decimal;
    ///
    /// let d = |m, day| NaiveDate::from_ymd_opt(2014, m, day).unwrap();
    /// let jan = Interval::new(d(1, 1), d(2, 1)).unwrap();
    /// let tail = Interval::new(d(1, 25), d(2, 1)).unwrap();
    /// let amount = Decimal::from_str_exact("12.00").unwrap();
    ///
    /// let piece = ProrationPolicy::default().prorate(amount, &jan, &tail);
    /// assert_eq!(piece, Decimal::from_str_exact("2.71").unwrap());
    /// ```
    pub fn prorate(&self, amount: Decimal, span: &Interval, piece: &Interval) -> Decimal {
        if piece == span {
            return amount;
        }
        let total = span.days();
        if total <= 0 {
            return Decimal::ZERO;
        }
        let days = Decimal::from(piece.days().min(total));
        self.round(amount * days / Decimal::from(total))
    }

    /// Cut `amount`, the value of `piece`, at `at`.
    ///
    /// The earlier side is prorated against `basis` (the item's original
    /// period and amount) and the later side takes whatever remains. Returns
    /// `None` when `at` is not strictly inside `piece`.
    pub fn split(
        &self,
        basis: &ProrationBasis,
        piece: &Interval,
        amount: Decimal,
        at: NaiveDate,
    ) -> Option<(Decimal, Decimal)> {
        let (left, _) = piece.split_at(at)?;
        // The earlier side stays between zero and the piece's own amount.
        let (low, high) = if amount.is_sign_negative() {
            (amount, Decimal::ZERO)
        } else {
            (Decimal::ZERO, amount)
        };
        let left_amount = self
            .prorate(basis.amount, &basis.span, &left)
            .max(low)
            .min(high);
        Some((left_amount, amount - left_amount))
    }
}

/// The original period and amount an item was priced for.
///
/// Pieces cut from an item keep the basis of the item they came from, so
/// every piece is prorated against the same full period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProrationBasis {
    pub span: Interval,
    pub amount: Decimal,
}

impl ProrationBasis {
    pub fn new(span: Interval, amount: Decimal) -> Self {
        Self { span, amount }
    }
}
