//! Priced slices of a subscription charge.
//!
//! An [`Item`] is immutable: splitting, prorating and reversing all return
//! new items. Every item remembers the period and amount it was originally
//! priced for (its [`ProrationBasis`]) so that pieces cut from it are always
//! prorated against the whole charge, never against another piece.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RepairTreeError, Result};
use crate::interval::Interval;
use crate::proration::{ProrationBasis, ProrationPolicy};

/// What an item does to the invoice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemAction {
    /// A charge.
    #[default]
    Add,
    /// A repair: a negative amount reducing the item named by `linked_id`.
    Cancel,
    /// A proposed charge waiting to be reconciled against the current state.
    Merge,
}

impl fmt::Display for ItemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemAction::Add => "ADD",
            ItemAction::Cancel => "CANCEL",
            ItemAction::Merge => "MERGE",
        };
        f.write_str(name)
    }
}

/// How an item is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemKind {
    /// Billed for a period and prorated when the period changes.
    #[default]
    Recurring,
    /// A one-off charge. Never repaired or prorated, passed through as is.
    Fixed,
}

/// A priced, dated slice of a subscription charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ItemRecord", into = "ItemRecord")]
pub struct Item {
    id: Uuid,
    interval: Interval,
    amount: Decimal,
    currency: String,
    action: ItemAction,
    kind: ItemKind,
    linked_id: Option<Uuid>,
    adjusted_amount: Decimal,
    plan_name: Option<String>,
    phase_name: Option<String>,
    rate: Option<Decimal>,
    basis: ProrationBasis,
}

impl Item {
    /// A charge of `amount` for `interval`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use repair_tree::{Interval, Item, ItemAction};
    /// use rust_decimal::Decimal;
    /// use uuid::Uuid;
    ///
    /// let jan = Interval::new(
    ///     NaiveDate::from_ymd_opt(2014, 1, 1).unwrap(),
    ///     NaiveDate::from_ymd_opt(2014, 2, 1).unwrap(),
    /// )
    /// .unwrap();
    /// let item = Item::add(Uuid::new_v4(), jan, Decimal::new(1200, 2), "USD")
    ///     .with_plan("basic-monthly", "evergreen");
    ///
    /// assert_eq!(item.action(), ItemAction::Add);
    /// assert_eq!(item.rate(), Decimal::new(1200, 2));
    /// assert!(item.validate().is_ok());
    /// ```
    pub fn add(id: Uuid, interval: Interval, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            id,
            interval,
            amount,
            currency: currency.into(),
            action: ItemAction::Add,
            kind: ItemKind::Recurring,
            linked_id: None,
            adjusted_amount: Decimal::ZERO,
            plan_name: None,
            phase_name: None,
            rate: None,
            basis: ProrationBasis::new(interval, amount),
        }
    }

    /// A repair of `linked_id` over `interval`. `amount` is expected to be
    /// zero or negative.
    pub fn repair(
        id: Uuid,
        interval: Interval,
        amount: Decimal,
        currency: impl Into<String>,
        linked_id: Uuid,
    ) -> Self {
        Self {
            action: ItemAction::Cancel,
            linked_id: Some(linked_id),
            ..Self::add(id, interval, amount, currency)
        }
    }

    /// A one-off charge of `amount` dated `interval`.
    pub fn fixed(id: Uuid, interval: Interval, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Fixed,
            ..Self::add(id, interval, amount, currency)
        }
    }

    pub fn with_plan(mut self, plan_name: impl Into<String>, phase_name: impl Into<String>) -> Self {
        self.plan_name = Some(plan_name.into());
        self.phase_name = Some(phase_name.into());
        self
    }

    /// Catalog rate of the charge. Defaults to the un-prorated amount.
    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Total already credited against this charge by out-of-band adjustments.
    pub fn with_adjusted_amount(mut self, adjusted_amount: Decimal) -> Self {
        self.adjusted_amount = adjusted_amount.abs();
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn start_date(&self) -> NaiveDate {
        self.interval.start()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.interval.end()
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn action(&self) -> ItemAction {
        self.action
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn is_fixed(&self) -> bool {
        self.kind == ItemKind::Fixed
    }

    pub fn linked_id(&self) -> Option<Uuid> {
        self.linked_id
    }

    pub fn adjusted_amount(&self) -> Decimal {
        self.adjusted_amount
    }

    pub fn plan_name(&self) -> Option<&str> {
        self.plan_name.as_deref()
    }

    pub fn phase_name(&self) -> Option<&str> {
        self.phase_name.as_deref()
    }

    pub fn rate(&self) -> Decimal {
        self.rate.unwrap_or(self.basis.amount)
    }

    /// Period and amount the whole charge was priced for.
    pub fn basis(&self) -> &ProrationBasis {
        &self.basis
    }

    /// Adjustments have consumed the entire charge.
    pub fn fully_adjusted(&self) -> bool {
        !self.basis.amount.is_zero() && self.adjusted_amount >= self.basis.amount.abs()
    }

    /// Value of the whole charge still open to repair, before any repairs.
    pub fn unadjusted_amount(&self) -> Decimal {
        (self.basis.amount.abs() - self.adjusted_amount).max(Decimal::ZERO)
    }

    /// Check the invariants every ingested item must hold.
    ///
    /// # Errors
    ///
    /// Returns [`RepairTreeError::InvalidItem`] for an empty currency, a
    /// `CANCEL` without a linked item, marked fixed or with a positive
    /// amount, or a negative charge.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.currency.trim().is_empty() {
            Some("currency is empty")
        } else {
            match self.action {
                ItemAction::Cancel if self.linked_id.is_none() => {
                    Some("repair is not linked to any item")
                }
                ItemAction::Cancel if self.kind == ItemKind::Fixed => {
                    Some("fixed items cannot be repairs")
                }
                ItemAction::Cancel if self.amount.is_sign_positive() && !self.amount.is_zero() => {
                    Some("repair amount must not be positive")
                }
                ItemAction::Add | ItemAction::Merge if self.amount.is_sign_negative() => {
                    Some("charge amount must not be negative")
                }
                _ => None,
            }
        };
        match reason {
            Some(reason) => Err(RepairTreeError::InvalidItem {
                id: self.id,
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Both items bill the same plan, phase and rate under different ids.
    pub fn same_kind(&self, other: &Item) -> bool {
        self.id != other.id
            && self.kind == other.kind
            && self.currency == other.currency
            && self.plan_name.as_deref().unwrap_or("") == other.plan_name.as_deref().unwrap_or("")
            && self.phase_name.as_deref().unwrap_or("") == other.phase_name.as_deref().unwrap_or("")
            && self.rate() == other.rate()
    }

    /// Cut at `at`; the earlier piece is prorated and the later piece keeps
    /// the remainder. `None` unless `at` is strictly inside the item.
    pub fn split_at(&self, at: NaiveDate, policy: &ProrationPolicy) -> Option<(Item, Item)> {
        let (left, right) = self.interval.split_at(at)?;
        let (left_amount, right_amount) =
            policy.split(&self.basis, &self.interval, self.amount, at)?;
        Some((self.piece(left, left_amount), self.piece(right, right_amount)))
    }

    /// The share of the whole charge that falls on `piece`.
    pub fn prorated(&self, piece: Interval, policy: &ProrationPolicy) -> Item {
        if piece == self.interval {
            return self.clone();
        }
        let amount = policy.prorate(self.basis.amount, &self.basis.span, &piece);
        self.piece(piece, amount)
    }

    /// The share of this item's own amount that falls on `piece`.
    pub fn share(&self, piece: Interval, policy: &ProrationPolicy) -> Item {
        let amount = policy.prorate(self.amount, &self.interval, &piece);
        self.piece(piece, amount)
    }

    pub(crate) fn piece(&self, interval: Interval, amount: Decimal) -> Item {
        Item {
            interval,
            amount,
            ..self.clone()
        }
    }

    pub(crate) fn with_action(mut self, action: ItemAction) -> Self {
        self.action = action;
        self
    }

    pub(crate) fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }

    /// The charge turned into a repair of itself.
    pub(crate) fn reversed(&self) -> Item {
        Item {
            action: ItemAction::Cancel,
            linked_id: Some(self.id),
            amount: -self.amount,
            ..self.clone()
        }
    }

    /// Undo [`reversed`](Self::reversed): the charge a self-repair stands for.
    pub(crate) fn reinstated(&self) -> Item {
        Item {
            action: ItemAction::Add,
            linked_id: None,
            amount: -self.amount,
            ..self.clone()
        }
    }

    /// A repair of this item over `interval`, keeping its currency and kind.
    pub(crate) fn repair_of(&self, id: Uuid, interval: Interval, amount: Decimal) -> Item {
        Item {
            id,
            interval,
            amount,
            action: ItemAction::Cancel,
            linked_id: Some(self.id),
            adjusted_amount: Decimal::ZERO,
            basis: ProrationBasis::new(interval, amount),
            ..self.clone()
        }
    }

    /// Re-join two adjacent pieces of the same item.
    pub(crate) fn coalesce(&self, next: &Item) -> Option<Item> {
        if self.id != next.id || self.action != next.action || self.end_date() != next.start_date() {
            return None;
        }
        Some(self.piece(self.interval.span(&next.interval), self.amount + next.amount))
    }

    /// True when `other` is the same charge: interval, amount, currency and kind.
    pub(crate) fn matches(&self, other: &Item) -> bool {
        self.kind == other.kind
            && self.interval == other.interval
            && self.amount == other.amount
            && self.currency == other.currency
            && self.plan_name == other.plan_name
            && self.phase_name == other.phase_name
            && self.rate() == other.rate()
    }
}

/// Order in which items are reported: by start date, charges before
/// repairs, then by end date and id.
pub fn sort_for_view(items: &mut [Item]) {
    items.sort_by(|a, b| {
        (a.start_date(), a.action(), a.end_date(), a.id())
            .cmp(&(b.start_date(), b.action(), b.end_date(), b.id()))
    });
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.action, self.id, self.interval, self.amount, self.currency
        )?;
        if let Some(linked_id) = self.linked_id {
            write!(f, " -> {linked_id}")?;
        }
        Ok(())
    }
}

/// Wire form of an [`Item`].
///
/// `action` may be omitted: records with a `linkedId` are read as `CANCEL`,
/// everything else as `ADD`. `kind` defaults to `RECURRING`.
/// `fullyAdjusted: true` without an `adjustedAmount` marks the whole amount
/// as adjusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ItemAction>,
    #[serde(default, skip_serializing_if = "is_recurring")]
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_amount: Option<Decimal>,
    #[serde(default)]
    pub fully_adjusted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<Decimal>,
}

fn is_recurring(kind: &ItemKind) -> bool {
    *kind == ItemKind::Recurring
}

impl TryFrom<ItemRecord> for Item {
    type Error = RepairTreeError;

    fn try_from(record: ItemRecord) -> Result<Self> {
        let interval = Interval::new(record.start_date, record.end_date).map_err(|err| {
            RepairTreeError::InvalidItem {
                id: record.id,
                reason: err.to_string(),
            }
        })?;
        let action = record.action.unwrap_or(if record.linked_id.is_some() {
            ItemAction::Cancel
        } else {
            ItemAction::Add
        });
        let adjusted_amount = if record.fully_adjusted {
            record.amount.abs()
        } else {
            record.adjusted_amount.unwrap_or(Decimal::ZERO).abs()
        };
        let item = Item {
            id: record.id,
            interval,
            amount: record.amount,
            currency: record.currency,
            action,
            kind: record.kind,
            linked_id: record.linked_id,
            adjusted_amount,
            plan_name: record.plan_name,
            phase_name: record.phase_name,
            rate: record.rate,
            basis: ProrationBasis::new(interval, record.amount),
        };
        item.validate()?;
        Ok(item)
    }
}

impl From<Item> for ItemRecord {
    fn from(item: Item) -> Self {
        let fully_adjusted = item.fully_adjusted();
        ItemRecord {
            id: item.id,
            start_date: item.interval.start(),
            end_date: item.interval.end(),
            amount: item.amount,
            currency: item.currency,
            action: Some(item.action),
            kind: item.kind,
            linked_id: item.linked_id,
            adjusted_amount: (!item.adjusted_amount.is_zero()).then_some(item.adjusted_amount),
            fully_adjusted,
            plan_name: item.plan_name,
            phase_name: item.phase_name,
            rate: item.rate,
        }
    }
}
