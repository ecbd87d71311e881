//! Lockstep diff of the current-truth timeline against proposed items.
//!
//! Both sides are walked in start-date order. A proposed item is *matched*
//! by the current segment that encloses it when the two bill the same thing:
//! the very same interval and amount, or the same kind at the segment's
//! price for the proposed interval. Matched items need no output. Whatever
//! part of a segment no matched item covers is repaired, and every proposed
//! item left unmatched is emitted as a new charge.

use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{RepairTreeError, Result};
use crate::interval::Interval;
use crate::item::{sort_for_view, Item, ItemAction};
use crate::proration::ProrationPolicy;

/// Diff `current` (non-overlapping charges) against `proposed`.
///
/// `budgets` maps each existing charge to the value still open to repair;
/// emitted repairs draw it down in date order and never exceed it. A repair
/// whose budget is used up is still emitted, with a zero amount.
pub fn diff(
    current: &[Item],
    proposed: &[Item],
    budgets: &mut HashMap<Uuid, Decimal>,
    policy: &ProrationPolicy,
) -> Vec<Item> {
    let mut segments: Vec<&Item> = current.iter().collect();
    segments.sort_by_key(|segment| (segment.start_date(), segment.end_date()));
    let mut candidates: Vec<&Item> = proposed.iter().collect();
    candidates.sort_by_key(|item| (item.start_date(), item.end_date(), item.id()));

    let mut matched = vec![false; candidates.len()];
    let mut output = Vec::new();

    for segment in segments {
        let span = segment.interval();
        let first = candidates.partition_point(|item| item.start_date() < span.start());
        let mut covered: Vec<Interval> = Vec::new();
        for (offset, candidate) in candidates[first..].iter().enumerate() {
            if candidate.start_date() >= span.end() {
                break;
            }
            if span.contains(&candidate.interval()) && bills_same(segment, candidate, policy) {
                matched[first + offset] = true;
                covered.push(candidate.interval());
            }
        }

        for run in uncovered(span, &covered) {
            output.push(repair(segment, run, budgets, policy));
        }
    }

    for (candidate, was_matched) in candidates.into_iter().zip(matched) {
        if !was_matched {
            output.push(candidate.clone().with_action(ItemAction::Add));
        }
    }
    sort_for_view(&mut output);
    output
}

fn bills_same(segment: &Item, candidate: &Item, policy: &ProrationPolicy) -> bool {
    if segment.interval() == candidate.interval() && segment.amount() == candidate.amount() {
        return true;
    }
    segment.same_kind(candidate)
        && (segment.share(candidate.interval(), policy).amount() - candidate.amount()).abs()
            <= policy.minor_unit()
}

/// Stretches of `span` outside every interval in `covered` (sorted by start).
fn uncovered(span: Interval, covered: &[Interval]) -> Vec<Interval> {
    let mut runs = Vec::new();
    let mut cursor = span.start();
    for interval in covered {
        if interval.start() > cursor {
            runs.extend(Interval::new(cursor, interval.start()).ok());
        }
        cursor = cursor.max(interval.end());
    }
    if cursor < span.end() {
        runs.extend(Interval::new(cursor, span.end()).ok());
    }
    runs
}

fn repair(
    segment: &Item,
    run: Interval,
    budgets: &mut HashMap<Uuid, Decimal>,
    policy: &ProrationPolicy,
) -> Item {
    let value = segment.share(run, policy).amount().min(segment.amount());
    let budget = budgets
        .entry(segment.id())
        .or_insert_with(|| segment.amount());
    let take = value.min(*budget).max(Decimal::ZERO);
    *budget -= take;

    let amount = if take.is_zero() {
        Decimal::new(0, policy.decimals)
    } else {
        -take
    };
    let name = format!("{}:{}", run.start(), run.end());
    let id = Uuid::new_v5(&segment.id(), name.as_bytes());
    segment.repair_of(id, run, amount)
}

/// Check that emitted charges do not overlap each other, and neither do
/// emitted repairs. `items` must be in view order.
///
/// # Errors
///
/// Returns [`RepairTreeError::DoubleBilling`] naming the first overlap.
pub fn check_emitted(items: &[Item], subscription_id: Uuid) -> Result<()> {
    let mut last_charge: Option<&Item> = None;
    let mut last_repair: Option<&Item> = None;
    for item in items.iter().filter(|item| !item.is_fixed()) {
        let last = match item.action() {
            ItemAction::Cancel => &mut last_repair,
            ItemAction::Add | ItemAction::Merge => &mut last_charge,
        };
        if let Some(previous) = last {
            if previous.end_date() > item.start_date() {
                return Err(RepairTreeError::DoubleBilling {
                    subscription_id,
                    detail: format!(
                        "emitted {} {} on {} overlaps {} on {}",
                        item.action(),
                        item.id(),
                        item.interval(),
                        previous.id(),
                        previous.interval()
                    ),
                });
            }
        }
        *last = Some(item);
    }
    Ok(())
}
