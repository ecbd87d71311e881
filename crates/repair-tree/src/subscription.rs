//! Lifecycle of one subscription's items on one invoice.
//!
//! ```text
//! Empty ─add_item/add_adjustment─▶ Populated ─build─▶ Built ─flatten(true)─▶ Flattened
//!     ─merge_proposed_item─▶ MergePopulated ─build_for_merge─▶ Merged
//! ```
//!
//! Existing items and their repairs go into the current-state tree, which is
//! validated and reduced to the current-truth timeline. Flattening for a
//! merge lays that timeline out again as repairs of itself. Proposed items go
//! into a second tree and are diffed against the reversed timeline; the diff
//! is the view.
//!
//! Fixed (one-off) items never enter either tree. Existing ones are set
//! aside, and a proposed one is emitted as is unless it matches one of them.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{StaleRepairPolicy, TreeOptions};
use crate::error::{RepairTreeError, Result};
use crate::item::{sort_for_view, Item, ItemAction};
use crate::items_node::{self, ItemsTree};
use crate::json;
use crate::merge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Empty,
    Populated,
    Built,
    /// `reversed` trees hold the timeline as repairs of itself, ready for a
    /// merge; plain ones are for viewing only.
    Flattened { reversed: bool },
    MergePopulated,
    Merged,
}

#[derive(Debug, Clone)]
pub struct SubscriptionItemTree {
    subscription_id: Uuid,
    invoice_id: Uuid,
    options: TreeOptions,
    state: TreeState,
    currency: Option<String>,
    existing: Vec<Item>,
    adjustments: Vec<(Uuid, Decimal)>,
    proposed: Vec<Item>,
    ignored: Vec<Item>,
    fixed: Vec<Item>,
    budgets: HashMap<Uuid, Decimal>,
    current_tree: ItemsTree,
    proposed_tree: ItemsTree,
    timeline: Vec<Item>,
    view: Vec<Item>,
}

impl SubscriptionItemTree {
    pub fn new(subscription_id: Uuid, invoice_id: Uuid) -> Self {
        Self::with_options(subscription_id, invoice_id, TreeOptions::default())
    }

    pub fn with_options(subscription_id: Uuid, invoice_id: Uuid, options: TreeOptions) -> Self {
        Self {
            subscription_id,
            invoice_id,
            options,
            state: TreeState::Empty,
            currency: None,
            existing: Vec::new(),
            adjustments: Vec::new(),
            proposed: Vec::new(),
            ignored: Vec::new(),
            fixed: Vec::new(),
            budgets: HashMap::new(),
            current_tree: ItemsTree::new(),
            proposed_tree: ItemsTree::new(),
            timeline: Vec::new(),
            view: Vec::new(),
        }
    }

    pub fn subscription_id(&self) -> Uuid {
        self.subscription_id
    }

    pub fn invoice_id(&self) -> Uuid {
        self.invoice_id
    }

    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    pub fn state(&self) -> TreeState {
        self.state
    }

    /// The tree of existing items: as built, or flat once flattened.
    pub fn current_tree(&self) -> &ItemsTree {
        &self.current_tree
    }

    pub fn proposed_tree(&self) -> &ItemsTree {
        &self.proposed_tree
    }

    /// Existing charges left out of the tree: fixed items and those billing
    /// nothing.
    pub fn ignored_items(&self) -> &[Item] {
        &self.ignored
    }

    // ── Existing state ──────────────────────────────────────────────────

    /// Buffer an invoiced charge or a repair of one.
    ///
    /// # Errors
    ///
    /// - [`RepairTreeError::InvalidState`] once the tree is built.
    /// - [`RepairTreeError::InvalidItem`] for an item failing validation, a
    ///   proposed (`MERGE`) item, or an id already buffered.
    /// - [`RepairTreeError::CurrencyMismatch`] when the currency differs
    ///   from earlier items.
    pub fn add_item(&mut self, item: Item) -> Result<()> {
        self.expect_populating("add_item")?;
        item.validate()?;
        if item.action() == ItemAction::Merge {
            return Err(RepairTreeError::InvalidItem {
                id: item.id(),
                reason: "proposed items are added with merge_proposed_item".to_string(),
            });
        }
        if self.existing.iter().any(|existing| existing.id() == item.id()) {
            return Err(RepairTreeError::InvalidItem {
                id: item.id(),
                reason: "duplicate id".to_string(),
            });
        }
        self.check_currency(&item)?;
        self.existing.push(item);
        self.state = TreeState::Populated;
        Ok(())
    }

    /// Buffer an out-of-band credit of `amount` (sign ignored) against the
    /// charge `target_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RepairTreeError::InvalidState`] once the tree is built. An
    /// unknown target is reported by [`build`](Self::build).
    pub fn add_adjustment(&mut self, target_id: Uuid, amount: Decimal) -> Result<()> {
        self.expect_populating("add_adjustment")?;
        self.adjustments.push((target_id, amount.abs()));
        self.state = TreeState::Populated;
        Ok(())
    }

    /// Build and validate the current-state tree and compute the
    /// current-truth timeline.
    ///
    /// # Errors
    ///
    /// - [`RepairTreeError::InvalidState`] unless the tree is empty or populated.
    /// - [`RepairTreeError::UnknownAdjustmentTarget`] for an adjustment of
    ///   an item that is not an existing charge.
    /// - [`RepairTreeError::DanglingRepair`] for a repair whose target is
    ///   unknown, misplaced, or (with [`StaleRepairPolicy::Reject`]) outside
    ///   the target's interval.
    /// - [`RepairTreeError::DoubleBilling`] when two charges overlap.
    pub fn build(&mut self) -> Result<()> {
        self.expect_populating("build")?;
        let policy = self.options.proration;

        let (charges, mut repairs): (Vec<Item>, Vec<Item>) = std::mem::take(&mut self.existing)
            .into_iter()
            .partition(|item| item.action() == ItemAction::Add);

        let mut billed: HashMap<Uuid, Item> = HashMap::new();
        for charge in charges {
            if charge.is_fixed() {
                debug!(item_id = %charge.id(), "setting aside fixed charge");
                self.ignored.push(charge);
            } else if charge.amount().is_zero() {
                warn!(
                    subscription_id = %self.subscription_id,
                    item_id = %charge.id(),
                    "ignoring zero-amount charge"
                );
                self.ignored.push(charge);
            } else {
                billed.insert(charge.id(), charge);
            }
        }

        self.apply_adjustments(&mut billed)?;
        self.budgets = billed
            .values()
            .map(|charge| (charge.id(), charge.unadjusted_amount()))
            .collect();

        repairs.sort_by_key(|repair| (repair.start_date(), repair.id()));
        let mut accepted = Vec::with_capacity(repairs.len());
        for repair in repairs {
            if let Some(repair) = self.accept_repair(repair, &billed)? {
                accepted.push(repair);
            }
        }

        let mut charges: Vec<Item> = billed.into_values().collect();
        charges.sort_by_key(|charge| (charge.start_date(), charge.id()));
        for item in charges.into_iter().chain(accepted) {
            items_node::insert_item(&mut self.current_tree, item, &policy)?;
        }

        items_node::prune(&mut self.current_tree, &policy, &self.budgets);
        items_node::validate(&self.current_tree, self.subscription_id)?;
        self.timeline = items_node::current_timeline(&self.current_tree, &policy)?;
        self.state = TreeState::Built;
        debug!(
            subscription_id = %self.subscription_id,
            invoice_id = %self.invoice_id,
            nodes = self.current_tree.len(),
            segments = self.timeline.len(),
            ignored = self.ignored.len(),
            "built current-state tree"
        );
        Ok(())
    }

    fn apply_adjustments(&mut self, billed: &mut HashMap<Uuid, Item>) -> Result<()> {
        let mut totals: HashMap<Uuid, Decimal> = HashMap::new();
        for &(target_id, amount) in &self.adjustments {
            if billed.contains_key(&target_id) {
                *totals.entry(target_id).or_default() += amount;
            } else if self.ignored.iter().any(|item| item.id() == target_id) {
                debug!(item_id = %target_id, "skipping adjustment of ignored charge");
            } else {
                return Err(RepairTreeError::UnknownAdjustmentTarget(target_id));
            }
        }
        for (target_id, total) in totals {
            let Some(charge) = billed.remove(&target_id) else {
                continue;
            };
            let requested = charge.adjusted_amount() + total;
            let adjusted = requested.min(charge.amount());
            if adjusted < requested {
                warn!(
                    subscription_id = %self.subscription_id,
                    item_id = %target_id,
                    %requested,
                    %adjusted,
                    "adjustments exceed the charge, clamping"
                );
            }
            billed.insert(target_id, charge.with_adjusted_amount(adjusted));
        }
        Ok(())
    }

    /// Check a repair against its target and charge it to the target's
    /// budget. `None` when the repair is dropped.
    fn accept_repair(&mut self, repair: Item, billed: &HashMap<Uuid, Item>) -> Result<Option<Item>> {
        let Some(target_id) = repair.linked_id() else {
            return Ok(None);
        };
        let Some(target) = billed.get(&target_id) else {
            if self.ignored.iter().any(|item| item.id() == target_id) {
                debug!(repair_id = %repair.id(), item_id = %target_id, "dropping repair of ignored charge");
                return Ok(None);
            }
            return Err(RepairTreeError::DanglingRepair {
                repair_id: repair.id(),
                detail: format!("linked item {target_id} is not an existing charge"),
            });
        };

        if !target.interval().contains(&repair.interval()) {
            let detail = format!(
                "{} reaches outside {} of {target_id}",
                repair.interval(),
                target.interval()
            );
            return match self.options.stale_repairs {
                StaleRepairPolicy::Drop => {
                    warn!(
                        subscription_id = %self.subscription_id,
                        repair_id = %repair.id(),
                        %detail,
                        "dropping stale repair"
                    );
                    Ok(None)
                }
                StaleRepairPolicy::Reject => Err(RepairTreeError::DanglingRepair {
                    repair_id: repair.id(),
                    detail,
                }),
            };
        }

        let budget = self.budgets.entry(target_id).or_default();
        let requested = repair.amount().abs();
        let take = requested.min(*budget);
        *budget -= take;
        if take < requested {
            warn!(
                subscription_id = %self.subscription_id,
                repair_id = %repair.id(),
                %requested,
                clamped = %take,
                "repair exceeds remaining value of its item, clamping"
            );
        }
        let amount = if take.is_zero() {
            Decimal::new(0, self.options.proration.decimals)
        } else {
            -take
        };
        Ok(Some(repair.with_amount(amount)))
    }

    /// Replace the current-state tree with the flat current-truth timeline.
    /// With `reversed` every segment becomes a repair of itself, the shape a
    /// merge starts from.
    ///
    /// # Errors
    ///
    /// Returns [`RepairTreeError::InvalidState`] after a flatten or merge,
    /// and any error of [`build`](Self::build) when called before it.
    pub fn flatten(&mut self, reversed: bool) -> Result<()> {
        match self.state {
            TreeState::Empty | TreeState::Populated => self.build()?,
            TreeState::Built => {}
            state => return Err(invalid_state("flatten", state)),
        }
        let policy = self.options.proration;
        let mut flat = ItemsTree::new();
        for segment in &self.timeline {
            let item = if reversed {
                segment.reversed()
            } else {
                segment.clone()
            };
            items_node::insert_item(&mut flat, item, &policy)?;
        }
        self.current_tree = flat;
        self.state = TreeState::Flattened { reversed };
        debug!(
            subscription_id = %self.subscription_id,
            segments = self.timeline.len(),
            reversed,
            "flattened current-state tree"
        );
        Ok(())
    }

    // ── Proposed state ──────────────────────────────────────────────────

    /// Buffer an item of the target state. Items identical to an ignored
    /// charge are skipped; other fixed items go straight to the view.
    ///
    /// # Errors
    ///
    /// - [`RepairTreeError::InvalidState`] unless flattened with `reversed`.
    /// - [`RepairTreeError::InvalidItem`] for an item failing validation or
    ///   a repair.
    /// - [`RepairTreeError::CurrencyMismatch`] when the currency differs.
    pub fn merge_proposed_item(&mut self, item: Item) -> Result<()> {
        match self.state {
            TreeState::Flattened { reversed: true } | TreeState::MergePopulated => {}
            state => return Err(invalid_state("merge_proposed_item", state)),
        }
        item.validate()?;
        if item.action() == ItemAction::Cancel {
            return Err(RepairTreeError::InvalidItem {
                id: item.id(),
                reason: "proposed items cannot be repairs".to_string(),
            });
        }
        self.check_currency(&item)?;
        self.state = TreeState::MergePopulated;
        if self.ignored.iter().any(|ignored| ignored.matches(&item)) {
            debug!(item_id = %item.id(), "skipping proposed item matching an ignored charge");
            return Ok(());
        }
        if item.is_fixed() {
            self.fixed.push(item.with_action(ItemAction::Add));
        } else {
            self.proposed.push(item.with_action(ItemAction::Merge));
        }
        Ok(())
    }

    /// Build the proposed-state tree and diff it against the reversed
    /// current-state tree.
    ///
    /// # Errors
    ///
    /// - [`RepairTreeError::InvalidState`] unless flattened with `reversed`
    ///   or holding proposed items.
    /// - [`RepairTreeError::DoubleBilling`] when the emitted charges, or the
    ///   emitted repairs, overlap each other.
    pub fn build_for_merge(&mut self) -> Result<()> {
        match self.state {
            TreeState::Flattened { reversed: true } | TreeState::MergePopulated => {}
            state => return Err(invalid_state("build_for_merge", state)),
        }
        let policy = self.options.proration;
        for item in std::mem::take(&mut self.proposed) {
            items_node::insert_item(&mut self.proposed_tree, item, &policy)?;
        }
        let current: Vec<Item> = items_node::collect_items(&self.current_tree)
            .iter()
            .map(Item::reinstated)
            .collect();
        let proposed = items_node::collect_items(&self.proposed_tree);
        let mut view = merge::diff(&current, &proposed, &mut self.budgets, &policy);
        view.extend(self.fixed.iter().cloned());
        sort_for_view(&mut view);
        merge::check_emitted(&view, self.subscription_id)?;
        self.view = view;
        self.state = TreeState::Merged;
        debug!(
            subscription_id = %self.subscription_id,
            invoice_id = %self.invoice_id,
            proposed = proposed.len(),
            emitted = self.view.len(),
            "merged proposed items"
        );
        Ok(())
    }

    // ── Output ──────────────────────────────────────────────────────────

    /// The current-truth timeline once built, the emitted items once merged.
    ///
    /// # Errors
    ///
    /// Returns [`RepairTreeError::InvalidState`] before `build` and while
    /// proposed items are pending.
    pub fn view(&self) -> Result<&[Item]> {
        match self.state {
            TreeState::Built | TreeState::Flattened { .. } => Ok(self.timeline.as_slice()),
            TreeState::Merged => Ok(self.view.as_slice()),
            state => Err(invalid_state("view", state)),
        }
    }

    /// Nested-array dump of the current-state tree.
    pub fn debug_json(&self) -> serde_json::Value {
        json::tree_to_json(&self.current_tree, self.options.proration.decimals)
    }

    fn expect_populating(&self, operation: &str) -> Result<()> {
        match self.state {
            TreeState::Empty | TreeState::Populated => Ok(()),
            state => Err(invalid_state(operation, state)),
        }
    }

    fn check_currency(&mut self, item: &Item) -> Result<()> {
        match &self.currency {
            Some(expected) if expected != item.currency() => Err(RepairTreeError::CurrencyMismatch {
                id: item.id(),
                expected: expected.clone(),
                found: item.currency().to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.currency = Some(item.currency().to_string());
                Ok(())
            }
        }
    }
}

fn invalid_state(operation: &str, state: TreeState) -> RepairTreeError {
    RepairTreeError::InvalidState(format!("{operation} called in state {state:?}"))
}
