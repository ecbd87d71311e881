//! Interval tree nodes carrying invoice items.
//!
//! [`ItemsNode`] is the payload of an [`ItemsTree`]: the items whose interval
//! is exactly the node's interval. This module also holds the passes run
//! over the tree of existing items once everything is inserted: pruning of
//! fully repaired charges, validation of the nesting, and the build of the
//! current-truth timeline.
//!
//! The timeline follows one rule: for any day, the deepest node covering it
//! decides. A node with a charge bills that day (prorated from the charge);
//! a node holding only repairs bills nothing; an empty node defers to its
//! nearest non-empty ancestor.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{RepairTreeError, Result};
use crate::interval::Interval;
use crate::item::{sort_for_view, Item, ItemAction};
use crate::node::{BuildVisitor, InsertCallbacks, IntervalTree, NodeId};
use crate::proration::ProrationPolicy;

pub type ItemsTree = IntervalTree<ItemsNode>;

/// Items sharing one interval, kept ordered by action, then id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemsNode {
    items: Vec<Item>,
}

impl ItemsNode {
    pub fn new(item: Item) -> Self {
        Self { items: vec![item] }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn insert_sorted(&mut self, item: Item) {
        let key = (item.action(), item.id());
        let position = self
            .items
            .partition_point(|existing| (existing.action(), existing.id()) <= key);
        self.items.insert(position, item);
    }

    /// Charges, including proposed ones.
    pub fn add_items(&self) -> impl Iterator<Item = &Item> {
        self.items
            .iter()
            .filter(|item| item.action() != ItemAction::Cancel)
    }

    pub fn cancel_items(&self) -> impl Iterator<Item = &Item> {
        self.items
            .iter()
            .filter(|item| item.action() == ItemAction::Cancel)
    }

    /// The repair on this node that targets `target`, if any.
    pub fn cancelling_item(&self, target: Uuid) -> Option<&Item> {
        self.cancel_items()
            .find(|item| item.linked_id() == Some(target))
    }

    pub fn contains_item(&self, id: Uuid) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    fn remove(&mut self, id: Uuid, action: ItemAction) -> Option<Item> {
        let position = self
            .items
            .iter()
            .position(|item| item.id() == id && item.action() == action)?;
        Some(self.items.remove(position))
    }

    /// Cut every item at `at`, prorating each against its own full charge.
    pub fn split(self, at: NaiveDate, policy: &ProrationPolicy) -> (ItemsNode, ItemsNode) {
        let mut left = ItemsNode::default();
        let mut right = ItemsNode::default();
        for item in self.items {
            match item.split_at(at, policy) {
                Some((head, tail)) => {
                    left.items.push(head);
                    right.items.push(tail);
                }
                None if item.start_date() >= at => right.items.push(item),
                None => left.items.push(item),
            }
        }
        (left, right)
    }

    /// Settle every charge on this node against the repairs on this node
    /// that target it. A charge whose remaining value is within one minor
    /// unit of zero, or whose whole item is already used up, disappears
    /// together with its repair; otherwise it stays at the residual amount.
    ///
    /// Returns the ids of the charges that disappeared.
    fn merge_cancelling_pairs(
        &mut self,
        policy: &ProrationPolicy,
        remaining: &HashMap<Uuid, Decimal>,
    ) -> Vec<Uuid> {
        let minor_unit = policy.minor_unit();
        let targets: Vec<Uuid> = self
            .cancel_items()
            .filter_map(Item::linked_id)
            .filter(|target| {
                self.items
                    .iter()
                    .any(|item| item.id() == *target && item.action() == ItemAction::Add)
            })
            .collect();
        let mut settled = Vec::new();
        for target in targets {
            let Some(repair_id) = self.cancelling_item(target).map(Item::id) else {
                continue;
            };
            let (Some(charge), Some(repair)) = (
                self.remove(target, ItemAction::Add),
                self.remove(repair_id, ItemAction::Cancel),
            ) else {
                continue;
            };
            let residual = charge.amount() + repair.amount();
            let used_up = remaining
                .get(&target)
                .is_some_and(|left| *left <= minor_unit);
            if residual > minor_unit && !used_up {
                self.insert_sorted(charge.with_amount(residual));
            } else {
                settled.push(target);
            }
        }
        settled
    }

    fn drop_repairs_of(&mut self, targets: &[Uuid]) {
        self.items.retain(|item| {
            item.action() != ItemAction::Cancel
                || !item.linked_id().is_some_and(|target| targets.contains(&target))
        });
    }
}

/// Insertion policy for item trees: items landing on the same interval are
/// pooled, and cuts prorate every item.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemsInsert {
    policy: ProrationPolicy,
}

impl ItemsInsert {
    pub fn new(policy: ProrationPolicy) -> Self {
        Self { policy }
    }
}

impl InsertCallbacks<ItemsNode> for ItemsInsert {
    fn on_existing_node(
        &mut self,
        existing: &mut ItemsNode,
        incoming: ItemsNode,
        _interval: &Interval,
    ) -> Result<()> {
        for item in incoming.items {
            existing.insert_sorted(item);
        }
        Ok(())
    }

    fn split_payload(
        &mut self,
        payload: ItemsNode,
        _interval: &Interval,
        at: NaiveDate,
    ) -> (ItemsNode, ItemsNode) {
        payload.split(at, &self.policy)
    }
}

/// Insert one item under its own interval.
pub fn insert_item(tree: &mut ItemsTree, item: Item, policy: &ProrationPolicy) -> Result<bool> {
    let interval = item.interval();
    tree.insert(interval, ItemsNode::new(item), &mut ItemsInsert::new(*policy))
}

// ── Pruning ─────────────────────────────────────────────────────────────────

/// Remove charges that have been repaired away entirely.
///
/// Two shapes are recognised: a charge and its repair on the same node, and
/// a charge whose node is split end to end into children that each repair
/// it. `remaining` holds, per charge id, the value left after adjustments
/// and repairs. A charge settled on its own node takes every repair of it
/// further down with it. Nodes left empty are removed.
pub fn prune(tree: &mut ItemsTree, policy: &ProrationPolicy, remaining: &HashMap<Uuid, Decimal>) {
    for id in tree.node_ids() {
        let Some(parent) = tree.node(id).parent() else {
            continue;
        };

        let settled = tree.payload_mut(id).merge_cancelling_pairs(policy, remaining);
        if !settled.is_empty() {
            for below in descendants(tree, id) {
                tree.payload_mut(below).drop_repairs_of(&settled);
            }
            if tree.node(id).payload().is_empty() {
                tree.remove_child(parent, id);
                continue;
            }
        }

        if !tree.is_partitioned_by_children(id) {
            continue;
        }
        let charges: Vec<Uuid> = tree
            .node(id)
            .payload()
            .items()
            .iter()
            .filter(|item| item.action() == ItemAction::Add)
            .map(Item::id)
            .collect();
        for charge in charges {
            if !tree.is_partitioned_by_children(id) {
                break;
            }
            let children: Vec<NodeId> = tree.children(id).collect();
            let repaired_by_parts = children
                .iter()
                .all(|&child| tree.node(child).payload().cancelling_item(charge).is_some());
            if !repaired_by_parts {
                continue;
            }
            for child in children {
                let payload = tree.payload_mut(child);
                if let Some(repair_id) = payload.cancelling_item(charge).map(Item::id) {
                    payload.remove(repair_id, ItemAction::Cancel);
                }
                if payload.is_empty() {
                    tree.remove_child(id, child);
                }
            }
            tree.payload_mut(id).remove(charge, ItemAction::Add);
            for below in descendants(tree, id) {
                tree.payload_mut(below).drop_repairs_of(&[charge]);
            }
        }
    }
    remove_empty_nodes(tree);
}

fn descendants(tree: &ItemsTree, id: NodeId) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut pending: Vec<NodeId> = tree.children(id).collect();
    while let Some(next) = pending.pop() {
        pending.extend(tree.children(next));
        found.push(next);
    }
    found
}

/// Empty nodes bill nothing of their own and defer every day to their
/// ancestors, so dropping them (children moving up) leaves the timeline as is.
fn remove_empty_nodes(tree: &mut ItemsTree) {
    for id in tree.node_ids().into_iter().rev() {
        let node = tree.node(id);
        let Some(parent) = node.parent() else {
            continue;
        };
        if node.payload().is_empty() {
            tree.remove_child(parent, id);
        }
    }
}

// ── Validation ──────────────────────────────────────────────────────────────

/// Check that every charge below another charge sits under a repair of it.
///
/// # Errors
///
/// - [`RepairTreeError::DoubleBilling`] when a node holds two charges, or a
///   charge sits under a charge that was never repaired for that period.
/// - [`RepairTreeError::DanglingRepair`] when a node holding only repairs
///   sits under an unrepaired charge, or a repair's target is neither on
///   its node nor above it.
pub fn validate(tree: &ItemsTree, subscription_id: Uuid) -> Result<()> {
    for id in tree.node_ids() {
        let node = tree.node(id);
        let payload = node.payload();
        if tree.is_root(id) || payload.is_empty() {
            continue;
        }

        let charges: Vec<&Item> = payload.add_items().collect();
        if let [first, second, ..] = charges.as_slice() {
            return Err(RepairTreeError::DoubleBilling {
                subscription_id,
                detail: format!(
                    "{} and {} both charge {}",
                    first.id(),
                    second.id(),
                    node.interval()
                ),
            });
        }

        let mut repaired: HashSet<Uuid> =
            payload.cancel_items().filter_map(Item::linked_id).collect();
        let mut charged_on_path: HashSet<Uuid> = charges.iter().map(|item| item.id()).collect();
        for ancestor in tree.ancestors(id) {
            if tree.is_root(ancestor) {
                break;
            }
            let above = tree.node(ancestor).payload();
            if let Some(open) = above.add_items().find(|item| !repaired.contains(&item.id())) {
                return Err(match charges.first() {
                    Some(charge) => RepairTreeError::DoubleBilling {
                        subscription_id,
                        detail: format!(
                            "{} on {} overlaps unrepaired {} on {}",
                            charge.id(),
                            node.interval(),
                            open.id(),
                            open.interval()
                        ),
                    },
                    None => misdirected(payload, open),
                });
            }
            repaired.extend(above.cancel_items().filter_map(Item::linked_id));
            charged_on_path.extend(above.add_items().map(Item::id));
        }

        if let Some(repair) = payload.cancel_items().find(|repair| {
            repair
                .linked_id()
                .is_some_and(|target| !charged_on_path.contains(&target))
        }) {
            return Err(RepairTreeError::DanglingRepair {
                repair_id: repair.id(),
                detail: format!("no charge above {} to repair", repair.interval()),
            });
        }
    }
    Ok(())
}

fn misdirected(payload: &ItemsNode, open: &Item) -> RepairTreeError {
    let repair = payload.cancel_items().next();
    RepairTreeError::DanglingRepair {
        repair_id: repair.map_or(open.id(), Item::id),
        detail: format!(
            "sits under {} on {} without repairing it",
            open.id(),
            open.interval()
        ),
    }
}

// ── Timeline ────────────────────────────────────────────────────────────────

struct CurrentTimeline<'a> {
    policy: &'a ProrationPolicy,
    output: Vec<Item>,
}

impl CurrentTimeline<'_> {
    /// Bill `gap` from the nearest non-empty node at or above `node`, as a
    /// share of what that node's charge still bills.
    fn fill(&mut self, tree: &ItemsTree, node: NodeId, gap: Interval) {
        let owner = std::iter::once(node)
            .chain(tree.ancestors(node))
            .find(|&id| !tree.node(id).payload().is_empty());
        if let Some(owner) = owner {
            for charge in tree.node(owner).payload().add_items() {
                self.output.push(charge.share(gap, self.policy));
            }
        }
    }
}

impl BuildVisitor<ItemsNode> for CurrentTimeline<'_> {
    fn on_missing_interval(&mut self, tree: &ItemsTree, node: NodeId, gap: Interval) -> Result<()> {
        self.fill(tree, node, gap);
        Ok(())
    }

    fn on_last_node(&mut self, tree: &ItemsTree, node: NodeId) -> Result<()> {
        let leaf = tree.node(node);
        if leaf.payload().is_empty() {
            self.fill(tree, node, leaf.interval());
        } else {
            self.output.extend(leaf.payload().add_items().cloned());
        }
        Ok(())
    }
}

/// What the tree bills, as non-overlapping charges in view order.
///
/// # Errors
///
/// Returns [`RepairTreeError::InvalidInterval`] only if the tree itself is
/// malformed.
pub fn current_timeline(tree: &ItemsTree, policy: &ProrationPolicy) -> Result<Vec<Item>> {
    let mut timeline = CurrentTimeline {
        policy,
        output: Vec::new(),
    };
    tree.build(&mut timeline)?;
    Ok(coalesce(timeline.output))
}

/// Every item of every node, pieces of one item re-joined, in view order.
pub fn collect_items(tree: &ItemsTree) -> Vec<Item> {
    let mut items = Vec::new();
    tree.walk_tree(|_, _, node| items.extend(node.payload().items().iter().cloned()));
    coalesce(items)
}

/// Re-join adjacent pieces of the same item and sort for viewing.
pub fn coalesce(mut items: Vec<Item>) -> Vec<Item> {
    items.sort_by(|a, b| {
        (a.id(), a.action(), a.start_date()).cmp(&(b.id(), b.action(), b.start_date()))
    });
    let mut joined: Vec<Item> = Vec::with_capacity(items.len());
    for item in items {
        match joined.last().and_then(|last| last.coalesce(&item)) {
            Some(whole) => {
                if let Some(last) = joined.last_mut() {
                    *last = whole;
                }
            }
            None => joined.push(item),
        }
    }
    sort_for_view(&mut joined);
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn iv(start: &str, end: &str) -> Interval {
        Interval::new(date(start), date(end)).unwrap()
    }

    fn charge(start: &str, end: &str, amount: &str) -> Item {
        Item::add(Uuid::new_v4(), iv(start, end), money(amount), "USD")
    }

    fn repair(target: &Item, start: &str, end: &str, amount: &str) -> Item {
        Item::repair(Uuid::new_v4(), iv(start, end), money(amount), "USD", target.id())
    }

    fn tree_of(items: &[&Item]) -> ItemsTree {
        let policy = ProrationPolicy::default();
        let mut tree = ItemsTree::new();
        for item in items {
            insert_item(&mut tree, (*item).clone(), &policy).unwrap();
        }
        tree
    }

    fn amounts(items: &[Item]) -> Vec<(Interval, Decimal)> {
        items.iter().map(|item| (item.interval(), item.amount())).collect()
    }

    fn untouched(items: &[&Item]) -> HashMap<Uuid, Decimal> {
        items
            .iter()
            .filter(|item| item.action() == ItemAction::Add)
            .map(|item| (item.id(), item.amount()))
            .collect()
    }

    // ── Node payload ────────────────────────────────────────────────────

    #[test]
    fn test_node_keeps_charges_before_repairs() {
        let monthly = charge("2014-01-01", "2014-02-01", "12.00");
        let mut node = ItemsNode::new(repair(&monthly, "2014-01-01", "2014-02-01", "-12.00"));
        node.insert_sorted(monthly.clone());
        assert_eq!(node.items()[0].action(), ItemAction::Add);
        assert_eq!(node.add_items().count(), 1);
        assert!(node.cancelling_item(monthly.id()).is_some());
        assert!(node.contains_item(monthly.id()));
    }

    #[test]
    fn test_split_node_prorates_each_item() {
        let policy = ProrationPolicy::default();
        let monthly = charge("2014-01-01", "2014-02-01", "12.00");
        let other = charge("2014-01-01", "2014-02-01", "31.00");
        let mut node = ItemsNode::new(monthly);
        node.insert_sorted(other);
        let (left, right) = node.split(date("2014-01-23"), &policy);
        let left_total: Decimal = left.items().iter().map(Item::amount).sum();
        let right_total: Decimal = right.items().iter().map(Item::amount).sum();
        assert_eq!(left_total, money("8.52") + money("22.00"));
        assert_eq!(left_total + right_total, money("43.00"));
    }

    #[test]
    fn test_merge_cancelling_pairs_keeps_residual() {
        let policy = ProrationPolicy::default();
        let monthly = charge("2014-01-01", "2014-02-01", "12.00");
        let partial = repair(&monthly, "2014-01-01", "2014-02-01", "-5.00");
        let mut node = ItemsNode::new(monthly.clone());
        node.insert_sorted(partial);
        let remaining = HashMap::from([(monthly.id(), money("7.00"))]);
        assert!(node.merge_cancelling_pairs(&policy, &remaining).is_empty());
        assert_eq!(node.len(), 1);
        assert_eq!(node.items()[0].amount(), money("7.00"));
    }

    #[test]
    fn test_merge_cancelling_pairs_drops_used_up_charge() {
        let policy = ProrationPolicy::default();
        let monthly = charge("2014-01-01", "2014-02-01", "12.00");
        let zero = repair(&monthly, "2014-01-01", "2014-02-01", "0.00");
        let mut node = ItemsNode::new(monthly.clone());
        node.insert_sorted(zero);
        let remaining = HashMap::from([(monthly.id(), Decimal::ZERO)]);
        assert_eq!(node.merge_cancelling_pairs(&policy, &remaining), vec![monthly.id()]);
        assert!(node.is_empty());
    }

    // ── Pruning ─────────────────────────────────────────────────────────

    #[test]
    fn test_prune_same_node_pair_removes_node() {
        let policy = ProrationPolicy::default();
        let monthly1 = charge("2015-01-01", "2015-02-01", "12.00");
        let monthly2 = charge("2015-02-01", "2015-03-01", "12.00");
        let repair2 = repair(&monthly2, "2015-02-01", "2015-03-01", "-12.00");
        let monthly3 = charge("2015-03-01", "2015-04-01", "12.00");
        let all = [&monthly1, &monthly2, &repair2, &monthly3];
        let mut tree = tree_of(&all);
        let mut remaining = untouched(&all);
        remaining.insert(monthly2.id(), Decimal::ZERO);

        prune(&mut tree, &policy, &remaining);
        assert_eq!(tree.len(), 2);
        validate(&tree, Uuid::new_v4()).unwrap();
        let timeline = current_timeline(&tree, &policy).unwrap();
        assert_eq!(
            timeline.iter().map(Item::id).collect::<Vec<_>>(),
            vec![monthly1.id(), monthly3.id()]
        );
    }

    #[test]
    fn test_prune_repaired_by_parts() {
        let policy = ProrationPolicy::default();
        let cuts = ["2015-02-01", "2015-02-08", "2015-02-16", "2015-02-24", "2015-03-01"];
        let monthly1 = charge("2015-02-01", "2015-03-01", "12.00");
        let monthly2 = charge("2015-02-01", "2015-03-01", "12.00");
        let monthly3 = charge("2015-02-01", "2015-03-01", "12.00");
        let mut items = vec![monthly1.clone(), monthly2.clone(), monthly3.clone()];
        for target in [&monthly1, &monthly2] {
            for window in cuts.windows(2) {
                items.push(repair(target, window[0], window[1], "-3.00"));
            }
        }
        let refs: Vec<&Item> = items.iter().collect();
        let mut tree = tree_of(&refs);
        let mut remaining = untouched(&refs);
        remaining.insert(monthly1.id(), Decimal::ZERO);
        remaining.insert(monthly2.id(), Decimal::ZERO);

        prune(&mut tree, &policy, &remaining);
        assert_eq!(tree.len(), 1);
        validate(&tree, Uuid::new_v4()).unwrap();
        let timeline = current_timeline(&tree, &policy).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].id(), monthly3.id());
    }

    #[test]
    fn test_prune_pair_then_parts_on_same_node() {
        let policy = ProrationPolicy::default();
        let monthly1 = charge("2015-02-01", "2015-03-01", "12.00");
        let full = repair(&monthly1, "2015-02-01", "2015-03-01", "-12.00");
        let monthly2 = charge("2015-02-01", "2015-03-01", "12.00");
        let head = repair(&monthly2, "2015-02-01", "2015-02-16", "-6.43");
        let tail = repair(&monthly2, "2015-02-16", "2015-03-01", "-5.57");
        let monthly3 = charge("2015-02-01", "2015-03-01", "12.00");
        let all = [&monthly1, &full, &monthly2, &head, &tail, &monthly3];
        let mut tree = tree_of(&all);
        let mut remaining = untouched(&all);
        remaining.insert(monthly1.id(), Decimal::ZERO);
        remaining.insert(monthly2.id(), Decimal::ZERO);

        prune(&mut tree, &policy, &remaining);
        let timeline = current_timeline(&tree, &policy).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].id(), monthly3.id());
    }

    #[test]
    fn test_prune_settled_charge_takes_nested_repairs_along() {
        let policy = ProrationPolicy::default();
        let monthly = charge("2014-01-01", "2014-02-01", "12.00");
        let block = repair(&monthly, "2014-01-08", "2014-01-10", "-0.77");
        let rest = repair(&monthly, "2014-01-01", "2014-02-01", "-11.23");
        let all = [&monthly, &block, &rest];
        let mut tree = tree_of(&all);
        let mut remaining = untouched(&all);
        remaining.insert(monthly.id(), Decimal::ZERO);

        prune(&mut tree, &policy, &remaining);
        assert_eq!(tree.len(), 0);
        validate(&tree, Uuid::new_v4()).unwrap();
        assert!(current_timeline(&tree, &policy).unwrap().is_empty());
    }

    #[test]
    fn test_prune_settled_charge_keeps_nested_charges() {
        let policy = ProrationPolicy::default();
        let annual = charge("2012-05-01", "2013-05-01", "2400.00");
        let block = repair(&annual, "2012-05-11", "2012-06-11", "-203.84");
        let monthly = charge("2012-05-11", "2012-06-11", "9.95");
        let rest = repair(&annual, "2012-05-01", "2013-05-01", "-2196.16");
        let all = [&annual, &block, &monthly, &rest];
        let mut tree = tree_of(&all);
        let mut remaining = untouched(&all);
        remaining.insert(annual.id(), Decimal::ZERO);

        prune(&mut tree, &policy, &remaining);
        validate(&tree, Uuid::new_v4()).unwrap();
        let timeline = current_timeline(&tree, &policy).unwrap();
        assert_eq!(timeline, vec![monthly]);
    }

    // ── Validation ──────────────────────────────────────────────────────

    #[test]
    fn test_validate_rejects_two_charges_on_one_interval() {
        let policy = ProrationPolicy::default();
        let a = charge("2012-05-01", "2012-06-01", "10.00");
        let b = charge("2012-05-01", "2012-06-01", "10.00");
        let mut tree = tree_of(&[&a, &b]);
        prune(&mut tree, &policy, &untouched(&[&a, &b]));
        assert!(matches!(
            validate(&tree, Uuid::new_v4()),
            Err(RepairTreeError::DoubleBilling { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_nested_charge_without_repair() {
        let a = charge("2012-05-01", "2012-06-01", "10.00");
        let b = charge("2012-05-02", "2012-06-01", "10.00");
        let tree = tree_of(&[&a, &b]);
        assert!(matches!(
            validate(&tree, Uuid::new_v4()),
            Err(RepairTreeError::DoubleBilling { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_repair_of_the_wrong_charge() {
        // The later repair should point at `newer`, not at `initial`.
        let initial = charge("2014-01-01", "2014-02-01", "12.00");
        let newer = charge("2014-01-23", "2014-02-01", "14.85");
        let repair1 = repair(&initial, "2014-01-23", "2014-02-01", "-12.00");
        let newest = charge("2014-01-26", "2014-02-01", "19.23");
        let repair2 = repair(&initial, "2014-01-26", "2014-02-01", "-14.85");
        let tree = tree_of(&[&repair1, &repair2, &initial, &newer, &newest]);
        assert!(matches!(
            validate(&tree, Uuid::new_v4()),
            Err(RepairTreeError::DoubleBilling { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_misplaced_repair_only_node() {
        let initial = charge("2014-01-01", "2014-02-01", "12.00");
        let newer = charge("2014-01-23", "2014-02-01", "14.85");
        let repair1 = repair(&initial, "2014-01-23", "2014-02-01", "-12.00");
        let stray = repair(&initial, "2014-01-26", "2014-02-01", "-2.00");
        let tree = tree_of(&[&initial, &newer, &repair1, &stray]);
        assert!(matches!(
            validate(&tree, Uuid::new_v4()),
            Err(RepairTreeError::DanglingRepair { .. })
        ));
    }

    // ── Timeline ────────────────────────────────────────────────────────

    #[test]
    fn test_timeline_lowest_node_wins() {
        let policy = ProrationPolicy::default();
        let initial = charge("2014-01-01", "2014-02-01", "12.00");
        let newer = charge("2014-01-23", "2014-02-01", "14.85").with_rate(money("14.85"));
        let repair1 = repair(&initial, "2014-01-23", "2014-02-01", "-12.00");
        let newest = charge("2014-01-26", "2014-02-01", "19.23");
        let repair2 = repair(&newer, "2014-01-26", "2014-02-01", "-14.85");
        let tree = tree_of(&[&repair2, &newer, &newest, &repair1, &initial]);
        validate(&tree, Uuid::new_v4()).unwrap();

        let timeline = current_timeline(&tree, &policy).unwrap();
        assert_eq!(
            amounts(&timeline),
            vec![
                (iv("2014-01-01", "2014-01-23"), money("8.52")),
                (iv("2014-01-23", "2014-01-26"), money("4.95")),
                (iv("2014-01-26", "2014-02-01"), money("19.23")),
            ]
        );
    }

    #[test]
    fn test_timeline_with_two_blocked_periods() {
        let policy = ProrationPolicy::default();
        let initial = charge("2014-01-01", "2014-02-01", "12.00");
        let block1 = repair(&initial, "2014-01-08", "2014-01-10", "-0.77");
        let block2 = repair(&initial, "2014-01-17", "2014-01-23", "-2.32");
        let tree = tree_of(&[&initial, &block1, &block2]);
        let timeline = current_timeline(&tree, &policy).unwrap();
        assert_eq!(
            amounts(&timeline),
            vec![
                (iv("2014-01-01", "2014-01-08"), money("2.71")),
                (iv("2014-01-10", "2014-01-17"), money("2.71")),
                (iv("2014-01-23", "2014-02-01"), money("3.48")),
            ]
        );
    }

    #[test]
    fn test_timeline_gaps_bill_the_netted_residual() {
        let policy = ProrationPolicy::default();
        let monthly = charge("2014-01-01", "2014-02-01", "12.00");
        let partial = repair(&monthly, "2014-01-01", "2014-02-01", "-5.00");
        let block = repair(&monthly, "2014-01-08", "2014-01-10", "-0.77");
        let all = [&monthly, &partial, &block];
        let mut tree = tree_of(&all);
        let mut remaining = untouched(&all);
        remaining.insert(monthly.id(), money("6.23"));

        prune(&mut tree, &policy, &remaining);
        validate(&tree, Uuid::new_v4()).unwrap();
        let timeline = current_timeline(&tree, &policy).unwrap();
        assert_eq!(
            amounts(&timeline),
            vec![
                (iv("2014-01-01", "2014-01-08"), money("1.58")),
                (iv("2014-01-10", "2014-02-01"), money("4.97")),
            ]
        );
        let total: Decimal = timeline.iter().map(Item::amount).sum();
        assert!(total <= money("7.00"));
    }

    #[test]
    fn test_timeline_coalesces_pieces_of_one_charge() {
        let policy = ProrationPolicy::default();
        // `b` crosses the end of `a`; `a` is repaired from the crossing point.
        let a = charge("2014-01-01", "2014-01-11", "10.00");
        let a_tail = repair(&a, "2014-01-06", "2014-01-11", "-5.00");
        let b = charge("2014-01-06", "2014-01-16", "10.00");
        for order in [[&a, &a_tail, &b], [&b, &a, &a_tail], [&a_tail, &b, &a]] {
            let mut tree = tree_of(&order);
            let mut remaining = untouched(&order);
            remaining.insert(a.id(), money("5.00"));
            prune(&mut tree, &policy, &remaining);
            validate(&tree, Uuid::new_v4()).unwrap();
            let timeline = current_timeline(&tree, &policy).unwrap();
            assert_eq!(
                amounts(&timeline),
                vec![
                    (iv("2014-01-01", "2014-01-06"), money("5.00")),
                    (iv("2014-01-06", "2014-01-16"), money("10.00")),
                ]
            );
            assert_eq!(timeline[1].id(), b.id());
        }
    }

    #[test]
    fn test_collect_items_rejoins_proposed_pieces() {
        let a = charge("2014-01-01", "2014-01-11", "10.00");
        let b = charge("2014-01-06", "2014-01-16", "20.00");
        let tree = tree_of(&[&a, &b]);
        let items = collect_items(&tree);
        assert_eq!(items, vec![a, b]);
    }
}
