//! Arena-backed interval tree.
//!
//! Nodes live in one `Vec` and point at each other with [`NodeId`]s: each
//! node knows its first (leftmost) child, its next sibling and, as a plain
//! back-reference, its parent. Children of a node are pairwise disjoint,
//! sorted by start and contained in the node's interval. The root is
//! synthetic: it carries a default payload and spans every inserted interval.
//!
//! The tree knows nothing about what it stores. Insertion asks an
//! [`InsertCallbacks`] implementation what to do when an interval lands on an
//! existing node, whether a new node may be placed, and how to cut a payload
//! in two; [`IntervalTree::build`] reports every leaf and every uncovered gap
//! to a [`BuildVisitor`].
//!
//! # Insertion
//!
//! - equal to an existing child: the payloads are merged by the callbacks
//! - inside a child: insertion continues below that child
//! - crossing a child (exactly one boundary inside the other): both are cut
//!   at the other's boundary and the two pieces are inserted again
//! - otherwise the new node is placed in sorted order, adopting any children
//!   it encloses
//!
//! Cutting is a function of interval geometry only, so nested-or-disjoint
//! intervals give the same tree whatever order they arrive in.

use chrono::NaiveDate;

use crate::error::{RepairTreeError, Result};
use crate::interval::{Interval, Relation};

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct Node<P> {
    interval: Interval,
    payload: P,
    parent: Option<NodeId>,
    left_child: Option<NodeId>,
    right_sibling: Option<NodeId>,
}

impl<P> Node<P> {
    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn left_child(&self) -> Option<NodeId> {
        self.left_child
    }

    pub fn right_sibling(&self) -> Option<NodeId> {
        self.right_sibling
    }

    pub fn is_leaf(&self) -> bool {
        self.left_child.is_none()
    }
}

/// Decisions taken while inserting into an [`IntervalTree`].
pub trait InsertCallbacks<P> {
    /// A node with exactly `interval` already exists; fold `incoming` into it.
    fn on_existing_node(&mut self, existing: &mut P, incoming: P, interval: &Interval)
        -> Result<()>;

    /// Whether `incoming` may become a new child. `parent` is `None` for the
    /// root.
    fn should_insert_node(&mut self, _parent: Option<&P>, _incoming: &P) -> bool {
        true
    }

    /// Cut the payload of a node spanning `interval` at `at`.
    fn split_payload(&mut self, payload: P, interval: &Interval, at: NaiveDate) -> (P, P);
}

/// Receives the pieces of the timeline from [`IntervalTree::build`].
pub trait BuildVisitor<P> {
    /// `gap` lies inside `node` and is covered by none of its children.
    fn on_missing_interval(
        &mut self,
        tree: &IntervalTree<P>,
        node: NodeId,
        gap: Interval,
    ) -> Result<()>;

    /// `node` has no children.
    fn on_last_node(&mut self, tree: &IntervalTree<P>, node: NodeId) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct IntervalTree<P> {
    nodes: Vec<Node<P>>,
    root: Option<NodeId>,
}

impl<P: Default> Default for IntervalTree<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Default> IntervalTree<P> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
        }
    }

    /// The synthetic root, once anything has been inserted.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        self.root == Some(id)
    }

    /// Union of everything inserted so far.
    pub fn span(&self) -> Option<Interval> {
        self.root.map(|root| self.nodes[root.0].interval)
    }

    /// True when no node hangs below the root.
    pub fn is_empty(&self) -> bool {
        self.root
            .map_or(true, |root| self.nodes[root.0].left_child.is_none())
    }

    /// Number of nodes reachable from the root, the root excluded.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.walk_tree(|depth, _, _| {
            if depth > 0 {
                count += 1;
            }
        });
        count
    }

    pub fn node(&self, id: NodeId) -> &Node<P> {
        &self.nodes[id.0]
    }

    pub fn payload_mut(&mut self, id: NodeId) -> &mut P {
        &mut self.nodes[id.0].payload
    }

    pub fn children(&self, id: NodeId) -> Children<'_, P> {
        Children {
            tree: self,
            next: self.nodes[id.0].left_child,
        }
    }

    /// Parent, grandparent and so on up to the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_, P> {
        Ancestors {
            tree: self,
            next: self.nodes[id.0].parent,
        }
    }

    // ── Insertion ───────────────────────────────────────────────────────

    /// Insert `payload` over `interval`.
    ///
    /// Returns `false` when the callbacks vetoed every new node the payload
    /// would have created.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`InsertCallbacks::on_existing_node`].
    pub fn insert<C>(&mut self, interval: Interval, payload: P, callbacks: &mut C) -> Result<bool>
    where
        C: InsertCallbacks<P>,
    {
        let root = match self.root {
            Some(root) => {
                let node = &mut self.nodes[root.0];
                node.interval = node.interval.span(&interval);
                root
            }
            None => {
                let root = self.alloc(interval, P::default(), None);
                self.root = Some(root);
                root
            }
        };
        self.insert_under(root, interval, payload, callbacks)
    }

    fn insert_under<C>(
        &mut self,
        parent: NodeId,
        interval: Interval,
        payload: P,
        callbacks: &mut C,
    ) -> Result<bool>
    where
        C: InsertCallbacks<P>,
    {
        let mut cursor = self.nodes[parent.0].left_child;
        while let Some(child) = cursor {
            let child_interval = self.nodes[child.0].interval;
            match child_interval.relation(&interval) {
                Relation::Equal => {
                    callbacks.on_existing_node(
                        &mut self.nodes[child.0].payload,
                        payload,
                        &interval,
                    )?;
                    return Ok(true);
                }
                Relation::Contains => {
                    return self.insert_under(child, interval, payload, callbacks);
                }
                Relation::Overlaps => {
                    let (child_cut, incoming_cut) = if child_interval.start() < interval.start() {
                        (interval.start(), child_interval.end())
                    } else {
                        (interval.end(), child_interval.start())
                    };
                    self.split_node(child, child_cut, callbacks)?;
                    let (left, right) = interval
                        .split_at(incoming_cut)
                        .ok_or_else(|| bad_cut(&interval, incoming_cut))?;
                    let (left_payload, right_payload) =
                        callbacks.split_payload(payload, &interval, incoming_cut);
                    let left_inserted = self.insert_under(parent, left, left_payload, callbacks)?;
                    let right_inserted =
                        self.insert_under(parent, right, right_payload, callbacks)?;
                    return Ok(left_inserted || right_inserted);
                }
                Relation::ContainedBy | Relation::Adjacent | Relation::Disjoint => {}
            }
            cursor = self.nodes[child.0].right_sibling;
        }

        let parent_payload = if self.is_root(parent) {
            None
        } else {
            Some(&self.nodes[parent.0].payload)
        };
        if !callbacks.should_insert_node(parent_payload, &payload) {
            return Ok(false);
        }

        let id = self.alloc(interval, payload, Some(parent));
        let (adopted, mut siblings): (Vec<NodeId>, Vec<NodeId>) = self
            .children(parent)
            .partition(|&child| interval.contains(&self.nodes[child.0].interval));
        let slot = siblings
            .iter()
            .position(|&child| self.nodes[child.0].interval.start() > interval.start())
            .unwrap_or(siblings.len());
        siblings.insert(slot, id);
        self.relink_children(id, &adopted);
        self.relink_children(parent, &siblings);
        Ok(true)
    }

    /// Cut node `id` at `at`: the node keeps the earlier part and a new
    /// sibling right after it takes the later part, along with the children
    /// that fall there. A child straddling `at` is cut first.
    fn split_node<C>(&mut self, id: NodeId, at: NaiveDate, callbacks: &mut C) -> Result<()>
    where
        C: InsertCallbacks<P>,
    {
        let interval = self.nodes[id.0].interval;
        let (left, right) = interval
            .split_at(at)
            .ok_or_else(|| bad_cut(&interval, at))?;

        let straddling = self
            .children(id)
            .find(|&child| self.nodes[child.0].interval.is_cut_point(at));
        if let Some(child) = straddling {
            self.split_node(child, at, callbacks)?;
        }

        let payload = std::mem::take(&mut self.nodes[id.0].payload);
        let (left_payload, right_payload) = callbacks.split_payload(payload, &interval, at);
        let (kept, moved): (Vec<NodeId>, Vec<NodeId>) = self
            .children(id)
            .partition(|&child| self.nodes[child.0].interval.end() <= at);

        let parent = self.nodes[id.0].parent;
        let next = self.nodes[id.0].right_sibling;
        let sibling = self.alloc(right, right_payload, parent);
        self.nodes[sibling.0].right_sibling = next;
        let node = &mut self.nodes[id.0];
        node.interval = left;
        node.payload = left_payload;
        node.right_sibling = Some(sibling);

        self.relink_children(id, &kept);
        self.relink_children(sibling, &moved);
        self.absorb_equal_child(id, callbacks)?;
        self.absorb_equal_child(sibling, callbacks)
    }

    /// After a cut, a lone child may cover its whole parent; fold it into
    /// the parent so children stay strictly smaller than their parent.
    fn absorb_equal_child<C>(&mut self, id: NodeId, callbacks: &mut C) -> Result<()>
    where
        C: InsertCallbacks<P>,
    {
        let Some(child) = self.nodes[id.0].left_child else {
            return Ok(());
        };
        let interval = self.nodes[id.0].interval;
        if self.nodes[child.0].interval != interval {
            return Ok(());
        }
        let payload = std::mem::take(&mut self.nodes[child.0].payload);
        let grandchildren: Vec<NodeId> = self.children(child).collect();
        self.detach(child);
        self.relink_children(id, &grandchildren);
        callbacks.on_existing_node(&mut self.nodes[id.0].payload, payload, &interval)
    }

    // ── Traversal ───────────────────────────────────────────────────────

    /// Visit the timeline: leaves through [`BuildVisitor::on_last_node`],
    /// and every stretch of a node not covered by its children (before the
    /// first child, between children, after the last) through
    /// [`BuildVisitor::on_missing_interval`], in date order.
    ///
    /// # Errors
    ///
    /// Stops at the first error returned by the visitor.
    pub fn build<V>(&self, visitor: &mut V) -> Result<()>
    where
        V: BuildVisitor<P>,
    {
        match self.root {
            Some(root) => self.build_from(root, visitor),
            None => Ok(()),
        }
    }

    fn build_from<V>(&self, id: NodeId, visitor: &mut V) -> Result<()>
    where
        V: BuildVisitor<P>,
    {
        let node = &self.nodes[id.0];
        if node.is_leaf() {
            return visitor.on_last_node(self, id);
        }
        let mut cursor = node.interval.start();
        for child in self.children(id) {
            let child_interval = self.nodes[child.0].interval;
            if child_interval.start() > cursor {
                visitor.on_missing_interval(self, id, Interval::new(cursor, child_interval.start())?)?;
            }
            self.build_from(child, visitor)?;
            cursor = child_interval.end();
        }
        if cursor < node.interval.end() {
            visitor.on_missing_interval(self, id, Interval::new(cursor, node.interval.end())?)?;
        }
        Ok(())
    }

    /// Pre-order depth-first walk from the root (depth 0): a node, then its
    /// whole first-child subtree, then its siblings' subtrees.
    pub fn walk_tree<F>(&self, mut on_current_node: F)
    where
        F: FnMut(usize, NodeId, &Node<P>),
    {
        if let Some(root) = self.root {
            self.walk_from(root, 0, &mut on_current_node);
        }
    }

    fn walk_from<F>(&self, id: NodeId, depth: usize, on_current_node: &mut F)
    where
        F: FnMut(usize, NodeId, &Node<P>),
    {
        on_current_node(depth, id, &self.nodes[id.0]);
        for child in self.children(id) {
            self.walk_from(child, depth + 1, on_current_node);
        }
    }

    /// Node ids in walk order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.walk_tree(|_, id, _| ids.push(id));
        ids
    }

    // ── Search ──────────────────────────────────────────────────────────

    /// First node, in walk order, accepted by `is_match`.
    pub fn find_node<F>(&self, mut is_match: F) -> Option<NodeId>
    where
        F: FnMut(&Node<P>) -> bool,
    {
        let mut found = None;
        self.walk_tree(|_, id, node| {
            if found.is_none() && is_match(node) {
                found = Some(id);
            }
        });
        found
    }

    /// First node covering `date` accepted by `is_match`, searching
    /// top-down through the children that cover `date`. The root is not a
    /// candidate.
    pub fn find_node_at<F>(&self, date: NaiveDate, mut is_match: F) -> Option<NodeId>
    where
        F: FnMut(&Node<P>) -> bool,
    {
        let root = self.root?;
        self.find_below(root, date, &mut is_match)
    }

    fn find_below<F>(&self, id: NodeId, date: NaiveDate, is_match: &mut F) -> Option<NodeId>
    where
        F: FnMut(&Node<P>) -> bool,
    {
        if !self.nodes[id.0].interval.contains_date(date) {
            return None;
        }
        for child in self.children(id) {
            let node = &self.nodes[child.0];
            if !node.interval.contains_date(date) {
                continue;
            }
            if is_match(node) {
                return Some(child);
            }
            if let Some(found) = self.find_below(child, date, is_match) {
                return Some(found);
            }
        }
        None
    }

    /// Children cover `id` end to end with no gap.
    pub fn is_partitioned_by_children(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        if node.is_leaf() {
            return false;
        }
        let mut cursor = node.interval.start();
        for child in self.children(id) {
            let child_interval = self.nodes[child.0].interval;
            if child_interval.start() != cursor {
                return false;
            }
            cursor = child_interval.end();
        }
        cursor == node.interval.end()
    }

    // ── Removal ─────────────────────────────────────────────────────────

    /// Unlink `child` from `parent`; its own children take its place.
    ///
    /// Returns `false` if `child` is not a child of `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let siblings: Vec<NodeId> = self.children(parent).collect();
        let Some(position) = siblings.iter().position(|&id| id == child) else {
            return false;
        };
        let promoted: Vec<NodeId> = self.children(child).collect();
        let mut relinked = siblings[..position].to_vec();
        relinked.extend(promoted);
        relinked.extend_from_slice(&siblings[position + 1..]);
        self.detach(child);
        self.relink_children(parent, &relinked);
        true
    }

    // ── Arena plumbing ──────────────────────────────────────────────────

    fn alloc(&mut self, interval: Interval, payload: P, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            interval,
            payload,
            parent,
            left_child: None,
            right_sibling: None,
        });
        id
    }

    /// Make `children` (in order) the complete child list of `parent`.
    fn relink_children(&mut self, parent: NodeId, children: &[NodeId]) {
        self.nodes[parent.0].left_child = children.first().copied();
        for (position, &child) in children.iter().enumerate() {
            let node = &mut self.nodes[child.0];
            node.parent = Some(parent);
            node.right_sibling = children.get(position + 1).copied();
        }
    }

    /// Leave a node in the arena but unreachable.
    fn detach(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        node.parent = None;
        node.left_child = None;
        node.right_sibling = None;
    }
}

fn bad_cut(interval: &Interval, at: NaiveDate) -> RepairTreeError {
    RepairTreeError::InvalidInterval(format!("cannot cut {interval} at {at}"))
}

/// Iterator over the children of a node, left to right.
pub struct Children<'a, P> {
    tree: &'a IntervalTree<P>,
    next: Option<NodeId>,
}

impl<P> Iterator for Children<'_, P> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.nodes[current.0].right_sibling;
        Some(current)
    }
}

/// Iterator from a node's parent up to the root.
pub struct Ancestors<'a, P> {
    tree: &'a IntervalTree<P>,
    next: Option<NodeId>,
}

impl<P> Iterator for Ancestors<'_, P> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.nodes[current.0].parent;
        Some(current)
    }
}
