//! # repair-tree
//!
//! Reconciles what has already been invoiced for a subscription against what
//! should be invoiced after a plan change, and emits the items that close
//! the gap: new charges for what is missing and linked repairs (negative
//! items) for what was billed but is no longer owed.
//!
//! Existing charges and repairs are laid out in an interval tree where a
//! nested node overrides its ancestors for the days it covers. The tree is
//! reduced to the current-truth timeline, proposed items are diffed against
//! it, and repairs never take back more than is left of the item they
//! repair.
//!
//! ## Modules
//!
//! - [`interval`] — half-open date intervals and how two of them relate
//! - [`item`] — priced items, their actions and wire form
//! - [`proration`] — day-based proration and rounding policy
//! - [`config`] — tree options
//! - [`node`] — generic arena interval tree with insertion callbacks and build visitors
//! - [`items_node`] — item payloads, pruning, validation and the current-truth timeline
//! - [`merge`] — diff of the current-truth timeline against proposed items
//! - [`subscription`] — the build → flatten → merge lifecycle of one subscription
//! - [`json`] — nested-array debug dump of a tree
//! - [`error`] — Error types

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod error;
pub mod interval;
pub mod item;
pub mod items_node;
pub mod json;
pub mod merge;
pub mod node;
pub mod proration;
pub mod subscription;

pub use config::{StaleRepairPolicy, TreeOptions};
pub use error::{RepairTreeError, Result};
pub use interval::{Interval, Relation};
pub use item::{Item, ItemAction, ItemKind, ItemRecord};
pub use items_node::{ItemsInsert, ItemsNode, ItemsTree};
pub use json::tree_to_json;
pub use node::{BuildVisitor, InsertCallbacks, IntervalTree, Node, NodeId};
pub use proration::{ProrationBasis, ProrationPolicy, RoundingMode};
pub use subscription::{SubscriptionItemTree, TreeState};
