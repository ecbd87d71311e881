//! Nested-array JSON dump of an items tree, for debugging and audit logs.
//!
//! The top-level array lists the root's children. Each node appears as an
//! object `{"start", "end", "items"}`; when the node has children, the
//! object is followed by an array holding their subtree in the same shape:
//!
//! ```text
//! [ {node A}, [ {child A1}, {child A2}, [ {grandchild} ] ], {node B} ]
//! ```
//!
//! Key order and the fixed number of decimals are stable, so the output can
//! be snapshotted.

use serde_json::{Map, Number, Value};

use crate::item::Item;
use crate::items_node::ItemsTree;
use crate::node::NodeId;

/// Dump `tree` with amounts printed at `decimals` places.
pub fn tree_to_json(tree: &ItemsTree, decimals: u32) -> Value {
    match tree.root() {
        Some(root) => children_to_json(tree, root, decimals),
        None => Value::Array(Vec::new()),
    }
}

fn children_to_json(tree: &ItemsTree, parent: NodeId, decimals: u32) -> Value {
    let mut out = Vec::new();
    for child in tree.children(parent) {
        let node = tree.node(child);
        let mut object = Map::new();
        object.insert("start".into(), Value::String(node.interval().start().to_string()));
        object.insert("end".into(), Value::String(node.interval().end().to_string()));
        object.insert(
            "items".into(),
            Value::Array(
                node.payload()
                    .items()
                    .iter()
                    .map(|item| item_to_json(item, decimals))
                    .collect(),
            ),
        );
        out.push(Value::Object(object));
        if !node.is_leaf() {
            out.push(children_to_json(tree, child, decimals));
        }
    }
    Value::Array(out)
}

/// One item with the fixed key order of the dump.
pub fn item_to_json(item: &Item, decimals: u32) -> Value {
    let mut object = Map::new();
    object.insert("id".into(), Value::String(item.id().to_string()));
    object.insert("startDate".into(), Value::String(item.start_date().to_string()));
    object.insert("endDate".into(), Value::String(item.end_date().to_string()));
    object.insert("amount".into(), amount_to_json(item, decimals));
    object.insert("currency".into(), Value::String(item.currency().to_string()));
    object.insert(
        "linkedId".into(),
        item.linked_id()
            .map_or(Value::Null, |id| Value::String(id.to_string())),
    );
    object.insert("action".into(), Value::String(item.action().to_string()));
    object.insert("fullyAdjusted".into(), Value::Bool(item.fully_adjusted()));
    Value::Object(object)
}

fn amount_to_json(item: &Item, decimals: u32) -> Value {
    let text = format!("{:.*}", decimals as usize, item.amount());
    match text.parse::<Number>() {
        Ok(number) => Value::Number(number),
        Err(_) => Value::String(text),
    }
}
