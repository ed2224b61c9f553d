use serde_json::{Map, Value};

use super::event::integer;

const CHILD_NODES: &str = "childNodes";
const CHILDREN: &str = "children";

/// A serialized DOM node from a snapshot or mutation payload.
///
/// Only nodes with a numeric `id` and `type` can be represented; everything
/// else on the node is carried through untouched in `attributes`.
#[derive(Debug, Clone, PartialEq)]
pub struct DomNode {
    pub id: i64,
    pub node_type: i64,
    pub child_nodes: Option<Vec<DomNode>>,
    pub children: Option<Vec<DomNode>>,
    pub attributes: Map<String, Value>,
}

impl DomNode {
    /// Validate a node tree and prune it.
    ///
    /// Returns `None` when the root itself is invalid. Invalid descendants are
    /// removed from their parent's list together with their whole subtree;
    /// `pruned` is incremented once per removed subtree.
    pub fn prune(value: &Value, pruned: &mut usize) -> Option<DomNode> {
        let obj = value.as_object()?;
        let id = obj.get("id").and_then(integer)?;
        let node_type = obj.get("type").and_then(integer)?;

        let mut attributes = Map::new();
        for (key, val) in obj {
            match key.as_str() {
                "id" | "type" | CHILD_NODES | CHILDREN => {}
                _ => {
                    attributes.insert(key.clone(), val.clone());
                }
            }
        }

        Some(DomNode {
            id,
            node_type,
            child_nodes: obj.get(CHILD_NODES).map(|v| prune_list(v, pruned)),
            children: obj.get(CHILDREN).map(|v| prune_list(v, pruned)),
            attributes,
        })
    }

    pub fn into_value(self) -> Value {
        let mut obj = self.attributes;
        obj.insert("id".to_string(), Value::from(self.id));
        obj.insert("type".to_string(), Value::from(self.node_type));
        if let Some(nodes) = self.child_nodes {
            obj.insert(
                CHILD_NODES.to_string(),
                Value::Array(nodes.into_iter().map(DomNode::into_value).collect()),
            );
        }
        if let Some(nodes) = self.children {
            obj.insert(
                CHILDREN.to_string(),
                Value::Array(nodes.into_iter().map(DomNode::into_value).collect()),
            );
        }
        Value::Object(obj)
    }

    /// Number of nodes in this subtree, including the root.
    pub fn node_count(&self) -> usize {
        1 + self
            .child_nodes
            .iter()
            .chain(self.children.iter())
            .flatten()
            .map(DomNode::node_count)
            .sum::<usize>()
    }

    /// Depth-first lookup by node id.
    pub fn find(&self, id: i64) -> Option<&DomNode> {
        if self.id == id {
            return Some(self);
        }
        self.child_nodes
            .iter()
            .chain(self.children.iter())
            .flatten()
            .find_map(|child| child.find(id))
    }
}

fn prune_list(value: &Value, pruned: &mut usize) -> Vec<DomNode> {
    let Some(items) = value.as_array() else {
        *pruned += 1;
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let node = DomNode::prune(item, pruned);
            if node.is_none() {
                *pruned += 1;
            }
            node
        })
        .collect()
}
