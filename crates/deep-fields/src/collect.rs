use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::Result;
use crate::node::{Children, NodeId};
use crate::tree::FieldTree;
use crate::value::parse_date;

impl FieldTree {
    /// Logical value of the whole tree, with skipped fields filtered out.
    pub fn value(&self) -> Value {
        self.collect(self.root, true)
    }

    /// Value of the whole tree without filtering.
    pub fn full_value(&self) -> Value {
        self.collect(self.root, false)
    }

    pub fn value_of(&self, id: NodeId) -> Result<Value> {
        self.node(id)?;
        Ok(self.collect(id, true))
    }

    pub fn full_value_of(&self, id: NodeId) -> Result<Value> {
        self.node(id)?;
        Ok(self.collect(id, false))
    }

    /// Parsed date of a date-typed scalar.
    pub fn date_of(&self, id: NodeId) -> Result<Option<OffsetDateTime>> {
        let node = self.node(id)?;
        Ok(node
            .is_date()
            .then(|| parse_date(&node.state.value))
            .flatten())
    }

    pub(crate) fn collect(&self, id: NodeId, filtered: bool) -> Value {
        let node = &self[id];
        match &node.children {
            Children::Array { items, .. } => Value::Array(
                items
                    .iter()
                    .map(|item| self.collect(*item, filtered))
                    .collect(),
            ),
            Children::Object { props, .. } => {
                let mut map = Map::new();
                for (key, child) in props {
                    let child_node = &self[*child];
                    if !filtered || !child_node.gate.skip_value {
                        map.insert(key.clone(), self.collect(*child, filtered));
                    } else if child_node.gate.allow_set_null && self.collect(*child, false).is_null() {
                        map.insert(key.clone(), Value::Null);
                    }
                }
                if node.parent.is_none() {
                    map.insert("step".into(), Value::from(node.step));
                }
                Value::Object(map)
            }
            Children::Scalar => node.state.value.clone(),
        }
    }

    /// Flat `path -> value` map of the whole tree for partial persistence.
    pub fn updates(&self) -> Map<String, Value> {
        let mut updates = Map::new();
        self.collect_updates(self.root, &mut updates);
        updates
    }

    /// Flat updates of one subtree, merged into `updates`.
    pub fn updates_of(&self, id: NodeId, updates: &mut Map<String, Value>) -> Result<()> {
        self.node(id)?;
        self.collect_updates(id, updates);
        Ok(())
    }

    fn collect_updates(&self, id: NodeId, updates: &mut Map<String, Value>) {
        let node = &self[id];
        match &node.children {
            // Arrays are replaced wholesale under their own path.
            Children::Array { items, .. } => {
                let members = items.iter().map(|item| self.collect(*item, true)).collect();
                updates.insert(node.path_str.clone(), Value::Array(members));
            }
            Children::Object { props, .. } => {
                for (_, child) in props {
                    if !self[*child].gate.skip_value {
                        self.collect_updates(*child, updates);
                    }
                }
            }
            Children::Scalar => {
                if !node.gate.skip_value {
                    updates.insert(node.path_str.clone(), node.state.value.clone());
                }
            }
        }
        if node.config.use_steps {
            updates.insert("step".into(), Value::from(node.step));
        }
    }
}
