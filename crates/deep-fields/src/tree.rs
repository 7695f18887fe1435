use std::collections::VecDeque;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{FieldsError, Result};
use crate::ledger::StepSnapshot;
use crate::node::{Children, FieldNode, FieldState, GateFlags, NodeId};
use crate::observe::{FieldUpdate, Observers, SubscriptionId};
use crate::options::FieldOptions;
use crate::schema::{CreateContext, FieldChange, FieldKind, FieldSchema};
use crate::value::coerce_date;

/// Arena holding one form's field tree.
///
/// Indexing with a [`NodeId`] that was removed (or belongs to another tree)
/// panics; use [`FieldTree::node`] for fallible lookups.
#[derive(Debug)]
pub struct FieldTree {
    pub(crate) nodes: Vec<Option<FieldNode>>,
    pub(crate) root: NodeId,
    pub(crate) options: FieldOptions,
    pub(crate) observers: Observers,
    pub(crate) pending: VecDeque<NodeId>,
    pub(crate) deferred: VecDeque<NodeId>,
    pub(crate) history: Vec<StepSnapshot>,
}

impl FieldTree {
    /// Builds the tree synchronously and queues its initial validation.
    ///
    /// The schema is cloned, so the caller's copy is never touched. Call
    /// [`FieldTree::settle`] to run the queued validations.
    pub fn build(schema: &FieldSchema, value: Value, options: FieldOptions) -> Self {
        let schema = schema.clone();
        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            options,
            observers: Observers::default(),
            pending: VecDeque::new(),
            deferred: VecDeque::new(),
            history: Vec::new(),
        };
        let name = schema.name.clone().unwrap_or_default();
        tree.root = tree.build_node(&schema, value, name, None);
        tree
    }

    /// [`FieldTree::build`] followed by [`FieldTree::settle`].
    pub async fn create(schema: &FieldSchema, value: Value, options: FieldOptions) -> Self {
        let mut tree = Self::build(schema, value, options);
        tree.settle().await;
        tree
    }

    fn build_node(
        &mut self,
        schema: &FieldSchema,
        value: Value,
        name: String,
        parent: Option<NodeId>,
    ) -> NodeId {
        let parent_node = parent.map(|id| &self[id]);
        let step = parent_node
            .map(|node| node.step)
            .or_else(|| {
                value
                    .get("step")
                    .and_then(Value::as_u64)
                    .and_then(|step| u32::try_from(step).ok())
            })
            .unwrap_or(1);
        let role_and_steps = schema
            .role_and_steps
            .clone()
            .or_else(|| parent_node.and_then(|node| node.role_and_steps.clone()));
        let read_only_steps = schema
            .read_only_steps
            .clone()
            .or_else(|| parent_node.and_then(|node| node.read_only_steps.clone()));
        let set_null_steps = schema
            .set_null_steps
            .clone()
            .or_else(|| parent_node.and_then(|node| node.set_null_steps.clone()));
        let mut on_create = parent_node
            .map(|node| node.on_create.clone())
            .unwrap_or_default();
        on_create.extend(schema.on_create.clone());

        let mut path = parent_node.map(|node| node.path.clone()).unwrap_or_default();
        if parent.is_some() {
            path.push(name.clone());
        }
        let path_str = path.join(".");

        let value = match value {
            Value::Null => schema.config.default_value.clone().unwrap_or(Value::Null),
            value => value,
        };

        let kind = schema.kind();
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(FieldNode {
            name,
            path,
            path_str,
            kind,
            date: schema.is_date(),
            config: schema.config.clone(),
            state: FieldState::default(),
            validators: schema.validators.clone(),
            next_tick: schema.next_tick_validate,
            step,
            role_and_steps,
            read_only_steps,
            set_null_steps,
            on_create,
            gate: GateFlags::default(),
            parent,
            children: Children::Scalar,
        }));

        match kind {
            FieldKind::Array => {
                let template = schema.new_item.clone().unwrap_or_default();
                self[id].children = Children::Array {
                    items: Vec::new(),
                    template,
                    next_child: 0,
                };
                let items = match value {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => {
                        warn!(path = %self[id].path_str, value = %other, "array field given a non-array value");
                        Vec::new()
                    }
                };
                for item in items {
                    self.append_member(id, item);
                }
            }
            FieldKind::Object => {
                let mut remaining = match value {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => {
                        warn!(path = %self[id].path_str, value = %other, "object field given a non-object value");
                        Map::new()
                    }
                };
                let mut props = Vec::new();
                for (key, child_schema) in schema.props.iter().flatten() {
                    let child_value = remaining.remove(key).unwrap_or(Value::Null);
                    let child = self.build_node(child_schema, child_value, key.clone(), Some(id));
                    props.push((key.clone(), child));
                }
                if parent.is_none() {
                    remaining.remove("step");
                }
                self[id].children = Children::Object {
                    props,
                    residual: remaining,
                };
            }
            FieldKind::Scalar => {
                self[id].state.value = if schema.is_date() {
                    coerce_date(value)
                } else {
                    value
                };
            }
        }

        self.run_create_hooks(id);
        self.recompute_gate(id);

        if !self.options.server_side {
            if self[id].next_tick {
                self.deferred.push_back(id);
            } else {
                self.pending.push_back(id);
            }
        }
        id
    }

    fn run_create_hooks(&mut self, id: NodeId) {
        let hooks = self[id].on_create.clone();
        for hook in hooks {
            let FieldNode {
                name,
                path,
                kind,
                step,
                config,
                state,
                ..
            } = &mut self[id];
            let mut ctx = CreateContext {
                node: id,
                name: name.as_str(),
                path: path.as_slice(),
                kind: *kind,
                step: *step,
                config,
                value: (*kind == FieldKind::Scalar).then_some(&mut state.value),
            };
            hook(&mut ctx);
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    /// Active role set, as configured.
    pub fn roles(&self) -> &[String] {
        &self.options.user_roles
    }

    pub fn node(&self, id: NodeId) -> Result<&FieldNode> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(FieldsError::UnknownNode { id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(Option::is_some)
    }

    /// Looks a node up by its dot-joined path; the empty path is the root.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        if path.is_empty() {
            return Some(self.root);
        }
        path.split('.').try_fold(self.root, |current, segment| {
            let node = &self[current];
            match &node.children {
                Children::Object { .. } => node.child(segment),
                Children::Array { items, .. } => items
                    .iter()
                    .copied()
                    .find(|item| self[*item].name == segment),
                Children::Scalar => None,
            }
        })
    }

    /// Parents of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.node(id).ok().and_then(FieldNode::parent), |current| {
            self[*current].parent
        })
    }

    /// Subtree rooted at `start` in pre-order, children in structural order.
    pub fn preorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if !self.contains(start) {
            return order;
        }
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self[id].children().into_iter().rev());
        }
        order
    }

    pub fn subscribe<F>(&mut self, id: NodeId, listener: F) -> Result<SubscriptionId>
    where
        F: Fn(&FieldUpdate) + Send + Sync + 'static,
    {
        self.node(id)?;
        Ok(self.observers.subscribe(id, Arc::new(listener)))
    }

    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        self.observers.unsubscribe(subscription)
    }

    /// Fires the node's listeners with its current state and gating.
    pub fn update(&self, id: NodeId) {
        if self.contains(id) {
            self.notify(id);
        }
    }

    pub(crate) fn notify(&self, id: NodeId) {
        if !self.observers.has_listeners(id) {
            return;
        }
        let node = &self[id];
        self.observers.notify(&FieldUpdate {
            node: id,
            path: node.path_str.clone(),
            state: node.state.clone(),
            gate: node.gate,
        });
    }

    /// Appends a member built from the array's item template.
    ///
    /// The new subtree's initial validation is only queued; call
    /// [`FieldTree::settle`] to run it.
    pub fn push_member(&mut self, array: NodeId, value: Value) -> Result<NodeId> {
        self.expect_array(array)?;
        let child = self.append_member(array, value);
        self.notify(array);
        Ok(child)
    }

    fn append_member(&mut self, array: NodeId, value: Value) -> NodeId {
        let (template, name) = match &mut self[array].children {
            Children::Array {
                template,
                next_child,
                ..
            } => {
                *next_child += 1;
                let prefix = template.name.clone().unwrap_or_default();
                (template.clone(), format!("{prefix}{next_child}"))
            }
            _ => unreachable!("append_member called on a non-array node"),
        };
        let child = self.build_node(&template, value, name, Some(array));
        if let Children::Array { items, .. } = &mut self[array].children {
            items.push(child);
        }
        debug!(path = %self[array].path_str, child = %child, "array member added");
        child
    }

    /// Removes `count` members starting at `index` (a zero count removes one).
    pub fn rm_member(&mut self, array: NodeId, index: usize, count: usize) -> Result<()> {
        self.expect_array(array)?;
        let len = self[array].members().len();
        if index >= len {
            return Err(FieldsError::NoSuchMember {
                name: self[array].name.clone(),
                index,
            });
        }
        let end = index.saturating_add(count.max(1)).min(len);
        let removed: Vec<NodeId> = match &mut self[array].children {
            Children::Array { items, .. } => items.drain(index..end).collect(),
            _ => Vec::new(),
        };
        for child in removed {
            self.detach(child);
        }
        debug!(path = %self[array].path_str, index, count = end - index, "array members removed");
        self.notify(array);
        Ok(())
    }

    /// Removes `child` from `array`.
    pub fn rm_child(&mut self, array: NodeId, child: NodeId) -> Result<()> {
        self.expect_array(array)?;
        let index = self[array]
            .members()
            .iter()
            .position(|item| *item == child)
            .ok_or_else(|| FieldsError::ChildNotFound {
                name: self[array].name.clone(),
            })?;
        self.rm_member(array, index, 1)
    }

    /// Removes `id` from its parent array; a root node is left alone.
    pub fn drop_member(&mut self, id: NodeId) -> Result<()> {
        match self.node(id)?.parent {
            Some(parent) => self.rm_child(parent, id),
            None => Ok(()),
        }
    }

    fn expect_array(&self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        if node.kind == FieldKind::Array {
            Ok(())
        } else {
            Err(FieldsError::NotArray {
                name: node.name.clone(),
            })
        }
    }

    fn detach(&mut self, id: NodeId) {
        for node in self.preorder(id) {
            self.observers.forget(node);
            self.nodes[node.0] = None;
        }
    }

    /// Assigns a scalar value, validates it, notifies listeners and runs the
    /// `after_change` hook. Objects and arrays are routed to
    /// [`FieldTree::set_values`].
    pub async fn set_value(&mut self, id: NodeId, value: Value) -> Result<()> {
        if self.node(id)?.kind != FieldKind::Scalar {
            return self.set_values(id, value).await;
        }
        self.assign(id, value, false).await;
        Ok(())
    }

    pub(crate) async fn assign(&mut self, id: NodeId, value: Value, force: bool) {
        let value = self.coerce(id, value);
        if !force && self[id].state.value == value {
            return;
        }
        self[id].state.value = value;
        let form = self.full_value();
        self.validate_node(id, true, &form, None).await;
        self.notify(id);
        let node = &self[id];
        if let Some(hook) = &node.config.after_change {
            hook(&FieldChange {
                node: id,
                path: &node.path,
                value: &node.state.value,
            });
        }
    }

    pub(crate) fn coerce(&self, id: NodeId, value: Value) -> Value {
        if self[id].date {
            coerce_date(value)
        } else {
            value
        }
    }

    /// Overwrites a subtree from a nested value, growing or shrinking arrays,
    /// then validates every scalar whose value changed and every new member,
    /// next-tick members included.
    pub async fn set_values(&mut self, id: NodeId, values: Value) -> Result<()> {
        self.node(id)?;
        let mut touched = Vec::new();
        self.apply_values(id, values, &mut touched);
        self.settle().await;
        if touched.is_empty() {
            return Ok(());
        }
        let form = self.full_value();
        for leaf in touched {
            self.validate_node(leaf, true, &form, None).await;
            self.notify(leaf);
        }
        Ok(())
    }

    fn apply_values(&mut self, id: NodeId, values: Value, touched: &mut Vec<NodeId>) {
        match self[id].kind {
            FieldKind::Array => {
                let values = match values {
                    Value::Array(values) => values,
                    _ => Vec::new(),
                };
                while self[id].members().len() > values.len() {
                    let popped = match &mut self[id].children {
                        Children::Array { items, .. } => items.pop(),
                        _ => None,
                    };
                    match popped {
                        Some(child) => self.detach(child),
                        None => break,
                    }
                }
                for (index, value) in values.into_iter().enumerate() {
                    match self[id].members().get(index).copied() {
                        Some(child) => self.apply_values(child, value, touched),
                        None => {
                            self.append_member(id, value);
                        }
                    }
                }
                self.notify(id);
            }
            FieldKind::Object => {
                let Value::Object(mut values) = values else {
                    return;
                };
                for child in self[id].children() {
                    if let Some(value) = values.remove(&self[child].name) {
                        self.apply_values(child, value, touched);
                    }
                }
            }
            FieldKind::Scalar => {
                let value = self.coerce(id, values);
                if self[id].state.value != value {
                    self[id].state.value = value;
                    touched.push(id);
                }
            }
        }
    }
}

impl Index<NodeId> for FieldTree {
    type Output = FieldNode;

    fn index(&self, id: NodeId) -> &FieldNode {
        match self.nodes.get(id.0) {
            Some(Some(node)) => node,
            _ => panic!("node {id} is not part of this tree"),
        }
    }
}

impl IndexMut<NodeId> for FieldTree {
    fn index_mut(&mut self, id: NodeId) -> &mut FieldNode {
        match self.nodes.get_mut(id.0) {
            Some(Some(node)) => node,
            _ => panic!("node {id} is not part of this tree"),
        }
    }
}
