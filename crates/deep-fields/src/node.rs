use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::{CreateHook, FieldConfig, FieldKind, FieldSchema, RoleSteps};
use crate::validate::{SharedValidator, ValidationFailure};

/// Handle to a node inside a [`crate::FieldTree`] arena.
///
/// Handles are never reused; a handle to a removed array member stays dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value and last validation failure, observed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldState {
    pub value: Value,
    pub error: Option<ValidationFailure>,
}

/// Derived role/step affordances of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateFlags {
    pub read_only: bool,
    pub skip_validate: bool,
    pub skip_value: bool,
    pub silent_validate: bool,
    pub allow_set_null: bool,
}

/// Error view consumed by renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorProps {
    pub has_error: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) enum Children {
    Scalar,
    Object {
        props: Vec<(String, NodeId)>,
        /// Keys of the initial value that no prop claimed.
        residual: Map<String, Value>,
    },
    Array {
        items: Vec<NodeId>,
        template: Box<FieldSchema>,
        next_child: usize,
    },
}

/// One field of the tree. Owned by the arena; parents own children by handle.
pub struct FieldNode {
    pub(crate) name: String,
    pub(crate) path: Vec<String>,
    pub(crate) path_str: String,
    pub(crate) kind: FieldKind,
    pub(crate) date: bool,
    pub(crate) config: FieldConfig,
    pub(crate) state: FieldState,
    pub(crate) validators: Vec<SharedValidator>,
    pub(crate) next_tick: bool,
    pub(crate) step: u32,
    pub(crate) role_and_steps: Option<RoleSteps>,
    pub(crate) read_only_steps: Option<RoleSteps>,
    pub(crate) set_null_steps: Option<RoleSteps>,
    pub(crate) on_create: Vec<CreateHook>,
    pub(crate) gate: GateFlags,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Children,
}

impl FieldNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names from the root (exclusive) down to this node.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Dot-joined path, used as the flat update key.
    pub fn path_str(&self) -> &str {
        &self.path_str
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_date(&self) -> bool {
        self.date
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn state(&self) -> &FieldState {
        &self.state
    }

    pub fn error(&self) -> Option<&ValidationFailure> {
        self.state.error.as_ref()
    }

    pub fn error_props(&self) -> ErrorProps {
        ErrorProps {
            has_error: self.state.error.is_some(),
            message: self.state.error.as_ref().map(|err| err.message.clone()),
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn gate(&self) -> GateFlags {
        self.gate
    }

    pub fn read_only(&self) -> bool {
        self.gate.read_only
    }

    pub fn skip_validate(&self) -> bool {
        self.gate.skip_validate
    }

    pub fn skip_value(&self) -> bool {
        self.gate.skip_value
    }

    pub fn silent_validate(&self) -> bool {
        self.gate.silent_validate
    }

    pub fn allow_set_null(&self) -> bool {
        self.gate.allow_set_null
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn role_and_steps(&self) -> Option<&RoleSteps> {
        self.role_and_steps.as_ref()
    }

    pub fn read_only_steps(&self) -> Option<&RoleSteps> {
        self.read_only_steps.as_ref()
    }

    pub fn set_null_steps(&self) -> Option<&RoleSteps> {
        self.set_null_steps.as_ref()
    }

    /// Handles of direct children in structural order.
    pub fn children(&self) -> Vec<NodeId> {
        match &self.children {
            Children::Scalar => Vec::new(),
            Children::Object { props, .. } => props.iter().map(|(_, id)| *id).collect(),
            Children::Array { items, .. } => items.clone(),
        }
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        match &self.children {
            Children::Object { props, .. } => props
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, id)| *id),
            _ => None,
        }
    }

    /// Array members in index order; empty for other kinds.
    pub fn members(&self) -> &[NodeId] {
        match &self.children {
            Children::Array { items, .. } => items,
            _ => &[],
        }
    }

    /// Initial-value keys an object node kept because no prop claimed them.
    pub fn residual(&self) -> Option<&Map<String, Value>> {
        match &self.children {
            Children::Object { residual, .. } => Some(residual),
            _ => None,
        }
    }
}

impl fmt::Debug for FieldNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldNode")
            .field("name", &self.name)
            .field("path", &self.path_str)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("step", &self.step)
            .field("gate", &self.gate)
            .field("parent", &self.parent)
            .field("children", &self.children())
            .finish_non_exhaustive()
    }
}
