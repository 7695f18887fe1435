use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FieldsError, Result};
use crate::node::NodeId;
use crate::schema::FieldKind;
use crate::tree::FieldTree;
use crate::validate::{FieldIssue, ValidationReport};

/// Root-level record of one visited step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSnapshot {
    pub step: u32,
    pub value: Value,
    pub updates: Map<String, Value>,
}

/// Result of [`FieldTree::step_and_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepTransition {
    Committed,
    Rejected(Vec<FieldIssue>),
}

impl StepTransition {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            Self::Committed => &[],
            Self::Rejected(issues) => issues,
        }
    }
}

impl FieldTree {
    pub fn step(&self) -> u32 {
        self[self.root].step
    }

    pub fn step_history(&self) -> &[StepSnapshot] {
        &self.history
    }

    /// Snapshots the current step, overwriting the last entry when it is for
    /// the same step.
    pub fn push_step(&mut self) {
        let snapshot = StepSnapshot {
            step: self.step(),
            value: self.value(),
            updates: self.updates(),
        };
        match self.history.last_mut() {
            Some(last) if last.step == snapshot.step => *last = snapshot,
            _ => self.history.push(snapshot),
        }
        debug!(step = self.step(), entries = self.history.len(), "step snapshot recorded");
    }

    /// Moves the whole tree to `step`.
    pub fn set_step(&mut self, step: u32) {
        self.cascade_step(self.root, step);
    }

    /// Moves the subtree rooted at `id` to `step`, recomputing gating on every
    /// node whose step changes.
    pub fn set_step_from(&mut self, id: NodeId, step: u32) -> Result<()> {
        self.node(id)?;
        self.cascade_step(id, step);
        Ok(())
    }

    fn cascade_step(&mut self, id: NodeId, step: u32) {
        if self[id].step == step {
            return;
        }
        debug!(path = %self[id].path_str, from = self[id].step, to = step, "switching step");
        for node in self.preorder(id) {
            if self[node].step != step {
                self[node].step = step;
                self.recompute_gate(node);
            }
        }
    }

    /// Tentatively assigns `value`, validates the whole tree and only then
    /// snapshots the current step, switches to `step` and commits.
    ///
    /// On failure the previous value and gating are restored and the step is
    /// left unchanged. Actions queued by this pass are not applied; the
    /// explicit target step takes their place.
    pub async fn step_and_value(
        &mut self,
        id: NodeId,
        step: u32,
        value: Value,
    ) -> Result<StepTransition> {
        let node = self.node(id)?;
        if node.kind != FieldKind::Scalar {
            return Err(FieldsError::NotScalar {
                name: node.name.clone(),
            });
        }
        let previous = node.state.value.clone();
        let tentative = self.coerce(id, value);
        self[id].state.value = tentative.clone();

        let report = self.cascade(self.root, false).await;
        if !report.is_valid() {
            debug!(path = %self[id].path_str, issues = report.issues.len(), "step change rejected");
            self.assign(id, previous, false).await;
            self.recompute_gate(id);
            return Ok(StepTransition::Rejected(report.issues));
        }

        self.push_step();
        self.set_step(step);
        self[id].state.value = previous;
        self.assign(id, tentative, true).await;
        Ok(StepTransition::Committed)
    }

    /// Every visited step's updates, oldest first, overlaid with the current ones.
    pub fn steps_update(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for snapshot in &self.history {
            merged.extend(snapshot.updates.clone());
        }
        merged.extend(self.updates());
        merged
    }

    /// Resolves the actions a root cascade queued. Unconditional ones apply
    /// only when the pass was clean; `with_error` ones apply regardless.
    pub(crate) fn apply_actions(&mut self, report: &ValidationReport) {
        for action in &report.actions {
            if !(report.is_valid() || action.with_error) {
                continue;
            }
            if let Some(target) = action.goto_step
                && self.step() != target
            {
                debug!(from = self.step(), to = target, "validator requested step change");
                self.push_step();
                self.set_step(target);
            }
        }
    }
}
