use crate::node::{FieldNode, GateFlags, NodeId};
use crate::schema::RoleSteps;
use crate::tree::FieldTree;

fn allowed_at(roles_map: Option<&RoleSteps>, roles: &[String], step: u32) -> bool {
    roles_map.is_some_and(|map| map.allows(roles, step))
}

/// Gating flags for `node` at its current step under the active `roles`.
pub fn evaluate(node: &FieldNode, roles: &[String]) -> GateFlags {
    let step = node.step;
    let static_read_only = node.config.read_only;
    let mut flags = GateFlags {
        allow_set_null: allowed_at(node.set_null_steps.as_ref(), roles, step),
        ..GateFlags::default()
    };

    if let Some(role_and_steps) = &node.role_and_steps {
        let found = role_and_steps.allows(roles, step);
        if allowed_at(node.config.silent_validate.as_ref(), roles, step) {
            flags.silent_validate = true;
            flags.skip_validate = false;
        } else {
            flags.skip_validate = !found;
        }
        flags.skip_value = !found;
        flags.read_only = !found || static_read_only;
    } else if let Some(read_only_steps) = &node.read_only_steps {
        flags.read_only = read_only_steps.allows(roles, step) || static_read_only;
    } else {
        flags.read_only = static_read_only;
    }

    flags
}

impl FieldTree {
    /// Recomputes the node's flags, notifying listeners when any changed.
    pub(crate) fn recompute_gate(&mut self, id: NodeId) -> bool {
        let flags = evaluate(&self[id], &self.options.user_roles);
        let node = &mut self[id];
        if node.gate == flags {
            return false;
        }
        node.gate = flags;
        self.notify(id);
        true
    }
}
