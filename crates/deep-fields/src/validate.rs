use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use crate::error::Result;
use crate::node::NodeId;
use crate::schema::FieldKind;
use crate::tree::FieldTree;
use crate::value::is_truthy;

/// Message raised by a failing validator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ValidationFailure {
    pub message: String,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Follow-up requested by a passing validator, resolved by the root once the
/// whole cascade has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto_step: Option<u32>,
    /// Apply even when the cascade reported errors.
    #[serde(default)]
    pub with_error: bool,
}

impl FieldAction {
    pub fn goto_step(step: u32) -> Self {
        Self {
            goto_step: Some(step),
            with_error: false,
        }
    }

    pub fn with_error(mut self) -> Self {
        self.with_error = true;
        self
    }
}

/// Everything a validator may look at. Owned so validators can hold it
/// across their own suspension points.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub node: NodeId,
    pub name: String,
    pub path: Vec<String>,
    pub step: u32,
    pub roles: Vec<String>,
    /// Scalar value, or the unfiltered subtree value for objects and arrays.
    pub value: Value,
    /// Unfiltered value of the whole tree when the pass started.
    pub form: Value,
}

pub type ValidatorResult = std::result::Result<Vec<FieldAction>, ValidationFailure>;

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, ctx: &ValidationContext) -> ValidatorResult;
}

pub type SharedValidator = Arc<dyn Validator>;

struct FnValidator<F>(F);

#[async_trait]
impl<F, Fut> Validator for FnValidator<F>
where
    F: Fn(ValidationContext) -> Fut + Send + Sync,
    Fut: Future<Output = ValidatorResult> + Send,
{
    async fn validate(&self, ctx: &ValidationContext) -> ValidatorResult {
        (self.0)(ctx.clone()).await
    }
}

/// Adapts an async closure into a [`Validator`].
pub fn validator_fn<F, Fut>(f: F) -> impl Validator
where
    F: Fn(ValidationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ValidatorResult> + Send + 'static,
{
    FnValidator(f)
}

struct SyncValidator<F>(F);

#[async_trait]
impl<F> Validator for SyncValidator<F>
where
    F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync,
{
    async fn validate(&self, ctx: &ValidationContext) -> ValidatorResult {
        (self.0)(&ctx.value)
            .map(|()| Vec::new())
            .map_err(ValidationFailure::new)
    }
}

/// Adapts a plain value check into a [`Validator`].
pub fn sync_validator<F>(f: F) -> impl Validator
where
    F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
{
    SyncValidator(f)
}

struct Required {
    message: String,
}

#[async_trait]
impl Validator for Required {
    async fn validate(&self, ctx: &ValidationContext) -> ValidatorResult {
        if is_truthy(&ctx.value) {
            Ok(Vec::new())
        } else {
            Err(ValidationFailure::new(self.message.clone()))
        }
    }
}

/// One surfaced failure from a cascade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub node: NodeId,
    pub path: String,
    pub error: ValidationFailure,
}

/// Outcome of a cascade: surfaced failures plus the queued actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub issues: Vec<FieldIssue>,
    pub actions: Vec<FieldAction>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

struct PipelineOutcome {
    failure: Option<ValidationFailure>,
    actions: Vec<FieldAction>,
}

impl FieldTree {
    /// Required-validator first, then the declared ones.
    fn pipeline(&self, id: NodeId) -> Vec<SharedValidator> {
        let node = &self[id];
        let mut validators: Vec<SharedValidator> = Vec::with_capacity(node.validators.len() + 1);
        let null_bypass = self.options.null_skips_required
            && node.kind == FieldKind::Scalar
            && node.gate.allow_set_null
            && node.state.value.is_null();
        if node.config.req && !null_bypass {
            validators.push(Arc::new(Required {
                message: self.options.req_error_text.clone(),
            }));
        }
        validators.extend(node.validators.iter().cloned());
        validators
    }

    fn context(&self, id: NodeId, form: &Value) -> ValidationContext {
        let node = &self[id];
        let value = match node.kind {
            FieldKind::Scalar => node.state.value.clone(),
            FieldKind::Object | FieldKind::Array => self.collect(id, false),
        };
        ValidationContext {
            node: id,
            name: node.name.clone(),
            path: node.path.clone(),
            step: node.step,
            roles: self.options.user_roles.clone(),
            value,
            form: form.clone(),
        }
    }

    async fn run_pipeline(&self, id: NodeId, form: &Value) -> PipelineOutcome {
        let validators = self.pipeline(id);
        let mut actions = Vec::new();
        if validators.is_empty() {
            return PipelineOutcome {
                failure: None,
                actions,
            };
        }
        let ctx = self.context(id, form);
        for validator in validators {
            match validator.validate(&ctx).await {
                Ok(found) => actions.extend(found),
                Err(failure) => {
                    return PipelineOutcome {
                        failure: Some(failure),
                        actions,
                    };
                }
            }
        }
        PipelineOutcome {
            failure: None,
            actions,
        }
    }

    /// Runs the node's pipeline without touching state or gating.
    pub async fn force_validate(&self, id: NodeId) -> Result<Option<ValidationFailure>> {
        self.node(id)?;
        let form = self.full_value();
        Ok(self.run_pipeline(id, &form).await.failure)
    }

    /// Validates one node, storing or clearing its error.
    ///
    /// Returns the surfaced failure; skipped and silent nodes always return `None`.
    pub async fn validate(
        &mut self,
        id: NodeId,
        skip_notify: bool,
    ) -> Result<Option<ValidationFailure>> {
        self.node(id)?;
        let form = self.full_value();
        Ok(self.validate_node(id, skip_notify, &form, None).await)
    }

    pub(crate) async fn validate_node(
        &mut self,
        id: NodeId,
        skip_notify: bool,
        form: &Value,
        actions: Option<&mut Vec<FieldAction>>,
    ) -> Option<ValidationFailure> {
        if self[id].gate.skip_validate {
            trace!(path = %self[id].path_str, "validation skipped");
            return None;
        }

        let outcome = self.run_pipeline(id, form).await;
        if let Some(actions) = actions {
            actions.extend(outcome.actions);
        }

        let node = &mut self[id];
        match outcome.failure {
            Some(failure) if node.gate.silent_validate => {
                debug!(path = %node.path_str, error = %failure, "silent validation failure swallowed");
                let changed = node.state.error.take().is_some();
                if changed && !skip_notify {
                    self.notify(id);
                }
                None
            }
            Some(failure) => {
                trace!(path = %node.path_str, error = %failure, "validation failed");
                node.state.error = Some(failure.clone());
                if !skip_notify {
                    self.notify(id);
                }
                Some(failure)
            }
            None => {
                let changed = node.state.error.take().is_some();
                if changed && !skip_notify {
                    self.notify(id);
                }
                None
            }
        }
    }

    /// Pre-order cascade over the subtree rooted at `start`, strictly sequential.
    pub(crate) async fn cascade(&mut self, start: NodeId, skip_notify: bool) -> ValidationReport {
        let form = self.full_value();
        let mut report = ValidationReport::default();
        for id in self.preorder(start) {
            if let Some(error) = self
                .validate_node(id, skip_notify, &form, Some(&mut report.actions))
                .await
            {
                report.issues.push(FieldIssue {
                    node: id,
                    path: self[id].path_str.clone(),
                    error,
                });
            }
        }
        report
    }

    /// Validates the whole tree, then resolves queued step actions at the root.
    pub async fn validate_all(&mut self, skip_notify: bool) -> Vec<FieldIssue> {
        let report = self.cascade(self.root, skip_notify).await;
        self.apply_actions(&report);
        report.issues
    }

    /// Validates a subtree and returns its report; queued actions are left to
    /// the caller.
    pub async fn validate_subtree(
        &mut self,
        id: NodeId,
        skip_notify: bool,
    ) -> Result<ValidationReport> {
        self.node(id)?;
        Ok(self.cascade(id, skip_notify).await)
    }

    /// True if this node or any descendant holds a stored error.
    pub fn has_errors(&self, id: NodeId) -> Result<bool> {
        self.node(id)?;
        Ok(self
            .preorder(id)
            .into_iter()
            .any(|node| self[node].state.error.is_some()))
    }

    /// Runs queued initial validations.
    pub(crate) async fn run_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let form = self.full_value();
        while let Some(id) = self.pending.pop_front() {
            if self.contains(id) {
                self.validate_node(id, false, &form, None).await;
            }
        }
    }

    /// Completes construction: immediate initial validations first, then,
    /// after yielding to the scheduler once, the deferred ones.
    pub async fn settle(&mut self) {
        self.run_pending().await;
        if self.deferred.is_empty() {
            return;
        }
        tokio::task::yield_now().await;
        let form = self.full_value();
        while let Some(id) = self.deferred.pop_front() {
            if self.contains(id) {
                self.validate_node(id, false, &form, None).await;
            }
        }
    }
}
