#![allow(missing_docs)]

pub mod collect;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod node;
pub mod observe;
pub mod options;
pub mod schema;
pub mod tree;
pub mod validate;
pub mod value;

pub use error::{FieldsError, Result};
pub use ledger::{StepSnapshot, StepTransition};
pub use node::{ErrorProps, FieldNode, FieldState, GateFlags, NodeId};
pub use observe::{FieldUpdate, Listener, SubscriptionId};
pub use options::{DEFAULT_REQ_ERROR_TEXT, FieldOptions};
pub use schema::{
    ChangeHook, CreateContext, CreateHook, FieldChange, FieldConfig, FieldKind, FieldSchema,
    RoleSteps, json_schema,
};
pub use tree::FieldTree;
pub use validate::{
    FieldAction, FieldIssue, SharedValidator, ValidationContext, ValidationFailure,
    ValidationReport, Validator, ValidatorResult, sync_validator, validator_fn,
};
pub use value::{coerce_date, is_truthy, parse_date};
