use thiserror::Error;

use crate::node::NodeId;

/// Result alias for structural and configuration operations.
pub type Result<T> = std::result::Result<T, FieldsError>;

/// Errors raised by structural misuse of the tree or by loading configuration.
///
/// Validation failures are never reported through this type; they are stored
/// on node state and collected into a [`crate::ValidationReport`].
#[derive(Debug, Error)]
pub enum FieldsError {
    #[error("field '{name}' is not an array")]
    NotArray { name: String },
    #[error("field '{name}' is not a scalar")]
    NotScalar { name: String },
    #[error("field '{name}' has no item [{index}]")]
    NoSuchMember { name: String, index: usize },
    #[error("child not found in array '{name}'")]
    ChildNotFound { name: String },
    #[error("node {id} does not exist in this tree")]
    UnknownNode { id: NodeId },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
