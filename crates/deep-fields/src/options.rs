use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_REQ_ERROR_TEXT: &str = "This field is required";

/// Construction-time options shared by every node of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldOptions {
    /// Message reported by the required-validator.
    pub req_error_text: String,
    /// Suppresses initial and deferred validation during construction.
    pub server_side: bool,
    /// Active role set used for step gating.
    pub user_roles: Vec<String>,
    /// When set, a null value on a node that may be explicitly nulled
    /// bypasses the required-validator.
    pub null_skips_required: bool,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            req_error_text: DEFAULT_REQ_ERROR_TEXT.to_string(),
            server_side: false,
            user_roles: Vec::new(),
            null_skips_required: false,
        }
    }
}

impl FieldOptions {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn server_side(mut self, server_side: bool) -> Self {
        self.server_side = server_side;
        self
    }

    pub fn with_req_error_text(mut self, text: impl Into<String>) -> Self {
        self.req_error_text = text.into();
        self
    }

    pub fn with_null_skips_required(mut self, enabled: bool) -> Self {
        self.null_skips_required = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_options_fill_missing_keys_with_defaults() {
        let options = FieldOptions::from_toml_str(
            r#"
            userRoles = ["editor", "viewer"]
            serverSide = true
            "#,
        )
        .expect("options should parse");
        assert_eq!(options.user_roles, vec!["editor", "viewer"]);
        assert!(options.server_side);
        assert_eq!(options.req_error_text, DEFAULT_REQ_ERROR_TEXT);
        assert!(!options.null_skips_required);
    }

    #[test]
    fn json_options_override_required_text() {
        let options = FieldOptions::from_json_str(r#"{ "reqErrorText": "fill me" }"#)
            .expect("options should parse");
        assert_eq!(options.req_error_text, "fill me");
        assert!(options.user_roles.is_empty());
    }

    #[test]
    fn malformed_toml_is_reported() {
        let err = FieldOptions::from_toml_str("userRoles = [").expect_err("invalid toml");
        assert!(matches!(err, crate::FieldsError::Toml(_)));
    }
}
