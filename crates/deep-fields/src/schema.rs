use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::node::NodeId;
use crate::validate::{SharedValidator, Validator};

/// Hook run once per node after its subtree exists and before gating.
pub type CreateHook = Arc<dyn Fn(&mut CreateContext<'_>) + Send + Sync>;

/// Hook run after an assigned value has been validated.
pub type ChangeHook = Arc<dyn Fn(&FieldChange<'_>) + Send + Sync>;

/// Shape of a node, decided once from its schema fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar,
    Object,
    Array,
}

/// Steps at which each role is allowed, keyed by role name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RoleSteps(BTreeMap<String, BTreeSet<u32>>);

impl RoleSteps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, role: impl Into<String>, steps: impl IntoIterator<Item = u32>) -> Self {
        self.0.entry(role.into()).or_default().extend(steps);
        self
    }

    /// True when `step` belongs to the union of the steps granted to `roles`.
    pub fn allows(&self, roles: &[String], step: u32) -> bool {
        roles
            .iter()
            .filter_map(|role| self.0.get(role))
            .any(|steps| steps.contains(&step))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Behavioral configuration left on a node once structural keys are stripped.
#[derive(Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(default)]
    pub req: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub read_only: bool,
    /// Roles and steps at which failures are validated but never surfaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silent_validate: Option<RoleSteps>,
    /// Adds the current step to the flat update map.
    #[serde(default)]
    pub use_steps: bool,
    #[serde(skip)]
    pub after_change: Option<ChangeHook>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Debug for FieldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldConfig")
            .field("req", &self.req)
            .field("default_value", &self.default_value)
            .field("read_only", &self.read_only)
            .field("silent_validate", &self.silent_validate)
            .field("use_steps", &self.use_steps)
            .field("after_change", &self.after_change.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

/// Declarative schema fragment for one field and its descendants.
///
/// `Clone` is a deep copy of the declarative part; validators and hooks are
/// shared behind `Arc` and never mutated, so a tree built from a clone can
/// never affect the schema it came from or any sibling tree.
#[derive(Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Scalar subtype tag; `date` coerces raw values through the date parser.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(
        default,
        with = "ordered_props",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<BTreeMap<String, FieldSchema>>")]
    pub props: Option<Vec<(String, FieldSchema)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_item: Option<Box<FieldSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_and_steps: Option<RoleSteps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_steps: Option<RoleSteps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_null_steps: Option<RoleSteps>,
    /// Defers the first validation to the next scheduler turn.
    #[serde(default)]
    pub next_tick_validate: bool,
    #[serde(skip)]
    pub validators: Vec<SharedValidator>,
    #[serde(skip)]
    pub on_create: Option<CreateHook>,
    #[serde(flatten)]
    pub config: FieldConfig,
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("name", &self.name)
            .field("type", &self.type_)
            .field("props", &self.props)
            .field("new_item", &self.new_item)
            .field("role_and_steps", &self.role_and_steps)
            .field("read_only_steps", &self.read_only_steps)
            .field("set_null_steps", &self.set_null_steps)
            .field("next_tick_validate", &self.next_tick_validate)
            .field("validators", &self.validators.len())
            .field("on_create", &self.on_create.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl FieldSchema {
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn date() -> Self {
        Self {
            type_: Some("date".into()),
            ..Self::default()
        }
    }

    pub fn object<I, K>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldSchema)>,
        K: Into<String>,
    {
        Self {
            props: Some(props.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            ..Self::default()
        }
    }

    pub fn array(item: FieldSchema) -> Self {
        Self {
            new_item: Some(Box::new(item)),
            ..Self::default()
        }
    }

    pub fn from_json(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// `newItem` wins over `props`; neither means a scalar.
    pub fn kind(&self) -> FieldKind {
        if self.new_item.is_some() {
            FieldKind::Array
        } else if self.props.is_some() {
            FieldKind::Object
        } else {
            FieldKind::Scalar
        }
    }

    pub fn is_date(&self) -> bool {
        self.type_.as_deref() == Some("date")
    }

    /// Mutable access to a direct child schema of an object fragment.
    pub fn prop_mut(&mut self, key: &str) -> Option<&mut FieldSchema> {
        self.props
            .as_mut()?
            .iter_mut()
            .find(|(name, _)| name == key)
            .map(|(_, schema)| schema)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn typed(mut self, type_: impl Into<String>) -> Self {
        self.type_ = Some(type_.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.config.req = true;
        self
    }

    /// Used when the initial value is absent or `null`; other falsy values
    /// such as `""`, `0` and `false` are kept.
    pub fn default_value(mut self, value: Value) -> Self {
        self.config.default_value = Some(value);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.config.read_only = true;
        self
    }

    pub fn use_steps(mut self) -> Self {
        self.config.use_steps = true;
        self
    }

    pub fn next_tick(mut self) -> Self {
        self.next_tick_validate = true;
        self
    }

    pub fn role_and_steps(mut self, roles: RoleSteps) -> Self {
        self.role_and_steps = Some(roles);
        self
    }

    pub fn read_only_steps(mut self, roles: RoleSteps) -> Self {
        self.read_only_steps = Some(roles);
        self
    }

    pub fn set_null_steps(mut self, roles: RoleSteps) -> Self {
        self.set_null_steps = Some(roles);
        self
    }

    pub fn silent_validate(mut self, roles: RoleSteps) -> Self {
        self.config.silent_validate = Some(roles);
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn shared_validator(mut self, validator: SharedValidator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn on_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut CreateContext<'_>) + Send + Sync + 'static,
    {
        self.on_create = Some(Arc::new(hook));
        self
    }

    pub fn after_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FieldChange<'_>) + Send + Sync + 'static,
    {
        self.config.after_change = Some(Arc::new(hook));
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.extra.insert(key.into(), value);
        self
    }
}

/// View handed to [`CreateHook`]s.
pub struct CreateContext<'a> {
    pub node: NodeId,
    pub name: &'a str,
    pub path: &'a [String],
    pub kind: FieldKind,
    pub step: u32,
    pub config: &'a mut FieldConfig,
    /// Present for scalar nodes only.
    pub value: Option<&'a mut Value>,
}

/// Payload handed to [`ChangeHook`]s.
#[derive(Debug)]
pub struct FieldChange<'a> {
    pub node: NodeId,
    pub path: &'a [String],
    pub value: &'a Value,
}

/// JSON Schema describing the declarative part of [`FieldSchema`].
pub fn json_schema() -> Value {
    let schema = schemars::schema_for!(FieldSchema);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

mod ordered_props {
    use std::fmt;

    use serde::de::{MapAccess, SeqAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::FieldSchema;

    type Props = Vec<(String, FieldSchema)>;

    pub fn serialize<S: Serializer>(props: &Option<Props>, serializer: S) -> Result<S::Ok, S::Error> {
        match props {
            Some(props) => {
                let mut map = serializer.serialize_map(Some(props.len()))?;
                for (key, schema) in props {
                    map.serialize_entry(key, schema)?;
                }
                map.end()
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Props>, D::Error> {
        deserializer.deserialize_any(PropsVisitor)
    }

    struct PropsVisitor;

    impl<'de> Visitor<'de> for PropsVisitor {
        type Value = Option<Props>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map or list of field schemas")
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut props = Vec::new();
            while let Some((key, schema)) = map.next_entry::<String, FieldSchema>()? {
                props.push((key, schema));
            }
            Ok(Some(props))
        }

        // List-shaped props are keyed by position.
        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut props = Vec::new();
            while let Some(schema) = seq.next_element::<FieldSchema>()? {
                props.push((props.len().to_string(), schema));
            }
            Ok(Some(props))
        }
    }
}
