//! Type schemas and the schema registry.
//!
//! A [`Schema`] is the ordered property description of one serializable
//! type. In the full pipeline these are emitted by a build-time codegen
//! step; the engine only consumes them through [`SchemaRegistry`], so
//! tests (and hosts without codegen) can register schemas by hand.
//!
//! Property lookup is alias-tolerant: a schema can list former names and
//! alternate spellings (`m_Foo` next to `foo`) and override paths
//! written against either spelling resolve to the same property. This is
//! deliberately a lookup table, not a string transform.

use std::collections::HashMap;

use crate::value::{ObjectValue, ScalarKind, Value};

/// The closed set of container shapes the visitor understands.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyKind {
    Scalar(ScalarKind),
    /// A reference slot (entity or external content).
    Reference,
    /// A nested object of the declared type.
    Object(String),
    List(Box<PropertyKind>),
    /// Unordered collection; serialized as a deterministically ordered array.
    Set(Box<PropertyKind>),
    /// Key/value map. String-keyed maps serialize as JSON objects,
    /// anything else as an array of pairs.
    Map(Box<PropertyKind>, Box<PropertyKind>),
}

impl PropertyKind {
    pub fn object(type_name: impl Into<String>) -> Self {
        PropertyKind::Object(type_name.into())
    }

    pub fn list(elem: PropertyKind) -> Self {
        PropertyKind::List(Box::new(elem))
    }

    pub fn set(elem: PropertyKind) -> Self {
        PropertyKind::Set(Box::new(elem))
    }

    pub fn map(key: PropertyKind, value: PropertyKind) -> Self {
        PropertyKind::Map(Box::new(key), Box::new(value))
    }
}

/// One named, typed property of a schema.
#[derive(Clone, Debug)]
pub struct PropertySchema {
    pub name: String,
    /// Former names and alternate spellings accepted on lookup.
    pub aliases: Vec<String>,
    pub kind: PropertyKind,
    /// Read-only properties are validated during load, never written.
    pub read_only: bool,
    /// Excluded from serialization entirely.
    pub skip: bool,
}

impl PropertySchema {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            kind,
            read_only: false,
            skip: false,
        }
    }

    pub fn alias(mut self, name: impl Into<String>) -> Self {
        self.aliases.push(name.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Whether `name` matches this property's name or any alias.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}

/// A hook invoked on component state around save/load. Failures are
/// logged by the caller and never abort the operation.
pub type StateHook = fn(&mut ObjectValue) -> Result<(), String>;

/// Ordered property description of a serializable type.
#[derive(Clone)]
pub struct Schema {
    pub type_name: String,
    pub properties: Vec<PropertySchema>,
    /// Composite value types (vectors, quaternions, colors) whose
    /// overrides expand to one entry per scalar sub-component.
    pub composite: bool,
    /// Sibling component types this type must be ordered after.
    pub requires: Vec<String>,
    /// Per-type format version; a document mismatch is a hard failure
    /// for the subtree carrying the component.
    pub format_version: Option<i64>,
    pub before_save: Option<StateHook>,
    pub after_load: Option<StateHook>,
}

impl Schema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: Vec::new(),
            composite: false,
            requires: Vec::new(),
            format_version: None,
            before_save: None,
            after_load: None,
        }
    }

    pub fn prop(mut self, property: PropertySchema) -> Self {
        self.properties.push(property);
        self
    }

    pub fn composite(mut self) -> Self {
        self.composite = true;
        self
    }

    pub fn requires(mut self, sibling_type: impl Into<String>) -> Self {
        self.requires.push(sibling_type.into());
        self
    }

    pub fn version(mut self, version: i64) -> Self {
        self.format_version = Some(version);
        self
    }

    pub fn before_save(mut self, hook: StateHook) -> Self {
        self.before_save = Some(hook);
        self
    }

    pub fn after_load(mut self, hook: StateHook) -> Self {
        self.after_load = Some(hook);
        self
    }

    /// Alias-tolerant property lookup.
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.matches(name))
    }

    /// Whether this type carries an ordering dependency on a sibling.
    pub fn has_ordering_dependency(&self) -> bool {
        !self.requires.is_empty()
    }
}

/// Maps runtime type names to their schemas.
///
/// Inherited properties are flattened at registration time via
/// [`register_extending`](Self::register_extending), so lookups never
/// walk a base-type chain.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, replacing any previous one of the same name.
    pub fn register(&mut self, schema: Schema) {
        self.schemas.insert(schema.type_name.clone(), schema);
    }

    /// Registers `schema` with the properties of `base_type` prepended.
    ///
    /// This is the flattening step: derived schemas carry their full
    /// property list so dispatch is a single lookup.
    pub fn register_extending(&mut self, base_type: &str, mut schema: Schema) {
        if let Some(base) = self.schemas.get(base_type) {
            let mut merged = base.properties.clone();
            merged.extend(schema.properties.drain(..));
            schema.properties = merged;
        } else {
            log::warn!(
                "base schema '{base_type}' not registered; '{}' keeps its own properties only",
                schema.type_name
            );
        }
        self.register(schema);
    }

    pub fn schema_of(&self, type_name: &str) -> Option<&Schema> {
        self.schemas.get(type_name)
    }

    /// Constructs fresh component state with editor-visible defaults.
    ///
    /// Reference slots default to null; nested objects recurse into
    /// their own schema; containers start empty.
    pub fn default_state(&self, type_name: &str) -> Option<ObjectValue> {
        let schema = self.schema_of(type_name)?;
        let mut state = ObjectValue::new(schema.type_name.clone());
        for property in &schema.properties {
            state
                .fields
                .push((property.name.clone(), self.default_value(&property.kind)));
        }
        Some(state)
    }

    /// The default value for a declared property kind.
    pub fn default_value(&self, kind: &PropertyKind) -> Value {
        match kind {
            PropertyKind::Scalar(scalar) => Value::default_for(*scalar),
            PropertyKind::Reference => Value::Ref(crate::reference::LiveRef::Null),
            PropertyKind::Object(type_name) => match self.default_state(type_name) {
                Some(state) => Value::Object(state),
                None => Value::Null,
            },
            PropertyKind::List(_) | PropertyKind::Set(_) => Value::List(Vec::new()),
            PropertyKind::Map(_, _) => Value::Map(Vec::new()),
        }
    }
}
