//! Format-agnostic intermediate value representation.
//!
//! [`Value`] is the in-memory shape of everything the engine persists:
//! component property state, override payloads, and the scratch values
//! built up during load. The writer and reader convert between `Value`
//! and JSON tokens; the prefab module diffs `Value` trees.
//!
//! Numeric state is stored wide (`i64` / `f64`). Narrowing back to a
//! declared scalar kind goes through [`coerce_scalar`] so that an
//! override captured as a 64-bit integer can be applied to a 32-bit
//! field without a lossy direct cast slipping through unnoticed.

use std::fmt;

use crate::reference::LiveRef;

/// The scalar kinds a property schema can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    I32,
    I64,
    F32,
    F64,
    Char,
    String,
    /// Enum values are stored as their wide integer discriminant.
    Enum,
}

/// A typed object value: a concrete type name plus ordered fields.
///
/// The type name is what the writer compares against the statically
/// declared type to decide whether a `$type` tag must be emitted.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectValue {
    pub type_name: String,
    pub fields: Vec<(String, Value)>,
}

impl ObjectValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Returns the field value for `name`, if present.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Replaces the field if it exists, appends it otherwise.
    ///
    /// Field order is preserved for existing fields so that repeated
    /// writes keep a stable serialized layout.
    pub fn set_field(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.field_mut(name) {
            *slot = value;
        } else {
            self.fields.push((name.to_owned(), value));
        }
    }
}

/// Format-agnostic value for property state.
///
/// Maps preserve insertion order (`Vec` of pairs rather than a hash
/// map) so save output is deterministic.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    List(Vec<Value>),
    /// A generic key/value map. String keys are the common case; any
    /// other key shape serializes as an array of pairs.
    Map(Vec<(Value, Value)>),
    Object(ObjectValue),
    /// A live reference slot (entity, asset, or null).
    Ref(LiveRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            Value::F64(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            Value::I64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_ref_slot(&self) -> Option<&LiveRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Short tag for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "int",
            Value::F64(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Ref(_) => "reference",
        }
    }

    /// The editor-visible default for a scalar kind.
    pub fn default_for(kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::I32 | ScalarKind::I64 | ScalarKind::Enum => Value::I64(0),
            ScalarKind::F32 | ScalarKind::F64 => Value::F64(0.0),
            ScalarKind::Char | ScalarKind::String => Value::String(String::new()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s:?}"),
            other => write!(f, "<{}>", other.kind_name()),
        }
    }
}

/// Converts a wide value to the declared scalar kind.
///
/// Widening (`i64` → `f64`, `f32` → `f64`) always succeeds. Narrowing
/// checks the range and reports an error instead of wrapping; `f64` to
/// an integer kind truncates toward zero, matching how an editor-side
/// override entry is applied to an integral field.
pub fn coerce_scalar(value: &Value, kind: ScalarKind) -> Result<Value, String> {
    match kind {
        ScalarKind::Bool => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::I64(v) => Ok(Value::Bool(*v != 0)),
            other => Err(format!("expected bool, found {}", other.kind_name())),
        },
        ScalarKind::I32 => {
            let wide = integral_of(value, kind)?;
            if wide < i64::from(i32::MIN) || wide > i64::from(i32::MAX) {
                return Err(format!("value {wide} out of range for 32-bit field"));
            }
            Ok(Value::I64(wide))
        }
        ScalarKind::I64 | ScalarKind::Enum => Ok(Value::I64(integral_of(value, kind)?)),
        ScalarKind::F32 => {
            let wide = float_of(value, kind)?;
            // Stored wide; narrowed through f32 so equality against a
            // live f32 field round-trips.
            Ok(Value::F64(f64::from(wide as f32)))
        }
        ScalarKind::F64 => Ok(Value::F64(float_of(value, kind)?)),
        ScalarKind::Char => match value {
            Value::String(s) if s.chars().count() == 1 => Ok(Value::String(s.clone())),
            Value::String(s) => Err(format!("expected single character, found {s:?}")),
            other => Err(format!("expected char, found {}", other.kind_name())),
        },
        ScalarKind::String => match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(format!("expected string, found {}", other.kind_name())),
        },
    }
}

fn integral_of(value: &Value, kind: ScalarKind) -> Result<i64, String> {
    match value {
        Value::I64(v) => Ok(*v),
        Value::F64(v) => Ok(v.trunc() as i64),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(format!(
            "expected {kind:?}, found {}",
            other.kind_name()
        )),
    }
}

fn float_of(value: &Value, kind: ScalarKind) -> Result<f64, String> {
    match value {
        Value::F64(v) => Ok(*v),
        Value::I64(v) => Ok(*v as f64),
        other => Err(format!(
            "expected {kind:?}, found {}",
            other.kind_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_set_field_replaces_in_place() {
        let mut obj = ObjectValue::new("Vec3");
        obj.set_field("x", Value::F64(1.0));
        obj.set_field("y", Value::F64(2.0));
        obj.set_field("x", Value::F64(9.0));

        assert_eq!(obj.fields.len(), 2);
        assert_eq!(obj.fields[0].0, "x");
        assert_eq!(obj.field("x"), Some(&Value::F64(9.0)));
    }

    #[test]
    fn coerce_widens_int_to_float() {
        let out = coerce_scalar(&Value::I64(3), ScalarKind::F64).unwrap();
        assert_eq!(out, Value::F64(3.0));
    }

    #[test]
    fn coerce_narrows_i64_to_i32_with_range_check() {
        assert_eq!(
            coerce_scalar(&Value::I64(42), ScalarKind::I32).unwrap(),
            Value::I64(42)
        );
        assert!(coerce_scalar(&Value::I64(i64::MAX), ScalarKind::I32).is_err());
    }

    #[test]
    fn coerce_float_to_int_truncates() {
        assert_eq!(
            coerce_scalar(&Value::F64(3.9), ScalarKind::I64).unwrap(),
            Value::I64(3)
        );
    }

    #[test]
    fn coerce_f64_to_f32_narrows_through_f32() {
        let out = coerce_scalar(&Value::F64(0.1), ScalarKind::F32).unwrap();
        assert_eq!(out, Value::F64(f64::from(0.1f64 as f32)));
    }

    #[test]
    fn default_values_match_editor_defaults() {
        assert_eq!(Value::default_for(ScalarKind::Bool), Value::Bool(false));
        assert_eq!(Value::default_for(ScalarKind::I32), Value::I64(0));
        assert_eq!(Value::default_for(ScalarKind::F32), Value::F64(0.0));
        assert_eq!(
            Value::default_for(ScalarKind::String),
            Value::String(String::new())
        );
    }
}
