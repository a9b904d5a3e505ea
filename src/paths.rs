//! Override/property path grammar.
//!
//! Paths address a value inside component state: dot-separated field
//! names, with `Array.data[N]` for an element and `Array.size` for a
//! container resize. Examples:
//!
//! - `m_LocalPosition.x`
//! - `items.Array.data[2].name`
//! - `items.Array.size`
//!
//! Field lookups are alias-tolerant through the schema registry, so a
//! path written against `m_Speed` finds a property registered as
//! `speed` with `m_Speed` as an alias.

use std::fmt;

use crate::schema::SchemaRegistry;
use crate::value::{ObjectValue, Value};

/// One parsed path segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSeg {
    Field(String),
    /// `Array.data[N]`
    Index(usize),
    /// `Array.size` — terminal; resizes the container.
    Size,
}

impl fmt::Display for PathSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSeg::Field(name) => write!(f, "{name}"),
            PathSeg::Index(i) => write!(f, "Array.data[{i}]"),
            PathSeg::Size => write!(f, "Array.size"),
        }
    }
}

/// Joins segments back into the serialized path spelling.
pub fn format_path(segments: &[PathSeg]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&seg.to_string());
    }
    out
}

/// Parses a property path into segments.
pub fn parse_path(path: &str) -> Result<Vec<PathSeg>, String> {
    let mut segments = Vec::new();
    let mut tokens = path.split('.').peekable();
    while let Some(token) = tokens.next() {
        if token.is_empty() {
            return Err(format!("empty segment in path '{path}'"));
        }
        if token == "Array" {
            match tokens.next() {
                Some("size") => segments.push(PathSeg::Size),
                Some(data) if data.starts_with("data[") && data.ends_with(']') => {
                    let digits = &data["data[".len()..data.len() - 1];
                    let index: usize = digits
                        .parse()
                        .map_err(|_| format!("bad array index in path '{path}'"))?;
                    segments.push(PathSeg::Index(index));
                }
                _ => return Err(format!("malformed Array segment in path '{path}'")),
            }
        } else {
            segments.push(PathSeg::Field(token.to_owned()));
        }
    }
    if segments.is_empty() {
        return Err("empty property path".into());
    }
    Ok(segments)
}

/// Alias-tolerant mutable field lookup on an object value.
///
/// Tries the literal name first; on a miss, asks the object's schema
/// whether the name is an alias for a canonical property.
pub fn resolve_field_mut<'a>(
    object: &'a mut ObjectValue,
    name: &str,
    registry: &SchemaRegistry,
) -> Option<&'a mut Value> {
    let canonical = canonical_field_name(object, name, registry)?;
    object.field_mut(&canonical)
}

/// Alias-tolerant read-only field lookup.
pub fn resolve_field<'a>(
    object: &'a ObjectValue,
    name: &str,
    registry: &SchemaRegistry,
) -> Option<&'a Value> {
    let canonical = canonical_field_name(object, name, registry)?;
    object.field(&canonical)
}

fn canonical_field_name(
    object: &ObjectValue,
    name: &str,
    registry: &SchemaRegistry,
) -> Option<String> {
    if object.field(name).is_some() {
        return Some(name.to_owned());
    }
    let schema = registry.schema_of(&object.type_name)?;
    let property = schema.property(name)?;
    Some(property.name.clone())
}

/// Navigates to the value addressed by `path` inside `root`.
///
/// `Size` segments are not navigable (they denote a resize, not a
/// location) and produce an error; callers handle them before calling.
pub fn navigate_mut<'a>(
    root: &'a mut Value,
    path: &[PathSeg],
    registry: &SchemaRegistry,
) -> Result<&'a mut Value, String> {
    let mut current = root;
    for seg in path {
        current = match seg {
            PathSeg::Field(name) => match current {
                Value::Object(obj) => {
                    let ty = obj_type(obj).to_owned();
                    resolve_field_mut(obj, name, registry)
                        .ok_or_else(|| format!("no field '{name}' on '{ty}'"))?
                }
                Value::Map(entries) => entries
                    .iter_mut()
                    .find(|(k, _)| k.as_str() == Some(name.as_str()))
                    .map(|(_, v)| v)
                    .ok_or_else(|| format!("no map key '{name}'"))?,
                other => {
                    return Err(format!(
                        "cannot descend into {} with field '{name}'",
                        other.kind_name()
                    ))
                }
            },
            PathSeg::Index(index) => match current {
                Value::List(items) => items
                    .get_mut(*index)
                    .ok_or_else(|| format!("array index {index} out of range"))?,
                other => {
                    return Err(format!(
                        "cannot index into {} with [{index}]",
                        other.kind_name()
                    ))
                }
            },
            PathSeg::Size => return Err("size segment is not a location".into()),
        };
    }
    Ok(current)
}

/// Read-only counterpart of [`navigate_mut`].
pub fn navigate<'a>(
    root: &'a Value,
    path: &[PathSeg],
    registry: &SchemaRegistry,
) -> Result<&'a Value, String> {
    let mut current = root;
    for seg in path {
        current = match seg {
            PathSeg::Field(name) => match current {
                Value::Object(obj) => resolve_field(obj, name, registry)
                    .ok_or_else(|| format!("no field '{name}' on '{ty}'", ty = obj_type(obj)))?,
                Value::Map(entries) => entries
                    .iter()
                    .find(|(k, _)| k.as_str() == Some(name.as_str()))
                    .map(|(_, v)| v)
                    .ok_or_else(|| format!("no map key '{name}'"))?,
                other => {
                    return Err(format!(
                        "cannot descend into {} with field '{name}'",
                        other.kind_name()
                    ))
                }
            },
            PathSeg::Index(index) => match current {
                Value::List(items) => items
                    .get(*index)
                    .ok_or_else(|| format!("array index {index} out of range"))?,
                other => {
                    return Err(format!(
                        "cannot index into {} with [{index}]",
                        other.kind_name()
                    ))
                }
            },
            PathSeg::Size => return Err("size segment is not a location".into()),
        };
    }
    Ok(current)
}

/// Structural navigation without alias resolution, for paths already
/// spelled with canonical property names (deferred patches canonicalize
/// before queuing, so the flush never needs the registry).
pub fn navigate_plain_mut<'a>(
    root: &'a mut Value,
    path: &[PathSeg],
) -> Result<&'a mut Value, String> {
    let mut current = root;
    for seg in path {
        current = match seg {
            PathSeg::Field(name) => match current {
                Value::Object(obj) => obj
                    .field_mut(name)
                    .ok_or_else(|| format!("no field '{name}'"))?,
                Value::Map(entries) => entries
                    .iter_mut()
                    .find(|(k, _)| k.as_str() == Some(name.as_str()))
                    .map(|(_, v)| v)
                    .ok_or_else(|| format!("no map key '{name}'"))?,
                other => {
                    return Err(format!(
                        "cannot descend into {} with field '{name}'",
                        other.kind_name()
                    ))
                }
            },
            PathSeg::Index(index) => match current {
                Value::List(items) => items
                    .get_mut(*index)
                    .ok_or_else(|| format!("array index {index} out of range"))?,
                other => {
                    return Err(format!(
                        "cannot index into {} with [{index}]",
                        other.kind_name()
                    ))
                }
            },
            PathSeg::Size => return Err("size segment is not a location".into()),
        };
    }
    Ok(current)
}

/// Navigates from component state: the first segment names a state
/// field, the rest descend structurally.
pub fn navigate_state_mut<'a>(
    state: &'a mut ObjectValue,
    path: &[PathSeg],
) -> Result<&'a mut Value, String> {
    let Some((first, rest)) = path.split_first() else {
        return Err("empty property path".into());
    };
    let PathSeg::Field(name) = first else {
        return Err("state path must start with a field".into());
    };
    let root = state
        .field_mut(name)
        .ok_or_else(|| format!("no field '{name}' on component state"))?;
    navigate_plain_mut(root, rest)
}

fn obj_type(obj: &ObjectValue) -> &str {
    if obj.type_name.is_empty() {
        "<anonymous>"
    } else {
        &obj.type_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropertyKind, PropertySchema, Schema};
    use crate::value::ScalarKind;

    #[test]
    fn parse_plain_fields() {
        assert_eq!(
            parse_path("m_LocalPosition.x").unwrap(),
            vec![
                PathSeg::Field("m_LocalPosition".into()),
                PathSeg::Field("x".into())
            ]
        );
    }

    #[test]
    fn parse_array_segments() {
        assert_eq!(
            parse_path("items.Array.data[2].name").unwrap(),
            vec![
                PathSeg::Field("items".into()),
                PathSeg::Index(2),
                PathSeg::Field("name".into())
            ]
        );
        assert_eq!(
            parse_path("items.Array.size").unwrap(),
            vec![PathSeg::Field("items".into()), PathSeg::Size]
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("items.Array").is_err());
        assert!(parse_path("items.Array.data[x]").is_err());
    }

    #[test]
    fn format_round_trips() {
        for path in ["a.b", "items.Array.data[3].x", "items.Array.size"] {
            assert_eq!(format_path(&parse_path(path).unwrap()), path);
        }
    }

    #[test]
    fn navigate_with_alias() {
        let mut registry = SchemaRegistry::new();
        registry.register(Schema::new("Widget").prop(
            PropertySchema::new("speed", PropertyKind::Scalar(ScalarKind::F32)).alias("m_Speed"),
        ));

        let mut state = registry.default_state("Widget").unwrap();
        state.set_field("speed", Value::F64(2.0));
        let mut root = Value::Object(state);

        let path = parse_path("m_Speed").unwrap();
        let slot = navigate_mut(&mut root, &path, &registry).unwrap();
        assert_eq!(*slot, Value::F64(2.0));
    }

    #[test]
    fn navigate_mut_reports_missing_field_with_type() {
        let registry = SchemaRegistry::new();
        let mut root = Value::Object(ObjectValue::new("Widget"));
        let path = parse_path("nope").unwrap();
        let err = navigate_mut(&mut root, &path, &registry).unwrap_err();
        assert!(err.contains("nope"));
        assert!(err.contains("Widget"));
    }

    #[test]
    fn navigate_list_element() {
        let registry = SchemaRegistry::new();
        let mut root = Value::Object(ObjectValue {
            type_name: "Holder".into(),
            fields: vec![(
                "items".into(),
                Value::List(vec![Value::I64(1), Value::I64(2)]),
            )],
        });

        let path = parse_path("items.Array.data[1]").unwrap();
        assert_eq!(
            navigate(&root, &path, &registry).unwrap(),
            &Value::I64(2)
        );
        let slot = navigate_mut(&mut root, &path, &registry).unwrap();
        *slot = Value::I64(9);
        let path0 = parse_path("items.Array.data[0]").unwrap();
        assert_eq!(navigate(&root, &path0, &registry).unwrap(), &Value::I64(1));
    }
}
