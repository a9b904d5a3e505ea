//! Generic graph visitor, load side.
//!
//! Mirrors the writer: walks a component document guided by the
//! property schema and rebuilds typed state. Anything reference-shaped
//! goes through the resolver; a scene-local id that is not
//! materialized yet is recorded as a pending patch for the caller to
//! queue, and the slot holds null until the flush fills it in.
//!
//! Recoverable problems (bad scalar shapes, unknown document keys,
//! unknown nested types) are logged and the affected slot keeps its
//! default. Only structural failures and version mismatches abort.

use serde_json::Value as Json;

use crate::context::LoadContext;
use crate::error::LoadError;
use crate::graph::Component;
use crate::paths::PathSeg;
use crate::reference::{LiveRef, Reference};
use crate::resolver::{from_reference, Resolution};
use crate::schema::{PropertyKind, Schema};
use crate::value::{coerce_scalar, ObjectValue, Value};
use crate::writer::{ELEMENTS_KEY, JSON_STRING_KEY, TYPE_KEY, VERSION_KEY};

/// A reference slot that could not resolve yet: the path of the slot
/// inside the component state, and the scene-local id it waits for.
#[derive(Debug)]
pub struct PendingRef {
    pub path: Vec<PathSeg>,
    pub scene_id: i32,
}

/// Deserializes one component document.
///
/// An unknown `$type` produces a missing-type placeholder that keeps
/// the original document; everything else produces typed state plus
/// the pending reference patches the caller must queue.
pub fn read_component(
    ctx: &LoadContext<'_>,
    doc: &Json,
) -> Result<(Component, Vec<PendingRef>), LoadError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| LoadError::Malformed("component document is not an object".into()))?;
    let type_name = obj
        .get(TYPE_KEY)
        .and_then(Json::as_str)
        .ok_or_else(|| LoadError::Malformed("component document has no $type".into()))?;

    let Some(schema) = ctx.registry.schema_of(type_name) else {
        log::warn!("unknown component type '{type_name}'; preserving raw document");
        return Ok((Component::missing(type_name, preserved_document(obj)), Vec::new()));
    };

    check_version(schema, obj)?;

    let mut state = ctx
        .registry
        .default_state(type_name)
        .unwrap_or_else(|| ObjectValue::new(type_name));
    let mut pending = Vec::new();
    let mut path = Vec::new();
    read_into_state(ctx, schema, &mut state, obj, &mut pending, &mut path)?;
    run_after_load(schema, &mut state);

    Ok((Component::from_state(state), pending))
}

/// Restores the original document from a placeholder wrapper, or keeps
/// the document itself when it is not a wrapper. This is what makes a
/// placeholder byte-stable across repeated round trips.
///
/// A wrapper holds exactly the type tag plus the preserved text, and
/// the preserved document carries the same tag. A component that
/// merely has a field spelled like the preserved-text key fails that
/// check and is kept verbatim.
fn preserved_document(obj: &serde_json::Map<String, Json>) -> Json {
    if obj.len() == 2 {
        if let Some(inner) = obj.get(JSON_STRING_KEY).and_then(Json::as_str) {
            if let Ok(parsed) = serde_json::from_str::<Json>(inner) {
                if parsed.get(TYPE_KEY) == obj.get(TYPE_KEY) {
                    return parsed;
                }
            }
        }
    }
    Json::Object(obj.clone())
}

fn check_version(schema: &Schema, obj: &serde_json::Map<String, Json>) -> Result<(), LoadError> {
    let Some(expected) = schema.format_version else {
        return Ok(());
    };
    let found = obj.get(VERSION_KEY).and_then(Json::as_i64).unwrap_or(0);
    if found != expected {
        return Err(LoadError::ComponentVersion {
            type_name: schema.type_name.clone(),
            found,
            expected,
        });
    }
    Ok(())
}

fn run_after_load(schema: &Schema, state: &mut ObjectValue) {
    if let Some(hook) = schema.after_load {
        if let Err(message) = hook(state) {
            log::warn!("post-load hook failed for '{}': {message}", state.type_name);
        }
    }
}

/// Overlays document fields onto existing state, property by property.
///
/// The state keeps its defaults for anything the document omits, which
/// is also what lets an existing instance be patched in place instead
/// of rebuilt.
pub fn read_into_state(
    ctx: &LoadContext<'_>,
    schema: &Schema,
    state: &mut ObjectValue,
    obj: &serde_json::Map<String, Json>,
    pending: &mut Vec<PendingRef>,
    path: &mut Vec<PathSeg>,
) -> Result<(), LoadError> {
    for (key, token) in obj {
        if key == TYPE_KEY || key == VERSION_KEY {
            continue;
        }
        let Some(property) = schema.property(key) else {
            log::debug!(
                "document key '{key}' not in schema for '{}'; ignored",
                schema.type_name
            );
            continue;
        };
        if property.skip {
            continue;
        }
        path.push(PathSeg::Field(property.name.clone()));
        if property.read_only {
            validate_read_only(ctx, property.kind.clone(), &property.name, state, token, path);
            path.pop();
            continue;
        }
        let value = read_value(ctx, &property.kind, token, pending, path)?;
        path.pop();
        state.set_field(&property.name, value);
    }
    Ok(())
}

/// Read-only properties are checked against the live value and never
/// written; a mismatch is a content problem worth surfacing in the log.
fn validate_read_only(
    ctx: &LoadContext<'_>,
    kind: PropertyKind,
    name: &str,
    state: &ObjectValue,
    token: &Json,
    path: &mut Vec<PathSeg>,
) {
    if matches!(kind, PropertyKind::Reference) {
        return;
    }
    let mut scratch = Vec::new();
    match read_value(ctx, &kind, token, &mut scratch, path) {
        Ok(incoming) => {
            if state.field(name) != Some(&incoming) {
                log::warn!(
                    "read-only property '{name}' on '{}' differs from the document; keeping the live value",
                    state.type_name
                );
            }
        }
        Err(err) => log::warn!("read-only property '{name}' could not be validated: {err}"),
    }
}

/// Deserializes one token according to its declared kind.
pub fn read_value(
    ctx: &LoadContext<'_>,
    kind: &PropertyKind,
    token: &Json,
    pending: &mut Vec<PendingRef>,
    path: &mut Vec<PathSeg>,
) -> Result<Value, LoadError> {
    match kind {
        PropertyKind::Reference => Ok(read_reference(ctx, token, pending, path)),
        PropertyKind::Scalar(scalar) => {
            let wide = match token {
                Json::Bool(b) => Value::Bool(*b),
                Json::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Value::I64(i)
                    } else {
                        Value::F64(n.as_f64().unwrap_or(0.0))
                    }
                }
                Json::String(s) => Value::String(s.clone()),
                Json::Null => return Ok(Value::default_for(*scalar)),
                other => {
                    log::warn!(
                        "scalar slot holds {}; keeping default",
                        json_kind_name(other)
                    );
                    return Ok(Value::default_for(*scalar));
                }
            };
            match coerce_scalar(&wide, *scalar) {
                Ok(value) => Ok(value),
                Err(message) => {
                    log::warn!("scalar coercion failed: {message}; keeping default");
                    Ok(Value::default_for(*scalar))
                }
            }
        }
        PropertyKind::Object(declared) => read_object(ctx, declared, token, pending, path),
        PropertyKind::List(elem) | PropertyKind::Set(elem) => {
            let items = match token {
                Json::Array(items) => items,
                Json::Null => return Ok(Value::List(Vec::new())),
                other => {
                    return Err(LoadError::Malformed(format!(
                        "expected array, found {}",
                        json_kind_name(other)
                    )))
                }
            };
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(PathSeg::Index(index));
                out.push(read_value(ctx, elem, item, pending, path)?);
                path.pop();
            }
            Ok(Value::List(out))
        }
        PropertyKind::Map(key_kind, value_kind) => read_map(ctx, key_kind, value_kind, token, pending, path),
    }
}

fn read_reference(
    ctx: &LoadContext<'_>,
    token: &Json,
    pending: &mut Vec<PendingRef>,
    path: &mut Vec<PathSeg>,
) -> Value {
    let Some(reference) = Reference::from_json(token) else {
        if !token.is_null() {
            log::warn!("reference slot holds a non-reference token; treating as null");
        }
        return Value::Ref(LiveRef::Null);
    };
    match from_reference(&reference, ctx) {
        Resolution::Immediate(live) => Value::Ref(live),
        Resolution::Deferred(scene_id) => {
            pending.push(PendingRef {
                path: path.clone(),
                scene_id,
            });
            Value::Ref(LiveRef::Null)
        }
    }
}

fn read_object(
    ctx: &LoadContext<'_>,
    declared: &str,
    token: &Json,
    pending: &mut Vec<PendingRef>,
    path: &mut Vec<PathSeg>,
) -> Result<Value, LoadError> {
    let obj = match token {
        Json::Null => return Ok(Value::Null),
        Json::Object(obj) => obj,
        other => {
            return Err(LoadError::Malformed(format!(
                "expected object for '{declared}', found {}",
                json_kind_name(other)
            )))
        }
    };

    // Container wrapper: a polymorphic slot that held a list on save.
    if let Some(Json::Array(elements)) = obj.get(ELEMENTS_KEY) {
        let mut out = Vec::with_capacity(elements.len());
        for (index, item) in elements.iter().enumerate() {
            path.push(PathSeg::Index(index));
            out.push(read_untyped(ctx, item, pending, path));
            path.pop();
        }
        return Ok(Value::List(out));
    }

    let concrete = obj
        .get(TYPE_KEY)
        .and_then(Json::as_str)
        .unwrap_or(declared);
    let Some(schema) = ctx.registry.schema_of(concrete) else {
        log::warn!("unknown nested type '{concrete}'; reading untyped");
        let mut untyped = ObjectValue::new(concrete);
        for (key, item) in obj {
            if key == TYPE_KEY {
                continue;
            }
            path.push(PathSeg::Field(key.clone()));
            let value = read_untyped(ctx, item, pending, path);
            path.pop();
            untyped.fields.push((key.clone(), value));
        }
        return Ok(Value::Object(untyped));
    };

    check_version(schema, obj)?;
    let mut state = ctx
        .registry
        .default_state(concrete)
        .unwrap_or_else(|| ObjectValue::new(concrete));
    read_into_state(ctx, schema, &mut state, obj, pending, path)?;
    run_after_load(schema, &mut state);
    Ok(Value::Object(state))
}

fn read_map(
    ctx: &LoadContext<'_>,
    key_kind: &PropertyKind,
    value_kind: &PropertyKind,
    token: &Json,
    pending: &mut Vec<PendingRef>,
    path: &mut Vec<PathSeg>,
) -> Result<Value, LoadError> {
    match token {
        Json::Null => Ok(Value::Map(Vec::new())),
        Json::Object(obj) => {
            let mut entries = Vec::with_capacity(obj.len());
            for (key, item) in obj {
                path.push(PathSeg::Field(key.clone()));
                let value = read_value(ctx, value_kind, item, pending, path)?;
                path.pop();
                entries.push((Value::String(key.clone()), value));
            }
            Ok(Value::Map(entries))
        }
        Json::Array(pairs) => {
            let mut entries = Vec::with_capacity(pairs.len());
            for (index, pair) in pairs.iter().enumerate() {
                let Some([key_token, value_token]) = pair.as_array().map(Vec::as_slice).and_then(
                    |s| <&[Json; 2]>::try_from(s).ok(),
                ) else {
                    return Err(LoadError::Malformed(format!(
                        "map pair {index} is not a two-element array"
                    )));
                };
                let mut scratch = Vec::new();
                let key = read_value(ctx, key_kind, key_token, &mut scratch, path)?;
                if !scratch.is_empty() {
                    log::warn!("map keys cannot hold deferred references; key kept as null");
                }
                path.push(PathSeg::Index(index));
                let value = read_value(ctx, value_kind, value_token, pending, path)?;
                path.pop();
                entries.push((key, value));
            }
            Ok(Value::Map(entries))
        }
        other => Err(LoadError::Malformed(format!(
            "expected map token, found {}",
            json_kind_name(other)
        ))),
    }
}

/// Reads a token with no schema guidance. Reference-shaped objects
/// still resolve; everything else maps structurally.
pub fn read_untyped(
    ctx: &LoadContext<'_>,
    token: &Json,
    pending: &mut Vec<PendingRef>,
    path: &mut Vec<PathSeg>,
) -> Value {
    match token {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else {
                Value::F64(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    path.push(PathSeg::Index(index));
                    let value = read_untyped(ctx, item, pending, path);
                    path.pop();
                    value
                })
                .collect(),
        ),
        Json::Object(obj) => {
            if Reference::looks_like_reference(token) {
                return read_reference(ctx, token, pending, path);
            }
            let type_name = obj.get(TYPE_KEY).and_then(Json::as_str).unwrap_or_default();
            let mut out = ObjectValue::new(type_name);
            for (key, item) in obj {
                if key == TYPE_KEY {
                    continue;
                }
                path.push(PathSeg::Field(key.clone()));
                let value = read_untyped(ctx, item, pending, path);
                path.pop();
                out.fields.push((key.clone(), value));
            }
            Value::Object(out)
        }
    }
}

/// Queues the deferred patches collected while reading a component.
///
/// Each patch resolves its scene-local id against the final identity
/// table and writes the live reference into the slot it was read from.
/// Paths are already canonical, so the flush needs no registry.
pub fn queue_pending(
    graph: &mut crate::graph::SceneGraph,
    ctx: &mut LoadContext<'_>,
    entity: crate::graph::EntityRef,
    pending: Vec<PendingRef>,
) {
    for PendingRef { path, scene_id } in pending {
        ctx.queue.enqueue(
            graph,
            &ctx.identity,
            Box::new(move |graph, identity| {
                let live = match identity.entity_of(scene_id) {
                    Some(target) => LiveRef::Entity(target),
                    None => {
                        log::warn!("sceneID {scene_id} never materialized; reference stays null");
                        return Ok(());
                    }
                };
                let component = graph
                    .component_mut(entity)
                    .ok_or("patch target component no longer exists")?;
                let state = component
                    .data_mut()
                    .ok_or("patch target component has no typed state")?;
                let slot = crate::paths::navigate_state_mut(state, &path)?;
                *slot = Value::Ref(live);
                Ok(())
            }),
        );
    }
}

fn json_kind_name(token: &Json) -> &'static str {
    match token {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
