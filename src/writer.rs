//! Generic graph visitor, save side.
//!
//! Walks component state guided by the property schema and emits the
//! JSON token stream. Shape decisions, in order: reference slots go
//! through the resolver; null emits null; a runtime type differing
//! from the declared type gains a `$type` tag; otherwise the schema
//! decides between keyed maps, arrays, and pair arrays.
//!
//! Missing-type placeholders re-emit their preserved document wrapped
//! verbatim, so unknown types survive a full round trip untouched.

use serde_json::{json, Map as JsonMap, Value as Json};

use crate::context::SaveContext;
use crate::error::SaveError;
use crate::graph::{Component, ComponentState, SceneGraph};
use crate::resolver::to_reference;
use crate::schema::{PropertyKind, Schema};
use crate::value::{ObjectValue, ScalarKind, Value};

/// Key carrying the concrete type of a polymorphic object.
pub const TYPE_KEY: &str = "$type";
/// Key carrying a per-type format version.
pub const VERSION_KEY: &str = "$version";
/// Elements key used when a container also needs container-level metadata.
pub const ELEMENTS_KEY: &str = "$elements";
/// Field preserving an unknown component's original document.
pub const JSON_STRING_KEY: &str = "JsonString";

/// Serializes one component into its document.
///
/// Returns `None` when the component has no schema and no preserved
/// document (logged, the rest of the node still saves).
pub fn write_component(
    graph: &SceneGraph,
    ctx: &SaveContext<'_>,
    component: &Component,
) -> Result<Option<Json>, SaveError> {
    match &component.state {
        ComponentState::Missing(missing) => {
            let mut doc = JsonMap::new();
            doc.insert(TYPE_KEY.into(), Json::String(missing.type_name.clone()));
            doc.insert(
                JSON_STRING_KEY.into(),
                Json::String(missing.raw.to_string()),
            );
            Ok(Some(Json::Object(doc)))
        }
        ComponentState::Data(state) => {
            let Some(schema) = ctx.registry.schema_of(&state.type_name) else {
                log::warn!(
                    "no schema for component type '{}'; component skipped on save",
                    state.type_name
                );
                return Ok(None);
            };
            let state = run_before_save(schema, state);

            let mut doc = JsonMap::new();
            doc.insert(TYPE_KEY.into(), Json::String(state.type_name.clone()));
            if let Some(version) = schema.format_version {
                doc.insert(VERSION_KEY.into(), json!(version));
            }
            for property in &schema.properties {
                if property.skip {
                    continue;
                }
                if let Some(field) = state.field(&property.name) {
                    let token = write_value(graph, ctx, field, &property.kind)?;
                    doc.insert(property.name.clone(), token);
                }
            }
            Ok(Some(Json::Object(doc)))
        }
    }
}

/// Runs the pre-save hook on a working copy of the state.
///
/// The hook mutates the copy that gets written, never the live graph.
/// Hook failures are logged and the unhooked copy is written instead.
fn run_before_save(schema: &Schema, state: &ObjectValue) -> ObjectValue {
    let Some(hook) = schema.before_save else {
        return state.clone();
    };
    let mut working = state.clone();
    if let Err(message) = hook(&mut working) {
        log::warn!(
            "pre-save hook failed for '{}': {message}",
            state.type_name
        );
        return state.clone();
    }
    working
}

/// Serializes one value according to its declared kind.
pub fn write_value(
    graph: &SceneGraph,
    ctx: &SaveContext<'_>,
    value: &Value,
    kind: &PropertyKind,
) -> Result<Json, SaveError> {
    match kind {
        PropertyKind::Reference => {
            let live = match value {
                Value::Ref(live) => live.clone(),
                Value::Null => crate::reference::LiveRef::Null,
                other => {
                    return Err(SaveError::InvalidState(format!(
                        "reference slot holds {}",
                        other.kind_name()
                    )))
                }
            };
            Ok(to_reference(&live, graph, ctx).to_json())
        }
        PropertyKind::Scalar(scalar) => write_scalar(value, *scalar),
        PropertyKind::Object(declared) => match value {
            Value::Null => Ok(Json::Null),
            Value::Object(obj) => write_object(graph, ctx, obj, Some(declared)),
            // A polymorphic slot holding a container: wrap so the
            // concrete tag and the elements both survive.
            Value::List(items) => {
                let elements = items
                    .iter()
                    .map(|item| write_untyped(graph, ctx, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(json!({ TYPE_KEY: declared, ELEMENTS_KEY: elements }))
            }
            other => Err(SaveError::InvalidState(format!(
                "object slot '{declared}' holds {}",
                other.kind_name()
            ))),
        },
        PropertyKind::List(elem) => {
            let items = expect_list(value)?;
            let tokens = items
                .iter()
                .map(|item| write_value(graph, ctx, item, elem))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Json::Array(tokens))
        }
        PropertyKind::Set(elem) => {
            let items = expect_list(value)?;
            let mut tokens = items
                .iter()
                .map(|item| write_value(graph, ctx, item, elem))
                .collect::<Result<Vec<_>, _>>()?;
            // Sets have no inherent order; sort the encoded form so
            // save output is deterministic.
            tokens.sort_by_key(|t| t.to_string());
            Ok(Json::Array(tokens))
        }
        PropertyKind::Map(key_kind, value_kind) => {
            let entries = match value {
                Value::Map(entries) => entries,
                Value::Null => return Ok(Json::Null),
                other => {
                    return Err(SaveError::InvalidState(format!(
                        "map slot holds {}",
                        other.kind_name()
                    )))
                }
            };
            if matches!(**key_kind, PropertyKind::Scalar(ScalarKind::String)) {
                let mut doc = JsonMap::new();
                for (k, v) in entries {
                    let key = k.as_str().ok_or_else(|| {
                        SaveError::InvalidState("string-keyed map holds non-string key".into())
                    })?;
                    doc.insert(key.to_owned(), write_value(graph, ctx, v, value_kind)?);
                }
                Ok(Json::Object(doc))
            } else {
                let mut pairs = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    pairs.push(Json::Array(vec![
                        write_value(graph, ctx, k, key_kind)?,
                        write_value(graph, ctx, v, value_kind)?,
                    ]));
                }
                Ok(Json::Array(pairs))
            }
        }
    }
}

fn write_scalar(value: &Value, kind: ScalarKind) -> Result<Json, SaveError> {
    let coerced = crate::value::coerce_scalar(value, kind)
        .map_err(SaveError::InvalidState)?;
    Ok(match coerced {
        Value::Bool(b) => json!(b),
        Value::I64(v) => json!(v),
        Value::F64(v) => json!(v),
        Value::String(s) => json!(s),
        other => {
            return Err(SaveError::InvalidState(format!(
                "scalar coercion produced {}",
                other.kind_name()
            )))
        }
    })
}

fn write_object(
    graph: &SceneGraph,
    ctx: &SaveContext<'_>,
    obj: &ObjectValue,
    declared: Option<&str>,
) -> Result<Json, SaveError> {
    let needs_tag = declared.map(|d| d != obj.type_name).unwrap_or(true);
    match ctx.registry.schema_of(&obj.type_name) {
        Some(schema) => {
            let state = run_before_save(schema, obj);
            let mut doc = JsonMap::new();
            if needs_tag {
                doc.insert(TYPE_KEY.into(), Json::String(state.type_name.clone()));
            }
            for property in &schema.properties {
                if property.skip {
                    continue;
                }
                if let Some(field) = state.field(&property.name) {
                    doc.insert(
                        property.name.clone(),
                        write_value(graph, ctx, field, &property.kind)?,
                    );
                }
            }
            Ok(Json::Object(doc))
        }
        None => {
            // No schema to guide the walk; emit the state as-is so the
            // data still round-trips.
            log::warn!(
                "no schema for nested object type '{}'; writing untyped",
                obj.type_name
            );
            write_untyped(graph, ctx, &Value::Object(obj.clone()))
        }
    }
}

/// Serializes a value with no schema guidance (used for map payloads
/// in untyped positions and schema-less nested objects).
pub fn write_untyped(
    graph: &SceneGraph,
    ctx: &SaveContext<'_>,
    value: &Value,
) -> Result<Json, SaveError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::I64(v) => json!(v),
        Value::F64(v) => json!(v),
        Value::String(s) => json!(s),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|item| write_untyped(graph, ctx, item))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => {
            if entries.iter().all(|(k, _)| k.as_str().is_some()) {
                let mut doc = JsonMap::new();
                for (k, v) in entries {
                    doc.insert(
                        k.as_str().unwrap_or_default().to_owned(),
                        write_untyped(graph, ctx, v)?,
                    );
                }
                Json::Object(doc)
            } else {
                Json::Array(
                    entries
                        .iter()
                        .map(|(k, v)| {
                            Ok(Json::Array(vec![
                                write_untyped(graph, ctx, k)?,
                                write_untyped(graph, ctx, v)?,
                            ]))
                        })
                        .collect::<Result<Vec<_>, SaveError>>()?,
                )
            }
        }
        Value::Object(obj) => {
            let mut doc = JsonMap::new();
            doc.insert(TYPE_KEY.into(), Json::String(obj.type_name.clone()));
            for (name, field) in &obj.fields {
                doc.insert(name.clone(), write_untyped(graph, ctx, field)?);
            }
            Json::Object(doc)
        }
        Value::Ref(live) => to_reference(live, graph, ctx).to_json(),
    })
}

fn expect_list(value: &Value) -> Result<&[Value], SaveError> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(SaveError::InvalidState(format!(
            "expected list state, found {}",
            other.kind_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetPack;
    use crate::graph::EntityRef;
    use crate::reference::{ContentId, LiveRef};
    use crate::schema::{PropertySchema, SchemaRegistry};

    fn fixture() -> (SchemaRegistry, AssetPack) {
        let mut registry = SchemaRegistry::new();
        registry.register(
            Schema::new("Vector3")
                .composite()
                .prop(PropertySchema::new(
                    "x",
                    PropertyKind::Scalar(ScalarKind::F32),
                ))
                .prop(PropertySchema::new(
                    "y",
                    PropertyKind::Scalar(ScalarKind::F32),
                ))
                .prop(PropertySchema::new(
                    "z",
                    PropertyKind::Scalar(ScalarKind::F32),
                )),
        );
        registry.register(
            Schema::new("Widget")
                .prop(PropertySchema::new(
                    "m_Position",
                    PropertyKind::object("Vector3"),
                ))
                .prop(PropertySchema::new("target", PropertyKind::Reference))
                .prop(
                    PropertySchema::new("scratch", PropertyKind::Scalar(ScalarKind::I32)).skip(),
                ),
        );
        (registry, AssetPack::new())
    }

    #[test]
    fn nested_object_without_tag_when_type_matches() {
        let (registry, assets) = fixture();
        let graph = SceneGraph::new();
        let ctx = SaveContext::new(&registry, &assets);

        let mut state = registry.default_state("Widget").unwrap();
        let position = state.field_mut("m_Position").unwrap().as_object_mut().unwrap();
        position.set_field("x", Value::F64(1.5));

        let doc = write_component(&graph, &ctx, &Component::from_state(state))
            .unwrap()
            .unwrap();
        assert_eq!(doc[TYPE_KEY], "Widget");
        assert!(doc["m_Position"].get(TYPE_KEY).is_none());
        assert_eq!(doc["m_Position"]["x"], 1.5);
        // Skipped properties never reach the document.
        assert!(doc.get("scratch").is_none());
    }

    #[test]
    fn reference_slots_emit_wire_shapes() {
        let (registry, mut assets) = fixture();
        assets.insert_asset(ContentId::new("tex", 9), "grid.png");
        let mut graph = SceneGraph::new();
        let node = graph.create_node("n");

        let mut ctx = SaveContext::new(&registry, &assets);
        ctx.identity.add(EntityRef::Node(node));

        let entity = write_value(
            &graph,
            &ctx,
            &Value::Ref(LiveRef::Entity(EntityRef::Node(node))),
            &PropertyKind::Reference,
        )
        .unwrap();
        assert_eq!(entity, json!({ "sceneID": 0 }));

        let asset = write_value(
            &graph,
            &ctx,
            &Value::Ref(LiveRef::Asset(ContentId::new("tex", 9))),
            &PropertyKind::Reference,
        )
        .unwrap();
        assert_eq!(asset, json!({ "guid": "tex", "fileId": 9 }));

        let null = write_value(
            &graph,
            &ctx,
            &Value::Ref(LiveRef::Null),
            &PropertyKind::Reference,
        )
        .unwrap();
        assert_eq!(null, json!({ "sceneID": -1 }));
    }

    #[test]
    fn string_keyed_map_emits_object_other_maps_pairs() {
        let (registry, assets) = fixture();
        let graph = SceneGraph::new();
        let ctx = SaveContext::new(&registry, &assets);

        let string_map = Value::Map(vec![(Value::String("a".into()), Value::I64(1))]);
        let kind = PropertyKind::map(
            PropertyKind::Scalar(ScalarKind::String),
            PropertyKind::Scalar(ScalarKind::I64),
        );
        assert_eq!(
            write_value(&graph, &ctx, &string_map, &kind).unwrap(),
            json!({ "a": 1 })
        );

        let int_map = Value::Map(vec![(Value::I64(3), Value::String("x".into()))]);
        let kind = PropertyKind::map(
            PropertyKind::Scalar(ScalarKind::I64),
            PropertyKind::Scalar(ScalarKind::String),
        );
        assert_eq!(
            write_value(&graph, &ctx, &int_map, &kind).unwrap(),
            json!([[3, "x"]])
        );
    }

    #[test]
    fn set_output_is_sorted() {
        let (registry, assets) = fixture();
        let graph = SceneGraph::new();
        let ctx = SaveContext::new(&registry, &assets);

        let set = Value::List(vec![Value::I64(20), Value::I64(3), Value::I64(11)]);
        let kind = PropertyKind::set(PropertyKind::Scalar(ScalarKind::I64));
        assert_eq!(
            write_value(&graph, &ctx, &set, &kind).unwrap(),
            json!([11, 20, 3])
        );
    }

    #[test]
    fn missing_type_round_trips_verbatim() {
        let (registry, assets) = fixture();
        let graph = SceneGraph::new();
        let ctx = SaveContext::new(&registry, &assets);

        let raw = json!({ "$type": "Gone", "value": 7 });
        let placeholder = Component::missing("Gone", raw.clone());
        let doc = write_component(&graph, &ctx, &placeholder).unwrap().unwrap();

        assert_eq!(doc[TYPE_KEY], "Gone");
        let inner: Json = serde_json::from_str(doc[JSON_STRING_KEY].as_str().unwrap()).unwrap();
        assert_eq!(inner, raw);
    }

    #[test]
    fn pre_save_hook_mutates_copy_not_live_state() {
        fn bump(state: &mut ObjectValue) -> Result<(), String> {
            state.set_field("x", Value::F64(99.0));
            Ok(())
        }

        let mut registry = SchemaRegistry::new();
        registry.register(
            Schema::new("Hooked")
                .before_save(bump)
                .prop(PropertySchema::new(
                    "x",
                    PropertyKind::Scalar(ScalarKind::F64),
                )),
        );
        let assets = AssetPack::new();
        let graph = SceneGraph::new();
        let ctx = SaveContext::new(&registry, &assets);

        let state = registry.default_state("Hooked").unwrap();
        let component = Component::from_state(state);
        let doc = write_component(&graph, &ctx, &component).unwrap().unwrap();

        assert_eq!(doc["x"], 99.0);
        assert_eq!(
            component.data().unwrap().field("x"),
            Some(&Value::F64(0.0))
        );
    }
}
