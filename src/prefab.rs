//! Template instance deltas.
//!
//! A node instantiated from a template stores, instead of its full
//! serialized form, the difference against the pristine template:
//! removed components, added subtrees, added components, and property
//! overrides addressed by node path, component index and property
//! path. Replaying the delta onto a freshly materialized template
//! reproduces the instance.
//!
//! Replay order is fixed: removals run before additions so component
//! indices recorded in overrides stay meaningful, then overrides apply
//! last. A stale path or unknown component type is logged and skipped;
//! one rotten override never loses the rest of the instance. An added
//! component that fails the format-version gate is a hard error for
//! the whole instance.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::assets::AssetPack;
use crate::context::{LoadContext, SaveContext};
use crate::error::{LoadError, SaveError};
use crate::graph::{Component, EntityRef, NodeKey, SceneGraph};
use crate::paths::{format_path, navigate_state_mut, parse_path, PathSeg};
use crate::reference::LiveRef;
use crate::schema::{PropertyKind, SchemaRegistry};
use crate::value::Value;
use crate::{reader, writer};

/// Component index marking an override that targets the node itself.
pub const NODE_TARGET: i64 = -1;

/// Component present on the template but deleted from the instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemovedComponent {
    #[serde(rename = "m_TransformPath")]
    pub node_path: String,
    #[serde(rename = "m_Type")]
    pub type_name: String,
}

/// Subtree added under a template node, stored as a full node document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddedNode {
    #[serde(rename = "m_TransformPath")]
    pub parent_path: String,
    #[serde(rename = "m_Document")]
    pub document: Json,
}

/// Component added to a template node, stored as a component document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddedComponent {
    #[serde(rename = "m_TransformPath")]
    pub node_path: String,
    #[serde(rename = "m_Document")]
    pub document: Json,
}

/// One overridden property inside the instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyOverride {
    /// Slash-joined node path relative to the instance root.
    #[serde(rename = "m_TransformPath")]
    pub node_path: String,
    /// Component slot index on the node, or [`NODE_TARGET`].
    #[serde(rename = "m_ComponentIndex")]
    pub component_index: i64,
    #[serde(rename = "m_PropertyPath")]
    pub property_path: String,
    #[serde(rename = "m_Value")]
    pub value: Json,
}

/// The full difference between an instance and its template.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct PrefabDelta {
    #[serde(
        rename = "RemovedComponents",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub removed_components: Vec<RemovedComponent>,
    #[serde(
        rename = "AddedGameObjects",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub added_nodes: Vec<AddedNode>,
    #[serde(
        rename = "AddedComponents",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub added_components: Vec<AddedComponent>,
    #[serde(
        rename = "PropertyOverrides",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub overrides: Vec<PropertyOverride>,
}

impl PrefabDelta {
    pub fn is_empty(&self) -> bool {
        self.removed_components.is_empty()
            && self.added_nodes.is_empty()
            && self.added_components.is_empty()
            && self.overrides.is_empty()
    }
}

/// The serialized `m_PrefabMetadata` payload: the template guid plus
/// the flattened delta lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrefabMetadata {
    #[serde(rename = "m_Guid")]
    pub guid: String,
    #[serde(flatten)]
    pub delta: PrefabDelta,
}

// Root transform bookkeeping the instance owns outright; recording it
// as an override would fight the parent scene on every replay.
fn root_override_is_skipped(node_path: &str, property_path: &str) -> bool {
    node_path.is_empty()
        && (property_path == "m_RootOrder" || property_path.starts_with("m_LocalEulerAnglesHint"))
}

// ---- capture: live instance vs pristine template ----

/// Diffs a live instance subtree against a pristine materialization of
/// its template.
///
/// Scene-local reference values in the delta are numbered by the
/// enclosing graph's save traversal, the same ids a save of `live`
/// emits. Replay resolves them in the scene-wide flush, so an override
/// may target any entity in the scene, not just the instance subtree.
pub fn capture_delta(
    live: &SceneGraph,
    live_root: NodeKey,
    pristine: &SceneGraph,
    pristine_root: NodeKey,
    registry: &SchemaRegistry,
    assets: &AssetPack,
) -> Result<PrefabDelta, SaveError> {
    let mut ctx = SaveContext::new(registry, assets);
    live.visit_entities(live.roots(), registry, &mut |entity| {
        ctx.identity.add(entity);
    });

    let mut delta = PrefabDelta::default();
    diff_node(
        live,
        live_root,
        pristine,
        pristine_root,
        String::new(),
        &ctx,
        &mut delta,
    )?;
    Ok(delta)
}

const BUILTIN_DIFF_PROPS: [&str; 5] = ["m_Name", "m_TagString", "m_Layer", "m_IsActive", "hideFlags"];

fn diff_node(
    live: &SceneGraph,
    live_key: NodeKey,
    pristine: &SceneGraph,
    pristine_key: NodeKey,
    path: String,
    ctx: &SaveContext<'_>,
    delta: &mut PrefabDelta,
) -> Result<(), SaveError> {
    let (Some(live_node), Some(pristine_node)) = (live.node(live_key), pristine.node(pristine_key))
    else {
        return Ok(());
    };

    for name in BUILTIN_DIFF_PROPS {
        let (Some(a), Some(b)) = (
            live_node.builtin_property(name),
            pristine_node.builtin_property(name),
        ) else {
            continue;
        };
        if a != b {
            push_override(
                delta,
                &path,
                NODE_TARGET,
                &[PathSeg::Field(name.to_owned())],
                writer::write_untyped(live, ctx, &a)?,
            );
        }
    }

    // Components match by type in slot order; a template component
    // with no counterpart was removed, an instance component with no
    // counterpart was added.
    let mut matched = vec![false; live_node.components.len()];
    for pristine_comp in &pristine_node.components {
        let found = live_node
            .components
            .iter()
            .enumerate()
            .find(|(i, c)| !matched[*i] && c.type_name() == pristine_comp.type_name());
        match found {
            Some((index, live_comp)) => {
                matched[index] = true;
                diff_component(live, ctx, live_comp, pristine_comp, &path, index as i64, delta)?;
            }
            None => delta.removed_components.push(RemovedComponent {
                node_path: path.clone(),
                type_name: pristine_comp.type_name().to_owned(),
            }),
        }
    }
    for (index, live_comp) in live_node.components.iter().enumerate() {
        if matched[index] {
            continue;
        }
        if let Some(document) = writer::write_component(live, ctx, live_comp)? {
            delta.added_components.push(AddedComponent {
                node_path: path.clone(),
                document,
            });
        }
    }

    let mut child_matched = vec![false; live_node.children().len()];
    for &pristine_child in pristine_node.children() {
        let Some(child_name) = pristine.node(pristine_child).map(|n| n.name.clone()) else {
            continue;
        };
        let found = live_node.children().iter().enumerate().find(|(i, &c)| {
            !child_matched[*i]
                && live.node(c).map(|n| n.name == child_name).unwrap_or(false)
        });
        match found {
            Some((index, &live_child)) => {
                child_matched[index] = true;
                diff_node(
                    live,
                    live_child,
                    pristine,
                    pristine_child,
                    join_path(&path, &child_name),
                    ctx,
                    delta,
                )?;
            }
            None => log::warn!(
                "template child '{child_name}' missing from instance; node removal is not representable in a delta"
            ),
        }
    }
    for (index, &live_child) in live_node.children().iter().enumerate() {
        if child_matched[index] {
            continue;
        }
        let document = crate::document::write_node_document(live, ctx, live_child)?;
        delta.added_nodes.push(AddedNode {
            parent_path: path.clone(),
            document,
        });
    }

    Ok(())
}

fn diff_component(
    live: &SceneGraph,
    ctx: &SaveContext<'_>,
    live_comp: &Component,
    pristine_comp: &Component,
    node_path: &str,
    component_index: i64,
    delta: &mut PrefabDelta,
) -> Result<(), SaveError> {
    let (Some(live_state), Some(pristine_state)) = (live_comp.data(), pristine_comp.data()) else {
        if live_comp != pristine_comp {
            log::warn!(
                "cannot diff placeholder component '{}'; override not captured",
                live_comp.type_name()
            );
        }
        return Ok(());
    };

    let mut segs = Vec::new();
    for (name, live_value) in &live_state.fields {
        segs.push(PathSeg::Field(name.clone()));
        match pristine_state.field(name) {
            Some(pristine_value) => diff_value(
                live,
                ctx,
                live_value,
                pristine_value,
                &mut segs,
                node_path,
                component_index,
                delta,
            )?,
            None => {
                let token = writer::write_untyped(live, ctx, live_value)?;
                push_override(delta, node_path, component_index, &segs, token);
            }
        }
        segs.pop();
    }
    Ok(())
}

/// Recursive structural diff. Objects and composites expand to one
/// entry per differing leaf; list length changes emit an `Array.size`
/// entry ahead of the per-element entries.
#[allow(clippy::too_many_arguments)]
fn diff_value(
    live: &SceneGraph,
    ctx: &SaveContext<'_>,
    a: &Value,
    b: &Value,
    segs: &mut Vec<PathSeg>,
    node_path: &str,
    component_index: i64,
    delta: &mut PrefabDelta,
) -> Result<(), SaveError> {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) if x.type_name == y.type_name => {
            for (name, live_value) in &x.fields {
                segs.push(PathSeg::Field(name.clone()));
                match y.field(name) {
                    Some(pristine_value) => diff_value(
                        live,
                        ctx,
                        live_value,
                        pristine_value,
                        segs,
                        node_path,
                        component_index,
                        delta,
                    )?,
                    None => {
                        let token = writer::write_untyped(live, ctx, live_value)?;
                        push_override(delta, node_path, component_index, segs, token);
                    }
                }
                segs.pop();
            }
        }
        (Value::List(xs), Value::List(ys)) => {
            if xs.len() != ys.len() {
                segs.push(PathSeg::Size);
                push_override(delta, node_path, component_index, segs, json!(xs.len()));
                segs.pop();
            }
            let common = xs.len().min(ys.len());
            for index in 0..common {
                segs.push(PathSeg::Index(index));
                diff_value(
                    live,
                    ctx,
                    &xs[index],
                    &ys[index],
                    segs,
                    node_path,
                    component_index,
                    delta,
                )?;
                segs.pop();
            }
            for (index, item) in xs.iter().enumerate().skip(common) {
                segs.push(PathSeg::Index(index));
                let token = writer::write_untyped(live, ctx, item)?;
                push_override(delta, node_path, component_index, segs, token);
                segs.pop();
            }
        }
        _ => {
            if a != b {
                let token = writer::write_untyped(live, ctx, a)?;
                push_override(delta, node_path, component_index, segs, token);
            }
        }
    }
    Ok(())
}

fn push_override(
    delta: &mut PrefabDelta,
    node_path: &str,
    component_index: i64,
    segs: &[PathSeg],
    value: Json,
) {
    let property_path = format_path(segs);
    if component_index != NODE_TARGET && root_override_is_skipped(node_path, &property_path) {
        return;
    }
    delta.overrides.push(PropertyOverride {
        node_path: node_path.to_owned(),
        component_index,
        property_path,
        value,
    });
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}/{name}")
    }
}

// ---- replay: delta onto a fresh materialization ----

/// Replays a delta onto a freshly materialized template instance.
///
/// Reference overrides whose scene-local id is not resolvable yet are
/// queued on the context's deferred queue; the caller flushes once the
/// scene-wide identity pass is final. An added component whose
/// document fails to read is a hard error.
pub fn apply_delta(
    graph: &mut SceneGraph,
    ctx: &mut LoadContext<'_>,
    instance_root: NodeKey,
    delta: &PrefabDelta,
) -> Result<(), LoadError> {
    for removal in &delta.removed_components {
        let Some(node) = graph.find_by_path(instance_root, &removal.node_path) else {
            log::warn!("removed-component path '{}' not found", removal.node_path);
            continue;
        };
        let index = graph.node(node).and_then(|n| {
            n.components
                .iter()
                .position(|c| c.type_name() == removal.type_name)
        });
        match index {
            Some(index) => {
                graph.remove_component(node, index);
            }
            None => log::warn!(
                "removed component '{}' not present at '{}'",
                removal.type_name,
                removal.node_path
            ),
        }
    }

    for added in &delta.added_nodes {
        let Some(parent) = graph.find_by_path(instance_root, &added.parent_path) else {
            log::warn!("added-node parent path '{}' not found", added.parent_path);
            continue;
        };
        if let Err(err) =
            crate::document::read_node_subtree(graph, ctx, Some(parent), &added.document)
        {
            log::error!("added subtree under '{}' discarded: {err}", added.parent_path);
        }
    }

    for added in &delta.added_components {
        let Some(node) = graph.find_by_path(instance_root, &added.node_path) else {
            log::warn!("added-component path '{}' not found", added.node_path);
            continue;
        };
        let (component, pending) = reader::read_component(ctx, &added.document)?;
        if let Some(index) = graph.add_component(node, component) {
            reader::queue_pending(graph, ctx, EntityRef::Component(node, index), pending);
        }
    }

    for entry in &delta.overrides {
        apply_override(graph, ctx, instance_root, entry);
    }
    Ok(())
}

fn apply_override(
    graph: &mut SceneGraph,
    ctx: &mut LoadContext<'_>,
    instance_root: NodeKey,
    entry: &PropertyOverride,
) {
    if entry.component_index != NODE_TARGET
        && root_override_is_skipped(&entry.node_path, &entry.property_path)
    {
        return;
    }
    let Some(node) = graph.find_by_path(instance_root, &entry.node_path) else {
        log::warn!("override path '{}' not found", entry.node_path);
        return;
    };

    if entry.component_index == NODE_TARGET {
        let mut scratch = Vec::new();
        let mut path = Vec::new();
        let value = reader::read_untyped(ctx, &entry.value, &mut scratch, &mut path);
        let applied = graph
            .node_mut(node)
            .map(|n| n.set_builtin_property(&entry.property_path, &value))
            .unwrap_or(false);
        if !applied {
            log::warn!("node override '{}' not applied", entry.property_path);
        }
        return;
    }

    let entity = EntityRef::Component(node, entry.component_index as usize);
    let Some(type_name) = graph.component(entity).map(|c| c.type_name().to_owned()) else {
        log::warn!(
            "override component index {} not present at '{}'",
            entry.component_index,
            entry.node_path
        );
        return;
    };
    let segs = match parse_path(&entry.property_path) {
        Ok(segs) => segs,
        Err(err) => {
            log::warn!("bad override path '{}': {err}", entry.property_path);
            return;
        }
    };

    if matches!(segs.last(), Some(PathSeg::Size)) {
        apply_resize(graph, ctx, entity, &type_name, &segs, &entry.value);
        return;
    }

    let (canonical, kind) = canonical_path(ctx.registry, &type_name, &segs);
    let mut pending = Vec::new();
    let mut path = canonical.clone();
    let value = match kind {
        Some(kind) => match reader::read_value(ctx, &kind, &entry.value, &mut pending, &mut path) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("override '{}' not readable: {err}", entry.property_path);
                return;
            }
        },
        None => reader::read_untyped(ctx, &entry.value, &mut pending, &mut path),
    };

    let Some(state) = graph.component_mut(entity).and_then(Component::data_mut) else {
        log::warn!(
            "override target '{}' has no typed state",
            entry.property_path
        );
        return;
    };
    match navigate_state_mut(state, &canonical) {
        Ok(slot) => *slot = value,
        Err(err) => {
            log::warn!("override '{}' not applied: {err}", entry.property_path);
            return;
        }
    }
    reader::queue_pending(graph, ctx, entity, pending);
}

/// `Array.size` override: truncate, or grow with the element default.
/// Reference elements fill with null, value elements with their
/// schema-constructed default.
fn apply_resize(
    graph: &mut SceneGraph,
    ctx: &LoadContext<'_>,
    entity: EntityRef,
    type_name: &str,
    segs: &[PathSeg],
    token: &Json,
) {
    let Some(new_len) = token.as_u64().map(|n| n as usize) else {
        log::warn!("Array.size override is not a non-negative integer");
        return;
    };
    let container_segs = &segs[..segs.len() - 1];
    let (canonical, container_kind) = canonical_path(ctx.registry, type_name, container_segs);
    let fill = match &container_kind {
        Some(PropertyKind::List(elem)) | Some(PropertyKind::Set(elem)) => match &**elem {
            PropertyKind::Reference => Value::Ref(LiveRef::Null),
            other => ctx.registry.default_value(other),
        },
        _ => Value::Null,
    };

    let Some(state) = graph.component_mut(entity).and_then(Component::data_mut) else {
        log::warn!("resize target has no typed state");
        return;
    };
    let slot = match navigate_state_mut(state, &canonical) {
        Ok(slot) => slot,
        Err(err) => {
            log::warn!("resize target not found: {err}");
            return;
        }
    };
    let Some(items) = slot.as_list_mut() else {
        log::warn!("resize target is not a container");
        return;
    };
    if new_len <= items.len() {
        items.truncate(new_len);
    } else {
        items.resize(new_len, fill);
    }
}

/// Walks the schema along a parsed path, canonicalizing aliased field
/// names and reporting the declared kind at the destination (`None`
/// once the walk leaves schema-described territory).
fn canonical_path(
    registry: &SchemaRegistry,
    type_name: &str,
    segs: &[PathSeg],
) -> (Vec<PathSeg>, Option<PropertyKind>) {
    let mut out = Vec::with_capacity(segs.len());
    let mut kind: Option<PropertyKind> = Some(PropertyKind::object(type_name));
    for seg in segs {
        match seg {
            PathSeg::Field(name) => {
                let mut canonical = name.clone();
                let mut next = None;
                match &kind {
                    Some(PropertyKind::Object(t)) => {
                        if let Some(property) =
                            registry.schema_of(t).and_then(|s| s.property(name))
                        {
                            canonical = property.name.clone();
                            next = Some(property.kind.clone());
                        }
                    }
                    Some(PropertyKind::Map(_, value_kind)) => {
                        next = Some((**value_kind).clone());
                    }
                    _ => {}
                }
                out.push(PathSeg::Field(canonical));
                kind = next;
            }
            PathSeg::Index(index) => {
                kind = match kind {
                    Some(PropertyKind::List(elem)) | Some(PropertyKind::Set(elem)) => Some(*elem),
                    _ => None,
                };
                out.push(PathSeg::Index(*index));
            }
            PathSeg::Size => {
                out.push(PathSeg::Size);
            }
        }
    }
    (out, kind)
}
