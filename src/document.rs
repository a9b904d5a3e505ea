//! Scene documents: the top-level save and load entry points.
//!
//! A scene document is one JSON object: a format version, render
//! settings, and the root node documents. Node documents nest their
//! components and children; a template instance stores its
//! `m_PrefabMetadata` delta instead of a component list.
//!
//! Load runs in two phases. First the whole tree is materialized with
//! every scene-local reference left null and queued; then identity is
//! assigned by the same traversal the writer uses and the queue is
//! flushed, patching every slot. A root subtree that fails to load is
//! discarded whole; the remaining roots still load.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::assets::AssetPack;
use crate::context::{LoadContext, SaveContext};
use crate::error::{LoadError, SaveError};
use crate::graph::{EntityRef, NodeKey, PrefabLink, SceneGraph};
use crate::prefab::{apply_delta, PrefabMetadata};
use crate::reader;
use crate::reference::ContentId;
use crate::schema::SchemaRegistry;
use crate::writer;

/// Version written into `m_FormatVersion`. Loading any other version
/// is refused outright.
pub const FORMAT_VERSION: i64 = 2;

/// Scene-wide rendering state carried alongside the hierarchy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(rename = "m_Fog", default)]
    pub fog: bool,
    #[serde(rename = "m_FogColor", default = "gray")]
    pub fog_color: [f32; 4],
    #[serde(rename = "m_FogDensity", default)]
    pub fog_density: f32,
    #[serde(rename = "m_AmbientColor", default = "gray")]
    pub ambient_color: [f32; 4],
}

fn gray() -> [f32; 4] {
    [0.5, 0.5, 0.5, 1.0]
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fog: false,
            fog_color: gray(),
            fog_density: 0.0,
            ambient_color: gray(),
        }
    }
}

/// What a successful load produced.
#[derive(Debug)]
pub struct LoadedScene {
    pub roots: Vec<NodeKey>,
    pub render_settings: RenderSettings,
}

/// Serializes the whole graph into a scene document.
///
/// Identity is assigned by the canonical traversal before any node is
/// written, so forward references within the document are already
/// final ids.
pub fn save_scene(
    graph: &SceneGraph,
    registry: &SchemaRegistry,
    assets: &AssetPack,
    settings: &RenderSettings,
) -> Result<Json, SaveError> {
    let mut ctx = SaveContext::new(registry, assets);
    graph.visit_entities(graph.roots(), registry, &mut |entity| {
        ctx.identity.add(entity);
    });

    let mut roots = Vec::new();
    for &root in graph.roots() {
        let Some(node) = graph.node(root) else {
            continue;
        };
        if node.is_dont_save() {
            continue;
        }
        roots.push(write_node_document(graph, &ctx, root)?);
    }

    let settings = serde_json::to_value(settings).map_err(|e| SaveError::Encode(e.to_string()))?;
    Ok(json!({
        "m_FormatVersion": FORMAT_VERSION,
        "m_RenderSettings": settings,
        "m_RootGameObjects": roots,
    }))
}

/// Serializes one node subtree. Template instances write their link
/// metadata with a null component list instead of their expanded form.
pub(crate) fn write_node_document(
    graph: &SceneGraph,
    ctx: &SaveContext<'_>,
    key: NodeKey,
) -> Result<Json, SaveError> {
    let node = graph
        .node(key)
        .ok_or_else(|| SaveError::InvalidState("node despawned during save".into()))?;

    if let Some(link) = &node.prefab {
        let metadata = PrefabMetadata {
            guid: link.guid.clone(),
            delta: link.delta.clone().unwrap_or_default(),
        };
        let metadata =
            serde_json::to_value(&metadata).map_err(|e| SaveError::Encode(e.to_string()))?;
        return Ok(json!({
            "name": node.name,
            "m_PrefabMetadata": metadata,
            "m_Component": Json::Null,
        }));
    }

    let mut components = Vec::new();
    for index in graph.ordered_component_indices(key, ctx.registry) {
        if let Some(doc) = writer::write_component(graph, ctx, &node.components[index])? {
            components.push(doc);
        }
    }

    let mut children = Vec::new();
    for &child in node.children() {
        let Some(child_node) = graph.node(child) else {
            continue;
        };
        if child_node.is_dont_save() {
            continue;
        }
        children.push(write_node_document(graph, ctx, child)?);
    }

    Ok(json!({
        "name": node.name,
        "hideFlags": node.hide_flags,
        "layer": node.layer,
        "tag": node.tag,
        "m_Active": node.active,
        "m_Component": components,
        "m_Children": children,
    }))
}

/// Loads a scene document into the graph.
///
/// New roots are appended to whatever the graph already holds; a
/// malformed or failing root subtree is logged and dropped without
/// affecting its siblings.
pub fn load_scene(
    graph: &mut SceneGraph,
    registry: &SchemaRegistry,
    assets: &AssetPack,
    document: &Json,
) -> Result<LoadedScene, LoadError> {
    let top = document
        .as_object()
        .ok_or_else(|| LoadError::Malformed("scene document is not an object".into()))?;
    let found = top
        .get("m_FormatVersion")
        .and_then(Json::as_i64)
        .ok_or_else(|| LoadError::Malformed("scene document has no m_FormatVersion".into()))?;
    if found != FORMAT_VERSION {
        return Err(LoadError::FormatVersion {
            found,
            supported: FORMAT_VERSION,
        });
    }

    let render_settings = match top.get("m_RenderSettings") {
        Some(token) => serde_json::from_value(token.clone()).unwrap_or_else(|err| {
            log::warn!("render settings malformed ({err}); using defaults");
            RenderSettings::default()
        }),
        None => RenderSettings::default(),
    };

    let root_docs = top
        .get("m_RootGameObjects")
        .and_then(Json::as_array)
        .ok_or_else(|| LoadError::Malformed("scene document has no m_RootGameObjects".into()))?;

    let mut ctx = LoadContext::new(registry, assets);
    let mut roots = Vec::new();
    for doc in root_docs {
        match read_node_subtree(graph, &mut ctx, None, doc) {
            Ok(root) => roots.push(root),
            Err(err) => log::error!("root subtree discarded: {err}"),
        }
    }

    finalize_load(graph, &mut ctx, &roots);
    Ok(LoadedScene {
        roots,
        render_settings,
    })
}

/// Identity pass over the loaded roots, then the reference flush.
/// Runs the exact traversal the writer ran, which is what makes the
/// queued sceneID patches land on the right entities.
fn finalize_load(graph: &mut SceneGraph, ctx: &mut LoadContext<'_>, roots: &[NodeKey]) {
    let registry = ctx.registry;
    graph.visit_entities(roots, registry, &mut |entity| {
        ctx.identity.add(entity);
    });
    let LoadContext {
        ref identity,
        ref mut queue,
        ..
    } = *ctx;
    queue.flush(graph, identity);
}

/// Reads one node document into the graph under `parent`.
///
/// On any error the partially built subtree is despawned before the
/// error propagates; the graph never keeps half a node.
pub(crate) fn read_node_subtree(
    graph: &mut SceneGraph,
    ctx: &mut LoadContext<'_>,
    parent: Option<NodeKey>,
    document: &Json,
) -> Result<NodeKey, LoadError> {
    let obj = document
        .as_object()
        .ok_or_else(|| LoadError::Malformed("node document is not an object".into()))?;

    if let Some(metadata_token) = obj.get("m_PrefabMetadata") {
        return read_prefab_instance(graph, ctx, parent, obj, metadata_token);
    }

    let name = obj.get("name").and_then(Json::as_str).unwrap_or_default();
    let key = match parent {
        Some(parent) => graph.create_child(parent, name),
        None => graph.create_node(name),
    };
    if let Err(err) = fill_node(graph, ctx, key, obj) {
        graph.despawn_recursive(key);
        return Err(err);
    }
    Ok(key)
}

fn fill_node(
    graph: &mut SceneGraph,
    ctx: &mut LoadContext<'_>,
    key: NodeKey,
    obj: &JsonMap<String, Json>,
) -> Result<(), LoadError> {
    {
        let node = graph
            .node_mut(key)
            .ok_or_else(|| LoadError::Malformed("node vanished during load".into()))?;
        if let Some(flags) = obj.get("hideFlags").and_then(Json::as_u64) {
            node.hide_flags = flags as u32;
        }
        if let Some(layer) = obj.get("layer").and_then(Json::as_i64) {
            node.layer = layer as i32;
        }
        if let Some(tag) = obj.get("tag").and_then(Json::as_str) {
            node.tag = tag.to_owned();
        }
        if let Some(active) = obj.get("m_Active").and_then(Json::as_bool) {
            node.active = active;
        }
    }

    if let Some(component_docs) = obj.get("m_Component").and_then(Json::as_array) {
        for doc in component_docs {
            let (component, pending) = reader::read_component(ctx, doc)?;
            let Some(index) = graph.add_component(key, component) else {
                return Err(LoadError::Malformed("node vanished during load".into()));
            };
            reader::queue_pending(graph, ctx, EntityRef::Component(key, index), pending);
        }
    }

    if let Some(child_docs) = obj.get("m_Children").and_then(Json::as_array) {
        for doc in child_docs {
            read_node_subtree(graph, ctx, Some(key), doc)?;
        }
    }
    Ok(())
}

fn read_prefab_instance(
    graph: &mut SceneGraph,
    ctx: &mut LoadContext<'_>,
    parent: Option<NodeKey>,
    obj: &JsonMap<String, Json>,
    metadata_token: &Json,
) -> Result<NodeKey, LoadError> {
    let metadata: PrefabMetadata = serde_json::from_value(metadata_token.clone())
        .map_err(|err| LoadError::Malformed(format!("bad prefab metadata: {err}")))?;

    let root = materialize_template(graph, ctx, &metadata.guid, parent)?;
    if let Some(name) = obj.get("name").and_then(Json::as_str) {
        if let Some(node) = graph.node_mut(root) {
            node.name = name.to_owned();
        }
    }

    if let Err(err) = apply_delta(graph, ctx, root, &metadata.delta) {
        graph.despawn_recursive(root);
        return Err(err);
    }
    if let Some(node) = graph.node_mut(root) {
        node.prefab = Some(PrefabLink {
            guid: metadata.guid,
            delta: Some(metadata.delta),
        });
    }
    Ok(root)
}

/// Produces a pristine template instance: the factory chain gets first
/// refusal, then the stored template document is materialized.
fn materialize_template(
    graph: &mut SceneGraph,
    ctx: &mut LoadContext<'_>,
    guid: &str,
    parent: Option<NodeKey>,
) -> Result<NodeKey, LoadError> {
    let id = ContentId::new(guid, 0);
    if let Some(root) = ctx
        .assets
        .instantiate_via_factories(&id, graph, ctx.registry, parent)
    {
        return Ok(root);
    }
    let Some(template_doc) = ctx.assets.template(guid).cloned() else {
        return Err(LoadError::TemplateUnavailable(guid.to_owned()));
    };
    read_node_subtree(graph, ctx, parent, &template_doc)
}

/// Instantiates a template at runtime, outside any scene load.
///
/// The subtree gets its own identity pass and flush, so references
/// inside the template resolve before this returns.
pub fn instantiate_template(
    graph: &mut SceneGraph,
    registry: &SchemaRegistry,
    assets: &AssetPack,
    guid: &str,
    parent: Option<NodeKey>,
) -> Result<NodeKey, LoadError> {
    let mut ctx = LoadContext::new(registry, assets);
    let root = materialize_template(graph, &mut ctx, guid, parent)?;
    if let Some(node) = graph.node_mut(root) {
        node.prefab = Some(PrefabLink::new(guid));
    }
    finalize_load(graph, &mut ctx, &[root]);
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Component;
    use crate::reference::LiveRef;
    use crate::schema::{PropertyKind, PropertySchema, Schema};
    use crate::value::{ObjectValue, ScalarKind, Value};

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register(
            Schema::new("Follower")
                .prop(PropertySchema::new("target", PropertyKind::Reference))
                .prop(PropertySchema::new(
                    "speed",
                    PropertyKind::Scalar(ScalarKind::F32),
                )),
        );
        registry
    }

    fn follower(registry: &SchemaRegistry, target: LiveRef) -> Component {
        let mut state = registry.default_state("Follower").unwrap();
        state.set_field("target", Value::Ref(target));
        Component::from_state(state)
    }

    #[test]
    fn save_assigns_preorder_ids_and_load_restores_references() {
        let registry = registry();
        let assets = AssetPack::new();

        let mut graph = SceneGraph::new();
        let a = graph.create_node("A");
        let b = graph.create_node("B");
        let c1 = graph.create_child(b, "C1");
        // A's component points forward at C1.
        graph.add_component(a, follower(&registry, LiveRef::Entity(EntityRef::Node(c1))));

        let doc = save_scene(&graph, &registry, &assets, &RenderSettings::default()).unwrap();

        // Pre-order: A=0, follower=1, B=2, C1=3.
        let roots = doc["m_RootGameObjects"].as_array().unwrap();
        assert_eq!(roots[0]["m_Component"][0]["target"], json!({ "sceneID": 3 }));

        let mut loaded_graph = SceneGraph::new();
        let loaded = load_scene(&mut loaded_graph, &registry, &assets, &doc).unwrap();
        assert_eq!(loaded.roots.len(), 2);

        let new_a = loaded.roots[0];
        let new_c1 = loaded_graph
            .find_child(loaded.roots[1], "C1")
            .unwrap();
        let state = loaded_graph
            .component(EntityRef::Component(new_a, 0))
            .unwrap()
            .data()
            .unwrap();
        assert_eq!(
            state.field("target"),
            Some(&Value::Ref(LiveRef::Entity(EntityRef::Node(new_c1))))
        );
    }

    #[test]
    fn format_version_gate_is_hard() {
        let registry = registry();
        let assets = AssetPack::new();
        let mut graph = SceneGraph::new();

        let doc = json!({
            "m_FormatVersion": FORMAT_VERSION + 1,
            "m_RenderSettings": {},
            "m_RootGameObjects": [],
        });
        let err = load_scene(&mut graph, &registry, &assets, &doc).unwrap_err();
        assert!(matches!(err, LoadError::FormatVersion { .. }));
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn failed_root_subtree_is_discarded_others_survive() {
        let mut registry = SchemaRegistry::new();
        registry.register(Schema::new("Versioned").version(2));
        let assets = AssetPack::new();
        let mut graph = SceneGraph::new();

        let doc = json!({
            "m_FormatVersion": FORMAT_VERSION,
            "m_RootGameObjects": [
                {
                    "name": "bad",
                    "m_Component": [{ "$type": "Versioned", "$version": 1 }],
                    "m_Children": [],
                },
                { "name": "good", "m_Component": [], "m_Children": [] },
            ],
        });

        let loaded = load_scene(&mut graph, &registry, &assets, &doc).unwrap();
        assert_eq!(loaded.roots.len(), 1);
        assert_eq!(graph.node(loaded.roots[0]).unwrap().name, "good");
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn schema_less_component_does_not_shift_scene_ids() {
        let registry = registry();
        let assets = AssetPack::new();

        // The unregistered component never reaches the document, so it
        // must not consume an id ahead of the follower.
        let mut graph = SceneGraph::new();
        let a = graph.create_node("A");
        graph.add_component(a, Component::from_state(ObjectValue::new("EditorOnly")));
        let b = graph.create_node("B");
        graph.add_component(a, follower(&registry, LiveRef::Entity(EntityRef::Node(b))));

        let doc = save_scene(&graph, &registry, &assets, &RenderSettings::default()).unwrap();
        // A=0, follower=1, B=2.
        assert_eq!(
            doc["m_RootGameObjects"][0]["m_Component"][0]["target"],
            json!({ "sceneID": 2 })
        );

        let mut reloaded = SceneGraph::new();
        let loaded = load_scene(&mut reloaded, &registry, &assets, &doc).unwrap();
        let new_b = loaded.roots[1];
        let state = reloaded
            .component(EntityRef::Component(loaded.roots[0], 0))
            .unwrap()
            .data()
            .unwrap();
        assert_eq!(
            state.field("target"),
            Some(&Value::Ref(LiveRef::Entity(EntityRef::Node(new_b))))
        );
    }

    #[test]
    fn bad_added_component_discards_the_whole_instance() {
        let mut registry = SchemaRegistry::new();
        registry.register(Schema::new("Versioned").version(2));
        let mut assets = AssetPack::new();
        assets.insert_template(
            "shell",
            json!({ "name": "Shell", "m_Component": [], "m_Children": [] }),
        );

        let scene = json!({
            "m_FormatVersion": FORMAT_VERSION,
            "m_RootGameObjects": [
                {
                    "name": "broken",
                    "m_PrefabMetadata": {
                        "m_Guid": "shell",
                        "AddedComponents": [{
                            "m_TransformPath": "",
                            "m_Document": { "$type": "Versioned", "$version": 1 },
                        }],
                    },
                    "m_Component": null,
                },
                { "name": "good", "m_Component": [], "m_Children": [] },
            ],
        });

        let mut graph = SceneGraph::new();
        let loaded = load_scene(&mut graph, &registry, &assets, &scene).unwrap();
        assert_eq!(loaded.roots.len(), 1);
        assert_eq!(graph.node(loaded.roots[0]).unwrap().name, "good");
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn placeholder_survives_two_round_trips_byte_equivalent() {
        let registry = registry();
        let assets = AssetPack::new();

        let original = json!({
            "m_FormatVersion": FORMAT_VERSION,
            "m_RootGameObjects": [{
                "name": "n",
                "m_Component": [{ "$type": "Gone", "value": 7, "list": [1, 2] }],
                "m_Children": [],
            }],
        });

        let mut graph1 = SceneGraph::new();
        load_scene(&mut graph1, &registry, &assets, &original).unwrap();
        let save1 = save_scene(&graph1, &registry, &assets, &RenderSettings::default()).unwrap();

        let mut graph2 = SceneGraph::new();
        load_scene(&mut graph2, &registry, &assets, &save1).unwrap();
        let save2 = save_scene(&graph2, &registry, &assets, &RenderSettings::default()).unwrap();

        assert_eq!(
            save1["m_RootGameObjects"][0]["m_Component"][0],
            save2["m_RootGameObjects"][0]["m_Component"][0]
        );
        assert_eq!(
            save1["m_RootGameObjects"][0]["m_Component"][0]["$type"],
            "Gone"
        );
    }

    #[test]
    fn prefab_instance_round_trips_through_the_scene_document() {
        let registry = registry();
        let mut assets = AssetPack::new();
        assets.insert_template(
            "rig-guid",
            json!({
                "name": "Rig",
                "m_Component": [{ "$type": "Follower", "speed": 1.0 }],
                "m_Children": [],
            }),
        );

        let scene = json!({
            "m_FormatVersion": FORMAT_VERSION,
            "m_RootGameObjects": [{
                "name": "RigInstance",
                "m_PrefabMetadata": {
                    "m_Guid": "rig-guid",
                    "PropertyOverrides": [{
                        "m_TransformPath": "",
                        "m_ComponentIndex": 0,
                        "m_PropertyPath": "speed",
                        "m_Value": 4.0,
                    }],
                },
                "m_Component": null,
            }],
        });

        let mut graph = SceneGraph::new();
        let loaded = load_scene(&mut graph, &registry, &assets, &scene).unwrap();
        let root = loaded.roots[0];
        assert_eq!(graph.node(root).unwrap().name, "RigInstance");
        let state = graph
            .component(EntityRef::Component(root, 0))
            .unwrap()
            .data()
            .unwrap();
        assert_eq!(state.field("speed"), Some(&Value::F64(4.0)));

        // Re-save keeps the link form, not the expanded tree.
        let saved = save_scene(&graph, &registry, &assets, &RenderSettings::default()).unwrap();
        let node_doc = &saved["m_RootGameObjects"][0];
        assert_eq!(node_doc["m_Component"], Json::Null);
        assert_eq!(node_doc["m_PrefabMetadata"]["m_Guid"], "rig-guid");
        assert_eq!(
            node_doc["m_PrefabMetadata"]["PropertyOverrides"][0]["m_PropertyPath"],
            "speed"
        );
    }

    #[test]
    fn missing_template_fails_that_subtree_only() {
        let registry = registry();
        let assets = AssetPack::new();
        let scene = json!({
            "m_FormatVersion": FORMAT_VERSION,
            "m_RootGameObjects": [
                {
                    "name": "ghost",
                    "m_PrefabMetadata": { "m_Guid": "nowhere" },
                    "m_Component": null,
                },
                { "name": "solid", "m_Component": [], "m_Children": [] },
            ],
        });

        let mut graph = SceneGraph::new();
        let loaded = load_scene(&mut graph, &registry, &assets, &scene).unwrap();
        assert_eq!(loaded.roots.len(), 1);
        assert_eq!(graph.node(loaded.roots[0]).unwrap().name, "solid");
    }

    #[test]
    fn runtime_instantiation_resolves_internal_references() {
        let registry = registry();
        let mut assets = AssetPack::new();
        // Template whose child component points back at the root node
        // (sceneID 0 in the template's own numbering).
        assets.insert_template(
            "link-guid",
            json!({
                "name": "Root",
                "m_Component": [],
                "m_Children": [{
                    "name": "child",
                    "m_Component": [{ "$type": "Follower", "target": { "sceneID": 0 } }],
                    "m_Children": [],
                }],
            }),
        );

        let mut graph = SceneGraph::new();
        let root = instantiate_template(&mut graph, &registry, &assets, "link-guid", None).unwrap();
        let child = graph.find_child(root, "child").unwrap();
        let state = graph
            .component(EntityRef::Component(child, 0))
            .unwrap()
            .data()
            .unwrap();
        assert_eq!(
            state.field("target"),
            Some(&Value::Ref(LiveRef::Entity(EntityRef::Node(root))))
        );
        assert_eq!(graph.node(root).unwrap().prefab.as_ref().unwrap().guid, "link-guid");
    }

    #[test]
    fn dont_save_roots_are_omitted() {
        let registry = registry();
        let assets = AssetPack::new();
        let mut graph = SceneGraph::new();
        graph.create_node("kept");
        let hidden = graph.create_node("scratch");
        graph.node_mut(hidden).unwrap().hide_flags = crate::graph::Node::DONT_SAVE;

        let doc = save_scene(&graph, &registry, &assets, &RenderSettings::default()).unwrap();
        let roots = doc["m_RootGameObjects"].as_array().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["name"], "kept");
    }

    #[test]
    fn render_settings_round_trip() {
        let registry = registry();
        let assets = AssetPack::new();
        let graph = SceneGraph::new();
        let settings = RenderSettings {
            fog: true,
            fog_density: 0.25,
            ..Default::default()
        };

        let doc = save_scene(&graph, &registry, &assets, &settings).unwrap();
        assert_eq!(doc["m_RenderSettings"]["m_Fog"], true);

        let mut loaded_graph = SceneGraph::new();
        let loaded = load_scene(&mut loaded_graph, &registry, &assets, &doc).unwrap();
        assert_eq!(loaded.render_settings, settings);
    }
}
