//! Content reference resolution.
//!
//! Converts between live reference slots and serialized [`Reference`]
//! tags. Scene-local identity always wins over external content, so an
//! in-graph object never round-trips as a duplicated external copy.
//!
//! During load, a scene-local id may name an entity that does not
//! exist yet; resolution then reports a deferral and the caller queues
//! the property assignment on the deferred queue. Content and null
//! references always resolve immediately (content storage is fully
//! available at load start).

use crate::context::{LoadContext, SaveContext};
use crate::graph::SceneGraph;
use crate::identity::INVALID_ID;
use crate::reference::{LiveRef, Reference};

/// Result of resolving a serialized reference during load.
pub enum Resolution {
    Immediate(LiveRef),
    /// The scene-local id is not materialized yet; the caller must
    /// defer the assignment.
    Deferred(i32),
}

/// Converts a live reference slot into its serialized tag.
///
/// A reference to a don't-save entity degrades to null rather than
/// failing. A content id missing from the pack is logged and degrades
/// to null as well.
pub fn to_reference(live: &LiveRef, graph: &SceneGraph, ctx: &SaveContext<'_>) -> Reference {
    match live {
        LiveRef::Null => Reference::Null,
        LiveRef::Entity(entity) => {
            let Some(node) = graph.node(entity.node_key()) else {
                log::warn!("reference to a despawned entity; serializing as null");
                return Reference::Null;
            };
            if node.is_dont_save() {
                return Reference::Null;
            }
            let id = ctx.identity.id_of(*entity);
            if id == INVALID_ID {
                log::warn!(
                    "entity '{}' is not part of the save pass; serializing as null",
                    node.name
                );
                return Reference::Null;
            }
            Reference::SceneLocal(id)
        }
        LiveRef::Asset(content) => {
            if !ctx.assets.contains(content) {
                log::warn!(
                    "content id '{}' (fileId {}) not found in asset pack; serializing as null",
                    content.guid,
                    content.file_id
                );
                return Reference::Null;
            }
            Reference::Content(content.clone())
        }
    }
}

/// Resolves a serialized reference back to a live slot.
pub fn from_reference(reference: &Reference, ctx: &LoadContext<'_>) -> Resolution {
    match reference {
        Reference::Null => Resolution::Immediate(LiveRef::Null),
        Reference::Content(content) => {
            if !ctx.assets.contains(content) {
                log::warn!(
                    "content id '{}' (fileId {}) not found in asset pack; keeping the reference",
                    content.guid,
                    content.file_id
                );
            }
            Resolution::Immediate(LiveRef::Asset(content.clone()))
        }
        Reference::SceneLocal(id) => match ctx.identity.entity_of(*id) {
            Some(entity) => Resolution::Immediate(LiveRef::Entity(entity)),
            None => Resolution::Deferred(*id),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetPack;
    use crate::graph::{EntityRef, Node};
    use crate::reference::ContentId;
    use crate::schema::SchemaRegistry;

    #[test]
    fn scene_local_wins_for_in_graph_entities() {
        let registry = SchemaRegistry::new();
        let assets = AssetPack::new();
        let mut graph = SceneGraph::new();
        let node = graph.create_node("a");

        let mut ctx = SaveContext::new(&registry, &assets);
        ctx.identity.add(EntityRef::Node(node));

        let reference = to_reference(&LiveRef::Entity(EntityRef::Node(node)), &graph, &ctx);
        assert_eq!(reference, Reference::SceneLocal(0));
    }

    #[test]
    fn dont_save_degrades_to_null() {
        let registry = SchemaRegistry::new();
        let assets = AssetPack::new();
        let mut graph = SceneGraph::new();
        let node = graph.create_node("hidden");
        graph.node_mut(node).unwrap().hide_flags = Node::DONT_SAVE;

        let ctx = SaveContext::new(&registry, &assets);
        let reference = to_reference(&LiveRef::Entity(EntityRef::Node(node)), &graph, &ctx);
        assert_eq!(reference, Reference::Null);
    }

    #[test]
    fn unknown_content_degrades_to_null() {
        let registry = SchemaRegistry::new();
        let assets = AssetPack::new();
        let graph = SceneGraph::new();
        let ctx = SaveContext::new(&registry, &assets);

        let live = LiveRef::Asset(ContentId::new("missing", 7));
        assert_eq!(to_reference(&live, &graph, &ctx), Reference::Null);
    }

    #[test]
    fn null_round_trip() {
        let registry = SchemaRegistry::new();
        let assets = AssetPack::new();
        let graph = SceneGraph::new();
        let save_ctx = SaveContext::new(&registry, &assets);
        assert_eq!(
            to_reference(&LiveRef::Null, &graph, &save_ctx),
            Reference::Null
        );

        let load_ctx = LoadContext::new(&registry, &assets);
        match from_reference(&Reference::Null, &load_ctx) {
            Resolution::Immediate(LiveRef::Null) => {}
            _ => panic!("null must resolve immediately to null"),
        }
    }

    #[test]
    fn unmaterialized_scene_id_defers() {
        let registry = SchemaRegistry::new();
        let assets = AssetPack::new();
        let load_ctx = LoadContext::new(&registry, &assets);
        match from_reference(&Reference::SceneLocal(5), &load_ctx) {
            Resolution::Deferred(5) => {}
            _ => panic!("expected deferral for unknown scene id"),
        }
    }
}
