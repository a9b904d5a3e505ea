//! External content storage consumed by the engine.
//!
//! The asset pack answers three questions: does this content id exist,
//! what template document does a guid carry, and can anything build a
//! template instance that is not physically embedded. The last goes
//! through a registrable chain of [`TemplateFactory`] fallbacks; the
//! scene container falls back to materializing the stored document
//! when no factory claims the id.
//!
//! Content storage is assumed fully available at load start, so asset
//! lookups never defer.

use std::collections::HashMap;

use crate::graph::{NodeKey, SceneGraph};
use crate::reference::ContentId;
use crate::schema::SchemaRegistry;

/// Fallback factory for instantiating templates programmatically.
pub trait TemplateFactory {
    /// Builds an instance of the template under `parent` (or at the
    /// root when `parent` is `None`). Returns `None` to pass the id to
    /// the next factory in the chain.
    fn instantiate(
        &self,
        id: &ContentId,
        graph: &mut SceneGraph,
        registry: &SchemaRegistry,
        parent: Option<NodeKey>,
    ) -> Option<NodeKey>;
}

/// In-memory content store: assets by id, template documents by guid,
/// and the factory chain.
#[derive(Default)]
pub struct AssetPack {
    assets: HashMap<ContentId, String>,
    templates: HashMap<String, serde_json::Value>,
    factories: Vec<Box<dyn TemplateFactory>>,
}

impl AssetPack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an asset under a content id. The name is a debug
    /// handle standing in for the real asset object.
    pub fn insert_asset(&mut self, id: ContentId, name: impl Into<String>) {
        self.assets.insert(id, name.into());
    }

    /// Looks up an asset by content id.
    pub fn lookup(&self, id: &ContentId) -> Option<&str> {
        self.assets.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.assets.contains_key(id)
    }

    /// Stores a template document under its guid.
    pub fn insert_template(&mut self, guid: impl Into<String>, document: serde_json::Value) {
        self.templates.insert(guid.into(), document);
    }

    /// The stored template document for `guid`, if any.
    pub fn template(&self, guid: &str) -> Option<&serde_json::Value> {
        self.templates.get(guid)
    }

    /// Appends a factory to the fallback chain.
    pub fn push_factory(&mut self, factory: Box<dyn TemplateFactory>) {
        self.factories.push(factory);
    }

    /// Runs the factory chain for `id`. Returns the instantiated root
    /// node from the first factory that claims the id.
    pub fn instantiate_via_factories(
        &self,
        id: &ContentId,
        graph: &mut SceneGraph,
        registry: &SchemaRegistry,
        parent: Option<NodeKey>,
    ) -> Option<NodeKey> {
        for factory in &self.factories {
            if let Some(key) = factory.instantiate(id, graph, registry, parent) {
                return Some(key);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedFactory {
        guid: String,
    }

    impl TemplateFactory for FixedFactory {
        fn instantiate(
            &self,
            id: &ContentId,
            graph: &mut SceneGraph,
            _registry: &SchemaRegistry,
            parent: Option<NodeKey>,
        ) -> Option<NodeKey> {
            if id.guid != self.guid {
                return None;
            }
            let key = graph.create_node("factory-made");
            if let Some(parent) = parent {
                graph.set_parent(key, parent);
            }
            Some(key)
        }
    }

    #[test]
    fn lookup_and_contains() {
        let mut pack = AssetPack::new();
        let id = ContentId::new("mesh-guid", 100);
        pack.insert_asset(id.clone(), "cube.mesh");

        assert_eq!(pack.lookup(&id), Some("cube.mesh"));
        assert!(!pack.contains(&ContentId::new("mesh-guid", 101)));
    }

    #[test]
    fn factory_chain_falls_through() {
        let mut pack = AssetPack::new();
        pack.push_factory(Box::new(FixedFactory {
            guid: "nope".into(),
        }));
        pack.push_factory(Box::new(FixedFactory {
            guid: "yes".into(),
        }));

        let registry = SchemaRegistry::new();
        let mut graph = SceneGraph::new();
        let made =
            pack.instantiate_via_factories(&ContentId::new("yes", 0), &mut graph, &registry, None);
        assert!(made.is_some());
        assert_eq!(graph.node(made.unwrap()).unwrap().name, "factory-made");

        let missed =
            pack.instantiate_via_factories(&ContentId::new("other", 0), &mut graph, &registry, None);
        assert!(missed.is_none());
    }
}
