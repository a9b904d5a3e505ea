//! The live scene graph.
//!
//! Nodes live in a slotmap arena and own their components in order.
//! Component state is schema-shaped property data ([`ObjectValue`]),
//! or a raw-token placeholder when the component's type could not be
//! resolved at load time.
//!
//! Hierarchy operations keep parent/child links consistent in both
//! directions; `set_parent` detaches from the old parent first and
//! `despawn_recursive` tears down whole subtrees.

use slotmap::{new_key_type, SlotMap};

use crate::prefab::PrefabDelta;
use crate::schema::{Schema, SchemaRegistry};
use crate::value::{ObjectValue, Value};

new_key_type! {
    /// Arena key for a live node.
    pub struct NodeKey;
}

/// Identifies any entity that can receive a scene-local id: a node, or
/// a component addressed by its slot index on the owning node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Node(NodeKey),
    Component(NodeKey, usize),
}

impl EntityRef {
    pub fn node_key(&self) -> NodeKey {
        match self {
            EntityRef::Node(key) | EntityRef::Component(key, _) => *key,
        }
    }
}

/// Raw preserved tokens for a component whose type is unknown.
///
/// On re-save the raw document is emitted verbatim, so round-tripping
/// through a build lacking the type never drops data.
#[derive(Clone, Debug, PartialEq)]
pub struct MissingType {
    pub type_name: String,
    pub raw: serde_json::Value,
}

/// Component state: resolved property data or a missing-type placeholder.
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentState {
    Data(ObjectValue),
    Missing(MissingType),
}

/// A typed behavior object attached to exactly one node.
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub state: ComponentState,
}

impl Component {
    pub fn from_state(state: ObjectValue) -> Self {
        Self {
            state: ComponentState::Data(state),
        }
    }

    pub fn missing(type_name: impl Into<String>, raw: serde_json::Value) -> Self {
        Self {
            state: ComponentState::Missing(MissingType {
                type_name: type_name.into(),
                raw,
            }),
        }
    }

    pub fn type_name(&self) -> &str {
        match &self.state {
            ComponentState::Data(obj) => &obj.type_name,
            ComponentState::Missing(missing) => &missing.type_name,
        }
    }

    pub fn data(&self) -> Option<&ObjectValue> {
        match &self.state {
            ComponentState::Data(obj) => Some(obj),
            ComponentState::Missing(_) => None,
        }
    }

    pub fn data_mut(&mut self) -> Option<&mut ObjectValue> {
        match &mut self.state {
            ComponentState::Data(obj) => Some(obj),
            ComponentState::Missing(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.state, ComponentState::Missing(_))
    }
}

/// Link from a live node to the template it instantiates.
#[derive(Clone, Debug, PartialEq)]
pub struct PrefabLink {
    pub guid: String,
    /// The delta replayed onto (or last captured from) this instance.
    pub delta: Option<PrefabDelta>,
}

impl PrefabLink {
    pub fn new(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            delta: None,
        }
    }
}

/// A point in the hierarchy owning components and children.
#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub tag: String,
    pub layer: i32,
    pub hide_flags: u32,
    pub active: bool,
    pub components: Vec<Component>,
    pub prefab: Option<PrefabLink>,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) children: Vec<NodeKey>,
}

impl Node {
    /// Node is excluded from persistence; references to it degrade to null.
    pub const DONT_SAVE: u32 = 1 << 2;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: String::new(),
            layer: 0,
            hide_flags: 0,
            active: true,
            components: Vec::new(),
            prefab: None,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn is_dont_save(&self) -> bool {
        self.hide_flags & Self::DONT_SAVE != 0
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    /// Built-in node property read, by serialized or friendly name.
    pub fn builtin_property(&self, name: &str) -> Option<Value> {
        match name {
            "name" | "m_Name" => Some(Value::String(self.name.clone())),
            "tag" | "m_TagString" => Some(Value::String(self.tag.clone())),
            "layer" | "m_Layer" => Some(Value::I64(i64::from(self.layer))),
            "hideFlags" => Some(Value::I64(i64::from(self.hide_flags))),
            "m_Active" | "m_IsActive" => Some(Value::Bool(self.active)),
            _ => None,
        }
    }

    /// Built-in node property write. Returns false for unknown names or
    /// incompatible values.
    pub fn set_builtin_property(&mut self, name: &str, value: &Value) -> bool {
        match name {
            "name" | "m_Name" => match value.as_str() {
                Some(s) => {
                    self.name = s.to_owned();
                    true
                }
                None => false,
            },
            "tag" | "m_TagString" => match value.as_str() {
                Some(s) => {
                    self.tag = s.to_owned();
                    true
                }
                None => false,
            },
            "layer" | "m_Layer" => match value.as_i64() {
                Some(v) => {
                    self.layer = v as i32;
                    true
                }
                None => false,
            },
            "hideFlags" => match value.as_i64() {
                Some(v) => {
                    self.hide_flags = v as u32;
                    true
                }
                None => false,
            },
            "m_Active" | "m_IsActive" => match value.as_bool() {
                Some(b) => {
                    self.active = b;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

/// The live, mutable scene graph.
#[derive(Default)]
pub struct SceneGraph {
    nodes: SlotMap<NodeKey, Node>,
    roots: Vec<NodeKey>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn roots(&self) -> &[NodeKey] {
        &self.roots
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Creates a root node.
    pub fn create_node(&mut self, name: impl Into<String>) -> NodeKey {
        let key = self.nodes.insert(Node::new(name));
        self.roots.push(key);
        key
    }

    /// Creates a node parented under `parent`.
    pub fn create_child(&mut self, parent: NodeKey, name: impl Into<String>) -> NodeKey {
        let key = self.nodes.insert(Node::new(name));
        self.attach(key, parent);
        key
    }

    /// Reparents `child` under `parent`, detaching from any old parent.
    pub fn set_parent(&mut self, child: NodeKey, parent: NodeKey) {
        if child == parent {
            log::warn!("cannot parent a node to itself");
            return;
        }
        self.detach(child);
        self.attach(child, parent);
    }

    /// Moves `child` to the root list, detaching from its parent.
    pub fn set_root(&mut self, child: NodeKey) {
        self.detach(child);
        if !self.roots.contains(&child) {
            self.roots.push(child);
        }
    }

    fn detach(&mut self, child: NodeKey) {
        let old_parent = self.nodes.get(child).and_then(|n| n.parent);
        if let Some(p) = old_parent {
            if let Some(parent) = self.nodes.get_mut(p) {
                parent.children.retain(|&c| c != child);
            }
        } else {
            self.roots.retain(|&c| c != child);
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = None;
        }
    }

    fn attach(&mut self, child: NodeKey, parent: NodeKey) {
        if self.nodes.get_mut(parent).is_none() {
            log::error!("parent node not found during attach; keeping node at root");
            if !self.roots.contains(&child) {
                self.roots.push(child);
            }
            return;
        }
        self.nodes[parent].children.push(child);
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent);
        }
    }

    /// Removes a node and all its descendants.
    pub fn despawn_recursive(&mut self, key: NodeKey) {
        self.detach(key);
        self.despawn_subtree(key);
    }

    fn despawn_subtree(&mut self, key: NodeKey) {
        let children = self
            .nodes
            .get(key)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for child in children {
            self.despawn_subtree(child);
        }
        self.nodes.remove(key);
    }

    pub fn add_component(&mut self, key: NodeKey, component: Component) -> Option<usize> {
        let node = self.nodes.get_mut(key)?;
        node.components.push(component);
        Some(node.components.len() - 1)
    }

    pub fn remove_component(&mut self, key: NodeKey, index: usize) -> Option<Component> {
        let node = self.nodes.get_mut(key)?;
        if index >= node.components.len() {
            log::warn!(
                "remove_component: index {index} out of range on '{}'",
                node.name
            );
            return None;
        }
        Some(node.components.remove(index))
    }

    pub fn activate(&mut self, key: NodeKey, active: bool) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.active = active;
        }
    }

    pub fn component(&self, entity: EntityRef) -> Option<&Component> {
        match entity {
            EntityRef::Component(key, index) => self.nodes.get(key)?.components.get(index),
            EntityRef::Node(_) => None,
        }
    }

    pub fn component_mut(&mut self, entity: EntityRef) -> Option<&mut Component> {
        match entity {
            EntityRef::Component(key, index) => self.nodes.get_mut(key)?.components.get_mut(index),
            EntityRef::Node(_) => None,
        }
    }

    /// First child of `parent` with the given name.
    pub fn find_child(&self, parent: NodeKey, name: &str) -> Option<NodeKey> {
        self.nodes
            .get(parent)?
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes.get(c).map(|n| n.name == name).unwrap_or(false))
    }

    /// Resolves a slash-joined chain of sibling names below `root`.
    /// The empty path is the root itself.
    pub fn find_by_path(&self, root: NodeKey, path: &str) -> Option<NodeKey> {
        let mut current = root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self.find_child(current, segment)?;
        }
        Some(current)
    }

    /// The slash-joined path of `node` relative to `root`, or `None`
    /// if `node` is not in `root`'s subtree. The root maps to `""`.
    pub fn path_from(&self, root: NodeKey, node: NodeKey) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = node;
        while current != root {
            let n = self.nodes.get(current)?;
            segments.push(n.name.clone());
            current = n.parent?;
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    /// Component slot order used for serialization and identity.
    ///
    /// Components whose type declares an ordering dependency on a
    /// sibling are pulled to the end; relative order is otherwise
    /// preserved. Typed components with no registered schema are
    /// excluded: they never reach the document, and counting them
    /// would shift every later scene-local id on load. Missing-type
    /// placeholders do serialize and keep their slot. The same
    /// ordering runs on save and load, which is what makes scene-local
    /// ids line up across passes.
    pub fn ordered_component_indices(
        &self,
        key: NodeKey,
        registry: &SchemaRegistry,
    ) -> Vec<usize> {
        let Some(node) = self.nodes.get(key) else {
            return Vec::new();
        };
        let mut plain = Vec::new();
        let mut dependent = Vec::new();
        for (index, component) in node.components.iter().enumerate() {
            let schema = registry.schema_of(component.type_name());
            if schema.is_none() && !component.is_missing() {
                continue;
            }
            let has_dependency = schema.map(Schema::has_ordering_dependency).unwrap_or(false);
            if has_dependency {
                dependent.push(index);
            } else {
                plain.push(index);
            }
        }
        plain.extend(dependent);
        plain
    }

    /// Visits every persistable entity under `roots` in the canonical
    /// order: node, its ordered components, then children recursively.
    /// Don't-save nodes and their subtrees are skipped.
    pub fn visit_entities(
        &self,
        roots: &[NodeKey],
        registry: &SchemaRegistry,
        f: &mut impl FnMut(EntityRef),
    ) {
        for &root in roots {
            self.visit_entity_subtree(root, registry, f);
        }
    }

    fn visit_entity_subtree(
        &self,
        key: NodeKey,
        registry: &SchemaRegistry,
        f: &mut impl FnMut(EntityRef),
    ) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        if node.is_dont_save() {
            return;
        }
        f(EntityRef::Node(key));
        for index in self.ordered_component_indices(key, registry) {
            f(EntityRef::Component(key, index));
        }
        for &child in &node.children {
            self.visit_entity_subtree(child, registry, f);
        }
    }
}
