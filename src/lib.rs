//! # scene-persist
//!
//! Save and load for a live, mutable scene graph: a hierarchy of nodes
//! carrying typed components, serialized to a JSON scene document and
//! restored with every in-scene reference intact.
//!
//! ## Core Types
//!
//! - [`SceneGraph`] — The live hierarchy: nodes, components, roots
//! - [`Component`] / [`ComponentState`] — Typed state or a missing-type placeholder
//! - [`Value`] / [`ObjectValue`] — Format-agnostic property state
//! - [`Schema`] / [`SchemaRegistry`] — Property descriptions driving the generic visitor
//! - [`Reference`] / [`LiveRef`] — Serialized and in-memory reference tags
//!
//! ## Save & Load
//!
//! - [`save_scene`] / [`load_scene`] — Whole-document entry points
//! - [`IdentityTable`] — Dense scene-local ids, assigned per pass
//! - [`DeferredQueue`] — FIFO patch queue for forward references
//! - [`AssetPack`] — External content, template documents, factory chain
//!
//! ## Templates
//!
//! - [`instantiate_template`] — Materialize a template at runtime
//! - [`PrefabDelta`] — Instance-vs-template difference
//! - [`capture_delta`] / [`apply_delta`] — Diff and replay
//!
//! See `DESIGN.md` at the repository root for architecture decisions.

mod assets;
mod context;
mod defer;
mod document;
mod error;
mod graph;
mod identity;
pub mod paths;
mod prefab;
mod reader;
mod reference;
mod resolver;
mod schema;
mod value;
mod writer;

pub use assets::{AssetPack, TemplateFactory};
pub use context::{LoadContext, SaveContext};
pub use defer::{DeferredAction, DeferredQueue, QueueState};
pub use document::{
    instantiate_template, load_scene, save_scene, LoadedScene, RenderSettings, FORMAT_VERSION,
};
pub use error::{LoadError, SaveError};
pub use graph::{
    Component, ComponentState, EntityRef, MissingType, Node, NodeKey, PrefabLink, SceneGraph,
};
pub use identity::{IdentityTable, INVALID_ID};
pub use prefab::{
    apply_delta, capture_delta, AddedComponent, AddedNode, PrefabDelta, PrefabMetadata,
    PropertyOverride, RemovedComponent, NODE_TARGET,
};
pub use reader::{queue_pending, read_component, read_value, PendingRef};
pub use reference::{ContentId, LiveRef, Reference, NULL_SCENE_ID};
pub use resolver::{from_reference, to_reference, Resolution};
pub use schema::{PropertyKind, PropertySchema, Schema, SchemaRegistry, StateHook};
pub use value::{coerce_scalar, ObjectValue, ScalarKind, Value};
pub use writer::{write_component, write_value};
