//! Reference tagging and its wire shapes.
//!
//! A [`Reference`] is what ends up in the document: a scene-local id,
//! an external content id, or null. A [`LiveRef`] is the in-memory
//! counterpart held inside component state. The resolver converts
//! between the two; this module only owns the tagged unions and their
//! exact JSON shapes.
//!
//! Wire conventions (fixed for compatibility with older readers):
//!
//! - in-graph entity: `{"sceneID": <int>}`
//! - external content: `{"guid": "<id>", "fileId": <int64>}`
//! - null: `{"sceneID": -1}` rather than a bare `null`

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::graph::EntityRef;

/// Scene-local id sentinel for a null reference.
pub const NULL_SCENE_ID: i32 = -1;

/// Stable identifier for content stored outside the live graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId {
    pub guid: String,
    pub file_id: i64,
}

impl ContentId {
    pub fn new(guid: impl Into<String>, file_id: i64) -> Self {
        Self {
            guid: guid.into(),
            file_id,
        }
    }
}

/// A serialized reference. Exactly one tag is active.
#[derive(Clone, Debug, PartialEq)]
pub enum Reference {
    SceneLocal(i32),
    Content(ContentId),
    Null,
}

impl Reference {
    pub fn is_null(&self) -> bool {
        matches!(self, Reference::Null)
    }

    /// Encodes this reference into its wire shape.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Reference::SceneLocal(id) => json!({ "sceneID": id }),
            Reference::Content(content) => json!({
                "guid": content.guid,
                "fileId": content.file_id,
            }),
            Reference::Null => json!({ "sceneID": NULL_SCENE_ID }),
        }
    }

    /// Decodes a wire-shaped token into a reference, or `None` if the
    /// token does not look like a reference at all.
    pub fn from_json(token: &serde_json::Value) -> Option<Reference> {
        let obj = token.as_object()?;
        if let Some(id) = obj.get("sceneID").and_then(serde_json::Value::as_i64) {
            let id = i32::try_from(id).ok()?;
            if id < 0 {
                return Some(Reference::Null);
            }
            return Some(Reference::SceneLocal(id));
        }
        if let Some(guid) = obj.get("guid").and_then(serde_json::Value::as_str) {
            let file_id = obj.get("fileId").and_then(serde_json::Value::as_i64)?;
            return Some(Reference::Content(ContentId::new(guid, file_id)));
        }
        None
    }

    /// Whether a JSON token has the shape of a reference.
    pub fn looks_like_reference(token: &serde_json::Value) -> bool {
        token
            .as_object()
            .map(|obj| obj.contains_key("sceneID") || obj.contains_key("guid"))
            .unwrap_or(false)
    }
}

/// The in-memory side of a reference slot.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveRef {
    Null,
    /// A node or component in the live graph.
    Entity(EntityRef),
    /// External content, resolved through the asset pack.
    Asset(ContentId),
}

impl LiveRef {
    pub fn is_null(&self) -> bool {
        matches!(self, LiveRef::Null)
    }
}
