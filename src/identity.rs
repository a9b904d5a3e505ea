//! Pass-scoped entity identity table.
//!
//! Scene-local ids are a dense, zero-based sequence handed out in the
//! canonical traversal order (see `SceneGraph::visit_entities`). The
//! table lives for exactly one save or load pass; ids are never stable
//! across passes, only within one.

use std::collections::HashMap;

use crate::graph::EntityRef;

/// Sentinel returned by [`IdentityTable::id_of`] for unknown entities.
pub const INVALID_ID: i32 = -1;

/// Assigns and looks up scene-local ids for graph entities.
#[derive(Default)]
pub struct IdentityTable {
    by_entity: HashMap<EntityRef, i32>,
    by_id: Vec<EntityRef>,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all counters; call at the start of a save or load pass.
    pub fn begin_pass(&mut self) {
        self.by_entity.clear();
        self.by_id.clear();
    }

    /// Assigns the next sequential id to `entity`.
    ///
    /// Adding the same entity twice is a traversal bug; it is logged
    /// and the existing id returned so the pass can continue.
    pub fn add(&mut self, entity: EntityRef) -> i32 {
        if let Some(&existing) = self.by_entity.get(&entity) {
            log::error!("entity added to identity table twice (id {existing})");
            return existing;
        }
        let id = self.by_id.len() as i32;
        self.by_id.push(entity);
        self.by_entity.insert(entity, id);
        id
    }

    /// The id assigned to `entity` this pass, or [`INVALID_ID`].
    pub fn id_of(&self, entity: EntityRef) -> i32 {
        self.by_entity.get(&entity).copied().unwrap_or(INVALID_ID)
    }

    /// The entity assigned `id` this pass, if any.
    pub fn entity_of(&self, id: i32) -> Option<EntityRef> {
        if id < 0 {
            return None;
        }
        self.by_id.get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
