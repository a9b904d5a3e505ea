//! Per-operation save/load contexts.
//!
//! All pass-scoped state — the identity table, the deferred queue,
//! resolver scratch — lives on a context created at the start of one
//! save or load call and dropped at its end. Contexts are passed by
//! borrow into the visitor, so nested or overlapping operations are
//! impossible by construction and nothing leaks across calls.

use crate::assets::AssetPack;
use crate::defer::DeferredQueue;
use crate::identity::IdentityTable;
use crate::schema::SchemaRegistry;

/// State for one save operation.
pub struct SaveContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub assets: &'a AssetPack,
    pub identity: IdentityTable,
}

impl<'a> SaveContext<'a> {
    pub fn new(registry: &'a SchemaRegistry, assets: &'a AssetPack) -> Self {
        let mut identity = IdentityTable::new();
        identity.begin_pass();
        Self {
            registry,
            assets,
            identity,
        }
    }
}

/// State for one load operation.
pub struct LoadContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub assets: &'a AssetPack,
    pub identity: IdentityTable,
    pub queue: DeferredQueue,
}

impl<'a> LoadContext<'a> {
    pub fn new(registry: &'a SchemaRegistry, assets: &'a AssetPack) -> Self {
        let mut identity = IdentityTable::new();
        identity.begin_pass();
        Self {
            registry,
            assets,
            identity,
            queue: DeferredQueue::new(),
        }
    }
}
