//! Registry of evaluated scopes

use crate::models::ScopeDefinition;
use dashmap::DashMap;
use tracing::{debug, info};

/// Active scopes keyed by scope id
#[derive(Debug, Default)]
pub struct ScopeRegistry {
    scopes: DashMap<String, ScopeDefinition>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a scope; returns true if it was new
    pub fn register(&self, scope: ScopeDefinition) -> bool {
        let scope_id = scope.scope_id.clone();
        let is_new = self.scopes.insert(scope_id.clone(), scope).is_none();
        if is_new {
            info!(scope_id = %scope_id, "Registered scope");
        } else {
            debug!(scope_id = %scope_id, "Updated scope definition");
        }
        is_new
    }

    /// Remove a scope; returns its definition if it was active
    pub fn deregister(&self, scope_id: &str) -> Option<ScopeDefinition> {
        let removed = self.scopes.remove(scope_id).map(|(_, scope)| scope);
        if removed.is_some() {
            info!(scope_id = %scope_id, "Deregistered scope");
        }
        removed
    }

    pub fn get(&self, scope_id: &str) -> Option<ScopeDefinition> {
        self.scopes.get(scope_id).map(|s| s.clone())
    }

    /// Snapshot of every active scope, sorted by id
    pub fn list(&self) -> Vec<ScopeDefinition> {
        let mut scopes: Vec<ScopeDefinition> = self.scopes.iter().map(|s| s.clone()).collect();
        scopes.sort_by(|a, b| a.scope_id.cmp(&b.scope_id));
        scopes
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
