//! Run-time objects behind the names of a reduced graph.

use std::collections::BTreeMap;

use mf_components::{BoundaryStore, ComponentHandle, handle};

/// Component handles by name plus the boundary value store.
#[derive(Clone)]
pub struct Bindings {
    pub comps: BTreeMap<String, ComponentHandle>,
    pub boundary: ComponentHandle,
}

impl Bindings {
    pub fn new(comps: BTreeMap<String, ComponentHandle>, boundary: ComponentHandle) -> Self {
        Self { comps, boundary }
    }

    /// Handle owning a variable: its component, or the boundary store when
    /// `owner` is `None`.
    pub fn owner(&self, owner: Option<&str>) -> Option<&ComponentHandle> {
        match owner {
            Some(c) => self.comps.get(c),
            None => Some(&self.boundary),
        }
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self::new(BTreeMap::new(), handle(BoundaryStore::new()))
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindings")
            .field("comps", &self.comps.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
