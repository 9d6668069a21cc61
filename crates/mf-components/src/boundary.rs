//! Values of a model's boundary (interface) variables.

use mf_core::VarMeta;

use crate::error::ComponentResult;
use crate::store::VarStore;
use crate::traits::Component;

/// Holds boundary inputs and outputs. Executing it does nothing; boundary
/// stubs in the system tree read from and write into it.
#[derive(Debug, Clone, Default)]
pub struct BoundaryStore {
    store: VarStore,
}

impl BoundaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, meta: VarMeta) -> ComponentResult<()> {
        self.store.push(meta)
    }
}

impl Component for BoundaryStore {
    fn variables(&self) -> &[VarMeta] {
        self.store.metas()
    }

    fn get(&self, name: &str) -> ComponentResult<&[f64]> {
        self.store.get(name)
    }

    fn set(&mut self, name: &str, value: &[f64]) -> ComponentResult<()> {
        self.store.set(name, value)
    }

    fn execute(&mut self) -> ComponentResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_values_round_trip() {
        let mut b = BoundaryStore::new();
        b.declare(VarMeta::input("a").with_shape([2])).unwrap();
        b.declare(VarMeta::output("z")).unwrap();
        b.set("a", &[1.0, 2.0]).unwrap();
        b.execute().unwrap();
        assert_eq!(b.get("a").unwrap(), &[1.0, 2.0]);
        assert_eq!(b.list_outputs(), vec!["z"]);
        assert!(b.declare(VarMeta::input("z")).is_err());
    }
}
