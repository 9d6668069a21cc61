//! Flat value storage backing a component's declared variables.

use std::collections::BTreeMap;

use mf_core::VarMeta;

use crate::error::{ComponentError, ComponentResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarStore {
    metas: Vec<VarMeta>,
    values: BTreeMap<String, Vec<f64>>,
}

impl VarStore {
    /// Every variable starts at zero, clamped into its bounds.
    pub fn new(metas: Vec<VarMeta>) -> Self {
        let values = metas
            .iter()
            .map(|m| {
                let v = m.low.unwrap_or(0.0).max(0.0).min(m.high.unwrap_or(f64::INFINITY));
                (m.name.clone(), vec![v; m.size()])
            })
            .collect();
        Self { metas, values }
    }

    pub fn metas(&self) -> &[VarMeta] {
        &self.metas
    }

    pub fn push(&mut self, meta: VarMeta) -> ComponentResult<()> {
        if self.values.contains_key(&meta.name) {
            return Err(ComponentError::InvalidArg {
                what: format!("variable '{}' declared twice", meta.name),
            });
        }
        self.values.insert(meta.name.clone(), vec![0.0; meta.size()]);
        self.metas.push(meta);
        Ok(())
    }

    pub fn get(&self, name: &str) -> ComponentResult<&[f64]> {
        self.values
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ComponentError::UnknownVariable {
                name: name.to_string(),
            })
    }

    pub fn set(&mut self, name: &str, value: &[f64]) -> ComponentResult<()> {
        let slot = self
            .values
            .get_mut(name)
            .ok_or_else(|| ComponentError::UnknownVariable {
                name: name.to_string(),
            })?;
        if slot.len() != value.len() {
            return Err(ComponentError::SizeMismatch {
                name: name.to_string(),
                expected: slot.len(),
                got: value.len(),
            });
        }
        slot.copy_from_slice(value);
        Ok(())
    }

    /// First entry of a variable; scalars have exactly one.
    pub fn scalar(&self, name: &str) -> ComponentResult<f64> {
        self.get(name)?
            .first()
            .copied()
            .ok_or_else(|| ComponentError::InvalidArg {
                what: format!("'{name}' is empty"),
            })
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) -> ComponentResult<()> {
        self.set(name, &[value])
    }

    pub fn size(&self, name: &str) -> Option<usize> {
        self.values.get(name).map(Vec::len)
    }
}
