//! Storage slots and the `u`/`f`/`du`/`df` vectors.
//!
//! Every collapsed variable node of the reduced graph owns one contiguous
//! slot. All names in a node (the source and each destination) alias the
//! same slot.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use mf_components::lock;
use mf_core::Io;
use mf_graph::{CollapsedVar, CompRole, NameInfo, RNode, ReducedGraph};
use nalgebra::DVector;
use tracing::debug;

use crate::assemble::Assembly;
use crate::bindings::Bindings;
use crate::error::{SystemError, SystemResult};

/// How a slot's residual entry is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Written by its producer; residual is zero.
    Explicit,
    /// Produced across a severed edge; residual is `F(u) - u`.
    Feedback,
    /// Driver parameter; residual is its paired constraint.
    Param,
    /// Component state; residual is the negated paired residual.
    State,
    /// Nothing writes it; holds its initial value.
    Unproduced,
}

impl SlotKind {
    /// Slots a nonlinear solver iterates on.
    pub fn is_unknown(self) -> bool {
        matches!(self, SlotKind::Feedback | SlotKind::Param | SlotKind::State)
    }
}

/// Where a slot's initial value is read from.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSource {
    /// Owning component; `None` for boundary variables.
    pub owner: Option<String>,
    pub var: String,
    pub indices: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub node: CollapsedVar,
    pub offset: usize,
    pub size: usize,
    pub kind: SlotKind,
    pub noflat: bool,
    pub producer: Option<String>,
    pub source: SlotSource,
}

impl Slot {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarLayout {
    slots: Vec<Slot>,
    by_name: BTreeMap<String, usize>,
    len: usize,
}

impl VarLayout {
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Slot index holding `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn slot_of(&self, name: &str) -> Option<&Slot> {
        self.index_of(name).and_then(|i| self.slots.get(i))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read every slot's value from its owner into `u`.
    pub fn load(&self, vecs: &mut VecSet, bindings: &Bindings) -> SystemResult<()> {
        for slot in &self.slots {
            self.load_slot(slot, vecs, bindings)?;
        }
        Ok(())
    }

    fn load_slot(&self, slot: &Slot, vecs: &mut VecSet, bindings: &Bindings) -> SystemResult<()> {
        let src = &slot.source;
        let handle = bindings.owner(src.owner.as_deref()).ok_or_else(|| {
            SystemError::config(format!(
                "no component bound for '{}'",
                src.owner.as_deref().unwrap_or_default()
            ))
        })?;
        let comp = lock(handle)?;
        let full = comp.get(&src.var)?;
        for k in 0..slot.size {
            let i = src.indices.as_ref().map_or(k, |idx| idx[k]);
            vecs.u[slot.offset + k] = full.get(i).copied().ok_or_else(|| SystemError::Invariant {
                what: format!("'{}' has no entry {i}", src.var),
            })?;
        }
        Ok(())
    }
}

/// Flat numeric buffers shared by the whole system tree.
#[derive(Debug, Clone, PartialEq)]
pub struct VecSet {
    pub u: DVector<f64>,
    pub f: DVector<f64>,
    pub du: DVector<f64>,
    pub df: DVector<f64>,
}

impl VecSet {
    pub fn zeros(n: usize) -> Self {
        Self {
            u: DVector::zeros(n),
            f: DVector::zeros(n),
            du: DVector::zeros(n),
            df: DVector::zeros(n),
        }
    }

    pub fn len(&self) -> usize {
        self.u.len()
    }

    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }
}

fn name_size(rg: &ReducedGraph, name: &str, info: &NameInfo) -> SystemResult<usize> {
    if info.attribute {
        return Err(SystemError::config(format!(
            "'{name}' has no numeric layout"
        )));
    }
    match &info.indices {
        Some(idx) => Ok(idx.len()),
        None => rg
            .meta(&info.base)
            .map(|m| m.size())
            .ok_or_else(|| SystemError::config(format!("no metadata for '{}'", info.base))),
    }
}

/// Assign one slot per collapsed variable node and classify it.
pub fn allocate_vectors(rg: &ReducedGraph, assembly: &Assembly) -> SystemResult<(VarLayout, VecSet)> {
    let severed: BTreeSet<(&str, &str)> = assembly
        .severed
        .iter()
        .map(|e| (e.src.as_str(), e.dst.as_str()))
        .collect();
    let params: BTreeSet<&str> = assembly.params.iter().map(|p| p.target.as_str()).collect();

    let mut layout = VarLayout::default();
    for cv in rg.vars() {
        let node = RNode::Var(cv.clone());
        let info = rg.name_info(&cv.src).ok_or_else(|| SystemError::Invariant {
            what: format!("no name info for '{}'", cv.src),
        })?;
        let size = name_size(rg, &cv.src, info)?;
        for d in &cv.dests {
            let dinfo = rg.name_info(d).ok_or_else(|| SystemError::Invariant {
                what: format!("no name info for '{d}'"),
            })?;
            let dsize = name_size(rg, d, dinfo)?;
            if dsize != size {
                return Err(SystemError::config(format!(
                    "'{}' has size {size} but is connected to '{d}' of size {dsize}",
                    cv.src
                )));
            }
        }

        let producer = rg
            .predecessors(&node)
            .find_map(|p| match p {
                RNode::Comp(c) if rg.role(c) != Some(CompRole::Driver) => Some(c.clone()),
                _ => None,
            });
        let is_param = cv.names().any(|n| params.contains(n));
        let kind = match (&producer, is_param) {
            (Some(p), true) => {
                return Err(SystemError::config(format!(
                    "parameter target '{}' is already produced by '{p}'",
                    cv.src
                )));
            }
            (None, true) => SlotKind::Param,
            (None, false) => SlotKind::Unproduced,
            (Some(p), false) => {
                let fed_back = rg.successors(&node).any(|s| match s {
                    RNode::Comp(c) => severed.contains(&(p.as_str(), c.as_str())),
                    RNode::Var(_) => false,
                });
                if info.io == Io::State && info.owner.as_deref() == Some(p.as_str()) {
                    SlotKind::State
                } else if fed_back {
                    SlotKind::Feedback
                } else {
                    SlotKind::Explicit
                }
            }
        };

        let index = layout.slots.len();
        for n in cv.names() {
            layout.by_name.insert(n.to_string(), index);
        }
        layout.slots.push(Slot {
            node: cv.clone(),
            offset: layout.len,
            size,
            kind,
            noflat: rg.meta(&info.base).is_some_and(|m| m.noflat),
            producer,
            source: SlotSource {
                owner: info.owner.clone(),
                var: info.local_base().to_string(),
                indices: info.indices.clone(),
            },
        });
        layout.len += size;
    }
    debug!(slots = layout.slots.len(), entries = layout.len, "allocated vectors");
    let vecs = VecSet::zeros(layout.len);
    Ok((layout, vecs))
}
