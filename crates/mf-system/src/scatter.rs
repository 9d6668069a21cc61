//! Per-leaf gather/scatter instructions.

use mf_components::lock;
use mf_core::Io;
use mf_graph::{CompRole, NameInfo, RNode, ReducedGraph};
use tracing::debug;

use crate::bindings::Bindings;
use crate::error::{SystemError, SystemResult};
use crate::layout::{SlotKind, VarLayout};
use crate::system::{InputLink, Leaf, OutputLink, OutputMode, ScatterPlan, System};

fn owned_by(info: &NameInfo, comp: &str) -> bool {
    info.owner.as_deref() == Some(comp)
}

fn info<'r>(rg: &'r ReducedGraph, name: &str) -> SystemResult<&'r NameInfo> {
    rg.name_info(name).ok_or_else(|| SystemError::Invariant {
        what: format!("no name info for '{name}'"),
    })
}

fn input_link(layout: &VarLayout, slot: usize, info: &NameInfo) -> SystemResult<InputLink> {
    let s = layout.slot(slot).ok_or_else(|| SystemError::Invariant {
        what: format!("slot {slot} out of range"),
    })?;
    Ok(InputLink {
        slot,
        offset: s.offset,
        size: s.size,
        var: info.local_base().to_string(),
        indices: info.indices.clone(),
    })
}

fn plan_for(leaf: &Leaf, rg: &ReducedGraph, layout: &VarLayout, bindings: &Bindings) -> SystemResult<ScatterPlan> {
    let node = RNode::Comp(leaf.comp.clone());
    let slot_of = |name: &str| {
        layout.index_of(name).ok_or_else(|| SystemError::Invariant {
            what: format!("'{name}' has no slot"),
        })
    };
    let mut plan = ScatterPlan::default();
    match leaf.role {
        CompRole::Component | CompRole::Pseudo => {
            let handle = bindings.comps.get(&leaf.comp).ok_or_else(|| {
                SystemError::config(format!("no component bound for '{}'", leaf.comp))
            })?;
            let (states, residuals): (Vec<String>, Vec<String>) = {
                let c = lock(handle)?;
                (
                    c.list_states().iter().map(|s| s.to_string()).collect(),
                    c.list_residuals().iter().map(|s| s.to_string()).collect(),
                )
            };
            for v in rg.predecessors(&node) {
                let RNode::Var(cv) = v else { continue };
                for name in cv.names() {
                    let i = info(rg, name)?;
                    if owned_by(i, &leaf.comp) && i.io == Io::In {
                        plan.inputs.push(input_link(layout, slot_of(name)?, i)?);
                    }
                }
            }
            for v in rg.successors(&node) {
                let RNode::Var(cv) = v else { continue };
                let i = info(rg, &cv.src)?;
                if !owned_by(i, &leaf.comp) || !matches!(i.io, Io::Out | Io::State) {
                    continue;
                }
                let slot = slot_of(&cv.src)?;
                let link = input_link(layout, slot, i)?;
                let kind = layout.slot(slot).map(|s| s.kind);
                let mode = match kind {
                    Some(SlotKind::State) => {
                        let local = i.local_base();
                        let pos = states.iter().position(|s| s == local);
                        let residual = pos.and_then(|p| residuals.get(p)).ok_or_else(|| {
                            SystemError::config(format!(
                                "state '{}' has no paired residual",
                                cv.src
                            ))
                        })?;
                        OutputMode::State {
                            residual: residual.clone(),
                        }
                    }
                    Some(SlotKind::Feedback) => OutputMode::Feedback,
                    _ => OutputMode::Explicit,
                };
                plan.outputs.push(OutputLink {
                    slot,
                    offset: link.offset,
                    size: link.size,
                    var: link.var,
                    indices: link.indices,
                    mode,
                });
            }
        }
        CompRole::InVar => {
            for v in rg.successors(&node) {
                let RNode::Var(cv) = v else { continue };
                let i = info(rg, &cv.src)?;
                if i.base != leaf.comp {
                    continue;
                }
                let link = input_link(layout, slot_of(&cv.src)?, i)?;
                plan.outputs.push(OutputLink {
                    slot: link.slot,
                    offset: link.offset,
                    size: link.size,
                    var: link.var,
                    indices: link.indices,
                    mode: OutputMode::Explicit,
                });
            }
        }
        CompRole::OutVar => {
            for v in rg.predecessors(&node) {
                let RNode::Var(cv) = v else { continue };
                for d in &cv.dests {
                    let i = info(rg, d)?;
                    if i.base == leaf.comp && i.owner.is_none() {
                        plan.inputs.push(input_link(layout, slot_of(d)?, i)?);
                    }
                }
            }
        }
        CompRole::Param | CompRole::Driver => {}
    }
    Ok(plan)
}

/// Bind handles and compute gather/scatter links for every leaf.
pub fn allocate_scatter_plans(root: &mut System, rg: &ReducedGraph, layout: &VarLayout, bindings: &Bindings) -> SystemResult<()> {
    for leaf in root.leaves_mut() {
        leaf.plan = plan_for(leaf, rg, layout, bindings)?;
        leaf.handle = match leaf.role {
            CompRole::Component | CompRole::Pseudo => bindings.comps.get(&leaf.comp).cloned(),
            CompRole::InVar | CompRole::OutVar => Some(bindings.boundary.clone()),
            CompRole::Param | CompRole::Driver => None,
        };
        debug!(
            leaf = leaf.comp.as_str(),
            inputs = leaf.plan.inputs.len(),
            outputs = leaf.plan.outputs.len(),
            "scatter plan"
        );
    }
    Ok(())
}
