//! Group expansion and load-order resolution.

use indexmap::{IndexMap, IndexSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::module::{ModuleDescriptor, ModuleRegistry};

use super::graph::{DepEdge, DependencyGraph};

/// Anything that can produce a descriptor for a module name.
pub trait DescriptorSource {
    fn descriptor_of(&self, name: &str) -> Option<ModuleDescriptor>;
}

impl DescriptorSource for ModuleRegistry {
    fn descriptor_of(&self, name: &str) -> Option<ModuleDescriptor> {
        self.descriptor(name)
    }
}

impl DescriptorSource for IndexMap<String, ModuleDescriptor> {
    fn descriptor_of(&self, name: &str) -> Option<ModuleDescriptor> {
        self.get(name).cloned()
    }
}

impl DescriptorSource for [ModuleDescriptor] {
    fn descriptor_of(&self, name: &str) -> Option<ModuleDescriptor> {
        self.iter().find(|d| d.name == name).cloned()
    }
}

// ── Group expansion ───────────────────────────────────────────────────

/// Replace every module group by its children, recursively.
///
/// Children are looked up in `source` and inherit the parent's declared path
/// when they declare none. Group names never appear in the result, and a
/// module reached through several groups is kept once, at its first
/// position. A group that contains itself, directly or transitively, is a
/// `CyclicModuleGroup` error.
pub fn expand_groups<S>(descriptors: &[ModuleDescriptor], source: &S) -> EngineResult<Vec<ModuleDescriptor>>
where
    S: DescriptorSource + ?Sized,
{
    let mut out = Vec::new();
    let mut seen = IndexSet::new();
    let mut stack = Vec::new();
    for d in descriptors {
        expand_into(d.clone(), source, &mut stack, &mut out, &mut seen)?;
    }
    Ok(out)
}

fn expand_into<S>(
    descriptor: ModuleDescriptor,
    source: &S,
    stack: &mut Vec<String>,
    out: &mut Vec<ModuleDescriptor>,
    seen: &mut IndexSet<String>,
) -> EngineResult<()>
where
    S: DescriptorSource + ?Sized,
{
    if let Some(pos) = stack.iter().position(|n| *n == descriptor.name) {
        let mut chain = stack[pos..].to_vec();
        chain.push(descriptor.name);
        return Err(EngineError::CyclicModuleGroup { chain });
    }
    if !descriptor.is_group() {
        if seen.insert(descriptor.name.clone()) {
            out.push(descriptor);
        } else {
            debug!(module = %descriptor.name, "module reached through several groups; keeping first");
        }
        return Ok(());
    }

    stack.push(descriptor.name.clone());
    for child in &descriptor.children {
        let mut child_descriptor = source
            .descriptor_of(child)
            .ok_or_else(|| EngineError::UnknownModule(child.clone()))?;
        if child_descriptor.path.is_none() {
            child_descriptor.path = descriptor.path.clone();
        }
        expand_into(child_descriptor, source, stack, out, seen)?;
    }
    stack.pop();
    Ok(())
}

// ── Load order ────────────────────────────────────────────────────────

/// Drop repeated module names, keeping the first occurrence of each.
pub fn dedupe(descriptors: &[ModuleDescriptor]) -> Vec<ModuleDescriptor> {
    let mut seen = IndexSet::new();
    let mut out = Vec::with_capacity(descriptors.len());
    for d in descriptors {
        if seen.insert(d.name.as_str()) {
            out.push(d.clone());
        } else {
            warn!(module = %d.name, "duplicate module; keeping first occurrence");
        }
    }
    out
}

/// Compute the order in which modules are initialized.
///
/// Package and child edges are always honoured; a cycle among them is a
/// `CyclicDependency` error. Object edges are honoured unless they lie on a
/// cycle, in which case the modules on that cycle keep the caller's
/// relative order. Among modules with no ordering constraint between them,
/// the one the caller listed first comes first.
pub fn resolve_load_order(descriptors: &[ModuleDescriptor]) -> EngineResult<Vec<String>> {
    let unique = dedupe(descriptors);
    let graph = DependencyGraph::build(&unique);

    let hard_cycles = graph.cycles_where(|e| e.kind.is_hard());
    if let Some(cycle) = hard_cycles.into_iter().next() {
        return Err(EngineError::CyclicDependency { modules: cycle });
    }

    // Object edges inside a strongly connected component carry no usable order.
    let mut component: IndexMap<&str, usize> = IndexMap::new();
    for (i, cycle) in graph.cycles().iter().enumerate() {
        for name in cycle {
            if let Some(n) = graph.nodes().iter().find(|n| *n == name) {
                component.insert(n.as_str(), i);
            }
        }
    }
    let same_component = |e: &DepEdge| match (component.get(e.from.as_str()), component.get(e.to.as_str())) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };

    let position: IndexMap<&str, usize> = unique
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();
    let n = unique.len();
    let mut in_degree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for edge in graph.edges() {
        if !edge.kind.is_hard() && same_component(edge) {
            debug!(from = %edge.from, to = %edge.to, kind = ?edge.kind, "cyclic object dependency; using caller order");
            continue;
        }
        if let (Some(&a), Some(&b)) = (position.get(edge.from.as_str()), position.get(edge.to.as_str())) {
            if !successors[a].contains(&b) {
                successors[a].push(b);
                in_degree[b] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(unique[i].name.clone());
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() != n {
        let placed: IndexSet<&str> = order.iter().map(String::as_str).collect();
        let modules = unique
            .iter()
            .filter(|d| !placed.contains(d.name.as_str()))
            .map(|d| d.name.clone())
            .collect();
        return Err(EngineError::CyclicDependency { modules });
    }
    Ok(order)
}
