//! Dependency graph over resource addresses.
//!
//! Addresses are stored once in a table and referred to by index; edges are
//! index pairs. An edge `r -> d` means `r` depends on `d`.

use crate::error::{ConvergeError, Result};
use crate::model::Address;
use crate::spec::Spec;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet, VecDeque};
use std::fmt;

/// A structural problem in a declared dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// `from` depends on an address that is not declared
    DanglingDependency { from: Address, missing: Address },
    /// Addresses forming a cycle, ending with the start address again
    Cycle(Vec<Address>),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingDependency { from, missing } => {
                write!(f, "{from} depends on undeclared resource {missing}")
            }
            Self::Cycle(path) => {
                let rendered: Vec<String> = path.iter().map(ToString::to_string).collect();
                write!(f, "dependency cycle: {}", rendered.join(" -> "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Arena-backed directed graph of addresses
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<Address>,
    index: BTreeMap<Address, usize>,
    /// Sorted dependency indices per node
    dependencies: Vec<Vec<usize>>,
    /// Sorted dependent indices per node
    dependents: Vec<Vec<usize>>,
    /// References to addresses outside the node table
    dangling: Vec<(usize, Address)>,
}

impl DependencyGraph {
    /// Build from `(address, depends_on)` pairs.
    ///
    /// Node indices follow address order, so the smallest index is also the
    /// lexicographically smallest address.
    pub fn build<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a Address, &'a BTreeSet<Address>)>,
    {
        let entries: BTreeMap<&Address, &BTreeSet<Address>> = entries.into_iter().collect();

        let nodes: Vec<Address> = entries.keys().map(|a| (*a).clone()).collect();
        let index: BTreeMap<Address, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.clone(), i))
            .collect();

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        let mut dangling = Vec::new();

        for (from, deps) in entries.values().enumerate() {
            for dep in deps.iter() {
                match index.get(dep) {
                    Some(&to) => {
                        dependencies[from].push(to);
                        dependents[to].push(from);
                    }
                    None => dangling.push((from, dep.clone())),
                }
            }
        }
        for list in dependencies.iter_mut().chain(dependents.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        Self {
            nodes,
            index,
            dependencies,
            dependents,
            dangling,
        }
    }

    pub fn from_spec(spec: &Spec) -> Self {
        Self::build(spec.resources.iter().map(|(a, r)| (a, &r.depends_on)))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.index.get(address).copied()
    }

    pub fn address(&self, index: usize) -> &Address {
        &self.nodes[index]
    }

    pub fn addresses(&self) -> &[Address] {
        &self.nodes
    }

    pub fn dependencies_of(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn dependents_of(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// Every node that depends on `index` directly or transitively
    pub fn transitive_dependents(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.dependents[index].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.dependents[next].iter().copied());
            }
        }
        seen
    }

    /// All structural errors: dangling references first, then cycles
    pub fn validate(&self) -> Vec<GraphError> {
        let mut errors: Vec<GraphError> = self
            .dangling
            .iter()
            .map(|(from, missing)| GraphError::DanglingDependency {
                from: self.nodes[*from].clone(),
                missing: missing.clone(),
            })
            .collect();

        errors.extend(self.find_cycles().into_iter().map(GraphError::Cycle));
        errors
    }

    /// Distinct cycles, each ending with its start address.
    ///
    /// A three-colour DFS reports one cycle per back edge. Nodes that sit on a
    /// cycle but were not covered by any back edge then get the shortest cycle
    /// through them, so every cycle participant is reported at least once.
    pub fn find_cycles(&self) -> Vec<Vec<Address>> {
        let n = self.nodes.len();
        let mut marks = vec![Mark::White; n];
        let mut found: Vec<Vec<usize>> = Vec::new();
        let mut seen: HashSet<Vec<usize>> = HashSet::new();

        for root in 0..n {
            if marks[root] != Mark::White {
                continue;
            }
            marks[root] = Mark::Gray;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let Some(&dep) = self.dependencies[node].get(frame.1) else {
                    marks[node] = Mark::Black;
                    stack.pop();
                    continue;
                };
                frame.1 += 1;

                match marks[dep] {
                    Mark::White => {
                        marks[dep] = Mark::Gray;
                        stack.push((dep, 0));
                    }
                    Mark::Gray => {
                        if let Some(pos) = stack.iter().position(|(i, _)| *i == dep) {
                            let cycle: Vec<usize> = stack[pos..].iter().map(|(i, _)| *i).collect();
                            record_cycle(cycle, &mut found, &mut seen);
                        }
                    }
                    Mark::Black => {}
                }
            }
        }

        let mut covered: HashSet<usize> = found.iter().flatten().copied().collect();
        for node in 0..n {
            if covered.contains(&node) {
                continue;
            }
            if let Some(cycle) = self.shortest_cycle_through(node) {
                covered.extend(cycle.iter().copied());
                record_cycle(cycle, &mut found, &mut seen);
            }
        }

        found
            .into_iter()
            .map(|cycle| {
                let mut path: Vec<Address> = cycle.iter().map(|&i| self.nodes[i].clone()).collect();
                path.push(self.nodes[cycle[0]].clone());
                path
            })
            .collect()
    }

    /// BFS from `start` back to itself along dependency edges
    fn shortest_cycle_through(&self, start: usize) -> Option<Vec<usize>> {
        let mut parent: BTreeMap<usize, usize> = BTreeMap::new();
        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::from([start]);

        while let Some(node) = queue.pop_front() {
            for &dep in &self.dependencies[node] {
                if dep == start {
                    let mut cycle = vec![node];
                    let mut cursor = node;
                    while cursor != start {
                        cursor = parent[&cursor];
                        cycle.push(cursor);
                    }
                    cycle.reverse();
                    return Some(cycle);
                }
                if visited.insert(dep) {
                    parent.insert(dep, node);
                    queue.push_back(dep);
                }
            }
        }
        None
    }

    /// Kahn levels: level `i` holds addresses whose dependencies all sit in
    /// earlier levels. Fails with every cycle if the graph is not acyclic.
    pub fn topological_levels(&self) -> Result<Vec<BTreeSet<Address>>> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut current: Vec<usize> = (0..self.len()).filter(|&i| remaining[i] == 0).collect();
        let mut levels = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next = Vec::new();
            for &node in &current {
                for &dependent in &self.dependents[node] {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            levels.push(current.iter().map(|&i| self.nodes[i].clone()).collect());
            current = next;
        }

        self.ensure_all_placed(placed)?;
        Ok(levels)
    }

    /// Stable topological order: dependencies first, ties broken by address
    pub fn topological_order(&self) -> Result<Vec<Address>> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut heap: BinaryHeap<Reverse<usize>> = (0..self.len())
            .filter(|&i| remaining[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(Reverse(node)) = heap.pop() {
            order.push(self.nodes[node].clone());
            for &dependent in &self.dependents[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    heap.push(Reverse(dependent));
                }
            }
        }

        self.ensure_all_placed(order.len())?;
        Ok(order)
    }

    fn ensure_all_placed(&self, placed: usize) -> Result<()> {
        if placed == self.len() {
            return Ok(());
        }
        Err(ConvergeError::Dependency {
            errors: self
                .find_cycles()
                .into_iter()
                .map(GraphError::Cycle)
                .collect(),
        })
    }
}

/// Keep a cycle unless a rotation of it was already recorded
fn record_cycle(cycle: Vec<usize>, found: &mut Vec<Vec<usize>>, seen: &mut HashSet<Vec<usize>>) {
    let Some(min_pos) = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, i)| **i)
        .map(|(pos, _)| pos)
    else {
        return;
    };
    let mut canonical = cycle[min_pos..].to_vec();
    canonical.extend_from_slice(&cycle[..min_pos]);

    if seen.insert(canonical.clone()) {
        found.push(canonical);
    }
}

/// Validate a spec's dependency graph, reporting every problem found
pub fn validate(spec: &Spec) -> Vec<GraphError> {
    DependencyGraph::from_spec(spec).validate()
}
