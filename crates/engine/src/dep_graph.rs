//! Dependency graph for formula cells.
//!
//! Tracks dependencies (cells a formula reads) and dependents (cells that read
//! a given cell) for one sheet.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a dependency of B)
//! ```
//!
//! This makes "what must be recomputed if I change X?" a walk over outgoing edges.

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_id::CellId;
use crate::formula::ReferenceExtractor;
use crate::recalc::CycleReport;
use crate::sheet::Sheet;

/// Per-sheet dependency graph.
///
/// Maintains bidirectional adjacency for O(1) lookups:
/// - `deps[B]` = cells that B reads (dependencies)
/// - `dependents[A]` = cells that read A
///
/// # Invariants
///
/// 1. **Inverse mappings:** If A ∈ deps[B] then B ∈ dependents[A], and vice versa.
/// 2. **No dangling entries:** Empty sets are removed, not stored.
/// 3. **No duplicate edges:** Set semantics enforced by FxHashSet.
///
/// The graph is never persisted; [`DepGraph::build`] reconstructs it from the
/// formulas in a sheet.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    deps: FxHashMap<CellId, FxHashSet<CellId>>,
    dependents: FxHashMap<CellId, FxHashSet<CellId>>,
}

/// Result of ordering a subset of the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopoOrder {
    /// Cells in evaluation order: every cell follows its in-subset dependencies.
    pub order: Vec<CellId>,
    /// Cells that could not be ordered (on or downstream of a cycle), sorted.
    /// [`DepGraph::cycle_members`] separates the two.
    pub unorderable: Vec<CellId>,
}

impl DepGraph {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for a sheet: one `set_dependencies` per formula cell.
    pub fn build<X: ReferenceExtractor + ?Sized>(sheet: &Sheet, extractor: &X) -> Self {
        let mut graph = Self::new();
        for cell_id in sheet.formula_cells() {
            if let Some(formula) = sheet.get(cell_id).and_then(|c| c.formula.as_deref()) {
                graph.set_dependencies(cell_id, &extractor.extract(formula));
            }
        }
        log::info!(
            "Built dependency graph for '{}': {} formula cells, {} referenced cells",
            sheet.name,
            graph.formula_cell_count(),
            graph.referenced_cell_count()
        );
        graph
    }

    /// Returns the cells this cell reads.
    pub fn dependencies(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.deps.get(&cell).into_iter().flat_map(|s| s.iter().copied())
    }

    /// Returns the cells that read this cell (direct dependents only).
    pub fn dependents(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.dependents.get(&cell).into_iter().flat_map(|s| s.iter().copied())
    }

    /// Returns true if the cell has outgoing dependency edges.
    pub fn has_dependencies(&self, cell: CellId) -> bool {
        self.deps.contains_key(&cell)
    }

    /// Returns true if the cell appears on either side of any edge.
    pub fn contains(&self, cell: CellId) -> bool {
        self.deps.contains_key(&cell) || self.dependents.contains_key(&cell)
    }

    /// Number of cells with at least one dependency.
    pub fn formula_cell_count(&self) -> usize {
        self.deps.len()
    }

    /// Number of cells read by at least one formula.
    pub fn referenced_cell_count(&self) -> usize {
        self.dependents.len()
    }

    /// Replace all outgoing edges of `cell` with `refs`.
    ///
    /// Old edges (and the matching dependent-side entries on the old targets)
    /// are removed first. Targets need not exist in the cell store: a forward
    /// reference to an empty cell is a legal edge. Cycles are not rejected
    /// here; see [`DepGraph::has_circular`].
    pub fn set_dependencies(&mut self, cell: CellId, refs: &[CellId]) {
        self.remove_dependencies(cell);

        if refs.is_empty() {
            return;
        }

        let new_deps: FxHashSet<CellId> = refs.iter().copied().collect();
        for dep in &new_deps {
            self.dependents.entry(*dep).or_default().insert(cell);
        }
        self.deps.insert(cell, new_deps);
    }

    /// Clear all outgoing edges of `cell` (formula removed or cell deleted).
    ///
    /// Edges pointing into `cell` are left alone: other formulas still read
    /// its (now blank) value.
    pub fn remove_dependencies(&mut self, cell: CellId) {
        let Some(old_deps) = self.deps.remove(&cell) else {
            return;
        };
        for dep in old_deps {
            if let Some(set) = self.dependents.get_mut(&dep) {
                set.remove(&cell);
                if set.is_empty() {
                    self.dependents.remove(&dep);
                }
            }
        }
    }

    /// Would giving `cell` the dependencies `new_refs` close a cycle?
    ///
    /// Pure query over the existing edges.
    pub fn has_circular(&self, cell: CellId, new_refs: &[CellId]) -> bool {
        self.would_create_cycle(cell, new_refs).is_some()
    }

    /// Reporting form of [`DepGraph::has_circular`].
    ///
    /// From each new ref, walks existing dependency edges; reaching `cell`
    /// means the new edge would complete a loop. The cell's own current edges
    /// are ignored since they are about to be replaced.
    pub fn would_create_cycle(&self, cell: CellId, new_refs: &[CellId]) -> Option<CycleReport> {
        if new_refs.contains(&cell) {
            return Some(CycleReport::self_reference(cell));
        }

        let mut parent: FxHashMap<CellId, CellId> = FxHashMap::default();
        let mut visited: FxHashSet<CellId> = FxHashSet::default();

        for &start in new_refs {
            if !visited.insert(start) {
                continue;
            }
            let mut stack = vec![start];

            while let Some(current) = stack.pop() {
                if current == cell {
                    continue;
                }
                for next in self.dependencies(current) {
                    if next == cell {
                        // Reconstruct start → ... → current, then close the loop
                        let mut path = vec![cell, current];
                        let mut at = current;
                        while let Some(&p) = parent.get(&at) {
                            path.push(p);
                            at = p;
                        }
                        path.push(cell);
                        path.reverse();
                        return Some(CycleReport::cycle(path));
                    }
                    if visited.insert(next) {
                        parent.insert(next, current);
                        stack.push(next);
                    }
                }
            }
        }

        None
    }

    /// Transitive closure of dependents of `cell`, including `cell` itself.
    pub fn affected_closure(&self, cell: CellId) -> FxHashSet<CellId> {
        let mut affected = FxHashSet::default();
        let mut queue = VecDeque::new();
        affected.insert(cell);
        queue.push_back(cell);

        while let Some(current) = queue.pop_front() {
            for dep in self.dependents(current) {
                if affected.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }

        affected
    }

    /// Order `subset` so every cell follows its dependencies inside the subset.
    ///
    /// Kahn's algorithm over edges restricted to the subset; ties break in
    /// row-major order for determinism. Cells left over (a cycle, or anything
    /// fed by one) are returned in `unorderable`.
    pub fn topo_order(&self, subset: &FxHashSet<CellId>) -> TopoOrder {
        let mut in_degree: FxHashMap<CellId, usize> = FxHashMap::default();
        for &cell in subset {
            let count = self.dependencies(cell).filter(|d| subset.contains(d)).count();
            in_degree.insert(cell, count);
        }

        let mut ready: BTreeSet<CellId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&cell, _)| cell)
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(cell) = ready.pop_first() {
            order.push(cell);
            for dep in self.dependents(cell) {
                if let Some(deg) = in_degree.get_mut(&dep) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.insert(dep);
                    }
                }
            }
        }

        let mut unorderable = Vec::new();
        if order.len() < subset.len() {
            let ordered: FxHashSet<CellId> = order.iter().copied().collect();
            unorderable = subset.iter().filter(|c| !ordered.contains(c)).copied().collect();
            unorderable.sort();
        }

        TopoOrder { order, unorderable }
    }

    // =========================================================================
    // Cycle Membership (Tarjan's SCC)
    // =========================================================================

    /// Cells of `subset` that sit on a cycle inside `subset`, sorted.
    ///
    /// A cell is a member when its strongly connected component has more than
    /// one cell, or it reads itself. Cells that merely read from a cycle are
    /// not members. Iterative Tarjan over dependency edges, visiting roots and
    /// neighbours in row-major order.
    pub fn cycle_members(&self, subset: &FxHashSet<CellId>) -> Vec<CellId> {
        if subset.is_empty() {
            return Vec::new();
        }

        let mut roots: Vec<CellId> = subset.iter().copied().collect();
        roots.sort();

        let mut index_counter: usize = 0;
        let mut stack: Vec<CellId> = Vec::new();
        let mut on_stack: FxHashSet<CellId> = FxHashSet::default();
        let mut indices: FxHashMap<CellId, usize> = FxHashMap::default();
        let mut lowlinks: FxHashMap<CellId, usize> = FxHashMap::default();
        let mut members: Vec<CellId> = Vec::new();

        let sorted_neighbours = |cell: CellId| -> Vec<CellId> {
            let mut neighbours: Vec<CellId> = self.dependencies(cell).filter(|c| subset.contains(c)).collect();
            neighbours.sort();
            neighbours
        };

        struct DfsFrame {
            cell: CellId,
            neighbours: Vec<CellId>,
            next_idx: usize,
        }

        for root in roots {
            if indices.contains_key(&root) {
                continue;
            }

            indices.insert(root, index_counter);
            lowlinks.insert(root, index_counter);
            index_counter += 1;
            stack.push(root);
            on_stack.insert(root);
            let mut dfs_stack = vec![DfsFrame {
                cell: root,
                neighbours: sorted_neighbours(root),
                next_idx: 0,
            }];

            while let Some(frame) = dfs_stack.last_mut() {
                if frame.next_idx < frame.neighbours.len() {
                    let w = frame.neighbours[frame.next_idx];
                    frame.next_idx += 1;

                    if !indices.contains_key(&w) {
                        indices.insert(w, index_counter);
                        lowlinks.insert(w, index_counter);
                        index_counter += 1;
                        stack.push(w);
                        on_stack.insert(w);
                        dfs_stack.push(DfsFrame {
                            cell: w,
                            neighbours: sorted_neighbours(w),
                            next_idx: 0,
                        });
                    } else if on_stack.contains(&w) {
                        let w_idx = indices.get(&w).copied().unwrap_or(usize::MAX);
                        if let Some(v_low) = lowlinks.get_mut(&frame.cell) {
                            *v_low = (*v_low).min(w_idx);
                        }
                    }
                    continue;
                }

                // All neighbours explored: pop and propagate lowlink
                let Some(finished) = dfs_stack.pop() else {
                    break;
                };
                let v = finished.cell;
                let v_low = lowlinks.get(&v).copied().unwrap_or(usize::MAX);
                let v_idx = indices.get(&v).copied().unwrap_or(usize::MAX);

                if let Some(parent) = dfs_stack.last() {
                    if let Some(parent_low) = lowlinks.get_mut(&parent.cell) {
                        *parent_low = (*parent_low).min(v_low);
                    }
                }

                if v_low != v_idx {
                    continue;
                }

                // v roots an SCC
                let mut scc = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack.remove(&w);
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                let self_loop = scc.len() == 1 && self.deps.get(&v).is_some_and(|d| d.contains(&v));
                if scc.len() > 1 || self_loop {
                    members.extend(scc);
                }
            }
        }

        members.sort();
        members
    }

    /// Check the graph invariants, describing the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        // Invariant 1: deps → dependents
        for (cell, deps) in &self.deps {
            for dep in deps {
                if !self.dependents.get(dep).is_some_and(|s| s.contains(cell)) {
                    return Err(format!("missing dependent edge: {} should list {}", dep, cell));
                }
            }
        }

        // Invariant 1: dependents → deps
        for (cell, dependents) in &self.dependents {
            for dependent in dependents {
                if !self.deps.get(dependent).is_some_and(|s| s.contains(cell)) {
                    return Err(format!("missing dependency edge: {} should list {}", dependent, cell));
                }
            }
        }

        // Invariant 2: No empty sets stored
        if let Some(cell) = self.deps.iter().find(|(_, s)| s.is_empty()).map(|(c, _)| c) {
            return Err(format!("empty dependency set stored for {}", cell));
        }
        if let Some(cell) = self.dependents.iter().find(|(_, s)| s.is_empty()).map(|(c, _)| c) {
            return Err(format!("empty dependent set stored for {}", cell));
        }

        Ok(())
    }

    /// Panics if any invariant is violated.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        if let Err(e) = self.validate() {
            panic!("{}", e);
        }
    }
}
