//! Recalculation scheduler and reporting.
//!
//! Given a changed cell (or the whole sheet), determines the affected formula
//! cells, orders them so dependencies come first, evaluates each once, and
//! writes results back into the cell store. Cycles and evaluator failures are
//! turned into sentinel strings; they never abort the pass.

use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_id::CellId;
use crate::dep_graph::DepGraph;
use crate::error::{EngineError, Result};
use crate::formula::Evaluator;
use crate::sheet::Sheet;

/// Cap on the number of per-cell errors kept in a report.
const MAX_REPORTED_ERRORS: usize = 100;

/// Outcome of evaluating one formula cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    Value(String),
    Circular,
    Error(String),
}

impl EvalOutcome {
    /// Display string stored in `computed`.
    pub fn into_display(self, circular_sentinel: &str) -> String {
        match self {
            EvalOutcome::Value(v) => v,
            EvalOutcome::Circular => circular_sentinel.to_string(),
            EvalOutcome::Error(e) => e,
        }
    }
}

/// Report from a recalculation pass.
#[derive(Debug, Clone, Default)]
pub struct RecalcReport {
    /// Time taken in milliseconds.
    pub duration_ms: u64,

    /// Number of evaluator invocations.
    pub cells_recomputed: usize,

    /// Maximum dependency depth among evaluated cells.
    /// A formula with no formula dependencies has depth 1.
    pub max_depth: usize,

    /// True if some cells sit on a cycle and were marked circular.
    pub had_cycles: bool,

    /// Cycle members marked with the circular sentinel, sorted. Cells that
    /// only read from a cycle are evaluated and are not listed here.
    pub cycle_cells: Vec<CellId>,

    /// Evaluator errors (truncated to the first 100).
    pub errors: Vec<RecalcError>,

    /// Formula cells evaluated, in evaluation order.
    pub eval_order: Vec<CellId>,
}

impl RecalcReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format as a concise one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} cells in {}ms, depth={}, cycles={}",
            self.cells_recomputed, self.duration_ms, self.max_depth, self.had_cycles
        )
    }

    /// Format as a one-line log entry.
    ///
    /// Format: `[recalc/full]   14ms  628 cells  depth=7  cycles=0  errors=0`
    pub fn log_line(&self, scope: &str) -> String {
        format!(
            "[recalc/{}] {:>4}ms  {} cells  depth={}  cycles={}  errors={}",
            scope,
            self.duration_ms,
            self.cells_recomputed,
            self.max_depth,
            self.cycle_cells.len(),
            self.errors.len()
        )
    }

    /// Cells whose `computed` value may have changed in this pass.
    pub fn touched_cells(&self) -> Vec<CellId> {
        let mut cells: Vec<CellId> = self
            .eval_order
            .iter()
            .chain(self.cycle_cells.iter())
            .copied()
            .collect();
        cells.sort();
        cells.dedup();
        cells
    }
}

/// An evaluator failure on a specific cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalcError {
    pub cell: CellId,
    pub error: String,
}

impl RecalcError {
    pub fn new(cell: CellId, error: impl Into<String>) -> Self {
        Self {
            cell,
            error: error.into(),
        }
    }
}

/// Report when cycle detection finds a circular reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Cells along the cycle. May start and end with the same cell.
    pub cells: Vec<CellId>,

    /// Human-readable description of the cycle.
    pub message: String,
}

impl CycleReport {
    pub fn new(cells: Vec<CellId>, message: impl Into<String>) -> Self {
        Self {
            cells,
            message: message.into(),
        }
    }

    /// Create a cycle report for a self-referencing cell.
    pub fn self_reference(cell: CellId) -> Self {
        Self {
            cells: vec![cell],
            message: format!("Cell {} references itself", cell),
        }
    }

    /// Create a cycle report for a multi-cell cycle.
    pub fn cycle(cells: Vec<CellId>) -> Self {
        let cell_list: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        let message = match (cell_list.first(), cell_list.last()) {
            (Some(first), Some(last)) if cells.len() > 5 => format!(
                "Circular reference involving {} cells: {} → ... → {}",
                cells.len(),
                first,
                last
            ),
            _ => format!("Circular reference: {}", cell_list.join(" → ")),
        };
        Self { cells, message }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CycleReport {}

/// Recompute everything downstream of `changed`.
///
/// Only the changed cell and the transitive closure of its dependents are
/// touched. Returns `Err(UnknownCell)` if `changed` is neither stored in the
/// sheet nor present in the graph.
pub fn recalculate<V: Evaluator + ?Sized>(
    sheet: &mut Sheet,
    graph: &DepGraph,
    changed: CellId,
    evaluator: &V,
    circular_sentinel: &str,
) -> Result<RecalcReport> {
    if !sheet.contains(changed) && !graph.contains(changed) {
        return Err(EngineError::UnknownCell(changed));
    }

    let start = Instant::now();
    let affected = graph.affected_closure(changed);
    let mut report = run_pass(sheet, graph, &affected, evaluator, circular_sentinel);
    report.duration_ms = start.elapsed().as_millis() as u64;
    log::debug!("{} from {}", report.log_line("cell"), changed);
    Ok(report)
}

/// Recompute every formula cell in the sheet.
///
/// Used after bulk operations (load, undo/redo, batch edits). Cycles are
/// sentinel-marked, never looped on.
pub fn recalc_all<V: Evaluator + ?Sized>(
    sheet: &mut Sheet,
    graph: &DepGraph,
    evaluator: &V,
    circular_sentinel: &str,
) -> RecalcReport {
    let start = Instant::now();
    let all: FxHashSet<CellId> = sheet.formula_cells().into_iter().collect();
    let mut report = run_pass(sheet, graph, &all, evaluator, circular_sentinel);
    report.duration_ms = start.elapsed().as_millis() as u64;
    log::debug!("{}", report.log_line("full"));
    report
}

/// Order `affected`, sentinel the cycle members, evaluate the rest.
///
/// Cells that only read from a cycle are evaluated after everything else and
/// see the sentinel through the evaluator, so a full pass and a targeted pass
/// agree on them.
fn run_pass<V: Evaluator + ?Sized>(
    sheet: &mut Sheet,
    graph: &DepGraph,
    affected: &FxHashSet<CellId>,
    evaluator: &V,
    circular_sentinel: &str,
) -> RecalcReport {
    let mut report = RecalcReport::new();
    let topo = graph.topo_order(affected);

    let mut downstream_order = Vec::new();
    let mut circular = Vec::new();
    if !topo.unorderable.is_empty() {
        let unorderable: FxHashSet<CellId> = topo.unorderable.iter().copied().collect();
        circular = graph.cycle_members(&unorderable);
        let downstream: FxHashSet<CellId> = unorderable
            .into_iter()
            .filter(|c| circular.binary_search(c).is_err())
            .collect();
        let rest = graph.topo_order(&downstream);
        downstream_order = rest.order;
        circular.extend(rest.unorderable);
        circular.sort();
    }

    // Mark cycle members first so anything evaluated later reads the sentinel
    let mut cycle_cells = Vec::new();
    for cell_id in circular {
        if let Some(cell) = sheet.get_mut(cell_id) {
            if cell.is_formula() {
                cell.computed = Some(EvalOutcome::Circular.into_display(circular_sentinel));
                cycle_cells.push(cell_id);
            }
        }
    }
    if !cycle_cells.is_empty() {
        log::warn!(
            "Circular references in '{}': {} cells marked {}",
            sheet.name,
            cycle_cells.len(),
            circular_sentinel
        );
        report.had_cycles = true;
        report.cycle_cells = cycle_cells;
    }

    // depth(value cell) = 0, depth(formula) = 1 + max(depth(dependencies))
    let mut depths: FxHashMap<CellId, usize> = FxHashMap::default();

    for cell_id in topo.order.into_iter().chain(downstream_order) {
        let Some(formula) = sheet.get(cell_id).and_then(|c| c.formula.clone()) else {
            continue;
        };

        let depth = 1 + graph
            .dependencies(cell_id)
            .map(|d| depths.get(&d).copied().unwrap_or(0))
            .max()
            .unwrap_or(0);
        depths.insert(cell_id, depth);
        report.max_depth = report.max_depth.max(depth);

        let outcome = evaluate_cell(sheet, &formula, evaluator);
        if let EvalOutcome::Error(e) = &outcome {
            if report.errors.len() < MAX_REPORTED_ERRORS {
                report.errors.push(RecalcError::new(cell_id, e.clone()));
            }
        }

        if let Some(cell) = sheet.get_mut(cell_id) {
            cell.computed = Some(outcome.into_display(circular_sentinel));
        }
        report.eval_order.push(cell_id);
        report.cells_recomputed += 1;
    }

    report
}

fn evaluate_cell<V: Evaluator + ?Sized>(sheet: &Sheet, formula: &str, evaluator: &V) -> EvalOutcome {
    let resolve = |id: CellId| sheet.display(id);
    match evaluator.evaluate(formula, &resolve) {
        Ok(value) => EvalOutcome::Value(value),
        Err(code) => EvalOutcome::Error(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CIRCULAR_SENTINEL as CIRC;
    use crate::formula::{A1Extractor, ArithmeticEvaluator, ReferenceExtractor};
    use std::cell::Cell as Counter;

    fn id(s: &str) -> CellId {
        s.parse().unwrap()
    }

    /// Counts evaluator invocations.
    struct CountingEvaluator {
        calls: Counter<usize>,
    }

    impl Evaluator for CountingEvaluator {
        fn evaluate(&self, formula: &str, resolve: &dyn Fn(CellId) -> String) -> std::result::Result<String, String> {
            self.calls.set(self.calls.get() + 1);
            ArithmeticEvaluator::default().evaluate(formula, resolve)
        }
    }

    fn sheet_with(cells: &[(&str, &str)]) -> (Sheet, DepGraph) {
        let mut sheet = Sheet::new("Sheet1");
        for (k, v) in cells {
            sheet.set_input(id(k), v);
        }
        let graph = DepGraph::build(&sheet, &A1Extractor::default());
        (sheet, graph)
    }

    #[test]
    fn test_no_formulas_is_noop() {
        let (mut sheet, graph) = sheet_with(&[("A1", "1"), ("B2", "text")]);
        let before = sheet.clone();

        let report = recalc_all(&mut sheet, &graph, &ArithmeticEvaluator::default(), CIRC);
        assert_eq!(report.cells_recomputed, 0);
        assert_eq!(sheet, before);

        let report = recalculate(&mut sheet, &graph, id("A1"), &ArithmeticEvaluator::default(), CIRC).unwrap();
        assert_eq!(report.cells_recomputed, 0);
        assert_eq!(sheet, before);
    }

    #[test]
    fn test_chain_evaluates_in_order() {
        // Inserted out of order on purpose
        let (mut sheet, graph) = sheet_with(&[
            ("A3", "=A2*2"),
            ("A2", "=A1+1"),
            ("A1", "1"),
        ]);

        let report = recalc_all(&mut sheet, &graph, &ArithmeticEvaluator::default(), CIRC);
        assert_eq!(sheet.computed(id("A2")), Some("2"));
        assert_eq!(sheet.computed(id("A3")), Some("4"));
        assert_eq!(report.max_depth, 2);
        assert_eq!(report.eval_order, vec![id("A2"), id("A3")]);

        sheet.set_input(id("A1"), "10");
        let report = recalculate(&mut sheet, &graph, id("A1"), &ArithmeticEvaluator::default(), CIRC).unwrap();
        assert_eq!(sheet.computed(id("A3")), Some("22"));
        assert_eq!(report.cells_recomputed, 2);
    }

    #[test]
    fn test_minimal_recomputation() {
        let (mut sheet, graph) = sheet_with(&[
            ("A1", "=1+1"),
            ("B1", "=2+2"),
            ("C1", "=B1*10"),
        ]);
        let evaluator = CountingEvaluator { calls: Counter::new(0) };

        recalculate(&mut sheet, &graph, id("A1"), &evaluator, CIRC).unwrap();
        assert_eq!(evaluator.calls.get(), 1);
        assert_eq!(sheet.computed(id("A1")), Some("2"));
        // Untouched
        assert_eq!(sheet.computed(id("C1")), None);

        evaluator.calls.set(0);
        recalculate(&mut sheet, &graph, id("B1"), &evaluator, CIRC).unwrap();
        assert_eq!(evaluator.calls.get(), 2);
        assert_eq!(sheet.computed(id("C1")), Some("40"));
    }

    #[test]
    fn test_cycle_sentinel_with_unrelated_cell() {
        let (mut sheet, graph) = sheet_with(&[
            ("A1", "=B1"),
            ("B1", "=A1"),
            ("C1", "=2*3"),
        ]);

        let report = recalc_all(&mut sheet, &graph, &ArithmeticEvaluator::default(), CIRC);
        assert!(report.had_cycles);
        assert_eq!(report.cycle_cells, vec![id("A1"), id("B1")]);
        assert_eq!(sheet.computed(id("A1")), Some(CIRC));
        assert_eq!(sheet.computed(id("B1")), Some(CIRC));
        assert_eq!(sheet.computed(id("C1")), Some("6"));
    }

    #[test]
    fn test_cycle_downstream_reads_sentinel() {
        // C1 reads from the cycle; D1 reads C1
        let (mut sheet, graph) = sheet_with(&[
            ("A1", "=B1"),
            ("B1", "=A1"),
            ("C1", "=A1+1"),
            ("D1", "=C1*2"),
        ]);

        let report = recalc_all(&mut sheet, &graph, &ArithmeticEvaluator::default(), CIRC);
        assert_eq!(report.cycle_cells, vec![id("A1"), id("B1")]);
        assert_eq!(report.eval_order, vec![id("C1"), id("D1")]);
        assert_eq!(sheet.computed(id("C1")), Some(CIRC));
        assert_eq!(sheet.computed(id("D1")), Some(CIRC));
    }

    #[test]
    fn test_cycle_downstream_same_in_full_and_targeted_pass() {
        let sentinel = "#LOOP!";
        let (mut full, graph) = sheet_with(&[("A1", "=A1"), ("B1", "=A1+1")]);
        let mut targeted = full.clone();

        recalc_all(&mut full, &graph, &ArithmeticEvaluator::default(), sentinel);
        recalculate(&mut targeted, &graph, id("A1"), &ArithmeticEvaluator::default(), sentinel).unwrap();

        assert_eq!(full.computed(id("A1")), Some(sentinel));
        assert_eq!(full.computed(id("B1")), Some(sentinel));
        assert_eq!(full, targeted);
    }

    #[test]
    fn test_self_reference_sentinel() {
        let (mut sheet, graph) = sheet_with(&[("A1", "=A1+1")]);
        let report = recalculate(&mut sheet, &graph, id("A1"), &ArithmeticEvaluator::default(), CIRC).unwrap();
        assert_eq!(sheet.computed(id("A1")), Some(CIRC));
        assert_eq!(report.cells_recomputed, 0);
    }

    #[test]
    fn test_evaluator_error_does_not_stop_pass() {
        let (mut sheet, graph) = sheet_with(&[
            ("A1", "0"),
            ("B1", "=1/A1"),
            ("C1", "=A1+5"),
        ]);

        let report = recalculate(&mut sheet, &graph, id("A1"), &ArithmeticEvaluator::default(), CIRC).unwrap();
        assert_eq!(sheet.computed(id("B1")), Some("#DIV/0!"));
        assert_eq!(sheet.computed(id("C1")), Some("5"));
        assert_eq!(report.errors, vec![RecalcError::new(id("B1"), "#DIV/0!")]);
    }

    #[test]
    fn test_forward_reference() {
        let (mut sheet, mut graph) = sheet_with(&[("A1", "=B1")]);
        recalc_all(&mut sheet, &graph, &ArithmeticEvaluator::default(), CIRC);
        assert_eq!(sheet.computed(id("A1")), Some(""));
        assert!(graph.dependents(id("B1")).any(|c| c == id("A1")));

        sheet.set_input(id("B1"), "5");
        let refs = A1Extractor::default().extract("=B1");
        graph.set_dependencies(id("A1"), &refs);
        recalculate(&mut sheet, &graph, id("B1"), &ArithmeticEvaluator::default(), CIRC).unwrap();
        assert_eq!(sheet.computed(id("A1")), Some("5"));
    }

    #[test]
    fn test_unknown_cell_is_contract_error() {
        let (mut sheet, graph) = sheet_with(&[("A1", "1")]);
        let err = recalculate(&mut sheet, &graph, id("Z9"), &ArithmeticEvaluator::default(), CIRC).unwrap_err();
        assert!(matches!(err, EngineError::UnknownCell(c) if c == id("Z9")));
    }

    #[test]
    fn test_deleted_cell_with_dependents_recalculates() {
        let (mut sheet, graph) = sheet_with(&[("A1", "3"), ("B1", "=A1*2")]);
        recalc_all(&mut sheet, &graph, &ArithmeticEvaluator::default(), CIRC);

        sheet.remove(id("A1"));
        recalculate(&mut sheet, &graph, id("A1"), &ArithmeticEvaluator::default(), CIRC).unwrap();
        assert_eq!(sheet.computed(id("B1")), Some("0"));
    }

    #[test]
    fn test_touched_cells() {
        let report = RecalcReport {
            eval_order: vec![id("B1"), id("A1")],
            cycle_cells: vec![id("C1"), id("A1")],
            ..Default::default()
        };
        assert_eq!(report.touched_cells(), vec![id("A1"), id("B1"), id("C1")]);
    }

    #[test]
    fn test_recalc_report_log_line() {
        let report = RecalcReport {
            duration_ms: 14,
            cells_recomputed: 628,
            max_depth: 7,
            ..Default::default()
        };
        assert_eq!(
            report.log_line("full"),
            "[recalc/full]   14ms  628 cells  depth=7  cycles=0  errors=0"
        );
        assert_eq!(report.summary(), "628 cells in 14ms, depth=7, cycles=false");
    }

    #[test]
    fn test_cycle_report_messages() {
        let report = CycleReport::self_reference(id("A1"));
        assert!(report.message.contains("references itself"));

        let small = CycleReport::cycle(vec![id("A1"), id("B1"), id("A1")]);
        assert_eq!(small.to_string(), "Circular reference: A1 → B1 → A1");

        let cells: Vec<CellId> = (0..10).map(|r| CellId::new(0, r)).collect();
        let large = CycleReport::cycle(cells);
        assert!(large.message.contains("10 cells"));
        assert!(large.message.contains("..."));
    }
}
