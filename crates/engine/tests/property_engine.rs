// Property-based tests for the commit path: ordering, undo/redo, graph invariants.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use proptest::prelude::*;
use gridcalc_engine::{A1Extractor, ArithmeticEvaluator, Cell, CellId, DepGraph, Engine, EngineConfig, Workbook};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn config_128() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(128),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// A cell inside the 3x3 block A1:C3.
fn arb_cell() -> impl Strategy<Value = CellId> {
    (0usize..3, 0usize..3).prop_map(|(col, row)| CellId::new(col, row))
}

/// Arbitrary input: numbers, text, deletes, and well-formed formulas that may
/// form cycles.
fn arb_input() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => (0i64..50).prop_map(|n| n.to_string()),
        1 => Just(String::new()),
        1 => "[a-z]{1,4}",
        2 => (arb_cell(), arb_cell()).prop_map(|(a, b)| format!("={}+{}", a, b)),
        1 => arb_cell().prop_map(|a| format!("={}*2", a)),
        1 => (arb_cell(), arb_cell()).prop_map(|(a, b)| format!("=SUM({}:{})", a, b)),
    ]
}

fn arb_edits(max: usize) -> impl Strategy<Value = Vec<(CellId, String)>> {
    proptest::collection::vec((arb_cell(), arb_input()), 1..=max)
}

/// One column of cells where cell `i` is either a constant or a formula over
/// cells `j < i` plus a constant. Acyclic by construction.
#[derive(Debug, Clone)]
enum Slot {
    Const(i64),
    Formula { refs: Vec<usize>, k: i64 },
}

fn arb_column(max: usize) -> impl Strategy<Value = Vec<Slot>> {
    proptest::collection::vec(
        (
            any::<bool>(),
            0i64..100,
            proptest::collection::vec(any::<prop::sample::Index>(), 0..3),
        ),
        2..=max,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (is_formula, k, picks))| {
                if is_formula && i > 0 {
                    let mut refs: Vec<usize> = picks.iter().map(|p| p.index(i)).collect();
                    refs.sort_unstable();
                    refs.dedup();
                    Slot::Formula { refs, k }
                } else {
                    Slot::Const(k)
                }
            })
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn col_cell(i: usize) -> CellId {
    CellId::new(0, i)
}

fn slot_input(slot: &Slot) -> String {
    match slot {
        Slot::Const(v) => v.to_string(),
        Slot::Formula { refs, k } => {
            let mut parts: Vec<String> = refs.iter().map(|&r| col_cell(r).to_string()).collect();
            parts.push(k.to_string());
            format!("={}", parts.join("+"))
        }
    }
}

/// Reference model: evaluate the column in index order.
fn model_values(column: &[Slot]) -> Vec<i64> {
    let mut values: Vec<i64> = Vec::with_capacity(column.len());
    for slot in column {
        let v = match slot {
            Slot::Const(v) => *v,
            Slot::Formula { refs, k } => refs.iter().map(|&r| values[r]).sum::<i64>() + k,
        };
        values.push(v);
    }
    values
}

/// Raw input of every stored cell, sorted.
fn inputs(engine: &Engine, sheet: usize) -> Vec<(CellId, String, Option<String>)> {
    let mut cells: Vec<(CellId, String, Option<String>)> = engine
        .sheet(sheet)
        .unwrap()
        .cells_iter()
        .map(|(id, cell): (&CellId, &Cell)| (*id, cell.value.clone(), cell.formula.clone()))
        .collect();
    cells.sort_by_key(|(id, _, _)| *id);
    cells
}

/// Display of every stored cell, sorted.
fn displays(engine: &Engine, sheet: usize) -> Vec<(CellId, String)> {
    let sheet = engine.sheet(sheet).unwrap();
    let mut cells: Vec<(CellId, String)> = sheet.cells_iter().map(|(id, _)| (*id, sheet.display(*id))).collect();
    cells.sort();
    cells
}

/// Fresh engine over a copy of the current cell store.
fn reloaded(engine: &Engine) -> Engine {
    Engine::load(
        engine.workbook().clone(),
        EngineConfig::default(),
        A1Extractor::default(),
        ArithmeticEvaluator::default(),
    )
}

fn sorted_deps(graph: &DepGraph, cell: CellId) -> Vec<CellId> {
    let mut v: Vec<CellId> = graph.dependencies(cell).collect();
    v.sort();
    v
}

fn sorted_dependents(graph: &DepGraph, cell: CellId) -> Vec<CellId> {
    let mut v: Vec<CellId> = graph.dependents(cell).collect();
    v.sort();
    v
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    /// Every formula reflects its dependencies' latest values, whatever the
    /// commit order and whichever constants are edited afterwards.
    #[test]
    fn dependency_ordering(
        column in arb_column(12),
        edits in proptest::collection::vec((any::<prop::sample::Index>(), 0i64..100), 0..6),
    ) {
        let mut engine = Engine::default();
        let mut column = column;

        // Commit back to front so most references start out as forward references
        for (i, slot) in column.iter().enumerate().rev() {
            engine.commit_cell(0, col_cell(i), &slot_input(slot)).unwrap();
        }

        let check = |engine: &Engine, column: &[Slot]| -> Result<(), TestCaseError> {
            for (i, expected) in model_values(column).into_iter().enumerate() {
                prop_assert_eq!(engine.display(0, col_cell(i)).unwrap(), expected.to_string(),
                    "cell {} mismatch", col_cell(i));
            }
            Ok(())
        };
        check(&engine, &column)?;

        for (pick, v) in edits {
            let i = pick.index(column.len());
            column[i] = Slot::Const(v);
            let outcome = engine.commit_cell(0, col_cell(i), &v.to_string()).unwrap();
            prop_assert!(!outcome.report.had_cycles);
            check(&engine, &column)?;
        }
    }

    /// Undoing every edit restores the loaded store cell-for-cell; redoing
    /// every edit restores the final inputs.
    #[test]
    fn undo_redo_round_trip(
        seed in arb_edits(6),
        edits in arb_edits(20),
    ) {
        let mut engine = Engine::default();
        for (cell, input) in &seed {
            engine.commit_cell(0, *cell, input).unwrap();
        }
        let engine_seed = reloaded(&engine);
        let mut engine = reloaded(&engine);
        prop_assert!(!engine.can_undo());

        let start_inputs = inputs(&engine, 0);
        let start_displays = displays(&engine, 0);

        for (cell, input) in &edits {
            engine.commit_cell(0, *cell, input).unwrap();
        }
        let end_inputs = inputs(&engine, 0);

        while engine.undo().unwrap() {}
        prop_assert_eq!(inputs(&engine, 0), start_inputs);
        prop_assert_eq!(displays(&engine, 0), start_displays);
        prop_assert_eq!(displays(&engine, 0), displays(&engine_seed, 0));

        while engine.redo().unwrap() {}
        prop_assert_eq!(inputs(&engine, 0), end_inputs);
        prop_assert_eq!(displays(&engine, 0), displays(&reloaded(&engine), 0));
    }
}

proptest! {
    #![proptest_config(config_128())]

    /// The live graph stays self-consistent and equal to a from-scratch build
    /// after every commit, including ones that close cycles.
    #[test]
    fn graph_matches_rebuild(edits in arb_edits(25)) {
        let mut engine = Engine::default();
        let extractor = A1Extractor::default();

        for (cell, input) in &edits {
            engine.commit_cell(0, *cell, input).unwrap();

            let live = engine.dep_graph(0).unwrap();
            prop_assert!(live.validate().is_ok(), "{:?}", live.validate());

            let rebuilt = DepGraph::build(engine.sheet(0).unwrap(), &extractor);
            for col in 0..3 {
                for row in 0..3 {
                    let id = CellId::new(col, row);
                    prop_assert_eq!(sorted_deps(live, id), sorted_deps(&rebuilt, id));
                    prop_assert_eq!(sorted_dependents(live, id), sorted_dependents(&rebuilt, id));
                }
            }
        }
    }

    /// Recalculation always terminates and never leaves a formula without a
    /// computed value.
    #[test]
    fn every_formula_has_a_computed_value(edits in arb_edits(25)) {
        let mut wb = Workbook::new();
        let sheet = wb.sheet_mut(0).unwrap();
        for (cell, input) in &edits {
            if input.is_empty() {
                sheet.remove(*cell);
            } else {
                sheet.set_input(*cell, input);
            }
        }

        let engine = Engine::load(wb, EngineConfig::default(), A1Extractor::default(), ArithmeticEvaluator::default());
        for (id, cell) in engine.sheet(0).unwrap().cells_iter() {
            if cell.is_formula() {
                prop_assert!(cell.computed.is_some(), "{} has no computed value", id);
            }
        }
    }
}
