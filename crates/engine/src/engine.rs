//! Engine facade: the single commit path for cell edits.
//!
//! Every edit goes through the same sequence: snapshot, write the cell store,
//! refresh the cell's dependency edges, recalculate, record undo. Undo and redo
//! restore snapshots and then re-derive graphs and values for the sheets they
//! touched, so `computed` is always a function of the current formulas.
//!
//! Events emitted per successful mutating call: RevisionChanged, then one
//! CellsChanged per touched sheet. Calls that fail emit nothing.

use rustc_hash::FxHashSet;

use crate::cell::{Cell, CellFormat};
use crate::cell_id::CellId;
use crate::config::EngineConfig;
use crate::dep_graph::DepGraph;
use crate::error::{EngineError, Result};
use crate::events::{CellsChangedEvent, EngineEvent, EventCallback, RevisionChangedEvent};
use crate::formula::{A1Extractor, ArithmeticEvaluator, Evaluator, ReferenceExtractor};
use crate::history::{History, Transaction, UndoEntry};
use crate::recalc::{recalc_all, recalculate, CycleReport, RecalcReport};
use crate::sheet::Sheet;
use crate::sort::{sort_permutation, SortDirection};
use crate::workbook::Workbook;

/// Result of a mutating call.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Revision after the call. Unchanged if nothing was modified.
    pub revision: u64,
    /// Cycles detected while committing edges, in edit order.
    pub cycles: Vec<CycleReport>,
    /// Recalculation that followed the edit (empty for format-only changes).
    pub report: RecalcReport,
    /// Edited cells plus recalculated cells, sorted.
    pub changed: Vec<CellId>,
}

impl CommitOutcome {
    pub fn has_cycle(&self) -> bool {
        !self.cycles.is_empty()
    }
}

/// A workbook with its dependency graphs, undo history and evaluator.
pub struct Engine<X = A1Extractor, V = ArithmeticEvaluator> {
    workbook: Workbook,
    /// One graph per sheet, same indices as `workbook.sheets()`.
    graphs: Vec<DepGraph>,
    history: History,
    config: EngineConfig,
    extractor: X,
    evaluator: V,
    revision: u64,
    listener: Option<EventCallback>,
}

impl Engine<A1Extractor, ArithmeticEvaluator> {
    /// Engine with the built-in A1 extractor and arithmetic evaluator.
    pub fn with_config(config: EngineConfig) -> Self {
        let extractor = A1Extractor::new(config.max_range_cells);
        let evaluator = ArithmeticEvaluator::new(config.max_range_cells);
        Self::new(config, extractor, evaluator)
    }
}

impl Default for Engine<A1Extractor, ArithmeticEvaluator> {
    fn default() -> Self {
        Self::with_config(EngineConfig::default())
    }
}

impl<X: ReferenceExtractor, V: Evaluator> Engine<X, V> {
    /// Empty engine with a single sheet.
    pub fn new(config: EngineConfig, extractor: X, evaluator: V) -> Self {
        Self::load(Workbook::new(), config, extractor, evaluator)
    }

    /// Take ownership of a loaded workbook: build every graph and recompute
    /// every sheet. History starts empty.
    pub fn load(mut workbook: Workbook, config: EngineConfig, extractor: X, evaluator: V) -> Self {
        if let Err(e) = config.validate() {
            log::warn!("{}", e);
        }
        let mut graphs = Vec::with_capacity(workbook.sheet_count());
        for index in 0..workbook.sheet_count() {
            let Some(sheet) = workbook.sheet_mut(index) else {
                continue;
            };
            let graph = DepGraph::build(sheet, &extractor);
            let report = recalc_all(sheet, &graph, &evaluator, &config.circular_sentinel);
            log::info!("Loaded sheet '{}': {}", sheet.name, report.summary());
            graphs.push(graph);
        }

        Self {
            workbook,
            graphs,
            history: History::new(config.max_history_entries),
            config,
            extractor,
            evaluator,
            revision: 0,
            listener: None,
        }
    }

    /// Register the callback that receives change notifications.
    pub fn set_listener(&mut self, listener: EventCallback) {
        self.listener = Some(listener);
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn sheet(&self, sheet_index: usize) -> Result<&Sheet> {
        self.workbook.try_sheet(sheet_index)
    }

    pub fn dep_graph(&self, sheet_index: usize) -> Result<&DepGraph> {
        self.graphs.get(sheet_index).ok_or(EngineError::SheetOutOfRange {
            index: sheet_index,
            count: self.graphs.len(),
        })
    }

    /// Display value of a cell: `computed` for formulas, raw input otherwise.
    pub fn display(&self, sheet_index: usize, cell: CellId) -> Result<String> {
        Ok(self.workbook.try_sheet(sheet_index)?.display(cell))
    }

    /// Append an empty sheet and return its index.
    pub fn add_sheet(&mut self, name: impl Into<String>) -> usize {
        let index = self.workbook.add_sheet(name);
        self.graphs.push(DepGraph::new());
        index
    }

    pub fn active_sheet_index(&self) -> usize {
        self.workbook.active_sheet_index()
    }

    pub fn set_active_sheet(&mut self, sheet_index: usize) -> Result<()> {
        if self.workbook.set_active_sheet(sheet_index) {
            Ok(())
        } else {
            Err(EngineError::SheetOutOfRange {
                index: sheet_index,
                count: self.workbook.sheet_count(),
            })
        }
    }

    /// Commit raw input to one cell. Empty input deletes the cell.
    ///
    /// A formula that closes a cycle is still committed; the cycle is reported
    /// in the outcome and the cells involved show the circular sentinel.
    pub fn commit_cell(&mut self, sheet_index: usize, cell: CellId, input: &str) -> Result<CommitOutcome> {
        let (sheet, graph) = sheet_and_graph(&mut self.workbook, &mut self.graphs, sheet_index)?;

        let before = sheet.get(cell).cloned();
        write_input(sheet, cell, input);
        let cycle = refresh_edges(sheet, graph, cell, &self.extractor);

        let report = if sheet.contains(cell) || graph.contains(cell) {
            recalculate(sheet, graph, cell, &self.evaluator, &self.config.circular_sentinel)?
        } else {
            RecalcReport::new()
        };

        let after = sheet.get(cell).cloned();
        let entry = UndoEntry::new(sheet_index, cell, before, after);
        let mut changed = report.touched_cells();
        let entries: Vec<UndoEntry> = if entry.is_noop() { Vec::new() } else { vec![entry] };
        if !entries.is_empty() {
            changed.push(cell);
        }

        Ok(self.finish(sheet_index, entries, cycle.into_iter().collect(), report, changed))
    }

    /// Commit several inputs on one sheet as a single undoable transaction,
    /// followed by one full recalculation.
    pub fn apply_batch<I, S>(&mut self, sheet_index: usize, edits: I) -> Result<CommitOutcome>
    where
        I: IntoIterator<Item = (CellId, S)>,
        S: AsRef<str>,
    {
        let (sheet, graph) = sheet_and_graph(&mut self.workbook, &mut self.graphs, sheet_index)?;

        let mut entries = Vec::new();
        let mut cycles = Vec::new();
        for (cell, input) in edits {
            let before = sheet.get(cell).cloned();
            write_input(sheet, cell, input.as_ref());
            // Edges go in immediately, so later edits in the batch see them
            if let Some(cycle) = refresh_edges(sheet, graph, cell, &self.extractor) {
                cycles.push(cycle);
            }
            entries.push(UndoEntry::new(sheet_index, cell, before, None));
        }

        let report = recalc_all(sheet, graph, &self.evaluator, &self.config.circular_sentinel);
        let entries = with_after_snapshots(sheet, entries);

        let mut changed = report.touched_cells();
        changed.extend(entries.iter().map(|e| e.cell));
        Ok(self.finish(sheet_index, entries, cycles, report, changed))
    }

    /// Delete every listed cell as one transaction.
    pub fn clear_range(&mut self, sheet_index: usize, cells: &[CellId]) -> Result<CommitOutcome> {
        self.apply_batch(sheet_index, cells.iter().map(|&cell| (cell, "")))
    }

    /// Apply `format` to every listed cell. Values are untouched, so nothing
    /// is recalculated.
    pub fn set_format(&mut self, sheet_index: usize, cells: &[CellId], format: &CellFormat) -> Result<CommitOutcome> {
        let sheet = self.workbook.try_sheet_mut(sheet_index)?;

        let mut entries = Vec::new();
        for &cell in cells {
            let before = sheet.get(cell).cloned();
            sheet.set_format(cell, format.clone());
            entries.push(UndoEntry::new(sheet_index, cell, before, None));
        }
        let entries = with_after_snapshots(sheet, entries);

        let changed = entries.iter().map(|e| e.cell).collect();
        Ok(self.finish(sheet_index, entries, Vec::new(), RecalcReport::new(), changed))
    }

    /// Sort the rows of a range by the display value in `key_col`.
    ///
    /// Whole cell snapshots move with their row, so formulas keep their text
    /// verbatim. Cells outside the range are untouched. One transaction,
    /// followed by one full recalculation.
    pub fn sort_range(
        &mut self,
        sheet_index: usize,
        top_left: CellId,
        bottom_right: CellId,
        key_col: usize,
        direction: SortDirection,
    ) -> Result<CommitOutcome> {
        let (top, bottom) = (top_left.row.min(bottom_right.row), top_left.row.max(bottom_right.row));
        let (left, right) = (top_left.col.min(bottom_right.col), top_left.col.max(bottom_right.col));
        if key_col < left || key_col > right {
            return Err(EngineError::InvalidRange(format!(
                "sort column {} is outside {}:{}",
                crate::cell_id::col_to_letters(key_col),
                top_left,
                bottom_right
            )));
        }

        let (sheet, graph) = sheet_and_graph(&mut self.workbook, &mut self.graphs, sheet_index)?;
        let order = sort_permutation(sheet, top, bottom, key_col, direction);

        let snapshot: Vec<Vec<Option<Cell>>> = (top..=bottom)
            .map(|row| (left..=right).map(|col| sheet.get(CellId::new(col, row)).cloned()).collect())
            .collect();

        let mut entries = Vec::new();
        for (offset, &source_row) in order.iter().enumerate() {
            if source_row == top + offset {
                continue;
            }
            let (target, source) = (&snapshot[offset], &snapshot[source_row - top]);
            for (i, col) in (left..=right).enumerate() {
                let cell = CellId::new(col, top + offset);
                sheet.restore(cell, source[i].as_ref());
                entries.push(UndoEntry::new(sheet_index, cell, target[i].clone(), None));
            }
        }

        if entries.is_empty() {
            log::debug!("Sort of {}:{} left every row in place", top_left, bottom_right);
            return Ok(CommitOutcome {
                revision: self.revision,
                ..Default::default()
            });
        }

        let mut cycles = Vec::new();
        for entry in &entries {
            if let Some(cycle) = refresh_edges(sheet, graph, entry.cell, &self.extractor) {
                cycles.push(cycle);
            }
        }

        let report = recalc_all(sheet, graph, &self.evaluator, &self.config.circular_sentinel);
        log::info!(
            "Sorted {}:{} on '{}' by column {} ({:?}): {} cells moved",
            top_left,
            bottom_right,
            sheet.name,
            crate::cell_id::col_to_letters(key_col),
            direction,
            entries.len()
        );
        let entries = with_after_snapshots(sheet, entries);

        let mut changed = report.touched_cells();
        changed.extend(entries.iter().map(|e| e.cell));
        Ok(self.finish(sheet_index, entries, cycles, report, changed))
    }

    /// Recompute every formula on a sheet without recording history.
    pub fn recalc_sheet(&mut self, sheet_index: usize) -> Result<RecalcReport> {
        let (sheet, graph) = sheet_and_graph(&mut self.workbook, &mut self.graphs, sheet_index)?;
        Ok(recalc_all(sheet, graph, &self.evaluator, &self.config.circular_sentinel))
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Undo the most recent transaction. Returns false if there was none.
    pub fn undo(&mut self) -> Result<bool> {
        match self.history.undo(&mut self.workbook)? {
            Some(tx) => {
                self.rederive(&tx, "undo")?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Redo the most recently undone transaction. Returns false if there was none.
    pub fn redo(&mut self) -> Result<bool> {
        match self.history.redo(&mut self.workbook)? {
            Some(tx) => {
                self.rederive(&tx, "redo")?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Rebuild graphs and values of every sheet a restored transaction touched.
    fn rederive(&mut self, tx: &Transaction, scope: &str) -> Result<()> {
        let mut per_sheet = Vec::new();
        for sheet_index in tx.sheet_indices() {
            let (sheet, graph) = sheet_and_graph(&mut self.workbook, &mut self.graphs, sheet_index)?;
            *graph = DepGraph::build(sheet, &self.extractor);
            let report = recalc_all(sheet, graph, &self.evaluator, &self.config.circular_sentinel);
            log::debug!("{}", report.log_line(scope));

            let mut cells = tx.cells_on(sheet_index);
            cells.extend(report.touched_cells());
            per_sheet.push((sheet_index, cells));
        }

        let revision = self.bump_revision();
        for (sheet_index, cells) in per_sheet {
            self.emit_cells_changed(revision, sheet_index, cells);
        }
        Ok(())
    }

    /// Record history, bump the revision and notify, if anything changed.
    fn finish(
        &mut self,
        sheet_index: usize,
        entries: Vec<UndoEntry>,
        cycles: Vec<CycleReport>,
        report: RecalcReport,
        mut changed: Vec<CellId>,
    ) -> CommitOutcome {
        for cycle in &cycles {
            log::warn!("{}", cycle);
        }

        changed.sort();
        changed.dedup();

        let entries: Vec<UndoEntry> = entries.into_iter().filter(|e| !e.is_noop()).collect();
        if entries.is_empty() && changed.is_empty() {
            return CommitOutcome {
                revision: self.revision,
                cycles,
                report,
                changed,
            };
        }

        self.history.push(entries);
        let revision = self.bump_revision();
        self.emit_cells_changed(revision, sheet_index, changed.clone());

        CommitOutcome {
            revision,
            cycles,
            report,
            changed,
        }
    }

    fn bump_revision(&mut self) -> u64 {
        let previous = self.revision;
        self.revision += 1;
        self.emit(EngineEvent::RevisionChanged(RevisionChangedEvent {
            revision: self.revision,
            previous,
        }));
        self.revision
    }

    fn emit_cells_changed(&mut self, revision: u64, sheet_index: usize, mut cells: Vec<CellId>) {
        if cells.is_empty() {
            return;
        }
        cells.sort();
        cells.dedup();
        self.emit(EngineEvent::CellsChanged(CellsChangedEvent {
            revision,
            sheet_index,
            cells,
        }));
    }

    fn emit(&mut self, event: EngineEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener(event);
        }
    }
}

/// Split borrows: the sheet and its graph, checked against the same index.
fn sheet_and_graph<'a>(
    workbook: &'a mut Workbook,
    graphs: &'a mut [DepGraph],
    index: usize,
) -> Result<(&'a mut Sheet, &'a mut DepGraph)> {
    let count = graphs.len();
    let sheet = workbook.try_sheet_mut(index)?;
    let graph = graphs
        .get_mut(index)
        .ok_or(EngineError::SheetOutOfRange { index, count })?;
    Ok((sheet, graph))
}

fn write_input(sheet: &mut Sheet, cell: CellId, input: &str) {
    if input.is_empty() {
        sheet.remove(cell);
    } else {
        sheet.set_input(cell, input);
    }
}

/// Make the graph mirror the cell's current formula. Returns the cycle the
/// new edges close, if any; the edges are committed either way.
fn refresh_edges<X: ReferenceExtractor + ?Sized>(
    sheet: &Sheet,
    graph: &mut DepGraph,
    cell: CellId,
    extractor: &X,
) -> Option<CycleReport> {
    let Some(formula) = sheet.get(cell).and_then(|c| c.formula.as_deref()) else {
        graph.remove_dependencies(cell);
        return None;
    };

    let refs = extractor.extract(formula);
    let cycle = graph.would_create_cycle(cell, &refs);
    graph.set_dependencies(cell, &refs);
    cycle
}

/// Fill in `after` from the live sheet. A cell edited twice in one batch
/// keeps only its first `before` and its final `after`.
fn with_after_snapshots(sheet: &Sheet, entries: Vec<UndoEntry>) -> Vec<UndoEntry> {
    let mut seen: FxHashSet<CellId> = FxHashSet::default();
    let mut merged: Vec<UndoEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        if seen.insert(entry.cell) {
            merged.push(entry);
        }
    }
    for entry in &mut merged {
        entry.after = sheet.get(entry.cell).cloned();
    }
    merged
}
