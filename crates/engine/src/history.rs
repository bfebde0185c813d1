//! Undo/redo history for cell store edits.
//!
//! A transaction groups any number of cell snapshots. Undo and redo only
//! restore snapshots into the workbook; they never touch dependency graphs or
//! run recalculation. The caller re-derives both afterwards.

use crate::cell::Cell;
use crate::cell_id::CellId;
use crate::error::Result;
use crate::workbook::Workbook;

/// Before/after snapshot of one cell. `None` means the cell did not exist.
///
/// Snapshots are owned values, never aliases of live cells.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoEntry {
    pub sheet_index: usize,
    pub cell: CellId,
    pub before: Option<Cell>,
    pub after: Option<Cell>,
}

impl UndoEntry {
    pub fn new(sheet_index: usize, cell: CellId, before: Option<Cell>, after: Option<Cell>) -> Self {
        Self { sheet_index, cell, before, after }
    }

    /// True if applying this entry changes nothing.
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

/// Entries applied together as one logical edit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transaction {
    pub entries: Vec<UndoEntry>,
}

impl Transaction {
    pub fn new(entries: Vec<UndoEntry>) -> Self {
        Self { entries }
    }

    /// Sheet indices touched by this transaction, sorted and deduplicated.
    pub fn sheet_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.entries.iter().map(|e| e.sheet_index).collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Cells touched on `sheet_index`, sorted and deduplicated.
    pub fn cells_on(&self, sheet_index: usize) -> Vec<CellId> {
        let mut cells: Vec<CellId> = self
            .entries
            .iter()
            .filter(|e| e.sheet_index == sheet_index)
            .map(|e| e.cell)
            .collect();
        cells.sort();
        cells.dedup();
        cells
    }

    fn check_sheets(&self, workbook: &Workbook) -> Result<()> {
        for index in self.sheet_indices() {
            workbook.try_sheet(index)?;
        }
        Ok(())
    }
}

/// Linear undo history: a new edit after an undo discards the redo stack.
#[derive(Debug)]
pub struct History {
    past: Vec<Transaction>,
    future: Vec<Transaction>,
    max_entries: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(100)
    }
}

impl History {
    pub fn new(max_entries: usize) -> Self {
        Self {
            past: Vec::new(),
            future: Vec::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Record a transaction. Empty transactions are ignored.
    pub fn push(&mut self, entries: Vec<UndoEntry>) {
        if entries.is_empty() {
            return;
        }

        self.past.push(Transaction::new(entries));
        self.future.clear();

        // Limit history size
        if self.past.len() > self.max_entries {
            self.past.remove(0);
        }
    }

    /// Restore the `before` snapshots of the most recent transaction.
    ///
    /// Entries are applied in reverse so a cell touched twice ends at its
    /// earliest state. Returns the transaction that was undone, or `None` if
    /// there was nothing to undo. A transaction naming a missing sheet is an
    /// error and leaves both stacks unchanged.
    pub fn undo(&mut self, workbook: &mut Workbook) -> Result<Option<Transaction>> {
        let Some(tx) = self.past.last() else {
            return Ok(None);
        };
        tx.check_sheets(workbook)?;

        let Some(tx) = self.past.pop() else {
            return Ok(None);
        };
        for entry in tx.entries.iter().rev() {
            workbook.try_sheet_mut(entry.sheet_index)?.restore(entry.cell, entry.before.as_ref());
        }
        self.future.push(tx.clone());
        Ok(Some(tx))
    }

    /// Re-apply the `after` snapshots of the most recently undone transaction.
    pub fn redo(&mut self, workbook: &mut Workbook) -> Result<Option<Transaction>> {
        let Some(tx) = self.future.last() else {
            return Ok(None);
        };
        tx.check_sheets(workbook)?;

        let Some(tx) = self.future.pop() else {
            return Ok(None);
        };
        for entry in &tx.entries {
            workbook.try_sheet_mut(entry.sheet_index)?.restore(entry.cell, entry.after.as_ref());
        }
        self.past.push(tx.clone());
        Ok(Some(tx))
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.past.len()
    }

    pub fn redo_len(&self) -> usize {
        self.future.len()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn id(s: &str) -> CellId {
        s.parse().unwrap()
    }

    /// Write `input` into the workbook and return the matching entry.
    fn edit(wb: &mut Workbook, sheet: usize, cell: &str, input: Option<&str>) -> UndoEntry {
        let s = wb.sheet_mut(sheet).unwrap();
        let before = s.get(id(cell)).cloned();
        match input {
            Some(v) => s.set_input(id(cell), v),
            None => {
                s.remove(id(cell));
            }
        }
        let after = s.get(id(cell)).cloned();
        UndoEntry::new(sheet, id(cell), before, after)
    }

    #[test]
    fn test_empty_history() {
        let mut wb = Workbook::new();
        let mut history = History::default();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.undo(&mut wb).unwrap(), None);
        assert_eq!(history.redo(&mut wb).unwrap(), None);

        history.push(Vec::new());
        assert!(!history.can_undo());
    }

    #[test]
    fn test_undo_redo_single_edit() {
        let mut wb = Workbook::new();
        let mut history = History::default();

        let e = edit(&mut wb, 0, "A1", Some("10"));
        history.push(vec![e]);
        let e = edit(&mut wb, 0, "A1", Some("15"));
        history.push(vec![e]);

        history.undo(&mut wb).unwrap();
        assert_eq!(wb.sheet(0).unwrap().display(id("A1")), "10");
        assert!(history.can_redo());

        history.undo(&mut wb).unwrap();
        assert!(!wb.sheet(0).unwrap().contains(id("A1")));

        history.redo(&mut wb).unwrap();
        history.redo(&mut wb).unwrap();
        assert_eq!(wb.sheet(0).unwrap().display(id("A1")), "15");
        assert!(!history.can_redo());
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let mut wb = Workbook::new();
        let mut history = History::default();

        let e = edit(&mut wb, 0, "A1", Some("1"));
        history.push(vec![e]);
        history.undo(&mut wb).unwrap();
        assert!(history.can_redo());

        let e = edit(&mut wb, 0, "B1", Some("2"));
        history.push(vec![e]);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_multi_cell_transaction() {
        let mut wb = Workbook::new();
        wb.add_sheet("Other");
        let mut history = History::default();

        let entries = vec![
            edit(&mut wb, 0, "A1", Some("1")),
            edit(&mut wb, 0, "A2", Some("=A1")),
            edit(&mut wb, 1, "C3", Some("x")),
        ];
        history.push(entries);

        let tx = history.undo(&mut wb).unwrap().unwrap();
        assert_eq!(tx.sheet_indices(), vec![0, 1]);
        assert_eq!(tx.cells_on(0), vec![id("A1"), id("A2")]);
        assert!(wb.sheet(0).unwrap().is_empty());
        assert!(wb.sheet(1).unwrap().is_empty());
    }

    #[test]
    fn test_same_cell_twice_in_transaction() {
        let mut wb = Workbook::new();
        let mut history = History::default();
        edit(&mut wb, 0, "A1", Some("orig"));

        let entries = vec![
            edit(&mut wb, 0, "A1", Some("mid")),
            edit(&mut wb, 0, "A1", Some("last")),
        ];
        history.push(entries);

        history.undo(&mut wb).unwrap();
        assert_eq!(wb.sheet(0).unwrap().display(id("A1")), "orig");
        history.redo(&mut wb).unwrap();
        assert_eq!(wb.sheet(0).unwrap().display(id("A1")), "last");
    }

    #[test]
    fn test_delete_round_trip() {
        let mut wb = Workbook::new();
        let mut history = History::default();
        edit(&mut wb, 0, "B2", Some("keep"));

        let e = edit(&mut wb, 0, "B2", None);
        assert!(e.after.is_none());
        history.push(vec![e]);

        history.undo(&mut wb).unwrap();
        assert_eq!(wb.sheet(0).unwrap().display(id("B2")), "keep");
        history.redo(&mut wb).unwrap();
        assert!(!wb.sheet(0).unwrap().contains(id("B2")));
    }

    #[test]
    fn test_max_entries_drops_oldest() {
        let mut wb = Workbook::new();
        let mut history = History::new(2);
        for v in ["1", "2", "3"] {
            let e = edit(&mut wb, 0, "A1", Some(v));
            history.push(vec![e]);
        }
        assert_eq!(history.undo_len(), 2);

        history.undo(&mut wb).unwrap();
        history.undo(&mut wb).unwrap();
        assert!(!history.can_undo());
        assert_eq!(wb.sheet(0).unwrap().display(id("A1")), "1");
    }

    #[test]
    fn test_missing_sheet_leaves_stacks_untouched() {
        let mut wb = Workbook::new();
        let mut history = History::default();
        history.push(vec![UndoEntry::new(5, id("A1"), None, Some(Cell::from_input("x")))]);

        let err = history.undo(&mut wb).unwrap_err();
        assert!(matches!(err, EngineError::SheetOutOfRange { index: 5, .. }));
        assert_eq!(history.undo_len(), 1);
        assert_eq!(history.redo_len(), 0);
    }

    #[test]
    fn test_snapshots_do_not_alias_live_cells() {
        let mut wb = Workbook::new();
        let mut history = History::default();
        let e = edit(&mut wb, 0, "A1", Some("=1+1"));
        history.push(vec![e]);

        // Mutating the live cell must not leak into the snapshot
        wb.sheet_mut(0).unwrap().get_mut(id("A1")).unwrap().computed = Some("2".into());
        history.undo(&mut wb).unwrap();
        history.redo(&mut wb).unwrap();
        assert_eq!(wb.sheet(0).unwrap().computed(id("A1")), None);
    }

    #[test]
    fn test_noop_entry() {
        let cell = Some(Cell::from_input("1"));
        assert!(UndoEntry::new(0, id("A1"), cell.clone(), cell).is_noop());
        assert!(!UndoEntry::new(0, id("A1"), None, Some(Cell::new())).is_noop());
    }
}
