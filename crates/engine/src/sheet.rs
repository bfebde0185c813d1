use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellFormat};
use crate::cell_id::CellId;

/// Sparse cell store for one sheet.
///
/// Absent cells read as empty. The engine reads and writes this store but the
/// hosting workbook owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    #[serde(default)]
    cells: FxHashMap<CellId, Cell>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: FxHashMap::default(),
        }
    }

    pub fn get(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    pub fn get_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(&id)
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.cells.contains_key(&id)
    }

    /// Insert or replace a cell, returning the previous one.
    pub fn set(&mut self, id: CellId, cell: Cell) -> Option<Cell> {
        self.cells.insert(id, cell)
    }

    /// Write raw input into a cell, creating it if needed and keeping its format.
    pub fn set_input(&mut self, id: CellId, input: &str) {
        self.cells.entry(id).or_default().set_input(input);
    }

    pub fn remove(&mut self, id: CellId) -> Option<Cell> {
        self.cells.remove(&id)
    }

    /// Write a snapshot back, deleting the cell when the snapshot is `None`.
    pub fn restore(&mut self, id: CellId, snapshot: Option<&Cell>) {
        match snapshot {
            Some(cell) => {
                self.cells.insert(id, cell.clone());
            }
            None => {
                self.cells.remove(&id);
            }
        }
    }

    pub fn set_format(&mut self, id: CellId, format: CellFormat) {
        self.cells.entry(id).or_default().format = Some(format);
    }

    /// Display string of a cell as formulas see it; empty for absent cells.
    pub fn display(&self, id: CellId) -> String {
        self.cells.get(&id).map(Cell::display).unwrap_or_default()
    }

    pub fn computed(&self, id: CellId) -> Option<&str> {
        self.cells.get(&id).and_then(|c| c.computed.as_deref())
    }

    pub fn cells_iter(&self) -> impl Iterator<Item = (&CellId, &Cell)> {
        self.cells.iter()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All formula-bearing cells, in row-major order.
    pub fn formula_cells(&self) -> Vec<CellId> {
        let mut ids: Vec<CellId> = self
            .cells
            .iter()
            .filter(|(_, c)| c.is_formula())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}
