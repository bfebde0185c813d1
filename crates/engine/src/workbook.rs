use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::sheet::Sheet;

/// Ordered collection of sheets. Undo entries address cells by sheet index.
///
/// Only cell data is persisted; dependency graphs are rebuilt on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    #[serde(default)]
    active: usize,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    /// Create a workbook with a single empty sheet.
    pub fn new() -> Self {
        Self {
            sheets: vec![Sheet::new("Sheet1")],
            active: 0,
        }
    }

    /// Build from existing sheets. An empty list gets one blank sheet.
    pub fn from_sheets(mut sheets: Vec<Sheet>, active: usize) -> Self {
        if sheets.is_empty() {
            sheets.push(Sheet::new("Sheet1"));
        }
        let active = active.min(sheets.len() - 1);
        Self { sheets, active }
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn active_sheet_index(&self) -> usize {
        self.active
    }

    /// Switch the active sheet. Returns false if the index is out of range.
    pub fn set_active_sheet(&mut self, index: usize) -> bool {
        if index < self.sheets.len() {
            self.active = index;
            true
        } else {
            false
        }
    }

    pub fn sheet(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Sheet> {
        self.sheets.get_mut(index)
    }

    /// Like [`Workbook::sheet`] but reports a contract violation as an error.
    pub fn try_sheet(&self, index: usize) -> Result<&Sheet> {
        let count = self.sheets.len();
        self.sheets
            .get(index)
            .ok_or(EngineError::SheetOutOfRange { index, count })
    }

    pub fn try_sheet_mut(&mut self, index: usize) -> Result<&mut Sheet> {
        let count = self.sheets.len();
        self.sheets
            .get_mut(index)
            .ok_or(EngineError::SheetOutOfRange { index, count })
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    /// Append a sheet and return its index.
    pub fn add_sheet(&mut self, name: impl Into<String>) -> usize {
        self.sheets.push(Sheet::new(name));
        self.sheets.len() - 1
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a workbook. The active index is clamped to the sheet count.
    pub fn from_json(json: &str) -> Result<Self> {
        let wb: Workbook = serde_json::from_str(json)?;
        Ok(Self::from_sheets(wb.sheets, wb.active))
    }
}
