//! Engine error type.
//!
//! Only caller contract violations surface as `EngineError`. Circular
//! references and formula failures never do: they are written into the cell
//! store as sentinel strings.

use thiserror::Error;

use crate::cell_id::CellId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// `recalculate` was called for a cell with no data and no graph edges.
    #[error("cell {0} is neither in the cell store nor in the dependency graph")]
    UnknownCell(CellId),

    /// A sheet index did not name an existing sheet.
    #[error("sheet index {index} out of range (workbook has {count} sheets)")]
    SheetOutOfRange { index: usize, count: usize },

    /// A string could not be parsed as an A1 cell identifier.
    #[error("invalid cell identifier: {0:?}")]
    InvalidCellId(String),

    /// A range argument was malformed, such as a sort key outside the range.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Workbook (de)serialization failed.
    #[error("workbook serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
