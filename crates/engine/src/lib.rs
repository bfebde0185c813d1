pub mod cell;
pub mod cell_id;
pub mod config;
pub mod dep_graph;
pub mod engine;
pub mod error;
pub mod events;
pub mod formula;
pub mod history;
pub mod recalc;
pub mod sheet;
pub mod sort;
pub mod workbook;

pub use cell::{Cell, CellFormat};
pub use cell_id::CellId;
pub use config::EngineConfig;
pub use dep_graph::DepGraph;
pub use engine::{CommitOutcome, Engine};
pub use error::{EngineError, Result};
pub use formula::{A1Extractor, ArithmeticEvaluator, Evaluator, ReferenceExtractor};
pub use history::{History, Transaction, UndoEntry};
pub use recalc::{recalc_all, recalculate, CycleReport, RecalcReport};
pub use sheet::Sheet;
pub use sort::SortDirection;
pub use workbook::Workbook;
