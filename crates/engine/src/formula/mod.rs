// Formula reference extraction and evaluation

pub mod eval;
pub mod parser;
pub mod refs;

pub use eval::{ArithmeticEvaluator, Evaluator};
pub use refs::{A1Extractor, ReferenceExtractor};
