//! Row sorting for a rectangular range.
//!
//! Sorting never reorders anything in place. [`sort_permutation`] computes
//! which source row lands in each target row; the engine then moves whole
//! cell snapshots and records them as one undoable transaction.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;

use crate::cell_id::CellId;
use crate::formula::eval::is_error_code;
use crate::sheet::Sheet;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Normalized key value for one row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum KeyValue {
    Number(OrderedFloat<f64>),
    /// Trimmed and lowercased
    Text(String),
    Bool(bool),
    Error(String),
    Blank,
}

impl KeyValue {
    fn from_display(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return KeyValue::Blank;
        }
        if is_error_code(trimmed) {
            return KeyValue::Error(trimmed.to_string());
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return KeyValue::Number(OrderedFloat(n));
        }
        match trimmed {
            "TRUE" => KeyValue::Bool(true),
            "FALSE" => KeyValue::Bool(false),
            _ => KeyValue::Text(trimmed.to_lowercase()),
        }
    }
}

/// Key for sorting rows. Type rank: Numbers < Text < Bool < Error < Blank.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SortKey {
    value: KeyValue,
    /// Row offset inside the range; the tie-breaker that keeps the sort stable
    original_row: usize,
}

impl SortKey {
    /// Blanks stay last in both directions; equal keys keep their order.
    fn compare(&self, other: &Self, direction: SortDirection) -> Ordering {
        let by_value = match (&self.value, &other.value) {
            (KeyValue::Blank, KeyValue::Blank) => Ordering::Equal,
            (KeyValue::Blank, _) => return Ordering::Greater,
            (_, KeyValue::Blank) => return Ordering::Less,
            (a, b) if direction == SortDirection::Descending => b.cmp(a),
            (a, b) => a.cmp(b),
        };
        by_value.then(self.original_row.cmp(&other.original_row))
    }
}

/// Row order for sorting `top..=bottom` by the display value in `key_col`.
///
/// Entry `i` is the source row whose contents move to row `top + i`.
pub fn sort_permutation(sheet: &Sheet, top: usize, bottom: usize, key_col: usize, direction: SortDirection) -> Vec<usize> {
    let mut keys: Vec<SortKey> = (top..=bottom)
        .map(|row| SortKey {
            value: KeyValue::from_display(&sheet.display(CellId::new(key_col, row))),
            original_row: row - top,
        })
        .collect();
    keys.sort_by(|a, b| a.compare(b, direction));
    keys.into_iter().map(|k| top + k.original_row).collect()
}
