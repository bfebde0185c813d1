//! Reference extraction from formula text.
//!
//! Produces the set of `CellId`s a formula reads, with ranges expanded to
//! individual cells, for dependency graph construction.

use std::collections::BTreeSet;

use crate::cell_id::CellId;

/// Maps formula text to the cells it reads.
///
/// Implementations must return each id at most once. Ranges are expanded.
pub trait ReferenceExtractor {
    fn extract(&self, formula: &str) -> Vec<CellId>;
}

impl<F> ReferenceExtractor for F
where
    F: Fn(&str) -> Vec<CellId>,
{
    fn extract(&self, formula: &str) -> Vec<CellId> {
        self(formula)
    }
}

/// Default extractor for A1-style formulas.
///
/// # Known Limitations
///
/// - Sheet-qualified references (`Data!A1`) are skipped; graphs are per sheet.
/// - Dynamic references (INDIRECT, OFFSET) cannot be statically analyzed.
#[derive(Debug, Clone)]
pub struct A1Extractor {
    max_range_cells: usize,
}

impl Default for A1Extractor {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl A1Extractor {
    pub fn new(max_range_cells: usize) -> Self {
        Self { max_range_cells }
    }
}

impl ReferenceExtractor for A1Extractor {
    fn extract(&self, formula: &str) -> Vec<CellId> {
        let mut refs = BTreeSet::new();
        for token in scan_refs(formula) {
            match token {
                RefToken::Cell(id) => {
                    refs.insert(id);
                }
                RefToken::Range(a, b) => expand_range(a, b, self.max_range_cells, &mut refs),
            }
        }
        refs.into_iter().collect()
    }
}

/// A reference found in formula text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefToken {
    Cell(CellId),
    Range(CellId, CellId),
}

/// Scan formula text for cell and range references, in source order.
pub(crate) fn scan_refs(formula: &str) -> Vec<RefToken> {
    let chars: Vec<char> = formula.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' {
            i = skip_string(&chars, i);
            continue;
        }

        // Quoted sheet name: 'My Sheet'!A1
        if c == '\'' {
            i = chars[i + 1..]
                .iter()
                .position(|&ch| ch == '\'')
                .map_or(chars.len(), |p| i + p + 2);
            if chars.get(i) == Some(&'!') {
                i += 1;
                read_word(&chars, &mut i);
                if chars.get(i) == Some(&':') {
                    i += 1;
                    read_word(&chars, &mut i);
                }
            }
            continue;
        }

        if c.is_ascii_alphabetic() || c == '$' || c == '_' {
            let start = i;
            let word = read_word(&chars, &mut i);

            // Function name
            if chars.get(i) == Some(&'(') {
                continue;
            }
            // Sheet qualifier: skip the qualified reference too
            if chars.get(i) == Some(&'!') {
                i += 1;
                read_word(&chars, &mut i);
                if chars.get(i) == Some(&':') {
                    i += 1;
                    read_word(&chars, &mut i);
                }
                continue;
            }
            // Part of a larger token such as `1E5` or `x.y`
            if start > 0 && (chars[start - 1].is_ascii_alphanumeric() || chars[start - 1] == '.') {
                continue;
            }

            let Some(first) = CellId::parse(&word) else {
                continue;
            };

            if chars.get(i) == Some(&':') {
                let mut j = i + 1;
                let second = read_word(&chars, &mut j);
                if let Some(last) = CellId::parse(&second) {
                    tokens.push(RefToken::Range(first, last));
                    i = j;
                    continue;
                }
            }
            tokens.push(RefToken::Cell(first));
            continue;
        }

        i += 1;
    }

    tokens
}

/// Number of cells a range covers, saturating.
pub(crate) fn range_size(a: CellId, b: CellId) -> usize {
    let rows = a.row.abs_diff(b.row) + 1;
    let cols = a.col.abs_diff(b.col) + 1;
    rows.saturating_mul(cols)
}

/// Expand a range into `out`, normalising corner order.
///
/// A range larger than `limit` contributes no cells. The evaluator reports
/// such a range as `#REF!` without reading it, so no edge is needed.
pub(crate) fn expand_range(a: CellId, b: CellId, limit: usize, out: &mut BTreeSet<CellId>) {
    let total = range_size(a, b);
    if total > limit {
        log::warn!("Range {}:{} has {} cells (limit {}), not tracked", a, b, total, limit);
        return;
    }

    for row in a.row.min(b.row)..=a.row.max(b.row) {
        for col in a.col.min(b.col)..=a.col.max(b.col) {
            out.insert(CellId::new(col, row));
        }
    }
}

fn read_word(chars: &[char], i: &mut usize) -> String {
    let start = *i;
    while *i < chars.len() && (chars[*i].is_ascii_alphanumeric() || matches!(chars[*i], '$' | '_' | '.')) {
        *i += 1;
    }
    chars[start..*i].iter().collect()
}

/// Skip a `"..."` literal starting at `i`; `""` is an escaped quote.
fn skip_string(chars: &[char], mut i: usize) -> usize {
    i += 1;
    while i < chars.len() {
        if chars[i] == '"' {
            if chars.get(i + 1) == Some(&'"') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}
