//! Cell identity for the cell store and dependency graph.
//!
//! A `CellId` is a zero-based (column, row) pair whose canonical string form is
//! the A1 key (`col 0, row 0` → `"A1"`). The mapping is bijective within
//! [`MAX_COLS`] × [`MAX_ROWS`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// Number of addressable columns (A..XFD).
pub const MAX_COLS: usize = 16_384;

/// Number of addressable rows.
pub const MAX_ROWS: usize = 1_048_576;

/// Unique identifier for a cell within a sheet.
///
/// Ordering is row-major (row first, then column). Every traversal that has
/// to be deterministic sorts by this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellId {
    /// Column index (0-based)
    pub col: usize,
    /// Row index (0-based)
    pub row: usize,
}

impl CellId {
    /// Create a new CellId.
    #[inline]
    pub fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }

    /// Create a CellId, returning `None` outside the grid bounds.
    pub fn checked(col: usize, row: usize) -> Option<Self> {
        if col < MAX_COLS && row < MAX_ROWS {
            Some(Self { col, row })
        } else {
            None
        }
    }

    /// Parse an A1 key such as `"B7"`, `"$AA$10"` or `"c3"`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let bytes = s.as_bytes();
        let mut i = 0;

        if bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        let col_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let col_end = i;
        if col_end == col_start || col_end - col_start > 3 {
            return None;
        }

        if bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        let row_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i != bytes.len() || row_start == i {
            return None;
        }

        let col = letters_to_col(&s[col_start..col_end])?;
        let row: usize = s[row_start..].parse().ok()?;
        if row == 0 {
            return None;
        }
        Self::checked(col, row - 1)
    }
}

impl Ord for CellId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.row.cmp(&other.row).then(self.col.cmp(&other.col))
    }
}

impl PartialOrd for CellId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), self.row + 1)
    }
}

impl FromStr for CellId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| EngineError::InvalidCellId(s.to_string()))
    }
}

// Serialized as the A1 key so a `CellId` can key JSON objects.
impl Serialize for CellId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Convert 0-based column index to Excel-style letter(s).
pub fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Convert Excel-style letter(s) to a 0-based column index.
pub fn letters_to_col(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_id_equality() {
        let a = CellId::new(0, 0);
        let b = CellId::new(0, 0);
        let c = CellId::new(1, 0);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_col_to_letters() {
        assert_eq!(col_to_letters(0), "A");
        assert_eq!(col_to_letters(1), "B");
        assert_eq!(col_to_letters(25), "Z");
        assert_eq!(col_to_letters(26), "AA");
        assert_eq!(col_to_letters(27), "AB");
        assert_eq!(col_to_letters(701), "ZZ");
        assert_eq!(col_to_letters(702), "AAA");
        assert_eq!(col_to_letters(MAX_COLS - 1), "XFD");
    }

    #[test]
    fn test_letters_to_col() {
        assert_eq!(letters_to_col("A"), Some(0));
        assert_eq!(letters_to_col("z"), Some(25));
        assert_eq!(letters_to_col("AA"), Some(26));
        assert_eq!(letters_to_col("XFD"), Some(MAX_COLS - 1));
        assert_eq!(letters_to_col(""), None);
        assert_eq!(letters_to_col("A1"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(CellId::new(0, 0).to_string(), "A1");
        assert_eq!(CellId::new(26, 9).to_string(), "AA10");
    }

    #[test]
    fn test_parse() {
        assert_eq!(CellId::parse("A1"), Some(CellId::new(0, 0)));
        assert_eq!(CellId::parse("b7"), Some(CellId::new(1, 6)));
        assert_eq!(CellId::parse("$AA$10"), Some(CellId::new(26, 9)));
        assert_eq!(CellId::parse("XFD1048576"), Some(CellId::new(MAX_COLS - 1, MAX_ROWS - 1)));

        assert_eq!(CellId::parse("A0"), None);
        assert_eq!(CellId::parse("1A"), None);
        assert_eq!(CellId::parse("XFE1"), None);
        assert_eq!(CellId::parse("A1048577"), None);
        assert_eq!(CellId::parse("ABCD1"), None);
        assert_eq!(CellId::parse("A1B"), None);
        assert_eq!(CellId::parse(""), None);
    }

    #[test]
    fn test_round_trip_at_bounds() {
        for id in [
            CellId::new(0, 0),
            CellId::new(25, 0),
            CellId::new(26, 99),
            CellId::new(MAX_COLS - 1, MAX_ROWS - 1),
        ] {
            assert_eq!(id.to_string().parse::<CellId>().unwrap(), id);
        }
    }

    #[test]
    fn test_row_major_order() {
        let mut cells = vec![CellId::new(1, 0), CellId::new(0, 1), CellId::new(0, 0)];
        cells.sort();
        assert_eq!(cells, vec![CellId::new(0, 0), CellId::new(1, 0), CellId::new(0, 1)]);
    }

    #[test]
    fn test_serde_as_a1_key() {
        let json = serde_json::to_string(&CellId::new(2, 4)).unwrap();
        assert_eq!(json, "\"C5\"");
        let back: CellId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CellId::new(2, 4));
        assert!(serde_json::from_str::<CellId>("\"nope\"").is_err());
    }
}
