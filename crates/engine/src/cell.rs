use serde::{Deserialize, Serialize};

/// Horizontal text alignment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

/// Number format type
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum NumberFormat {
    #[default]
    General,
    Number { decimals: u8 },
    Currency { decimals: u8 },
    Percent { decimals: u8 },
}

/// Cell formatting options. Never read by recalculation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellFormat {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub alignment: Alignment,
    pub number_format: NumberFormat,
}

/// A single entry in the cell store.
///
/// `value` always holds the raw user input. When that input starts with `=`,
/// `formula` carries the same text and `computed` the last evaluation result
/// (or a sentinel error string). Plain cells keep `formula` and `computed` unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cell {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<CellFormat>,
}

impl Cell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cell from raw user input.
    pub fn from_input(input: &str) -> Self {
        let mut cell = Self::new();
        cell.set_input(input);
        cell
    }

    /// Replace the raw input, keeping the format.
    ///
    /// Any previous computed value is dropped; the scheduler fills it in again.
    pub fn set_input(&mut self, input: &str) {
        let trimmed = input.trim();
        self.value = input.to_string();
        self.formula = if trimmed.starts_with('=') {
            Some(trimmed.to_string())
        } else {
            None
        };
        self.computed = None;
    }

    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }

    /// The string other formulas see when they read this cell.
    pub fn display(&self) -> String {
        match &self.formula {
            Some(_) => self.computed.clone().unwrap_or_default(),
            None => self.value.clone(),
        }
    }
}
