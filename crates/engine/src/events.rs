//! Event types for engine change notifications.
//!
//! The hosting UI subscribes to these instead of diffing the cell store after
//! every call. They are also what the integration tests use to check revision
//! boundaries.

use crate::cell_id::CellId;

/// Events emitted by [`Engine`](crate::engine::Engine) after each mutating call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Cells changed as a result of an edit, undo/redo or recalc.
    /// Always tagged with the revision that produced the changes.
    CellsChanged(CellsChangedEvent),

    /// Revision number changed. Emitted exactly once per mutating call.
    RevisionChanged(RevisionChangedEvent),
}

/// Emitted when cells change value, input or format.
#[derive(Debug, Clone, PartialEq)]
pub struct CellsChangedEvent {
    /// Revision that produced these changes.
    /// INVARIANT: All cells in this event belong to this single revision.
    pub revision: u64,
    pub sheet_index: usize,
    /// Edited cells plus recalculated dependents, sorted row-major.
    pub cells: Vec<CellId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevisionChangedEvent {
    pub revision: u64,
    pub previous: u64,
}

/// Callback type for receiving engine events.
pub type EventCallback = Box<dyn FnMut(EngineEvent) + Send>;

/// Simple event collector for testing.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<EngineEvent>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Filter to only CellsChanged events.
    pub fn cells_changed(&self) -> Vec<&CellsChangedEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::CellsChanged(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Filter to only RevisionChanged events.
    pub fn revision_changed(&self) -> Vec<&RevisionChangedEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::RevisionChanged(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// Every cell reported changed on `sheet_index`, across all events.
    pub fn changed_cells(&self, sheet_index: usize) -> Vec<CellId> {
        let mut cells: Vec<CellId> = self
            .cells_changed()
            .into_iter()
            .filter(|e| e.sheet_index == sheet_index)
            .flat_map(|e| e.cells.iter().copied())
            .collect();
        cells.sort();
        cells.dedup();
        cells
    }
}
