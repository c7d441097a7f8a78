//! Tracks which cell has focus and which cells are selected.
//!
//! The tracker never owns editors. The current cell's editor is held as a weak
//! reference and listeners are told about focus changes synchronously.

use crate::editor::CellEditor;
use crate::lock;
use std::sync::{Arc, Mutex, Weak};

/// The focused cell and a weak handle to its editor.
#[derive(Clone)]
pub struct ActiveCell {
    pub cell_id: String,
    pub editor: Weak<dyn CellEditor>,
}

impl std::fmt::Debug for ActiveCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCell")
            .field("cell_id", &self.cell_id)
            .field("editor_alive", &(self.editor.strong_count() > 0))
            .finish()
    }
}

/// Returns false to disconnect itself.
type Listener = Box<dyn Fn(Option<&ActiveCell>) -> bool + Send + Sync>;

#[derive(Default)]
struct TrackerState {
    current: Option<ActiveCell>,
    selection: Vec<String>,
}

#[derive(Default)]
pub struct CellTracker {
    state: Mutex<TrackerState>,
    listeners: Mutex<Vec<Listener>>,
}

impl CellTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ActiveCell> {
        lock(&self.state).current.clone()
    }

    pub fn current_cell_id(&self) -> Option<String> {
        lock(&self.state)
            .current
            .as_ref()
            .map(|c| c.cell_id.clone())
    }

    pub fn set_current(&self, cell_id: &str, editor: &Arc<dyn CellEditor>) {
        let active = ActiveCell {
            cell_id: cell_id.to_string(),
            editor: Arc::downgrade(editor),
        };
        lock(&self.state).current = Some(active.clone());
        self.notify(Some(&active));
    }

    pub fn clear_current(&self) {
        let had_current = lock(&self.state).current.take().is_some();
        if had_current {
            self.notify(None);
        }
    }

    /// Add a cell to the selection, keeping selection order.
    pub fn select(&self, cell_id: &str) {
        let mut state = lock(&self.state);
        if !state.selection.iter().any(|id| id == cell_id) {
            state.selection.push(cell_id.to_string());
        }
    }

    pub fn set_selection(&self, cell_ids: Vec<String>) {
        lock(&self.state).selection = cell_ids;
    }

    pub fn clear_selection(&self) {
        lock(&self.state).selection.clear();
    }

    pub fn selection(&self) -> Vec<String> {
        lock(&self.state).selection.clone()
    }

    /// Listen for focus changes.
    pub fn connect<F>(&self, listener: F)
    where
        F: Fn(Option<&ActiveCell>) -> bool + Send + Sync + 'static,
    {
        lock(&self.listeners).push(Box::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    fn notify(&self, active: Option<&ActiveCell>) {
        lock(&self.listeners).retain(|listener| listener(active));
    }
}
