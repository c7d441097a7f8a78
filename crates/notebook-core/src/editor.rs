//! Capability interfaces for the host's text editor widgets.

use crate::cell::CellModel;
use std::sync::Arc;

/// The editor showing one cell's source. Owned by the host; the core only
/// reads from it.
pub trait CellEditor: Send + Sync {
    fn cell_id(&self) -> &str;

    /// Current editor text, which may be ahead of the cell model's source.
    fn text(&self) -> String;

    /// Cursor position as a character offset into `text()`.
    fn cursor_offset(&self) -> usize;
}

/// Creates editors for cells as they become active.
pub trait EditorFactory: Send + Sync {
    fn new_inline_editor(&self, cell: &CellModel) -> Arc<dyn CellEditor>;
}
