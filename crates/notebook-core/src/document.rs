//! In-memory notebook document: an ordered list of cells with compound
//! (undo-grouped) edits and change notifications.

use crate::cell::{CellKind, CellModel, SerializedNotebook};
use crate::error::{NotebookError, Result};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use tokio::sync::broadcast;

/// Notification sent to document observers.
///
/// Edits made inside a compound operation are reported once, when the
/// outermost operation ends.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    /// The whole cell list was replaced by `load`.
    Reset { len: usize },
    /// Cells at these indices were inserted, removed or replaced.
    CellsChanged { indices: Vec<usize> },
}

#[derive(Debug, Clone)]
enum CellEdit {
    Insert { index: usize, cell: CellModel },
    Remove { index: usize, cell: CellModel },
    Replace { index: usize, old: CellModel, new: CellModel },
    SetSource { index: usize, old: String, new: String },
}

impl CellEdit {
    fn index(&self) -> usize {
        match self {
            CellEdit::Insert { index, .. }
            | CellEdit::Remove { index, .. }
            | CellEdit::Replace { index, .. }
            | CellEdit::SetSource { index, .. } => *index,
        }
    }

    fn inverse(&self) -> CellEdit {
        match self.clone() {
            CellEdit::Insert { index, cell } => CellEdit::Remove { index, cell },
            CellEdit::Remove { index, cell } => CellEdit::Insert { index, cell },
            CellEdit::Replace { index, old, new } => CellEdit::Replace {
                index,
                old: new,
                new: old,
            },
            CellEdit::SetSource { index, old, new } => CellEdit::SetSource {
                index,
                old: new,
                new: old,
            },
        }
    }
}

pub struct NotebookDocument {
    cells: Vec<CellModel>,
    metadata: Map<String, Value>,
    nbformat: u32,
    nbformat_minor: u32,
    read_only: bool,
    disposed: bool,
    /// Markdown cells currently showing rendered output instead of source.
    rendered: HashSet<String>,
    undo_stack: Vec<Vec<CellEdit>>,
    redo_stack: Vec<Vec<CellEdit>>,
    compound_depth: usize,
    compound_edits: Vec<CellEdit>,
    pending_indices: BTreeSet<usize>,
    changes: broadcast::Sender<DocumentChange>,
}

impl NotebookDocument {
    pub fn new(read_only: bool) -> Self {
        let (changes, _) = broadcast::channel(64);
        let empty = SerializedNotebook::from_cells(Vec::new());
        NotebookDocument {
            cells: Vec::new(),
            metadata: empty.metadata,
            nbformat: empty.nbformat,
            nbformat_minor: empty.nbformat_minor,
            read_only,
            disposed: false,
            rendered: HashSet::new(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            compound_depth: 0,
            compound_edits: Vec::new(),
            pending_indices: BTreeSet::new(),
            changes,
        }
    }

    /// A document holding a single empty cell of `kind`.
    pub fn new_empty(kind: CellKind, read_only: bool) -> Self {
        let mut doc = NotebookDocument::new(read_only);
        let mut cell = CellModel::new(kind);
        cell.metadata_mut()
            .insert("editable".to_string(), Value::Bool(!read_only));
        doc.cells.push(cell);
        doc
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn cells(&self) -> &[CellModel] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, cell_id: &str) -> Option<&CellModel> {
        self.cells.iter().find(|c| c.id() == cell_id)
    }

    pub fn find_cell_index(&self, cell_id: &str) -> Option<usize> {
        self.cells.iter().position(|c| c.id() == cell_id)
    }

    /// Replace every cell with the records of `model`.
    ///
    /// Each cell gets `metadata.editable` stamped from the document's read-only
    /// flag and a generated id when it has none or repeats an earlier one.
    /// Records of unknown kinds are dropped with a warning. Undo history is
    /// cleared.
    pub fn load(&mut self, model: &SerializedNotebook) -> Result<()> {
        self.ensure_live()?;

        self.cells.clear();
        self.rendered.clear();
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.metadata = model.metadata.clone();
        self.nbformat = model.nbformat;
        self.nbformat_minor = model.nbformat_minor;

        let mut seen: HashSet<String> = HashSet::new();
        for record in &model.cells {
            let kind = match record.cell_type.parse::<CellKind>() {
                Ok(kind) => kind,
                Err(e) => {
                    warn!("[document] Skipping cell during load: {}", e);
                    continue;
                }
            };
            let mut record = record.clone();
            if let Some(id) = record.id.take() {
                if seen.contains(&id) {
                    warn!("[document] Duplicate cell id {}, assigning a new one", id);
                } else {
                    record.id = Some(id);
                }
            }
            record
                .metadata
                .insert("editable".to_string(), Value::Bool(!self.read_only));
            let cell = CellModel::from_serialized(record, kind);
            seen.insert(cell.id().to_string());
            if kind == CellKind::Markdown {
                self.rendered.insert(cell.id().to_string());
            }
            self.cells.push(cell);
        }

        info!("[document] Loaded {} cells", self.cells.len());
        let _ = self.changes.send(DocumentChange::Reset {
            len: self.cells.len(),
        });
        Ok(())
    }

    pub fn to_serialized(&self) -> Result<SerializedNotebook> {
        self.ensure_live()?;
        Ok(SerializedNotebook {
            cells: self.cells.iter().map(CellModel::to_serialized).collect(),
            metadata: self.metadata.clone(),
            nbformat: self.nbformat,
            nbformat_minor: self.nbformat_minor,
        })
    }

    /// Convert every selected cell whose kind differs from `target`.
    ///
    /// Replacements are built from the original cell's serialized record and
    /// installed at the same index inside a single compound operation. Code
    /// cells downgraded to markdown or raw lose their trust flag. Selected
    /// cells ending up as markdown are left un-rendered. The selection is
    /// cleared afterwards. Returns how many cells were replaced.
    pub fn convert_cell_type(
        &mut self,
        selection: &mut HashSet<String>,
        target: CellKind,
    ) -> Result<usize> {
        self.ensure_live()?;

        let mut converted = 0;
        self.begin_compound_operation();
        for index in 0..self.cells.len() {
            let original = &self.cells[index];
            if !selection.contains(original.id()) {
                continue;
            }
            let id = original.id().to_string();
            if original.kind() != target {
                let mut replacement = CellModel::from_serialized(original.to_serialized(), target);
                if original.kind() == CellKind::Code {
                    replacement.set_trusted(false);
                }
                debug!(
                    "[document] Converting cell {} from {} to {}",
                    id,
                    original.kind(),
                    target
                );
                self.replace_at(index, replacement);
                converted += 1;
            }
            if target == CellKind::Markdown {
                self.rendered.remove(&id);
            }
        }
        self.end_compound_operation();

        selection.clear();
        Ok(converted)
    }

    /// Insert an empty cell after `after_cell_id`, or at the top when none is
    /// given. An unknown anchor appends at the end. Returns the new cell's id.
    pub fn add_cell(&mut self, kind: CellKind, after_cell_id: Option<&str>) -> Result<String> {
        self.ensure_live()?;

        let mut cell = CellModel::new(kind);
        cell.metadata_mut()
            .insert("editable".to_string(), Value::Bool(!self.read_only));
        let id = cell.id().to_string();

        let index = match after_cell_id {
            Some(anchor) => self
                .find_cell_index(anchor)
                .map(|i| i + 1)
                .unwrap_or(self.cells.len()),
            None => 0,
        };
        self.apply(CellEdit::Insert { index, cell });
        Ok(id)
    }

    /// Remove a cell. The last remaining cell is never removed.
    pub fn delete_cell(&mut self, cell_id: &str) -> Result<bool> {
        self.ensure_live()?;

        if self.cells.len() <= 1 {
            return Ok(false);
        }
        let Some(index) = self.find_cell_index(cell_id) else {
            return Ok(false);
        };
        let cell = self.cells[index].clone();
        self.apply(CellEdit::Remove { index, cell });
        Ok(true)
    }

    /// Replace a cell's source. The edit joins the undo history.
    pub fn update_cell_source(&mut self, cell_id: &str, source: &str) -> Result<()> {
        self.ensure_live()?;
        let index = self
            .find_cell_index(cell_id)
            .ok_or_else(|| NotebookError::CellNotFound(cell_id.to_string()))?;
        let old = self.cells[index].source().to_string();
        if old == source {
            return Ok(());
        }
        self.apply(CellEdit::SetSource {
            index,
            old,
            new: source.to_string(),
        });
        Ok(())
    }

    pub fn clear_cell_outputs(&mut self, cell_id: &str) -> Result<()> {
        self.cell_mut(cell_id)?.clear_outputs();
        Ok(())
    }

    pub fn append_output(&mut self, cell_id: &str, output: Value) -> Result<()> {
        self.cell_mut(cell_id)?.push_output(output);
        Ok(())
    }

    /// Apply an update_display_data to every output with `display_id`,
    /// wherever it lives in the notebook. Returns how many outputs changed.
    pub fn update_display(
        &mut self,
        display_id: &str,
        data: &Value,
        metadata: &Value,
    ) -> Result<usize> {
        self.ensure_live()?;
        Ok(self
            .cells
            .iter_mut()
            .map(|cell| cell.update_display(display_id, data, metadata))
            .sum())
    }

    pub fn set_execution_count(&mut self, cell_id: &str, count: i32) -> Result<()> {
        self.cell_mut(cell_id)?.set_execution_count(Some(count));
        Ok(())
    }

    pub fn set_trusted(&mut self, cell_id: &str, trusted: bool) -> Result<()> {
        self.cell_mut(cell_id)?.set_trusted(trusted);
        Ok(())
    }

    pub fn is_rendered(&self, cell_id: &str) -> bool {
        self.rendered.contains(cell_id)
    }

    /// Toggle the rendered state of a markdown cell. Other kinds are ignored.
    pub fn set_rendered(&mut self, cell_id: &str, rendered: bool) -> Result<()> {
        if self.cell_mut(cell_id)?.kind() != CellKind::Markdown {
            return Ok(());
        }
        if rendered {
            self.rendered.insert(cell_id.to_string());
        } else {
            self.rendered.remove(cell_id);
        }
        Ok(())
    }

    /// Start grouping edits into one undo unit. Calls nest.
    pub fn begin_compound_operation(&mut self) {
        self.compound_depth += 1;
    }

    /// Close a compound operation. When the outermost one closes, its edits
    /// become a single undo unit and observers get one notification.
    pub fn end_compound_operation(&mut self) {
        if self.compound_depth == 0 {
            warn!("[document] end_compound_operation without matching begin");
            return;
        }
        self.compound_depth -= 1;
        if self.compound_depth > 0 {
            return;
        }
        let edits = std::mem::take(&mut self.compound_edits);
        if !edits.is_empty() {
            self.undo_stack.push(edits);
            self.redo_stack.clear();
        }
        self.flush_changes();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo(&mut self) -> Result<bool> {
        self.ensure_live()?;
        let Some(unit) = self.undo_stack.pop() else {
            return Ok(false);
        };
        for edit in unit.iter().rev() {
            self.perform(&edit.inverse());
        }
        self.redo_stack.push(unit);
        self.flush_changes();
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool> {
        self.ensure_live()?;
        let Some(unit) = self.redo_stack.pop() else {
            return Ok(false);
        };
        for edit in &unit {
            self.perform(edit);
        }
        self.undo_stack.push(unit);
        self.flush_changes();
        Ok(true)
    }

    /// Tear the document down. Later operations fail with `DocumentDisposed`.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.cells.clear();
        self.rendered.clear();
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.compound_edits.clear();
        self.pending_indices.clear();
        info!("[document] Disposed");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(NotebookError::DocumentDisposed);
        }
        Ok(())
    }

    fn cell_mut(&mut self, cell_id: &str) -> Result<&mut CellModel> {
        self.ensure_live()?;
        self.cells
            .iter_mut()
            .find(|c| c.id() == cell_id)
            .ok_or_else(|| NotebookError::CellNotFound(cell_id.to_string()))
    }

    fn replace_at(&mut self, index: usize, new: CellModel) {
        let old = self.cells[index].clone();
        self.apply(CellEdit::Replace { index, old, new });
    }

    /// Perform and record an edit, wrapping it in its own compound operation
    /// when none is open.
    fn apply(&mut self, edit: CellEdit) {
        self.begin_compound_operation();
        self.perform(&edit);
        self.compound_edits.push(edit);
        self.end_compound_operation();
    }

    fn perform(&mut self, edit: &CellEdit) {
        match edit {
            CellEdit::Insert { index, cell } => {
                self.cells.insert(*index, cell.clone());
            }
            CellEdit::Remove { index, cell } => {
                self.cells.remove(*index);
                self.rendered.remove(cell.id());
            }
            CellEdit::Replace { index, new, .. } => {
                if new.kind() != CellKind::Markdown {
                    self.rendered.remove(new.id());
                }
                self.cells[*index] = new.clone();
            }
            CellEdit::SetSource { index, new, .. } => {
                self.cells[*index].set_source(new);
            }
        }
        self.pending_indices.insert(edit.index());
    }

    fn flush_changes(&mut self) {
        if self.pending_indices.is_empty() {
            return;
        }
        let indices: Vec<usize> = std::mem::take(&mut self.pending_indices)
            .into_iter()
            .collect();
        let _ = self.changes.send(DocumentChange::CellsChanged { indices });
    }
}
