//! Notebook editing and execution-state core.
//!
//! A [`NotebookDocument`] holds an ordered list of typed cells with undo
//! history. A [`KernelSessionBinding`] ties one document to a swappable
//! kernel connection, rebuilding code completion and the kernel commands
//! whenever the kernel changes. Hosts drive everything through the
//! [`CommandRegistry`] and the [`CellTracker`].

pub mod binding;
pub mod cell;
pub mod commands;
pub mod completion;
pub mod document;
pub mod editor;
pub mod error;
pub mod kernel;
pub mod outputs;
pub mod render;
pub mod session;
pub mod settings;
pub mod tracker;

pub use binding::{BindingOptions, KernelSessionBinding};
pub use cell::{CellKind, CellModel, SerializedCell, SerializedNotebook};
pub use commands::{command_ids, Command, CommandArgs, CommandOutcome, CommandRegistry, KeyEvent};
pub use completion::{CompletionCoordinator, CompletionPhase};
pub use document::{DocumentChange, NotebookDocument};
pub use editor::{CellEditor, EditorFactory};
pub use error::{NotebookError, Result};
pub use kernel::{CompletionResult, KernelConnection, KernelHandle, KernelProvider};
pub use render::{Displayable, RendererFactory, RendererRegistry};
pub use session::{KernelStatus, SessionContext};
pub use settings::NotebookSettings;
pub use tracker::{ActiveCell, CellTracker};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
