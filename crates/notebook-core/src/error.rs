//! Error type shared by the document, session and command layers.

/// Errors surfaced by notebook operations.
///
/// Structural errors (`DocumentDisposed`, `UnknownCommand`) always reach the
/// caller. `KernelBindingFailed` is absorbed by the session binding and only
/// shows up as reduced capability; it is kept here so the binding can log and
/// report it through [`crate::session::KernelStatus`].
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error("Notebook document has been disposed")]
    DocumentDisposed,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Kernel binding failed: {0}")]
    KernelBindingFailed(String),

    #[error("Unsupported cell kind: {0}")]
    UnsupportedCellKind(String),

    #[error("Cell not found: {0}")]
    CellNotFound(String),

    #[error("No kernel attached")]
    NoKernel,

    #[error(transparent)]
    Kernel(#[from] anyhow::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = NotebookError> = std::result::Result<T, E>;
