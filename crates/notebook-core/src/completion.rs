//! Code completion wired to the active cell's editor and the session's kernel.
//!
//! A coordinator starts with a placeholder connector and swaps in the live
//! kernel once the session is ready. Requests made before that are no-ops.
//! Each kernel change builds a fresh coordinator; an old one that is still
//! waiting gives up as soon as its generation is superseded.

use crate::editor::CellEditor;
use crate::error::Result;
use crate::kernel::{CompletionResult, KernelHandle};
use crate::lock;
use crate::session::{Generation, GenerationCounter, SessionContext};
use jupyter_protocol::CompleteRequest;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPhase {
    Unbound,
    /// Waiting for the session to become ready.
    Binding,
    Bound,
}

enum Connector {
    Placeholder,
    Kernel(KernelHandle),
}

pub struct CompletionCoordinator {
    session: Arc<SessionContext>,
    generation: Generation,
    generations: GenerationCounter,
    timeout: Duration,
    editor: Mutex<Option<Weak<dyn CellEditor>>>,
    connector: Mutex<Arc<Connector>>,
    phase: watch::Sender<CompletionPhase>,
}

impl CompletionCoordinator {
    pub fn new(
        session: Arc<SessionContext>,
        editor: Option<Weak<dyn CellEditor>>,
        generation: Generation,
        generations: GenerationCounter,
        timeout: Duration,
    ) -> Arc<Self> {
        let (phase, _) = watch::channel(CompletionPhase::Unbound);
        Arc::new(CompletionCoordinator {
            session,
            generation,
            generations,
            timeout,
            editor: Mutex::new(editor),
            connector: Mutex::new(Arc::new(Connector::Placeholder)),
            phase,
        })
    }

    /// Enter `Binding` and wait for the session in the background.
    pub fn start(self: &Arc<Self>) {
        self.phase.send_replace(CompletionPhase::Binding);
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.bind_when_ready().await });
    }

    async fn bind_when_ready(&self) {
        let handle = tokio::select! {
            handle = self.session.ready() => handle,
            _ = self.generations.superseded(self.generation) => {
                debug!("[completion] Coordinator {:?} superseded before the session was ready", self.generation);
                return;
            }
        };

        let Some(handle) = handle else {
            warn!("[completion] Session closed before a kernel was ready");
            return;
        };
        if !self.generations.is_current(self.generation) {
            debug!("[completion] Ignoring ready kernel for stale coordinator");
            return;
        }

        let kernel_id = handle.kernel_id().to_string();
        *lock(&self.connector) = Arc::new(Connector::Kernel(handle));
        self.phase.send_replace(CompletionPhase::Bound);
        info!("[completion] Bound to kernel {}", kernel_id);
    }

    pub fn phase(&self) -> CompletionPhase {
        *self.phase.borrow()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub async fn wait_until_bound(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|p| *p == CompletionPhase::Bound).await;
    }

    /// Kernel behind the live connector, if bound.
    pub fn bound_kernel_id(&self) -> Option<String> {
        match lock(&self.connector).as_ref() {
            Connector::Kernel(handle) => Some(handle.kernel_id().to_string()),
            Connector::Placeholder => None,
        }
    }

    /// Point completions at a different editor, or none.
    pub fn set_editor(&self, editor: Option<Weak<dyn CellEditor>>) {
        *lock(&self.editor) = editor;
    }

    pub fn editor(&self) -> Option<Arc<dyn CellEditor>> {
        lock(&self.editor).as_ref().and_then(|weak| weak.upgrade())
    }

    /// Ask the kernel for completions at the editor's cursor.
    ///
    /// Returns `Ok(None)` without blocking while still binding, when no
    /// editor is active, or when the kernel does not answer in time.
    pub async fn request_completion(&self) -> Result<Option<CompletionResult>> {
        let connector = lock(&self.connector).clone();
        let Connector::Kernel(handle) = connector.as_ref() else {
            debug!("[completion] Request ignored while binding");
            return Ok(None);
        };
        let Some(editor) = self.editor() else {
            return Ok(None);
        };

        let request = CompleteRequest {
            code: editor.text(),
            cursor_pos: editor.cursor_offset(),
        };
        match tokio::time::timeout(self.timeout, handle.complete(request)).await {
            Ok(result) => Ok(Some(result?)),
            Err(_) => {
                debug!(
                    "[completion] Kernel {} did not answer within {}ms",
                    handle.kernel_id(),
                    self.timeout.as_millis()
                );
                Ok(None)
            }
        }
    }
}
