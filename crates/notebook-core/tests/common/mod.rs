//! In-memory kernel and editor fakes shared by the integration tests.

#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::FutureExt;
use jupyter_protocol::{
    CompleteRequest, ExecuteInput, ExecuteRequest, ExecutionCount, JupyterMessageContent, Stdio,
    StreamContent,
};
use notebook_core::{
    CellEditor, CellModel, CompletionResult, EditorFactory, KernelConnection, KernelHandle,
    KernelProvider,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub struct FakeKernel {
    id: String,
    alive: bool,
    pub executed: Mutex<Vec<String>>,
    pub interrupts: AtomicUsize,
    pub restarts: AtomicUsize,
    extra: Mutex<Vec<JupyterMessageContent>>,
}

impl FakeKernel {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(FakeKernel {
            id: id.to_string(),
            alive: true,
            executed: Mutex::new(Vec::new()),
            interrupts: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            extra: Mutex::new(Vec::new()),
        })
    }

    /// A kernel that never answers `kernel_info`.
    pub fn dead(id: &str) -> Arc<Self> {
        Arc::new(FakeKernel {
            id: id.to_string(),
            alive: false,
            executed: Mutex::new(Vec::new()),
            interrupts: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            extra: Mutex::new(Vec::new()),
        })
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Messages every later execution publishes after its stdout.
    pub fn also_publish(&self, content: JupyterMessageContent) {
        self.extra.lock().unwrap().push(content);
    }
}

impl KernelConnection for FakeKernel {
    fn kernel_id(&self) -> &str {
        &self.id
    }

    fn kernel_info(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        async move {
            if self.alive {
                Ok(())
            } else {
                Err(anyhow::anyhow!("kernel {} is not responding", self.id))
            }
        }
        .boxed()
    }

    fn execute(
        &self,
        request: ExecuteRequest,
    ) -> BoxFuture<'_, anyhow::Result<Vec<JupyterMessageContent>>> {
        async move {
            let count = {
                let mut executed = self.executed.lock().unwrap();
                executed.push(request.code.clone());
                executed.len()
            };
            let mut contents = vec![
                JupyterMessageContent::ExecuteInput(ExecuteInput {
                    code: request.code.clone(),
                    execution_count: ExecutionCount(count),
                }),
                JupyterMessageContent::StreamContent(StreamContent {
                    name: Stdio::Stdout,
                    text: format!("ran {}\n", request.code),
                }),
            ];
            contents.extend(self.extra.lock().unwrap().iter().cloned());
            Ok(contents)
        }
        .boxed()
    }

    fn complete(&self, request: CompleteRequest) -> BoxFuture<'_, anyhow::Result<CompletionResult>> {
        async move {
            let prefix: String = request.code.chars().take(request.cursor_pos).collect();
            Ok(CompletionResult {
                matches: vec![format!("{}_from_{}", prefix, self.id)],
                cursor_start: 0,
                cursor_end: request.cursor_pos,
            })
        }
        .boxed()
    }

    fn interrupt(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }

    fn restart(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }
}

/// Hands out one kernel, optionally holding the connection back until
/// `release` is called.
pub struct FakeProvider {
    name: String,
    kernel: Option<Arc<FakeKernel>>,
    gate: Option<Arc<Notify>>,
}

impl FakeProvider {
    pub fn ready(kernel: &Arc<FakeKernel>) -> Arc<Self> {
        Arc::new(FakeProvider {
            name: kernel.kernel_id().to_string(),
            kernel: Some(Arc::clone(kernel)),
            gate: None,
        })
    }

    pub fn gated(kernel: &Arc<FakeKernel>) -> Arc<Self> {
        Arc::new(FakeProvider {
            name: kernel.kernel_id().to_string(),
            kernel: Some(Arc::clone(kernel)),
            gate: Some(Arc::new(Notify::new())),
        })
    }

    /// A provider whose kernel never starts.
    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(FakeProvider {
            name: name.to_string(),
            kernel: None,
            gate: None,
        })
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }
}

impl KernelProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_connection(&self) -> BoxFuture<'static, anyhow::Result<KernelHandle>> {
        let gate = self.gate.clone();
        let kernel = self.kernel.clone();
        let name = self.name.clone();
        async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            match kernel {
                Some(kernel) => Ok(kernel as KernelHandle),
                None => Err(anyhow::anyhow!("failed to start {}", name)),
            }
        }
        .boxed()
    }
}

pub struct FakeEditor {
    cell_id: String,
    text: Mutex<String>,
}

impl FakeEditor {
    pub fn set_text(&self, text: &str) {
        *self.text.lock().unwrap() = text.to_string();
    }
}

impl CellEditor for FakeEditor {
    fn cell_id(&self) -> &str {
        &self.cell_id
    }

    fn text(&self) -> String {
        self.text.lock().unwrap().clone()
    }

    fn cursor_offset(&self) -> usize {
        self.text.lock().unwrap().chars().count()
    }
}

#[derive(Default)]
pub struct FakeEditorFactory {
    pub created: AtomicUsize,
}

impl EditorFactory for FakeEditorFactory {
    fn new_inline_editor(&self, cell: &CellModel) -> Arc<dyn CellEditor> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(FakeEditor {
            cell_id: cell.id().to_string(),
            text: Mutex::new(cell.source().to_string()),
        })
    }
}
