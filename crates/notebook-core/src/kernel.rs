//! Contracts for the external kernel transport.
//!
//! The core never manages kernel processes or sockets. A `KernelProvider`
//! resolves to a `KernelConnection` handle that the session context adopts;
//! everything past that point goes through the handle's methods.

use anyhow::Result;
use futures::future::BoxFuture;
use jupyter_protocol::{CompleteRequest, ExecuteRequest, JupyterMessageContent};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResult {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
}

impl From<jupyter_protocol::CompleteReply> for CompletionResult {
    fn from(reply: jupyter_protocol::CompleteReply) -> Self {
        CompletionResult {
            matches: reply.matches,
            cursor_start: reply.cursor_start,
            cursor_end: reply.cursor_end,
        }
    }
}

/// A live connection to a kernel.
pub trait KernelConnection: Send + Sync {
    fn kernel_id(&self) -> &str;

    /// `kernel_info` handshake used to confirm the kernel is alive.
    fn kernel_info(&self) -> BoxFuture<'_, Result<()>>;

    /// Run an execute request and return the iopub contents it produced, in
    /// arrival order, up to the kernel going idle.
    fn execute(&self, request: ExecuteRequest)
        -> BoxFuture<'_, Result<Vec<JupyterMessageContent>>>;

    fn complete(&self, request: CompleteRequest) -> BoxFuture<'_, Result<CompletionResult>>;

    fn interrupt(&self) -> BoxFuture<'_, Result<()>>;

    fn restart(&self) -> BoxFuture<'_, Result<()>>;
}

pub type KernelHandle = Arc<dyn KernelConnection>;

/// Something that can hand out a kernel connection, such as a kernel picked
/// by the user in the host UI.
pub trait KernelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn get_connection(&self) -> BoxFuture<'static, Result<KernelHandle>>;
}
