//! Session context: which kernel connection, if any, a notebook is attached to.
//!
//! Kernel changes are asynchronous and may overlap. Every change takes a new
//! [`Generation`] from a [`GenerationCounter`]; continuations check that their
//! generation is still current before acting, so a slow, superseded change can
//! never overwrite a newer one.

use crate::error::{NotebookError, Result};
use crate::kernel::KernelHandle;
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

/// Monotonic counter shared by everything that reacts to kernel changes.
#[derive(Clone)]
pub struct GenerationCounter {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for GenerationCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationCounter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Start a new generation, superseding all earlier ones.
    pub fn advance(&self) -> Generation {
        let mut next = 0;
        self.tx.send_modify(|g| {
            *g += 1;
            next = *g;
        });
        Generation(next)
    }

    pub fn current(&self) -> Generation {
        Generation(*self.tx.borrow())
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }

    /// Resolves once `generation` is no longer current.
    pub async fn superseded(&self, generation: Generation) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|g| *g != generation.0).await;
    }
}

/// Kernel state as reported to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KernelStatus {
    /// No kernel attached.
    Detached,
    /// A kernel change is in flight.
    Binding { kernel: String },
    Ready { kernel_id: String },
    /// The last kernel change failed; the notebook runs without a kernel.
    Failed { reason: String },
}

pub struct SessionContext {
    connection: watch::Sender<Option<KernelHandle>>,
    kernel_info_timeout: Duration,
}

impl SessionContext {
    pub fn new(kernel_info_timeout: Duration) -> Self {
        let (connection, _) = watch::channel(None);
        SessionContext {
            connection,
            kernel_info_timeout,
        }
    }

    pub fn connection(&self) -> Option<KernelHandle> {
        self.connection.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.connection.borrow().is_some()
    }

    /// Observe kernel swaps. Every adoption and detach is published.
    pub fn subscribe(&self) -> watch::Receiver<Option<KernelHandle>> {
        self.connection.subscribe()
    }

    /// Wait until a connection is attached and return it.
    pub async fn ready(&self) -> Option<KernelHandle> {
        let mut rx = self.connection.subscribe();
        let handle = match rx.wait_for(|c| c.is_some()).await {
            Ok(conn) => conn.clone(),
            Err(_) => None,
        };
        handle
    }

    /// Adopt `handle` after a successful `kernel_info` handshake.
    ///
    /// Returns `Ok(false)` without touching the session when `generation` was
    /// superseded while the handshake was in flight.
    pub async fn change_kernel(
        &self,
        handle: KernelHandle,
        generation: Generation,
        generations: &GenerationCounter,
    ) -> Result<bool> {
        let kernel_id = handle.kernel_id().to_string();
        match tokio::time::timeout(self.kernel_info_timeout, handle.kernel_info()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(NotebookError::KernelBindingFailed(format!(
                    "kernel {} did not answer kernel_info: {}",
                    kernel_id, e
                )));
            }
            Err(_) => {
                return Err(NotebookError::KernelBindingFailed(format!(
                    "kernel {} did not respond within {}s",
                    kernel_id,
                    self.kernel_info_timeout.as_secs()
                )));
            }
        }

        // Checked while holding the channel's write lock so a newer change
        // cannot attach between the check and the install.
        let adopted = self.connection.send_if_modified(|current| {
            if !generations.is_current(generation) {
                return false;
            }
            *current = Some(handle);
            true
        });
        if adopted {
            info!("[session] Adopted kernel {}", kernel_id);
        } else {
            debug!(
                "[session] Dropping kernel {} from superseded change {:?}",
                kernel_id, generation
            );
        }
        Ok(adopted)
    }

    pub fn detach(&self) {
        if self.connection.send_replace(None).is_some() {
            info!("[session] Detached kernel");
        }
    }
}
