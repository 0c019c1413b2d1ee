// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Asynchronous execution handles
//!
//! [`DeviceAdaptor::execute`](super::DeviceAdaptor::execute) returns at once
//! with an [`ExecutionHandle`]; the device side keeps the matching
//! [`Completion`] and resolves it when the action settles. Both halves share a
//! [`CancelToken`] used by `abort`.
//!
//! If the [`Completion`] is dropped without being resolved (for example because
//! the task driving the device panicked), [`ExecutionHandle::wait`] returns
//! `None`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Notify};

use super::{AdaptorError, Telemetry};

/// Result delivered through an execution handle.
pub type ExecutionResult = Result<Option<Telemetry>, AdaptorError>;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Controller side of a running device action.
#[derive(Debug)]
pub struct ExecutionHandle {
    id: u64,
    result: oneshot::Receiver<ExecutionResult>,
    cancel: CancelToken,
}

/// Device side of a running device action.
#[derive(Debug)]
pub struct Completion {
    id: u64,
    sender: oneshot::Sender<ExecutionResult>,
    cancel: CancelToken,
}

impl ExecutionHandle {
    /// Create a connected handle/completion pair.
    pub fn pair(id: u64) -> (ExecutionHandle, Completion) {
        let (sender, result) = oneshot::channel();
        let cancel = CancelToken::new();
        (
            ExecutionHandle {
                id,
                result,
                cancel: cancel.clone(),
            },
            Completion { id, sender, cancel },
        )
    }

    /// Handle that is already resolved with `result`.
    pub fn resolved(id: u64, result: ExecutionResult) -> ExecutionHandle {
        let (handle, completion) = Self::pair(id);
        completion.finish(result);
        handle
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the device side to settle. `None` means the completion was
    /// dropped unresolved. Cancel safe.
    pub async fn wait(&mut self) -> Option<ExecutionResult> {
        (&mut self.result).await.ok()
    }
}

impl Completion {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve the handle. A handle that was already dropped is ignored.
    pub fn finish(self, result: ExecutionResult) {
        let _ = self.sender.send(result);
    }
}
