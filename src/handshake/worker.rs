// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Device-call worker
//!
//! Every controller owns one worker task. The scan loop never awaits the
//! device: it hands a [`Job`] to the worker and later receives exactly one
//! [`Report`] for it. The worker enforces the command and abort timeouts and
//! turns panics in adaptor code into `WORKER_PANIC` reports.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

use super::command::{ActionKind, ErrorCode};
use crate::adaptor::{AdaptorError, CommandParams, ExecutionHandle, SharedAdaptor, Telemetry};

/// Work handed from the scan loop to the worker.
#[derive(Debug)]
pub enum Job {
    /// Connect, then initialise when `initialize` is set.
    Bootstrap { initialize: bool },
    Execute(ExecuteJob),
}

#[derive(Debug)]
pub struct ExecuteJob {
    pub kind: ActionKind,
    pub params: CommandParams,
    pub timeout: Duration,
    pub abort_timeout: Duration,
    /// Flips to `true` when the controller shuts down.
    pub cancel: watch::Receiver<bool>,
}

/// Why a bootstrap job failed.
#[derive(Debug)]
pub enum BootstrapFailure {
    Connect(AdaptorError),
    Initialize(AdaptorError),
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed(Option<Telemetry>),
    Failed(ErrorCode),
}

/// Message from the worker back to the scan loop.
#[derive(Debug)]
pub enum Report {
    Bootstrapped(Result<(), BootstrapFailure>),
    Finished {
        kind: ActionKind,
        outcome: ExecutionOutcome,
    },
}

/// Scan-loop side of a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    jobs: mpsc::UnboundedSender<Job>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queue `job`. Fails only when the worker task is gone.
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        self.jobs.send(job).map_err(|e| e.0)
    }

    /// Stop the worker, abandoning whatever it is waiting on.
    pub fn stop(self) {
        drop(self.jobs);
        if !self.task.is_finished() {
            self.task.abort();
        }
    }
}

pub struct Worker {
    name: String,
    adaptor: SharedAdaptor,
    jobs: mpsc::UnboundedReceiver<Job>,
    reports: mpsc::UnboundedSender<Report>,
}

impl Worker {
    /// Spawn the worker task for module `name`.
    pub fn spawn(
        name: &str,
        adaptor: SharedAdaptor,
    ) -> (WorkerHandle, mpsc::UnboundedReceiver<Report>) {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            name: name.to_string(),
            adaptor,
            jobs: job_rx,
            reports: report_tx,
        };
        let task = tokio::spawn(worker.run());
        (WorkerHandle { jobs: job_tx, task }, report_rx)
    }

    async fn run(mut self) {
        while let Some(job) = self.jobs.recv().await {
            let report = match job {
                Job::Bootstrap { initialize } => Report::Bootstrapped(self.bootstrap(initialize).await),
                Job::Execute(job) => {
                    let kind = job.kind;
                    Report::Finished {
                        kind,
                        outcome: self.execute(job).await,
                    }
                }
            };
            if self.reports.send(report).is_err() {
                break;
            }
        }
        debug!("{}: worker stopped", self.name);
    }

    /// Run connect and initialise on their own task so that a panic inside
    /// the adaptor is reported instead of killing the worker.
    async fn bootstrap(&self, initialize: bool) -> Result<(), BootstrapFailure> {
        let adaptor = Arc::clone(&self.adaptor);
        let outcome = tokio::spawn(async move {
            adaptor.connect().await.map_err(BootstrapFailure::Connect)?;
            if initialize {
                adaptor
                    .initialize()
                    .await
                    .map_err(BootstrapFailure::Initialize)?;
            }
            Ok(())
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                error!("{}: device bootstrap task failed: {}", self.name, e);
                Err(BootstrapFailure::Panicked)
            }
        }
    }

    async fn execute(&self, mut job: ExecuteJob) -> ExecutionOutcome {
        let adaptor = &self.adaptor;
        let started = panic::catch_unwind(AssertUnwindSafe(|| {
            adaptor.execute(job.kind, job.params)
        }));
        let mut handle = match started {
            Ok(handle) => handle,
            Err(_) => {
                error!("{}: adaptor panicked starting {}", self.name, job.kind);
                return ExecutionOutcome::Failed(ErrorCode::WorkerPanic);
            }
        };
        debug!("{}: {} running as #{}", self.name, job.kind, handle.id());

        let waited = tokio::select! {
            result = time::timeout(job.timeout, handle.wait()) => Some(result),
            _ = cancelled(&mut job.cancel) => None,
        };

        match waited {
            Some(Ok(Some(Ok(telemetry)))) => ExecutionOutcome::Completed(telemetry),
            Some(Ok(Some(Err(e)))) => {
                warn!("{}: {} failed: {}", self.name, job.kind, e);
                ExecutionOutcome::Failed(ErrorCode::from(&e))
            }
            Some(Ok(None)) => {
                error!(
                    "{}: {} ended without a result, device task died",
                    self.name, job.kind
                );
                ExecutionOutcome::Failed(ErrorCode::WorkerPanic)
            }
            Some(Err(_)) => {
                warn!(
                    "{}: {} exceeded {:?}, aborting",
                    self.name, job.kind, job.timeout
                );
                self.abort(&mut handle, job.abort_timeout, ErrorCode::Timeout)
                    .await
            }
            None => {
                debug!("{}: aborting {} on shutdown", self.name, job.kind);
                self.abort(&mut handle, job.abort_timeout, ErrorCode::Aborted)
                    .await
            }
        }
    }

    /// Ask the adaptor to abort and wait for the handle to settle. The
    /// outcome is `reason` when the device honours the abort in time.
    async fn abort(
        &self,
        handle: &mut ExecutionHandle,
        abort_timeout: Duration,
        reason: ErrorCode,
    ) -> ExecutionOutcome {
        let adaptor = &self.adaptor;
        if panic::catch_unwind(AssertUnwindSafe(|| adaptor.abort(handle))).is_err() {
            error!("{}: adaptor panicked during abort", self.name);
            return ExecutionOutcome::Failed(ErrorCode::WorkerPanic);
        }
        match time::timeout(abort_timeout, handle.wait()).await {
            Ok(_) => ExecutionOutcome::Failed(reason),
            Err(_) => {
                error!(
                    "{}: device ignored abort for {:?}, abandoning #{}",
                    self.name,
                    abort_timeout,
                    handle.id()
                );
                ExecutionOutcome::Failed(ErrorCode::AbortUnresponsive)
            }
        }
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender gone without cancelling: never fires
            std::future::pending::<()>().await;
        }
    }
}
