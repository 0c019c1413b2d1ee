// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Scriptable mock device
//!
//! The mock echoes its parameters into telemetry and can be told to fail,
//! panic or ignore aborts. It counts `execute` calls so that tests can check
//! how many device actions a handshake produced.
//!
//! Telemetry of a successful action: 4..=5 param0 (low/high), 6 command word,
//! 7 number of `execute` calls so far.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use url::Url;

use super::link::{parse_flag, parse_number, sleep_or_cancel};
use super::{
    AdaptorError, CommandParams, DeviceAdaptor, DeviceLink, DeviceState, DeviceStatus,
    ExecutionHandle, LinkOptions, Telemetry,
};
use crate::handshake::ActionKind;

/// Where the mock panics, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicMode {
    #[default]
    Never,
    /// Inside the synchronous `execute` call
    Execute,
    /// Inside the task driving the action, leaving the handle unresolved
    Task,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MockOptions {
    pub link: LinkOptions,
    /// Every action fails with this device code
    pub fail_code: Option<u16>,
    pub panic: PanicMode,
    /// Actions run to the end of their latency even when aborted
    pub ignore_abort: bool,
    pub init_fail: bool,
}

impl MockOptions {
    pub fn from_url(url: &Url, link: LinkOptions) -> Result<Self, AdaptorError> {
        let mut options = MockOptions {
            link,
            ..MockOptions::default()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "fail_code" => options.fail_code = Some(parse_number(&key, &value)?),
                "ignore_abort" => options.ignore_abort = parse_flag(&key, &value)?,
                "init_fail" => options.init_fail = parse_flag(&key, &value)?,
                "panic" => {
                    options.panic = match value.as_ref() {
                        "execute" => PanicMode::Execute,
                        "task" => PanicMode::Task,
                        "never" => PanicMode::Never,
                        other => {
                            return Err(AdaptorError::InvalidSpec(format!(
                                "panic={other} is not one of execute, task, never"
                            )))
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(options)
    }

    /// Mock settling every action after `latency_ms`.
    pub fn with_latency(latency_ms: u64) -> Self {
        MockOptions {
            link: LinkOptions {
                latency: std::time::Duration::from_millis(latency_ms),
                ..LinkOptions::default()
            },
            ..MockOptions::default()
        }
    }
}

#[derive(Debug)]
pub struct MockAdaptor {
    options: MockOptions,
    link: Arc<DeviceLink>,
    executions: Arc<AtomicUsize>,
    fail_code: AtomicU16,
    init_fail: AtomicBool,
    disconnects: AtomicUsize,
}

impl MockAdaptor {
    pub fn new(options: MockOptions) -> Self {
        Self {
            link: Arc::new(DeviceLink::new("mock", options.link.clone())),
            fail_code: AtomicU16::new(options.fail_code.unwrap_or(0)),
            init_fail: AtomicBool::new(options.init_fail),
            executions: Arc::new(AtomicUsize::new(0)),
            disconnects: AtomicUsize::new(0),
            options,
        }
    }

    /// Number of `execute` calls so far.
    pub fn execute_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls so far.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Fail every following action with `code`; 0 restores success.
    pub fn set_fail_code(&self, code: u16) {
        self.fail_code.store(code, Ordering::SeqCst);
    }

    pub fn set_init_fail(&self, fail: bool) {
        self.init_fail.store(fail, Ordering::SeqCst);
    }

    /// Pull or restore the simulated cable.
    pub fn set_connected(&self, connected: bool) {
        self.link.set_offline(!connected);
    }

    pub fn link(&self) -> &DeviceLink {
        &self.link
    }
}

#[async_trait]
impl DeviceAdaptor for MockAdaptor {
    async fn connect(&self) -> Result<(), AdaptorError> {
        self.link.connect()
    }

    async fn initialize(&self) -> Result<(), AdaptorError> {
        self.link.require_connected()?;
        if self.init_fail.load(Ordering::SeqCst) {
            self.link.set_state(DeviceState::Fault);
            return Err(AdaptorError::Device {
                code: 0,
                message: "scripted initialisation failure".into(),
            });
        }
        self.link.set_initialized(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdaptorError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.link.disconnect();
        Ok(())
    }

    fn query(&self) -> DeviceStatus {
        self.link.status()
    }

    fn execute(&self, kind: ActionKind, params: CommandParams) -> ExecutionHandle {
        let count = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        let id = self.link.next_id();
        debug!("mock execute #{id}: {kind} {:?}", params.words());

        if self.options.panic == PanicMode::Execute {
            panic!("mock adaptor panicked in execute");
        }
        if let Err(e) = self.link.require_connected() {
            return ExecutionHandle::resolved(id, Err(e));
        }

        let (handle, completion) = ExecutionHandle::pair(id);
        let link = Arc::clone(&self.link);
        let fail_code = self.fail_code.load(Ordering::SeqCst);
        let panic_in_task = self.options.panic == PanicMode::Task;
        let ignore_abort = self.options.ignore_abort;

        tokio::spawn(async move {
            if panic_in_task {
                panic!("mock adaptor panicked while running #{}", completion.id());
            }
            link.set_state(DeviceState::Busy);
            let latency = link.options().latency;
            let settled = if ignore_abort {
                tokio::time::sleep(latency).await;
                Ok(())
            } else {
                sleep_or_cancel(latency, &completion.cancel_token()).await
            };
            link.set_state(DeviceState::Idle);

            let result = settled.and_then(|_| {
                if fail_code != 0 {
                    link.set_last_error(fail_code);
                    return Err(AdaptorError::Device {
                        code: fail_code,
                        message: "scripted failure".into(),
                    });
                }
                let mut telemetry = Telemetry::new();
                telemetry
                    .set(4, params.word(0))
                    .set(5, params.word(1))
                    .set(6, kind.word())
                    .set(7, count as u16);
                Ok(Some(telemetry))
            });
            completion.finish(result);
        });
        handle
    }
}
