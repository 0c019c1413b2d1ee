// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Module controller scan loop
//!
//! A [`ModuleController`] owns one register block and one device adaptor. Its
//! scan loop wakes on every poll period, on every write to its command range
//! and on every worker report, and then runs one tick:
//!
//! 1. refresh the cached device status,
//! 2. reconnect or initialise the device when idle and needed,
//! 3. sample the command word and parameters as one consistent read,
//! 4. apply the [`Decision`](super::Decision) for the sampled command,
//! 5. publish counters and the status header.
//!
//! Completions are written by the scan loop, never by the worker: telemetry
//! first, then the status header, so a supervisor that sees the status change
//! always reads fresh telemetry. The controller only ever writes offsets
//! `0..=15` of its block; the command word belongs to the supervisor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::command::{ActionKind, Command, ErrorCode};
use super::layout::{RegisterBlock, BLOCK_LEN, OFFSET_OPERATIONS, PARAM_LEN, STATUS_LEN};
use super::state::{Decision, HandshakeState};
use super::status::StatusBits;
use super::worker::{BootstrapFailure, ExecuteJob, ExecutionOutcome, Job, Report, Worker, WorkerHandle};
use crate::adaptor::{AdaptorError, CommandParams, DeviceStatus, SharedAdaptor};
use crate::register::{RegisterError, SharedRegisterStore};

/// Extra time granted to the worker on shutdown beyond the abort timeout.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Identity of a module on the register file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdentity {
    pub name: String,
    pub base: u16,
    /// Slave id of serial-bridged modules, informational only
    pub slave_id: Option<u8>,
    pub poll: Duration,
}

/// Identity plus timing of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub identity: ModuleIdentity,
    pub command_timeout: Duration,
    pub abort_timeout: Duration,
}

impl ControllerSettings {
    /// Settings with the default timing: 100 ms poll, 30 s command timeout,
    /// 2 s abort timeout.
    pub fn new(name: &str, base: u16) -> Self {
        Self {
            identity: ModuleIdentity {
                name: name.to_string(),
                base,
                slave_id: None,
                poll: Duration::from_millis(100),
            },
            command_timeout: Duration::from_secs(30),
            abort_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.identity.poll = poll;
        self
    }

    pub fn with_timeouts(mut self, command_timeout: Duration, abort_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self.abort_timeout = abort_timeout;
        self
    }
}

/// The action between latch and completion.
#[derive(Debug)]
struct PendingExecution {
    kind: ActionKind,
    params: CommandParams,
    started: Instant,
    cancel: watch::Sender<bool>,
}

impl PendingExecution {
    fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

pub struct ModuleController {
    settings: ControllerSettings,
    block: RegisterBlock,
    store: SharedRegisterStore,
    adaptor: SharedAdaptor,
    extended: Vec<u16>,
    state: HandshakeState,
    worker: Option<WorkerHandle>,
    pending: Option<PendingExecution>,
    bootstrapping: bool,
    /// Whether the queued bootstrap job also initialises the device.
    bootstrap_initializes: bool,
    bootstrap_attempts: u32,
    operations: u16,
    reconnects: u16,
    last_bits: Option<StatusBits>,
}

impl ModuleController {
    /// Bind a controller to its block. Fails when the block does not fit in
    /// the store.
    pub fn new(
        settings: ControllerSettings,
        store: SharedRegisterStore,
        adaptor: SharedAdaptor,
    ) -> Result<Self, RegisterError> {
        let block = RegisterBlock::new(settings.identity.base);
        store.read(block.base(), BLOCK_LEN as usize)?;
        let extended = adaptor.extended_commands();
        Ok(Self {
            settings,
            block,
            store,
            adaptor,
            extended,
            state: HandshakeState::new(),
            worker: None,
            pending: None,
            bootstrapping: false,
            bootstrap_initializes: false,
            bootstrap_attempts: 0,
            operations: 0,
            reconnects: 0,
            last_bits: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.settings.identity.name
    }

    pub fn block(&self) -> RegisterBlock {
        self.block
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Connect and initialise the device before the scan loop starts.
    pub async fn bootstrap(&mut self) -> Result<(), AdaptorError> {
        self.bootstrap_attempts += 1;
        self.adaptor.connect().await?;
        self.state.connected = true;
        if let Err(e) = self.adaptor.initialize().await {
            self.state.raise(ErrorCode::InitFailed);
            return Err(e);
        }
        self.state.initialized = true;
        info!("{}: device connected and initialised", self.name());
        Ok(())
    }

    /// Run the scan loop on its own task until `running` drops.
    pub fn spawn(self, running: Arc<AtomicBool>) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(running))
    }

    pub async fn run(mut self, running: Arc<AtomicBool>) -> Result<()> {
        let (worker, mut reports) = Worker::spawn(self.name(), Arc::clone(&self.adaptor));
        self.worker = Some(worker);

        let mut commands = self.store.watch(self.block.command_range())?;
        let mut ticker = time::interval(self.settings.identity.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "{}: scan loop started on block {}..{} every {:?}",
            self.name(),
            self.block.base(),
            self.block.end(),
            self.settings.identity.poll
        );

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(report) = reports.recv() => self.handle_report(report)?,
                changes = commands.changed() => {
                    if changes.is_none() {
                        break;
                    }
                }
            }
            self.tick()?;
        }

        self.shutdown(&mut reports).await;
        Ok(())
    }

    fn tick(&mut self) -> Result<(), RegisterError> {
        let device = self.adaptor.query();
        if self.state.connected && !device.connected {
            warn!("{}: device connection lost", self.name());
            self.state.connected = false;
        }
        self.maintain_link();

        let words = self.store.read(self.block.command_addr(), 1 + PARAM_LEN)?;
        let command = Command::decode(words[0], &self.extended);
        trace!("{}: sampled command {:?}", self.name(), command);

        match self.state.decide(command) {
            Decision::Hold => {}
            Decision::Acknowledge => {
                debug!("{}: command acknowledged", self.name());
                self.state.acknowledge();
            }
            Decision::ClearAlarm => {
                info!(
                    "{}: alarm {} cleared by supervisor",
                    self.name(),
                    self.state.error
                );
                self.state.clear_alarm();
            }
            Decision::Raise(code) => {
                warn!(
                    "{}: alarm {} on command word {}",
                    self.name(),
                    code,
                    words[0]
                );
                self.state.raise(code);
            }
            Decision::Latch(kind) => self.latch(kind, CommandParams::from_words(&words[1..])),
        }

        self.publish(&device)
    }

    /// Reconnect a lost device, or initialise it again after a fatal alarm
    /// was cleared. While an alarm is active only the connection is restored.
    fn maintain_link(&mut self) {
        if self.pending.is_some()
            || self.bootstrapping
            || (self.state.connected && (self.state.initialized || self.state.alarm))
        {
            return;
        }
        let Some(worker) = self.worker.as_ref() else {
            return;
        };

        if !self.state.connected && self.bootstrap_attempts > 0 {
            self.reconnects = self.reconnects.wrapping_add(1);
        }
        self.bootstrap_attempts += 1;
        let initialize = !self.state.initialized && !self.state.alarm;
        if worker.submit(Job::Bootstrap { initialize }).is_err() {
            error!("{}: worker is gone", self.name());
            self.state.raise(ErrorCode::WorkerPanic);
            return;
        }
        self.bootstrapping = true;
        self.bootstrap_initializes = initialize;
    }

    fn latch(&mut self, kind: ActionKind, params: CommandParams) {
        let (cancel, cancel_rx) = watch::channel(false);
        let job = Job::Execute(ExecuteJob {
            kind,
            params,
            timeout: self.settings.command_timeout,
            abort_timeout: self.settings.abort_timeout,
            cancel: cancel_rx,
        });
        let submitted = match self.worker.as_ref() {
            Some(worker) => worker.submit(job).is_ok(),
            None => false,
        };
        if !submitted {
            error!("{}: cannot dispatch {}, worker is gone", self.name(), kind);
            self.state.raise(ErrorCode::WorkerPanic);
            return;
        }

        self.state.latch(kind);
        info!(
            "{}: latched {} with params {:?}",
            self.name(),
            kind,
            params.words()
        );
        self.pending = Some(PendingExecution {
            kind,
            params,
            started: Instant::now(),
            cancel,
        });
    }

    fn handle_report(&mut self, report: Report) -> Result<(), RegisterError> {
        match report {
            Report::Bootstrapped(result) => {
                self.bootstrapping = false;
                self.on_bootstrapped(result);
            }
            Report::Finished { kind, outcome } => {
                let Some(pending) = self.pending.take() else {
                    warn!("{}: stray completion of {}", self.name(), kind);
                    return Ok(());
                };
                let elapsed = pending.started.elapsed();
                match outcome {
                    ExecutionOutcome::Completed(telemetry) => {
                        if let Some(telemetry) = telemetry {
                            self.store
                                .write_many(self.block.telemetry_addr(), telemetry.words())?;
                        }
                        self.operations = self.operations.wrapping_add(1);
                        self.state.complete(kind);
                        info!(
                            "{}: {} with params {:?} completed in {:?}",
                            self.name(),
                            kind,
                            pending.params.words(),
                            elapsed
                        );
                    }
                    ExecutionOutcome::Failed(code) => {
                        if code == ErrorCode::Disconnected {
                            self.state.connected = false;
                        }
                        warn!(
                            "{}: {} failed after {:?} with {}",
                            self.name(),
                            kind,
                            elapsed,
                            code
                        );
                        self.state.raise(code);
                    }
                }
            }
        }
        Ok(())
    }

    fn on_bootstrapped(&mut self, result: Result<(), BootstrapFailure>) {
        match result {
            Ok(()) if self.bootstrap_initializes => {
                info!(
                    "{}: device connected and initialised (attempt {})",
                    self.name(),
                    self.bootstrap_attempts
                );
                self.state.connected = true;
                self.state.initialized = true;
            }
            Ok(()) => {
                info!(
                    "{}: device reconnected (attempt {})",
                    self.name(),
                    self.bootstrap_attempts
                );
                self.state.connected = true;
            }
            Err(BootstrapFailure::Connect(e)) => {
                self.state.connected = false;
                if self.bootstrap_attempts <= 1 {
                    warn!("{}: cannot connect to device: {}", self.name(), e);
                } else {
                    debug!(
                        "{}: reconnect attempt {} failed: {}",
                        self.name(),
                        self.bootstrap_attempts,
                        e
                    );
                }
            }
            Err(BootstrapFailure::Initialize(e)) => {
                self.state.connected = true;
                warn!("{}: device initialisation failed: {}", self.name(), e);
                self.state.raise(ErrorCode::InitFailed);
            }
            Err(BootstrapFailure::Panicked) => {
                self.state.raise(ErrorCode::WorkerPanic);
            }
        }
    }

    /// Write counters, then the status header, skipping cells that already
    /// hold the right value.
    fn publish(&mut self, device: &DeviceStatus) -> Result<(), RegisterError> {
        let counters = [self.operations, self.reconnects];
        let counters_addr = self.block.addr(OFFSET_OPERATIONS);
        if self.store.read(counters_addr, counters.len())? != counters {
            self.store.write_many(counters_addr, &counters)?;
        }

        let bits = self.state.status_bits();
        let header: [u16; STATUS_LEN] = [
            bits.word(),
            self.state.connected as u16,
            device.state.word(),
            self.state.error.word(),
        ];
        if self.store.read(self.block.status_addr(), STATUS_LEN)? != header {
            self.store.write_many(self.block.status_addr(), &header)?;
        }
        if self.last_bits != Some(bits) {
            debug!("{}: status {}", self.name(), bits);
            self.last_bits = Some(bits);
        }
        Ok(())
    }

    async fn shutdown(&mut self, reports: &mut mpsc::UnboundedReceiver<Report>) {
        let pending_kind = self.pending.as_ref().map(|pending| {
            pending.cancel();
            pending.kind
        });
        if let Some(kind) = pending_kind {
            info!("{}: aborting pending {}", self.name(), kind);
            let deadline = Instant::now() + self.settings.abort_timeout + SHUTDOWN_GRACE;
            while self.pending.is_some() {
                match time::timeout_at(deadline, reports.recv()).await {
                    Ok(Some(report)) => {
                        if let Err(e) = self.handle_report(report) {
                            error!("{}: cannot record completion: {}", self.name(), e);
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            if let Some(pending) = self.pending.take() {
                error!(
                    "{}: {} did not settle after abort, abandoning it",
                    self.name(),
                    pending.kind
                );
                self.state.raise(ErrorCode::AbortUnresponsive);
            }
        }

        let device = self.adaptor.query();
        if let Err(e) = self.publish(&device) {
            error!("{}: cannot publish final status: {}", self.name(), e);
        }
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        match time::timeout(self.settings.abort_timeout, self.adaptor.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{}: disconnect failed: {}", self.name(), e),
            Err(_) => warn!("{}: disconnect timed out", self.name()),
        }
        info!("{}: controller stopped", self.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::{MockAdaptor, MockOptions};
    use crate::handshake::layout::OFFSET_RECONNECTS;
    use crate::register::RegisterStore;

    const BASE: u16 = 400;

    struct Harness {
        store: SharedRegisterStore,
        mock: Arc<MockAdaptor>,
        running: Arc<AtomicBool>,
        task: JoinHandle<Result<()>>,
    }

    impl Harness {
        fn start(options: MockOptions, settings: ControllerSettings) -> Self {
            let store = RegisterStore::shared(999);
            let mock = Arc::new(MockAdaptor::new(options));
            let controller =
                ModuleController::new(settings, Arc::clone(&store), mock.clone()).unwrap();
            let running = Arc::new(AtomicBool::new(true));
            let task = controller.spawn(Arc::clone(&running));
            Self {
                store,
                mock,
                running,
                task,
            }
        }

        fn status(&self) -> u16 {
            self.store.read_one(BASE).unwrap()
        }

        async fn wait_status(&self, expected: u16) {
            let deadline = Instant::now() + Duration::from_secs(3);
            while self.status() != expected {
                assert!(
                    Instant::now() < deadline,
                    "status stuck at {:#07b}, expected {:#07b}",
                    self.status(),
                    expected
                );
                time::sleep(Duration::from_millis(2)).await;
            }
        }

        async fn stop(self) {
            self.running.store(false, Ordering::SeqCst);
            self.task.await.unwrap().unwrap();
        }
    }

    fn settings() -> ControllerSettings {
        ControllerSettings::new("test", BASE)
            .with_poll(Duration::from_millis(10))
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(100))
    }

    #[test]
    fn test_block_must_fit_store() {
        let store = RegisterStore::shared(450);
        let mock = Arc::new(MockAdaptor::new(MockOptions::default()));
        assert!(ModuleController::new(settings(), store, mock).is_err());
    }

    #[tokio::test]
    async fn test_becomes_ready() {
        let harness = Harness::start(MockOptions::default(), settings());
        harness.wait_status(0b1001).await;
        assert_eq!(harness.store.read(BASE + 1, 1).unwrap(), vec![1]);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_stale_command_never_runs() {
        let store = RegisterStore::shared(999);
        store.write(BASE + 20, 8).unwrap();
        let mock = Arc::new(MockAdaptor::new(MockOptions::default()));
        let controller = ModuleController::new(settings(), Arc::clone(&store), mock.clone()).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let task = controller.spawn(Arc::clone(&running));

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.read_one(BASE).unwrap(), 0b1000);
        assert_eq!(mock.execute_count(), 0);

        store.write(BASE + 20, 0).unwrap();
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.read_one(BASE).unwrap(), 0b1001);

        running.store(false, Ordering::SeqCst);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_counter() {
        let options = MockOptions {
            link: crate::adaptor::LinkOptions {
                connect_failures: 3,
                ..Default::default()
            },
            ..MockOptions::default()
        };
        let harness = Harness::start(options, settings());
        harness.wait_status(0b1001).await;
        assert_eq!(harness.store.read_one(BASE + OFFSET_RECONNECTS).unwrap(), 3);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending_execution() {
        let harness = Harness::start(MockOptions::with_latency(10_000), settings());
        harness.wait_status(0b1001).await;
        harness.store.write(BASE + 20, 8).unwrap();
        harness.wait_status(0b1010).await;

        let store = Arc::clone(&harness.store);
        let mock = Arc::clone(&harness.mock);
        let started = Instant::now();
        harness.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        let status = StatusBits::from_word(store.read_one(BASE).unwrap());
        assert!(status.contains(StatusBits::ALARM));
        assert!(!status.contains(StatusBits::RUNNING));
        assert_eq!(store.read_one(BASE + 3).unwrap(), ErrorCode::Aborted.word());
        assert_eq!(mock.disconnect_count(), 1);
    }
}
