// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Daemon task manager
//!
//! [`Daemon::launch`] performs the fallible start-up steps in order and
//! reports each failure class through [`LaunchError`]:
//!
//! 1. create the register store and bind the Modbus broker,
//! 2. restore the register snapshot,
//! 3. build the adaptors and bootstrap the strict modules,
//! 4. spawn the broker, the scan loops, the snapshot writer and the heartbeat.
//!
//! All tasks watch one shared `running` flag; [`Daemon::shutdown`] clears it
//! and [`Daemon::join`] waits for every task, then writes a final snapshot.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::adaptor::AdaptorError;
use crate::config::{validate_specific_rules, Config};
use crate::handshake::{ModuleController, StatusBits};
use crate::modbus::ModbusBroker;
use crate::register::{snapshot, RegisterStore, SharedRegisterStore};

/// Period between heartbeat log lines.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);
/// Granularity at which periodic tasks notice a shutdown.
const SHUTDOWN_CHECK: Duration = Duration::from_millis(250);

/// Why the daemon could not start.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),

    #[error("failed to bind Modbus broker on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("module {module}: device initialisation failed: {source}")]
    AdaptorInit {
        module: String,
        #[source]
        source: AdaptorError,
    },
}

impl LaunchError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            LaunchError::Config(_) => 1,
            LaunchError::Bind { .. } => 2,
            LaunchError::AdaptorInit { .. } => 3,
        }
    }
}

/// Represents a daemon task manager that coordinates the broker and the
/// module controllers
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    store: SharedRegisterStore,
    modbus_addr: Option<SocketAddr>,
    snapshot_path: Option<PathBuf>,
    modules: Vec<(String, u16)>,
}

impl Daemon {
    /// Start every configured task.
    ///
    /// With `dry_run` no adaptor is built and no controller runs: only the
    /// broker and its meta block are served.
    pub async fn launch(config: &Config, dry_run: bool) -> Result<Self, LaunchError> {
        validate_specific_rules(config).map_err(LaunchError::Config)?;

        let store = RegisterStore::shared(config.modbus.max_address);
        let running = Arc::new(AtomicBool::new(true));
        let mut daemon = Daemon {
            tasks: Vec::new(),
            running: Arc::clone(&running),
            store: Arc::clone(&store),
            modbus_addr: None,
            snapshot_path: config.snapshot.path.clone(),
            modules: Vec::new(),
        };

        let modules: Vec<_> = if dry_run {
            info!("Dry run: no device adaptors will be started");
            Vec::new()
        } else {
            config.enabled_modules().collect()
        };

        // Bind first so a busy port is reported before any device is touched
        let broker = if config.modbus.enabled {
            let broker = ModbusBroker::bind(&config.modbus, Arc::clone(&store), modules.len())
                .await
                .map_err(|source| LaunchError::Bind {
                    addr: format!("{}:{}", config.modbus.host, config.modbus.port),
                    source,
                })?;
            daemon.modbus_addr = broker.local_addr().ok();
            Some(broker)
        } else {
            info!("Modbus broker disabled");
            None
        };

        if let Some(path) = &config.snapshot.path {
            if config.snapshot.restore && path.exists() {
                match snapshot::restore(&store, path) {
                    Ok(count) => info!("Restored {} registers from {}", count, path.display()),
                    Err(e) => warn!("Ignoring snapshot {}: {:#}", path.display(), e),
                }
            }
        }

        let mut controllers = Vec::with_capacity(modules.len());
        for module in modules {
            let adaptor = module
                .build_adaptor()
                .map_err(|source| LaunchError::AdaptorInit {
                    module: module.name.clone(),
                    source,
                })?;
            let mut controller =
                ModuleController::new(module.settings(), Arc::clone(&store), adaptor)
                    .map_err(|e| LaunchError::Config(e.into()))?;
            if module.strict {
                controller
                    .bootstrap()
                    .await
                    .map_err(|source| LaunchError::AdaptorInit {
                        module: module.name.clone(),
                        source,
                    })?;
            }
            daemon.modules.push((module.name.clone(), module.base));
            controllers.push(controller);
        }

        if let Some(broker) = broker {
            let running = Arc::clone(&running);
            daemon.tasks.push(tokio::spawn(broker.run(running)));
            info!("Modbus broker started");
        }

        for controller in controllers {
            info!(
                "Starting module {} at base {}",
                controller.name(),
                controller.block().base()
            );
            daemon.tasks.push(controller.spawn(Arc::clone(&running)));
        }

        if let Some(path) = &config.snapshot.path {
            daemon.start_snapshot_writer(path.clone(), Duration::from_millis(config.snapshot.interval_ms));
        }

        daemon.start_heartbeat();
        Ok(daemon)
    }

    /// Periodically dump the register store.
    fn start_snapshot_writer(&mut self, path: PathBuf, interval: Duration) {
        debug!(
            "Writing register snapshot to {} every {:?}",
            path.display(),
            interval
        );
        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let task = tokio::spawn(async move {
            let mut next = Instant::now() + interval;
            while running.load(Ordering::SeqCst) {
                time::sleep(SHUTDOWN_CHECK.min(interval)).await;
                if Instant::now() >= next {
                    if let Err(e) = snapshot::save(&store, &path) {
                        warn!("Register snapshot failed: {:#}", e);
                    }
                    next = Instant::now() + interval;
                }
            }
            Ok(())
        });
        self.tasks.push(task);
    }

    /// Start a heartbeat task that logs the module status words periodically
    fn start_heartbeat(&mut self) {
        debug!("Starting heartbeat monitor");

        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let modules = self.modules.clone();
        let task = tokio::spawn(async move {
            let mut next = Instant::now();
            while running.load(Ordering::SeqCst) {
                if Instant::now() >= next {
                    debug!("Daemon heartbeat: running");
                    for (name, base) in &modules {
                        if let Ok(status) = store.read_one(*base) {
                            debug!("  {} status {}", name, StatusBits::from_word(status));
                        }
                    }
                    next = Instant::now() + HEARTBEAT_PERIOD;
                }
                time::sleep(SHUTDOWN_CHECK).await;
            }
            Ok(())
        });
        self.tasks.push(task);
    }

    /// Address the broker is listening on, once bound.
    pub fn modbus_addr(&self) -> Option<SocketAddr> {
        self.modbus_addr
    }

    pub fn store(&self) -> SharedRegisterStore {
        Arc::clone(&self.store)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete, then write the final snapshot.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Task failed: {:#}", e),
                Err(e) => error!("Task panicked: {}", e),
            }
        }
        if let Some(path) = &self.snapshot_path {
            snapshot::save(&self.store, path)?;
            info!("Final register snapshot written to {}", path.display());
        }
        Ok(())
    }
}
