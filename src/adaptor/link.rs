// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Connection bookkeeping shared by the built-in adaptors

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info};
use tokio::time;
use url::Url;

use super::{AdaptorError, CancelToken, DeviceState, DeviceStatus};

/// Options common to every built-in adaptor connection string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkOptions {
    /// Simulated duration of one device action
    pub latency: Duration,
    /// Number of initial connection attempts that fail
    pub connect_failures: u32,
    /// The device never becomes reachable
    pub disconnected: bool,
}

impl LinkOptions {
    pub fn from_url(url: &Url) -> Result<Self, AdaptorError> {
        let mut options = LinkOptions::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "latency_ms" => options.latency = Duration::from_millis(parse_number(&key, &value)?),
                "connect_fail" => options.connect_failures = parse_number(&key, &value)?,
                "disconnected" => options.disconnected = parse_flag(&key, &value)?,
                _ => {}
            }
        }
        Ok(options)
    }
}

/// Parse a decimal or `0x` hexadecimal query value.
pub(crate) fn parse_number<T>(key: &str, value: &str) -> Result<T, AdaptorError>
where
    T: TryFrom<u64>,
{
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed
        .ok()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| AdaptorError::InvalidSpec(format!("{key}={value} is not a valid number")))
}

pub(crate) fn parse_flag(key: &str, value: &str) -> Result<bool, AdaptorError> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(AdaptorError::InvalidSpec(format!(
            "{key}={value} is not a boolean"
        ))),
    }
}

/// Connection, initialisation and status state of a device.
#[derive(Debug)]
pub struct DeviceLink {
    name: &'static str,
    options: LinkOptions,
    connected: AtomicBool,
    initialized: AtomicBool,
    forced_offline: AtomicBool,
    connect_attempts: AtomicU32,
    state: AtomicU16,
    last_error: AtomicU16,
    next_id: AtomicU64,
}

impl DeviceLink {
    pub fn new(name: &'static str, options: LinkOptions) -> Self {
        let forced_offline = options.disconnected;
        Self {
            name,
            options,
            connected: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            forced_offline: AtomicBool::new(forced_offline),
            connect_attempts: AtomicU32::new(0),
            state: AtomicU16::new(DeviceState::Offline.word()),
            last_error: AtomicU16::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    pub fn connect(&self) -> Result<(), AdaptorError> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.forced_offline.load(Ordering::SeqCst) || attempt <= self.options.connect_failures {
            debug!("{}: connection attempt {} failed", self.name, attempt);
            self.connected.store(false, Ordering::SeqCst);
            return Err(AdaptorError::NotConnected);
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!("{}: connected after {} attempt(s)", self.name, attempt);
        }
        if !self.is_initialized() {
            self.set_state(DeviceState::Idle);
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        self.set_state(DeviceState::Offline);
    }

    /// Simulate losing (or regaining) the physical link.
    pub fn set_offline(&self, offline: bool) {
        self.forced_offline.store(offline, Ordering::SeqCst);
        if offline {
            self.connected.store(false, Ordering::SeqCst);
            self.set_state(DeviceState::Offline);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn require_connected(&self) -> Result<(), AdaptorError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AdaptorError::NotConnected)
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
        if initialized {
            self.set_state(DeviceState::Idle);
        }
    }

    pub fn set_state(&self, state: DeviceState) {
        self.state.store(state.word(), Ordering::SeqCst);
    }

    pub fn set_last_error(&self, code: u16) {
        self.last_error.store(code, Ordering::SeqCst);
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> DeviceStatus {
        let state = match self.state.load(Ordering::SeqCst) {
            1 => DeviceState::Idle,
            2 => DeviceState::Busy,
            3 => DeviceState::Fault,
            _ => DeviceState::Offline,
        };
        DeviceStatus {
            connected: self.is_connected(),
            state,
            last_error: self.last_error.load(Ordering::SeqCst),
        }
    }

    /// Wait out the simulated action latency, or fail with
    /// [`AdaptorError::Aborted`] as soon as `cancel` fires.
    pub async fn settle(&self, cancel: &CancelToken) -> Result<(), AdaptorError> {
        sleep_or_cancel(self.options.latency, cancel).await
    }
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancelToken) -> Result<(), AdaptorError> {
    if cancel.is_cancelled() {
        return Err(AdaptorError::Aborted);
    }
    tokio::select! {
        _ = time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(AdaptorError::Aborted),
    }
}
