// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Supervisor side of the handshake
//!
//! [`SupervisorClient`] drives one module block through the six protocol
//! steps: wait for Ready, write parameters, write the command, wait for the
//! result, acknowledge with 0 and read the telemetry. It works over any
//! [`RegisterAccess`]: the in-process store, or a Modbus-TCP client context.
//!
//! ```no_run
//! # async fn demo() -> Result<(), rust_handshake::handshake::SupervisorError> {
//! use rust_handshake::handshake::{SupervisorClient, CMD_PRIMARY};
//! use tokio_modbus::prelude::*;
//!
//! let ctx = tcp::connect("127.0.0.1:502".parse().unwrap()).await?;
//! let mut supervisor = SupervisorClient::new(ctx, 400);
//! let result = supervisor.execute(CMD_PRIMARY, &[1234, 0]).await?;
//! println!("position low word: {}", result.telemetry[0]);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use tokio::time::{self, Instant};
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use super::command::{ErrorCode, CMD_CLEAR_ALARM, CMD_NONE};
use super::layout::{
    RegisterBlock, OFFSET_ERROR, OFFSET_TELEMETRY, PARAM_LEN, STATUS_LEN, TELEMETRY_LEN,
};
use super::status::StatusBits;
use crate::register::{RegisterError, RegisterStore, SharedRegisterStore};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("module raised alarm {code}")]
    Alarm { code: ErrorCode },

    #[error("too many parameter cells: {0} (at most {PARAM_LEN})")]
    TooManyParams(usize),

    #[error("Modbus transport error: {0}")]
    Transport(#[from] tokio_modbus::Error),

    #[error("Modbus exception: {0:?}")]
    Exception(ExceptionCode),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read/write access to the holding registers.
#[async_trait]
pub trait RegisterAccess: Send {
    async fn read(&mut self, addr: u16, count: u16) -> Result<Vec<u16>, SupervisorError>;

    async fn write(&mut self, addr: u16, values: &[u16]) -> Result<(), SupervisorError>;
}

#[async_trait]
impl RegisterAccess for SharedRegisterStore {
    async fn read(&mut self, addr: u16, count: u16) -> Result<Vec<u16>, SupervisorError> {
        Ok(RegisterStore::read(self, addr, count as usize)?)
    }

    async fn write(&mut self, addr: u16, values: &[u16]) -> Result<(), SupervisorError> {
        Ok(RegisterStore::write_many(self, addr, values)?)
    }
}

#[async_trait]
impl RegisterAccess for Context {
    async fn read(&mut self, addr: u16, count: u16) -> Result<Vec<u16>, SupervisorError> {
        self.read_holding_registers(addr, count)
            .await?
            .map_err(SupervisorError::Exception)
    }

    async fn write(&mut self, addr: u16, values: &[u16]) -> Result<(), SupervisorError> {
        let result = if let [value] = values {
            self.write_single_register(addr, *value).await?
        } else {
            self.write_multiple_registers(addr, values).await?
        };
        result.map_err(SupervisorError::Exception)
    }
}

/// Status header and telemetry read back after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub status: StatusBits,
    pub error: ErrorCode,
    pub telemetry: [u16; TELEMETRY_LEN],
}

/// Snapshot of the module-owned half of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSnapshot {
    pub status: StatusBits,
    pub connected: bool,
    pub device_state: u16,
    pub error: ErrorCode,
    pub telemetry: [u16; TELEMETRY_LEN],
    pub operations: u16,
    pub reconnects: u16,
}

pub struct SupervisorClient<A: RegisterAccess> {
    access: A,
    block: RegisterBlock,
    poll: Duration,
    timeout: Duration,
}

impl<A: RegisterAccess> SupervisorClient<A> {
    /// Client for the module block at `base`, polling every 20 ms with a
    /// 35 s deadline per wait.
    pub fn new(access: A, base: u16) -> Self {
        Self {
            access,
            block: RegisterBlock::new(base),
            poll: Duration::from_millis(20),
            timeout: Duration::from_secs(35),
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn into_inner(self) -> A {
        self.access
    }

    pub async fn status(&mut self) -> Result<StatusBits, SupervisorError> {
        let words = self.access.read(self.block.status_addr(), 1).await?;
        Ok(StatusBits::from_word(words.first().copied().unwrap_or(0)))
    }

    /// Read offsets 0..=15 of the block.
    pub async fn snapshot(&mut self) -> Result<ModuleSnapshot, SupervisorError> {
        let words = self.access.read(self.block.status_addr(), 16).await?;
        let word = |offset: usize| words.get(offset).copied().unwrap_or(0);
        let mut telemetry = [0u16; TELEMETRY_LEN];
        for (index, slot) in telemetry.iter_mut().enumerate() {
            *slot = word(OFFSET_TELEMETRY as usize + index);
        }
        Ok(ModuleSnapshot {
            status: StatusBits::from_word(word(0)),
            connected: word(1) != 0,
            device_state: word(2),
            error: ErrorCode::from_word(word(OFFSET_ERROR as usize)),
            telemetry,
            operations: word(14),
            reconnects: word(15),
        })
    }

    /// Poll the status word until `done` accepts it.
    async fn wait_for<F>(&mut self, what: &'static str, done: F) -> Result<StatusBits, SupervisorError>
    where
        F: Fn(StatusBits) -> bool,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            let status = self.status().await?;
            if done(status) {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(SupervisorError::Timeout(what));
            }
            time::sleep(self.poll).await;
        }
    }

    /// Run one command through the full handshake.
    ///
    /// On an alarm the command word is left as is and
    /// [`SupervisorError::Alarm`] is returned; use
    /// [`clear_alarm`](Self::clear_alarm) to recover.
    pub async fn execute(
        &mut self,
        command: u16,
        params: &[u16],
    ) -> Result<CommandResult, SupervisorError> {
        if params.len() > PARAM_LEN {
            return Err(SupervisorError::TooManyParams(params.len()));
        }

        self.wait_for("Ready", |s| s.contains(StatusBits::READY))
            .await?;
        if !params.is_empty() {
            self.access.write(self.block.params_addr(), params).await?;
        }
        self.access
            .write(self.block.command_addr(), &[command])
            .await?;
        debug!(
            "Wrote command {} to {} with params {:?}",
            command,
            self.block.command_addr(),
            params
        );

        let status = self
            .wait_for("completion", |s| {
                s.intersects(StatusBits::DONE | StatusBits::ALARM)
            })
            .await?;
        if status.contains(StatusBits::ALARM) {
            let error = self.read_error().await?;
            info!("Command {} raised alarm {}", command, error);
            return Err(SupervisorError::Alarm { code: error });
        }

        self.access
            .write(self.block.command_addr(), &[CMD_NONE])
            .await?;
        let status = self
            .wait_for("Ready after acknowledge", |s| {
                !s.contains(StatusBits::DONE)
            })
            .await?;

        let snapshot = self.snapshot().await?;
        Ok(CommandResult {
            status,
            error: snapshot.error,
            telemetry: snapshot.telemetry,
        })
    }

    /// Write 48, wait for the alarm to drop, then write 0.
    pub async fn clear_alarm(&mut self) -> Result<StatusBits, SupervisorError> {
        self.access
            .write(self.block.command_addr(), &[CMD_CLEAR_ALARM])
            .await?;
        self.wait_for("alarm clear", |s| !s.contains(StatusBits::ALARM))
            .await?;
        self.access
            .write(self.block.command_addr(), &[CMD_NONE])
            .await?;
        self.status().await
    }

    async fn read_error(&mut self) -> Result<ErrorCode, SupervisorError> {
        let words = self
            .access
            .read(self.block.status_addr(), STATUS_LEN as u16)
            .await?;
        Ok(ErrorCode::from_word(
            words.get(OFFSET_ERROR as usize).copied().unwrap_or(0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_access() {
        let mut store = RegisterStore::shared(999);
        RegisterAccess::write(&mut store, 420, &[8, 1, 2]).await.unwrap();
        assert_eq!(RegisterAccess::read(&mut store, 420, 3).await.unwrap(), vec![8, 1, 2]);
        assert!(RegisterAccess::read(&mut store, 999, 2).await.is_err());
    }

    #[tokio::test]
    async fn test_ready_timeout() {
        let store = RegisterStore::shared(999);
        let mut supervisor = SupervisorClient::new(store, 400)
            .with_poll(Duration::from_millis(5))
            .with_timeout(Duration::from_millis(50));
        assert!(matches!(
            supervisor.execute(8, &[]).await,
            Err(SupervisorError::Timeout("Ready"))
        ));
        // Nothing was written while the module was not Ready
        let store = supervisor.into_inner();
        assert_eq!(store.read_one(420).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_too_many_params() {
        let store = RegisterStore::shared(999);
        let mut supervisor = SupervisorClient::new(store, 400);
        assert!(matches!(
            supervisor.execute(8, &[0; 10]).await,
            Err(SupervisorError::TooManyParams(10))
        ));
    }
}
