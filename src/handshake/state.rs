// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Pure handshake state machine
//!
//! [`HandshakeState`] holds the flags behind the status word and
//! [`HandshakeState::decide`] maps a sampled command word to a [`Decision`].
//! Nothing here touches the register file or the device; the controller
//! applies decisions and publishes the resulting status.
//!
//! Decision table, evaluated top to bottom:
//!
//! | State | `0` | action | `48` | unknown |
//! |-------|-----|--------|------|---------|
//! | Running | hold | hold | hold | hold |
//! | Alarm | hold | hold | clear alarm | hold |
//! | Disconnected | hold | hold | hold | hold |
//! | Awaiting acknowledge | acknowledge | hold | hold | hold |
//! | Not initialised | hold | hold | hold | hold |
//! | Ready | hold | latch | hold | alarm `UNKNOWN_COMMAND` |

use super::command::{ActionKind, Command, ErrorCode};
use super::status::StatusBits;

/// Outcome of sampling the command word on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    /// Accept the action and enter Running
    Latch(ActionKind),
    /// The supervisor wrote 0 after a completion
    Acknowledge,
    ClearAlarm,
    Raise(ErrorCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeState {
    pub connected: bool,
    pub initialized: bool,
    pub running: bool,
    pub alarm: bool,
    pub done: bool,
    /// A command word of 0 must be observed before Ready can be asserted.
    /// Starts set so that a command left over from a previous run never
    /// executes.
    pub awaiting_ack: bool,
    pub error: ErrorCode,
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeState {
    pub fn new() -> Self {
        Self {
            connected: false,
            initialized: false,
            running: false,
            alarm: false,
            done: false,
            awaiting_ack: true,
            error: ErrorCode::None,
        }
    }

    pub fn ready(&self) -> bool {
        self.connected && self.initialized && !self.running && !self.alarm && !self.awaiting_ack
    }

    pub fn status_bits(&self) -> StatusBits {
        let mut bits = StatusBits::empty();
        bits.set(StatusBits::READY, self.ready());
        bits.set(StatusBits::RUNNING, self.running);
        bits.set(StatusBits::ALARM, self.alarm);
        bits.set(StatusBits::INITIALIZED, self.initialized);
        bits.set(StatusBits::DONE, self.done);
        bits
    }

    pub fn decide(&self, command: Command) -> Decision {
        if self.running {
            return Decision::Hold;
        }
        if self.alarm {
            return match command {
                Command::ClearAlarm => Decision::ClearAlarm,
                _ => Decision::Hold,
            };
        }
        if !self.connected {
            return Decision::Hold;
        }
        if self.awaiting_ack {
            return match command {
                Command::Clear => Decision::Acknowledge,
                _ => Decision::Hold,
            };
        }
        if !self.initialized {
            return Decision::Hold;
        }
        match command {
            Command::Clear | Command::ClearAlarm => Decision::Hold,
            Command::Action(kind) => Decision::Latch(kind),
            Command::Unknown(_) => Decision::Raise(ErrorCode::UnknownCommand),
        }
    }

    pub fn latch(&mut self, kind: ActionKind) {
        if kind.clears_initialized() {
            self.initialized = false;
        }
        self.running = true;
        self.done = false;
        self.error = ErrorCode::None;
    }

    pub fn acknowledge(&mut self) {
        self.awaiting_ack = false;
        self.done = false;
    }

    /// Successful completion of the latched action.
    pub fn complete(&mut self, kind: ActionKind) {
        if kind.clears_initialized() {
            self.initialized = true;
        }
        self.running = false;
        self.done = true;
        self.awaiting_ack = true;
    }

    pub fn raise(&mut self, code: ErrorCode) {
        self.alarm = true;
        self.running = false;
        self.done = false;
        self.awaiting_ack = true;
        self.error = code;
        if code.is_fatal() {
            self.initialized = false;
        }
    }

    /// Drop the alarm. Ready comes back on the same tick when the device is
    /// still connected and initialised.
    pub fn clear_alarm(&mut self) {
        self.alarm = false;
        self.awaiting_ack = false;
    }
}
