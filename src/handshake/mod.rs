// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Module handshake
//!
//! Each module owns a 100-register block. The supervisor writes a command
//! word and parameters, the module answers through a status bitfield, an
//! error code and telemetry:
//!
//! | Offset | Owner      | Content                              |
//! |--------|------------|--------------------------------------|
//! | 0      | module     | status bits (see [`StatusBits`])     |
//! | 1      | module     | connection flag                      |
//! | 2      | module     | device state                         |
//! | 3      | module     | error code (see [`ErrorCode`])       |
//! | 4-13   | module     | telemetry                            |
//! | 14     | module     | completed operations counter         |
//! | 15     | module     | reconnect counter                    |
//! | 20     | supervisor | command word                         |
//! | 21-29  | supervisor | parameters                           |
//!
//! [`ModuleController`] runs the module side, [`SupervisorClient`] the other.

pub mod command;
pub mod controller;
pub mod layout;
pub mod state;
pub mod status;
pub mod supervisor;
pub mod worker;

pub use command::{
    ActionKind, Command, ErrorCode, CMD_CLEAR_ALARM, CMD_HOME, CMD_NONE, CMD_PRIMARY,
    CMD_REINITIALIZE, CMD_RELOAD_CALIBRATION,
};
pub use controller::{ControllerSettings, ModuleController, ModuleIdentity};
pub use layout::RegisterBlock;
pub use state::{Decision, HandshakeState};
pub use status::StatusBits;
pub use supervisor::{
    CommandResult, ModuleSnapshot, RegisterAccess, SupervisorClient, SupervisorError,
};
