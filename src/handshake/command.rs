// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Command words and error codes exchanged through a module block

use std::fmt;

use crate::adaptor::AdaptorError;

/// No-op, also the supervisor's acknowledge.
pub const CMD_NONE: u16 = 0;
/// Primary action of the module (move, capture, dispense).
pub const CMD_PRIMARY: u16 = 8;
/// Homing / origin return.
pub const CMD_HOME: u16 = 16;
pub const CMD_REINITIALIZE: u16 = 32;
pub const CMD_CLEAR_ALARM: u16 = 48;
/// Extended command declared by camera modules.
pub const CMD_RELOAD_CALIBRATION: u16 = 64;

/// Action requested by a non-zero command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Primary,
    Home,
    Reinitialize,
    ReloadCalibration,
    /// Module-specific command value declared by the adaptor
    Extended(u16),
}

impl ActionKind {
    pub fn word(&self) -> u16 {
        match self {
            ActionKind::Primary => CMD_PRIMARY,
            ActionKind::Home => CMD_HOME,
            ActionKind::Reinitialize => CMD_REINITIALIZE,
            ActionKind::ReloadCalibration => CMD_RELOAD_CALIBRATION,
            ActionKind::Extended(word) => *word,
        }
    }

    /// Actions that drop the Initialized bit when latched and restore it on
    /// success.
    pub fn clears_initialized(&self) -> bool {
        matches!(self, ActionKind::Reinitialize | ActionKind::ReloadCalibration)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Primary => write!(f, "primary"),
            ActionKind::Home => write!(f, "home"),
            ActionKind::Reinitialize => write!(f, "reinitialize"),
            ActionKind::ReloadCalibration => write!(f, "reload-calibration"),
            ActionKind::Extended(word) => write!(f, "extended({word})"),
        }
    }
}

/// Decoded command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Clear,
    Action(ActionKind),
    ClearAlarm,
    Unknown(u16),
}

impl Command {
    /// Decode `word`, accepting `extended` as additional module commands.
    pub fn decode(word: u16, extended: &[u16]) -> Self {
        match word {
            CMD_NONE => Command::Clear,
            CMD_PRIMARY => Command::Action(ActionKind::Primary),
            CMD_HOME => Command::Action(ActionKind::Home),
            CMD_REINITIALIZE => Command::Action(ActionKind::Reinitialize),
            CMD_CLEAR_ALARM => Command::ClearAlarm,
            CMD_RELOAD_CALIBRATION if extended.contains(&word) => {
                Command::Action(ActionKind::ReloadCalibration)
            }
            other if extended.contains(&other) => Command::Action(ActionKind::Extended(other)),
            other => Command::Unknown(other),
        }
    }
}

/// Error code published at offset 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    None,
    UnknownCommand,
    Timeout,
    DeviceFailure,
    Disconnected,
    WorkerPanic,
    InitFailed,
    Aborted,
    AbortUnresponsive,
    InvalidParams,
    Calibration,
    /// Adaptor-specific code, always `>= 0x100`
    Device(u16),
}

/// First code value reserved for adaptor-specific errors.
pub const DEVICE_CODE_BASE: u16 = 0x100;

impl ErrorCode {
    pub fn word(&self) -> u16 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::UnknownCommand => 1,
            ErrorCode::Timeout => 2,
            ErrorCode::DeviceFailure => 3,
            ErrorCode::Disconnected => 4,
            ErrorCode::WorkerPanic => 5,
            ErrorCode::InitFailed => 6,
            ErrorCode::Aborted => 7,
            ErrorCode::AbortUnresponsive => 8,
            ErrorCode::InvalidParams => 9,
            ErrorCode::Calibration => 10,
            ErrorCode::Device(code) => *code,
        }
    }

    pub fn from_word(word: u16) -> Self {
        match word {
            0 => ErrorCode::None,
            1 => ErrorCode::UnknownCommand,
            2 => ErrorCode::Timeout,
            3 => ErrorCode::DeviceFailure,
            4 => ErrorCode::Disconnected,
            5 => ErrorCode::WorkerPanic,
            6 => ErrorCode::InitFailed,
            7 => ErrorCode::Aborted,
            8 => ErrorCode::AbortUnresponsive,
            9 => ErrorCode::InvalidParams,
            10 => ErrorCode::Calibration,
            code if code >= DEVICE_CODE_BASE => ErrorCode::Device(code),
            _ => ErrorCode::DeviceFailure,
        }
    }

    /// Fatal alarms also drop the Initialized bit; the device is initialised
    /// again once the alarm is cleared.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::WorkerPanic
                | ErrorCode::InitFailed
                | ErrorCode::AbortUnresponsive
                | ErrorCode::Calibration
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::None => "NONE",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DeviceFailure => "DEVICE_FAILURE",
            ErrorCode::Disconnected => "DISCONNECTED",
            ErrorCode::WorkerPanic => "WORKER_PANIC",
            ErrorCode::InitFailed => "INIT_FAILED",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::AbortUnresponsive => "ABORT_UNRESPONSIVE",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::Calibration => "CALIBRATION",
            ErrorCode::Device(code) => return write!(f, "DEVICE({code:#06x})"),
        };
        write!(f, "{name}")
    }
}

impl From<&AdaptorError> for ErrorCode {
    fn from(error: &AdaptorError) -> Self {
        match error {
            AdaptorError::NotConnected => ErrorCode::Disconnected,
            AdaptorError::Device { code, .. } if *code >= DEVICE_CODE_BASE => {
                ErrorCode::Device(*code)
            }
            AdaptorError::Device { .. } | AdaptorError::Io(_) => ErrorCode::DeviceFailure,
            AdaptorError::InvalidParams(_) => ErrorCode::InvalidParams,
            AdaptorError::Aborted => ErrorCode::Aborted,
            AdaptorError::Calibration(_) => ErrorCode::Calibration,
            AdaptorError::Unsupported(_) => ErrorCode::UnknownCommand,
            AdaptorError::InvalidSpec(_) => ErrorCode::InitFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_standard_commands() {
        assert_eq!(Command::decode(0, &[]), Command::Clear);
        assert_eq!(Command::decode(8, &[]), Command::Action(ActionKind::Primary));
        assert_eq!(Command::decode(16, &[]), Command::Action(ActionKind::Home));
        assert_eq!(
            Command::decode(32, &[]),
            Command::Action(ActionKind::Reinitialize)
        );
        assert_eq!(Command::decode(48, &[]), Command::ClearAlarm);
        assert_eq!(Command::decode(99, &[]), Command::Unknown(99));
    }

    #[test]
    fn test_extended_commands_need_declaration() {
        assert_eq!(Command::decode(64, &[]), Command::Unknown(64));
        assert_eq!(
            Command::decode(64, &[CMD_RELOAD_CALIBRATION]),
            Command::Action(ActionKind::ReloadCalibration)
        );
        assert_eq!(
            Command::decode(80, &[80]),
            Command::Action(ActionKind::Extended(80))
        );
    }

    #[test]
    fn test_error_code_words() {
        for word in 0..=10u16 {
            assert_eq!(ErrorCode::from_word(word).word(), word);
        }
        assert_eq!(ErrorCode::from_word(0x1234), ErrorCode::Device(0x1234));
        assert_eq!(ErrorCode::from_word(42), ErrorCode::DeviceFailure);
    }

    #[test]
    fn test_fatal_codes() {
        assert!(ErrorCode::WorkerPanic.is_fatal());
        assert!(ErrorCode::Calibration.is_fatal());
        assert!(!ErrorCode::Timeout.is_fatal());
        assert!(!ErrorCode::UnknownCommand.is_fatal());
    }

    #[test]
    fn test_adaptor_error_mapping() {
        let low = AdaptorError::Device {
            code: 3,
            message: "stall".into(),
        };
        let high = AdaptorError::Device {
            code: 0x201,
            message: "gripper overload".into(),
        };
        assert_eq!(ErrorCode::from(&low), ErrorCode::DeviceFailure);
        assert_eq!(ErrorCode::from(&high).word(), 0x201);
        assert_eq!(
            ErrorCode::from(&AdaptorError::NotConnected),
            ErrorCode::Disconnected
        );
    }
}
