// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Fixed layout of a module register block
//!
//! | Offset | Direction | Meaning |
//! |--------|-----------|---------|
//! | 0 | module → world | status bits ([`StatusBits`](super::StatusBits)) |
//! | 1 | module → world | connection indicator (1 = connected) |
//! | 2 | module → world | device state ([`DeviceState`](crate::adaptor::DeviceState)) |
//! | 3 | module → world | last error code ([`ErrorCode`](super::ErrorCode)) |
//! | 4..=13 | module → world | module telemetry |
//! | 14 | module → world | completed operations (wrapping) |
//! | 15 | module → world | reconnect attempts (wrapping) |
//! | 20 | world → module | command word |
//! | 21..=22 | world → module | param0 low/high |
//! | 23..=24 | world → module | param1 low/high |
//! | 25..=29 | world → module | additional params |
//!
//! Addresses `0..100` of the register file form the broker meta block and are
//! never allocated to a module.

use std::ops::Range;

/// Number of cells in every module block.
pub const BLOCK_LEN: u16 = 100;

/// Cells reserved at the bottom of the register file for broker meta data.
pub const META_BLOCK_LEN: u16 = 100;

pub const OFFSET_STATUS: u16 = 0;
pub const OFFSET_CONNECTION: u16 = 1;
pub const OFFSET_DEVICE_STATE: u16 = 2;
pub const OFFSET_ERROR: u16 = 3;
pub const OFFSET_TELEMETRY: u16 = 4;
pub const TELEMETRY_LEN: usize = 10;
pub const OFFSET_OPERATIONS: u16 = 14;
pub const OFFSET_RECONNECTS: u16 = 15;

/// First offset owned by supervisors.
pub const OFFSET_COMMAND: u16 = 20;
pub const OFFSET_PARAMS: u16 = 21;
pub const PARAM_LEN: usize = 9;

/// Number of cells in the status header (offsets 0..=3).
pub const STATUS_LEN: usize = 4;

/// A module's contiguous `[base, base + 100)` register range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterBlock {
    base: u16,
}

impl RegisterBlock {
    pub fn new(base: u16) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    /// One past the last address of the block.
    pub fn end(&self) -> u32 {
        self.base as u32 + BLOCK_LEN as u32
    }

    /// Absolute address of `offset` inside the block.
    pub fn addr(&self, offset: u16) -> u16 {
        self.base.wrapping_add(offset)
    }

    pub fn status_addr(&self) -> u16 {
        self.addr(OFFSET_STATUS)
    }

    pub fn command_addr(&self) -> u16 {
        self.addr(OFFSET_COMMAND)
    }

    pub fn params_addr(&self) -> u16 {
        self.addr(OFFSET_PARAMS)
    }

    pub fn telemetry_addr(&self) -> u16 {
        self.addr(OFFSET_TELEMETRY)
    }

    /// Command word plus parameter cells, the only range a controller reads
    /// on every tick.
    pub fn command_range(&self) -> Range<u16> {
        self.command_addr()..self.addr(OFFSET_COMMAND + 1 + PARAM_LEN as u16)
    }

    /// Whether two blocks share any cell.
    pub fn overlaps(&self, other: &RegisterBlock) -> bool {
        (self.base as u32) < other.end() && (other.base as u32) < self.end()
    }

    /// Whether `offset` belongs to the controller side of the block.
    pub fn is_controller_owned(offset: u16) -> bool {
        offset < OFFSET_COMMAND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_addresses() {
        let block = RegisterBlock::new(400);
        assert_eq!(block.status_addr(), 400);
        assert_eq!(block.telemetry_addr(), 404);
        assert_eq!(block.command_addr(), 420);
        assert_eq!(block.params_addr(), 421);
        assert_eq!(block.command_range(), 420..430);
        assert_eq!(block.end(), 500);
    }

    #[test]
    fn test_overlap() {
        let a = RegisterBlock::new(400);
        assert!(!a.overlaps(&RegisterBlock::new(500)));
        assert!(!a.overlaps(&RegisterBlock::new(300)));
        assert!(a.overlaps(&RegisterBlock::new(450)));
        assert!(a.overlaps(&RegisterBlock::new(301)));
    }

    #[test]
    fn test_ownership_split() {
        assert!(RegisterBlock::is_controller_owned(OFFSET_RECONNECTS));
        assert!(!RegisterBlock::is_controller_owned(OFFSET_COMMAND));
    }
}
