// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Process-wide holding-register file
//!
//! The [`RegisterStore`] is the single piece of mutable state shared by the
//! Modbus broker, the module controllers and any in-process supervisor. It maps
//! 16-bit addresses to 16-bit values and offers:
//!
//! - point reads and range reads taken under one lock (a range read is a
//!   consistent snapshot of the range),
//! - single and multi-cell writes committed under one lock (no reader can ever
//!   observe half of a multi-write),
//! - change subscriptions ([`RegisterWatch`]) so that controllers do not need to
//!   busy-poll the store.
//!
//! ## Address space
//!
//! Valid addresses are `0..=max_address`. Any access that reaches past
//! `max_address` fails with [`RegisterError::OutOfRange`] and leaves every cell
//! untouched.
//!
//! ## Usage
//!
//! ```
//! use rust_handshake::register::RegisterStore;
//!
//! let store = RegisterStore::shared(999);
//! store.write_many(500, &[1, 2, 3, 4]).unwrap();
//! assert_eq!(store.read(500, 4).unwrap(), vec![1, 2, 3, 4]);
//! ```

pub mod codec;
pub mod snapshot;
pub mod watch;

use std::ops::Range;
use std::sync::{Arc, RwLock};

use log::{debug, trace};
use thiserror::Error;
use tokio::sync::broadcast;

pub use watch::RegisterWatch;

/// Highest valid cell address when nothing else is configured.
pub const DEFAULT_MAX_ADDRESS: u16 = 999;

/// Capacity of the change broadcast channel. Slow watchers resynchronise
/// from the store when they fall further behind than this.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Shared handle to the register file.
pub type SharedRegisterStore = Arc<RegisterStore>;

/// Errors reported by the register file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// The access reaches beyond the configured maximum address
    #[error("register range {addr}+{count} exceeds maximum address {max}")]
    OutOfRange { addr: u16, count: usize, max: u16 },

    /// A value wider than 16 bits was offered through the raw API
    #[error("value {value} for register {addr} does not fit in 16 bits")]
    ValueOutOfRange { addr: u16, value: u32 },

    /// A writer panicked while holding the register lock
    #[error("register store lock poisoned")]
    Poisoned,
}

/// A single committed cell update, as delivered to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellChange {
    pub addr: u16,
    pub value: u16,
}

/// In-memory holding-register file.
///
/// All cells start at zero. The store is `Send + Sync` and is normally used
/// through a [`SharedRegisterStore`].
#[derive(Debug)]
pub struct RegisterStore {
    cells: RwLock<Vec<u16>>,
    max_address: u16,
    changes: broadcast::Sender<CellChange>,
}

impl RegisterStore {
    /// Create a store holding cells `0..=max_address`, all zero.
    pub fn new(max_address: u16) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            cells: RwLock::new(vec![0; max_address as usize + 1]),
            max_address,
            changes,
        }
    }

    /// Create a store already wrapped for sharing.
    pub fn shared(max_address: u16) -> SharedRegisterStore {
        Arc::new(Self::new(max_address))
    }

    /// Highest valid address.
    pub fn max_address(&self) -> u16 {
        self.max_address
    }

    /// Number of cells in the store.
    pub fn len(&self) -> usize {
        self.max_address as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Validate `[addr, addr+count)` and return it as an index range.
    fn span(&self, addr: u16, count: usize) -> Result<Range<usize>, RegisterError> {
        let start = addr as usize;
        let end = start + count;
        if end > self.max_address as usize + 1 {
            return Err(RegisterError::OutOfRange {
                addr,
                count,
                max: self.max_address,
            });
        }
        Ok(start..end)
    }

    /// Read `count` consecutive cells starting at `addr`.
    ///
    /// The whole range is copied under a single read lock, so the result is a
    /// consistent snapshot with respect to every multi-write.
    pub fn read(&self, addr: u16, count: usize) -> Result<Vec<u16>, RegisterError> {
        let span = self.span(addr, count)?;
        let cells = self.cells.read().map_err(|_| RegisterError::Poisoned)?;
        Ok(cells[span].to_vec())
    }

    /// Read a single cell.
    pub fn read_one(&self, addr: u16) -> Result<u16, RegisterError> {
        let span = self.span(addr, 1)?;
        let cells = self.cells.read().map_err(|_| RegisterError::Poisoned)?;
        Ok(cells[span.start])
    }

    /// Write a single cell.
    pub fn write(&self, addr: u16, value: u16) -> Result<(), RegisterError> {
        self.write_many(addr, std::slice::from_ref(&value))
    }

    /// Write consecutive cells starting at `addr`, atomically.
    ///
    /// The range is validated before any cell changes; on error nothing is
    /// written.
    pub fn write_many(&self, addr: u16, values: &[u16]) -> Result<(), RegisterError> {
        let span = self.span(addr, values.len())?;
        let mut cells = self.cells.write().map_err(|_| RegisterError::Poisoned)?;
        cells[span.clone()].copy_from_slice(values);

        // Notifications are sent while the lock is held so that watchers see
        // changes in commit order.
        for (offset, value) in values.iter().enumerate() {
            let change = CellChange {
                addr: (span.start + offset) as u16,
                value: *value,
            };
            // No receivers is not an error
            let _ = self.changes.send(change);
        }
        trace!("Committed {} cells at {}", values.len(), addr);
        Ok(())
    }

    /// Write a value coming from a wider integer source.
    pub fn write_raw(&self, addr: u16, value: u32) -> Result<(), RegisterError> {
        self.write_many_raw(addr, std::slice::from_ref(&value))
    }

    /// Write values coming from a wider integer source, atomically.
    ///
    /// Fails with [`RegisterError::ValueOutOfRange`] if any value exceeds
    /// 65535; no cell is written in that case.
    pub fn write_many_raw(&self, addr: u16, values: &[u32]) -> Result<(), RegisterError> {
        let narrowed = values
            .iter()
            .enumerate()
            .map(|(offset, value)| {
                u16::try_from(*value).map_err(|_| RegisterError::ValueOutOfRange {
                    addr: addr.wrapping_add(offset as u16),
                    value: *value,
                })
            })
            .collect::<Result<Vec<u16>, RegisterError>>()?;
        self.write_many(addr, &narrowed)
    }

    /// Subscribe to changes inside `range`.
    ///
    /// See [`RegisterWatch`] for the coalescing rules.
    pub fn watch(self: &Arc<Self>, range: Range<u16>) -> Result<RegisterWatch, RegisterError> {
        if range.start > range.end {
            return Err(RegisterError::OutOfRange {
                addr: range.start,
                count: 0,
                max: self.max_address,
            });
        }
        self.span(range.start, (range.end - range.start) as usize)?;
        debug!("New watcher on registers {:?}", range);
        Ok(RegisterWatch::new(
            Arc::clone(self),
            range,
            self.changes.subscribe(),
        ))
    }

    /// Copy of every cell, taken under one read lock.
    pub fn snapshot(&self) -> Result<Vec<u16>, RegisterError> {
        let cells = self.cells.read().map_err(|_| RegisterError::Poisoned)?;
        Ok(cells.clone())
    }
}
