// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Change subscriptions on a register range
//!
//! A [`RegisterWatch`] yields batches of [`CellChange`]s for writes that land
//! inside its range. Delivery is allowed to coalesce: when the subscriber
//! falls behind the broadcast buffer, the intermediate values are dropped and
//! the next batch carries the *current* value of every cell of the range, read
//! straight from the store. The latest value of a cell is therefore always
//! delivered, which is all the polling handshake needs.

use std::ops::Range;

use log::{debug, warn};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use super::{CellChange, SharedRegisterStore};

/// Subscription to writes inside one address range.
#[derive(Debug)]
pub struct RegisterWatch {
    store: SharedRegisterStore,
    range: Range<u16>,
    receiver: broadcast::Receiver<CellChange>,
}

impl RegisterWatch {
    pub(super) fn new(
        store: SharedRegisterStore,
        range: Range<u16>,
        receiver: broadcast::Receiver<CellChange>,
    ) -> Self {
        Self {
            store,
            range,
            receiver,
        }
    }

    /// Watched address range.
    pub fn range(&self) -> Range<u16> {
        self.range.clone()
    }

    /// Wait for the next batch of changes inside the range.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Vec<CellChange>> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.range.contains(&change.addr) => {
                    let mut batch = vec![change];
                    self.drain_into(&mut batch);
                    return Some(batch);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(
                        "Watcher on {:?} lagged by {} changes, resynchronising",
                        self.range, skipped
                    );
                    return self.resync();
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Collect any changes that are already queued, without waiting.
    fn drain_into(&mut self, batch: &mut Vec<CellChange>) {
        loop {
            match self.receiver.try_recv() {
                Ok(change) if self.range.contains(&change.addr) => batch.push(change),
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => {
                    if let Some(current) = self.resync() {
                        *batch = current;
                    }
                    return;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
            }
        }
    }

    /// Current value of every watched cell, as a batch.
    fn resync(&mut self) -> Option<Vec<CellChange>> {
        let count = (self.range.end - self.range.start) as usize;
        match self.store.read(self.range.start, count) {
            Ok(values) => Some(
                values
                    .into_iter()
                    .enumerate()
                    .map(|(offset, value)| CellChange {
                        addr: self.range.start + offset as u16,
                        value,
                    })
                    .collect(),
            ),
            Err(e) => {
                warn!("Watcher on {:?} could not resynchronise: {}", self.range, e);
                None
            }
        }
    }
}
