// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus-TCP broker task
//!
//! The broker binds its listener eagerly so that a bind failure is reported
//! while the daemon is still launching, then serves every accepted connection
//! with its own [`HandshakeModbusServer`]. While it runs it refreshes the meta
//! block once per second:
//!
//! | Address | Content |
//! |---------|---------|
//! | 0-1 | uptime seconds (u32, low word first) |
//! | 2 | connected clients |
//! | 3 | version word (`major << 8 \| minor`) |
//! | 4-5 | requests served (u32) |
//! | 6 | exceptions returned (saturating) |
//! | 7 | configured modules |

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::time;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use super::modbus_server::{BrokerStats, HandshakeModbusServer};
use crate::config::ModbusConfig;
use crate::register::{codec, RegisterError, SharedRegisterStore};

/// Number of meta cells maintained by the broker.
pub const META_CELLS: usize = 8;

/// `major << 8 | minor` of this crate.
pub fn version_word() -> u16 {
    let major: u16 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
    let minor: u16 = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
    (major.min(0xFF) << 8) | minor.min(0xFF)
}

pub struct ModbusBroker {
    listener: TcpListener,
    store: SharedRegisterStore,
    unit_offsets: Arc<HashMap<u8, u16>>,
    stats: Arc<BrokerStats>,
    modules: u16,
}

impl ModbusBroker {
    /// Bind the listener described by `config`.
    ///
    /// `modules` is only published in the meta block.
    pub async fn bind(
        config: &ModbusConfig,
        store: SharedRegisterStore,
        modules: usize,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        info!(
            "Modbus broker bound to {}",
            listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| format!("{}:{}", config.host, config.port))
        );
        Ok(Self {
            listener,
            store,
            unit_offsets: Arc::new(config.unit_offsets.clone()),
            stats: Arc::new(BrokerStats::default()),
            modules: modules.min(u16::MAX as usize) as u16,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<BrokerStats> {
        Arc::clone(&self.stats)
    }

    /// Serve clients until `running` turns false.
    pub async fn run(self, running: Arc<AtomicBool>) -> Result<()> {
        let ModbusBroker {
            listener,
            store,
            unit_offsets,
            stats,
            modules,
        } = self;

        let server = Server::new(listener);

        let service_store = Arc::clone(&store);
        let service_stats = Arc::clone(&stats);
        let on_connected = move |stream, socket_addr: SocketAddr| {
            debug!("Modbus client connected from {}", socket_addr);
            let store = Arc::clone(&service_store);
            let unit_offsets = Arc::clone(&unit_offsets);
            let stats = Arc::clone(&service_stats);
            async move {
                accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                    Ok(Some(HandshakeModbusServer::new(
                        Arc::clone(&store),
                        Arc::clone(&unit_offsets),
                        Arc::clone(&stats),
                    )))
                })
            }
        };

        let on_process_error = |err| {
            error!("Modbus server error: {err}");
        };

        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.serve(&on_connected, on_process_error).await {
                error!("Modbus server error: {}", e);
            }
        });

        while running.load(Ordering::SeqCst) {
            if let Err(e) = update_meta(&store, &stats, modules) {
                warn!("Failed to refresh Modbus meta block: {}", e);
            }
            time::sleep(Duration::from_secs(1)).await;
        }

        info!("Shutting down Modbus broker...");
        server_handle.abort();
        match time::timeout(Duration::from_secs(5), server_handle).await {
            Ok(_) => info!("Modbus broker shut down successfully"),
            Err(_) => warn!("Modbus broker shutdown timed out, forcing termination"),
        }
        Ok(())
    }
}

/// Write the broker meta cells in one atomic write.
pub fn update_meta(
    store: &SharedRegisterStore,
    stats: &BrokerStats,
    modules: u16,
) -> Result<(), RegisterError> {
    let uptime = codec::encode_u32(stats.uptime_secs().min(u32::MAX as u64) as u32);
    let requests = codec::encode_u32(stats.requests().min(u32::MAX as u64) as u32);
    let cells: [u16; META_CELLS] = [
        uptime[0],
        uptime[1],
        stats.clients().min(u16::MAX as usize) as u16,
        version_word(),
        requests[0],
        requests[1],
        stats.exceptions().min(u16::MAX as u32) as u16,
        modules,
    ];
    store.write_many(0, &cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterStore;

    #[test]
    fn test_version_word() {
        let word = version_word();
        assert_eq!(
            (word >> 8).to_string(),
            env!("CARGO_PKG_VERSION_MAJOR").to_string()
        );
    }

    #[test]
    fn test_meta_block() {
        let store = RegisterStore::shared(999);
        let stats = BrokerStats::default();
        update_meta(&store, &stats, 3).unwrap();
        let meta = store.read(0, META_CELLS).unwrap();
        assert_eq!(meta[2], 0);
        assert_eq!(meta[3], version_word());
        assert_eq!(meta[7], 3);
    }
}
