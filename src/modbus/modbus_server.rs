// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus service over the shared register store
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The server is the broker exposing the
//! register file, while the client is a supervisor (or any other Modbus master).
//!
//! Holding registers and input registers are the same table: both map 1:1 onto
//! the [`RegisterStore`](crate::register::RegisterStore) addresses, shifted by the
//! configured offset of the request's unit id when one is set.
//!
//! | Function | Code | Limits |
//! |----------|------|--------|
//! | Read Holding Registers | 0x03 | 1..=125 registers |
//! | Read Input Registers | 0x04 | 1..=125 registers |
//! | Write Single Register | 0x06 | |
//! | Write Multiple Registers | 0x10 | 1..=123 values |
//!
//! Writes from the wire into the meta block (`0..100`) are refused with
//! `ILLEGAL_DATA_ADDRESS`.

use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error};
use tokio::time::Instant;
use tokio_modbus::prelude::*;

use crate::handshake::layout::META_BLOCK_LEN;
use crate::register::{RegisterError, SharedRegisterStore};

/// Maximum registers in one read request.
pub const MAX_READ_COUNT: u16 = 125;
/// Maximum values in one Write Multiple Registers request.
pub const MAX_WRITE_COUNT: usize = 123;

/// Counters shared by every connection of one broker.
#[derive(Debug)]
pub struct BrokerStats {
    clients: AtomicUsize,
    requests: AtomicU64,
    exceptions: AtomicU32,
    started: Instant,
}

impl Default for BrokerStats {
    fn default() -> Self {
        Self {
            clients: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            exceptions: AtomicU32::new(0),
            started: Instant::now(),
        }
    }
}

impl BrokerStats {
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn exceptions(&self) -> u32 {
        self.exceptions.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Counts one connected client for as long as it lives.
#[derive(Debug)]
struct ClientGuard(Arc<BrokerStats>);

impl ClientGuard {
    fn new(stats: Arc<BrokerStats>) -> Self {
        stats.clients.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One client connection's view of the register file.
///
/// A new instance is built for every accepted TCP connection; they all share
/// the same store and statistics.
pub struct HandshakeModbusServer {
    store: SharedRegisterStore,
    unit_offsets: Arc<HashMap<u8, u16>>,
    stats: Arc<BrokerStats>,
    _client: ClientGuard,
}

impl tokio_modbus::server::Service for HandshakeModbusServer {
    type Request = SlaveRequest<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    /// Process a Modbus request and provide a response
    ///
    /// This method handles function codes 0x03, 0x04, 0x06 and 0x10. Any other
    /// function code returns an IllegalFunction exception.
    fn call(&self, req: Self::Request) -> Self::Future {
        let SlaveRequest { slave, request } = req;
        debug!("Received Modbus request from unit {}: {:?}", slave, request);
        self.stats.requests.fetch_add(1, Ordering::SeqCst);

        let offset = self.unit_offsets.get(&slave).copied().unwrap_or(0);

        let res = match request {
            Request::ReadHoldingRegisters(addr, cnt) => {
                debug!(
                    "Reading {} holding registers starting from address {}",
                    cnt, addr
                );
                register_read(&self.store, offset, addr, cnt).map(Response::ReadHoldingRegisters)
            }
            Request::ReadInputRegisters(addr, cnt) => {
                debug!(
                    "Reading {} input registers starting from address {}",
                    cnt, addr
                );
                register_read(&self.store, offset, addr, cnt).map(Response::ReadInputRegisters)
            }
            Request::WriteMultipleRegisters(addr, values) => {
                debug!(
                    "Writing {} values to holding registers starting from address {}",
                    values.len(),
                    addr
                );
                if values.is_empty() || values.len() > MAX_WRITE_COUNT {
                    Err(ExceptionCode::IllegalDataValue)
                } else {
                    register_write(&self.store, offset, addr, &values)
                        .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
                }
            }
            Request::WriteSingleRegister(addr, value) => {
                debug!("Writing value {} to holding register {}", value, addr);
                register_write(&self.store, offset, addr, std::slice::from_ref(&value))
                    .map(|_| Response::WriteSingleRegister(addr, value))
            }
            _ => {
                error!(
                    "Exception::IllegalFunction - Unimplemented function code in request: {request:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        };

        if let Err(e) = &res {
            error!("Modbus request error: {:?}", e);
            self.stats.exceptions.fetch_add(1, Ordering::SeqCst);
        }

        future::ready(res)
    }
}

impl HandshakeModbusServer {
    /// Build the service for one newly accepted connection.
    pub fn new(
        store: SharedRegisterStore,
        unit_offsets: Arc<HashMap<u8, u16>>,
        stats: Arc<BrokerStats>,
    ) -> Self {
        Self {
            store,
            unit_offsets,
            _client: ClientGuard::new(Arc::clone(&stats)),
            stats,
        }
    }
}

/// Shift a wire address by the unit offset.
fn store_address(offset: u16, addr: u16) -> Result<u16, ExceptionCode> {
    addr.checked_add(offset)
        .ok_or(ExceptionCode::IllegalDataAddress)
}

fn map_store_error(err: RegisterError) -> ExceptionCode {
    match err {
        RegisterError::OutOfRange { .. } => ExceptionCode::IllegalDataAddress,
        RegisterError::ValueOutOfRange { .. } => ExceptionCode::IllegalDataValue,
        RegisterError::Poisoned => ExceptionCode::ServerDeviceFailure,
    }
}

/// Helper function implementing reading registers from the store.
fn register_read(
    store: &SharedRegisterStore,
    offset: u16,
    addr: u16,
    cnt: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    if cnt == 0 || cnt > MAX_READ_COUNT {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let addr = store_address(offset, addr)?;
    store.read(addr, cnt.into()).map_err(map_store_error)
}

/// Write holding registers. Used by both the write single register
/// and write multiple registers requests.
fn register_write(
    store: &SharedRegisterStore,
    offset: u16,
    addr: u16,
    values: &[u16],
) -> Result<(), ExceptionCode> {
    let addr = store_address(offset, addr)?;
    if addr < META_BLOCK_LEN {
        error!("Refusing client write into meta block at {}", addr);
        return Err(ExceptionCode::IllegalDataAddress);
    }
    store.write_many(addr, values).map_err(map_store_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterStore;
    use std::borrow::Cow;
    use tokio_modbus::server::Service;

    fn server(offsets: &[(u8, u16)]) -> (HandshakeModbusServer, SharedRegisterStore) {
        let store = RegisterStore::shared(999);
        let server = HandshakeModbusServer::new(
            Arc::clone(&store),
            Arc::new(offsets.iter().copied().collect()),
            Arc::new(BrokerStats::default()),
        );
        (server, store)
    }

    fn call(
        server: &HandshakeModbusServer,
        slave: u8,
        request: Request<'static>,
    ) -> Result<Response, ExceptionCode> {
        server.call(SlaveRequest { slave, request }).into_inner()
    }

    #[test]
    fn test_read_write_round() {
        let (server, store) = server(&[]);
        let written = call(
            &server,
            1,
            Request::WriteMultipleRegisters(420, Cow::Owned(vec![8, 1234, 0])),
        );
        assert_eq!(written, Ok(Response::WriteMultipleRegisters(420, 3)));
        assert_eq!(store.read(420, 3).unwrap(), vec![8, 1234, 0]);
        assert_eq!(
            call(&server, 1, Request::ReadHoldingRegisters(421, 1)),
            Ok(Response::ReadHoldingRegisters(vec![1234]))
        );
        assert_eq!(
            call(&server, 1, Request::ReadInputRegisters(421, 1)),
            Ok(Response::ReadInputRegisters(vec![1234]))
        );
    }

    #[test]
    fn test_exceptions() {
        let (server, _store) = server(&[]);
        assert_eq!(
            call(&server, 1, Request::ReadHoldingRegisters(990, 20)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            call(&server, 1, Request::ReadHoldingRegisters(0, 126)),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            call(&server, 1, Request::WriteSingleRegister(3, 1)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            call(
                &server,
                1,
                Request::WriteMultipleRegisters(200, Cow::Owned(vec![0; 124]))
            ),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            call(&server, 1, Request::ReadCoils(0, 1)),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(server.stats.exceptions(), 5);
        assert_eq!(server.stats.requests(), 5);
    }

    #[test]
    fn test_unit_offsets() {
        let (server, store) = server(&[(2, 300)]);
        call(&server, 2, Request::WriteSingleRegister(120, 48)).unwrap();
        assert_eq!(store.read_one(420).unwrap(), 48);
        // Unmapped unit ids share the plain address space
        call(&server, 9, Request::WriteSingleRegister(120, 7)).unwrap();
        assert_eq!(store.read_one(120).unwrap(), 7);
    }

    #[test]
    fn test_client_guard_counts() {
        let stats = Arc::new(BrokerStats::default());
        let store = RegisterStore::shared(999);
        let first = HandshakeModbusServer::new(Arc::clone(&store), Arc::default(), Arc::clone(&stats));
        let second = HandshakeModbusServer::new(store, Arc::default(), Arc::clone(&stats));
        assert_eq!(stats.clients(), 2);
        drop(first);
        assert_eq!(stats.clients(), 1);
        drop(second);
        assert_eq!(stats.clients(), 0);
    }
}
