// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Module handshake and orchestration core
//!
//! A process-wide [`register`] file is shared over Modbus TCP by the
//! [`modbus`] broker. Every automation module owns a 100-register block in it
//! and a [`handshake`] controller that turns supervisor commands written into
//! that block into calls on a device [`adaptor`]. The [`vision`] module adds
//! the camera specialisation and the [`daemon`] wires everything together
//! from a [`config`] file.

pub mod adaptor;
pub mod config;
pub mod daemon;
pub mod handshake;
pub mod modbus;
pub mod register;
pub mod vision;
