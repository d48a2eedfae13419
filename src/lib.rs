/*
 * This file is part of thermbind.
 *
 * Copyright (C) 2025 thermbind contributors
 *
 * thermbind is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * thermbind is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with thermbind. If not, see <https://www.gnu.org/licenses/>.
 */

//! thermbind - thermal topology IPC service
//!
//! A platform client streams the thermal layout (zones, sensors, cooling
//! devices) one call at a time; this service decodes each Binder-style parcel,
//! grows the topology and answers with a single status word.
//!
//! The work is split across the workspace crates and re-exported here:
//! - [`tb_protocol`]: parcel codec, opcodes, message records, transaction framing
//! - [`tb_core`]: topology store, assembly state machine, session, dispatcher
//! - [`tb_error`]: the shared error type
//!
//! The `thermbindd` binary in `tb-daemon` hosts the dispatcher on a Unix socket.

pub use tb_core;
pub use tb_error;
pub use tb_protocol;

pub use tb_core::{
    CallerIdentity, Session, ThermalApiClient, ThermalApiService, TopologyLimits,
    TopologySnapshot, ZoneLoader, ZoneSpec,
};
pub use tb_error::{Result, ThermalError};
pub use tb_protocol::{Opcode, Parcel, Request, TransportStatus};
