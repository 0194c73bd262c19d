// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Controller error types.
//!
//! Precondition and validation failures are returned synchronously and never
//! change session state. Link failures are folded into a disconnect.

use thiserror::Error;

use crate::bluetooth::ConnectionState;

/// Errors surfaced by the controller core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// Peripheral address could not be parsed or resolved.
    #[error("Invalid peripheral address: {0}")]
    AddressInvalid(String),

    /// Command fields out of range; nothing was sent.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// No bound control input (not yet bound, unsupported device, or disconnected).
    #[error("Control attributes not bound")]
    NotBound,

    /// Link dropped with one of the abnormal status codes.
    #[error("Abnormal link condition (status {status})")]
    LinkAbnormal { status: u8 },

    /// Peripheral lacks the required service or control input.
    #[error("Peripheral does not expose the HRV control service")]
    NotSupported,

    /// Operation not valid in the current connection state.
    #[error("Operation not valid while {state:?}")]
    InvalidState { state: ConnectionState },

    /// Transport refused the request outright.
    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
