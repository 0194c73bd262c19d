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

//! Bluetooth communication module.
//!
//! GATT client side of the HRV control link: wire codec, attribute binding,
//! connection state machine and the BlueZ transport.

pub mod ble_constants;
mod binder;
mod bluez;
mod connection;
pub mod protocol;
mod transport;

pub use binder::{AttributeBinder, AttributeProfile, AttributeTable, BoundAttributes, ServiceEntry};
pub use bluez::BluezTransport;
pub use connection::{ConnectionState, Session, SessionEvent, Transition};
pub use protocol::{AckKind, Command, CommandKind, Notification};
pub use transport::{
    GattTransport, LinkEvent, LinkId, PeripheralAddress, TransportAction, TransportEvent,
};
