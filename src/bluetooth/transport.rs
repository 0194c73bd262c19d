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

//! Transport seam between the session and the Bluetooth stack.
//!
//! Requests are fire-and-forget; outcomes come back later as
//! [`TransportEvent`]s on the channel handed to the transport.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use uuid::Uuid;

use super::binder::AttributeTable;
use crate::error::ControllerError;

/// Transport-level peripheral identifier (`AA:BB:CC:DD:EE:FF`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeripheralAddress {
    type Err = ControllerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let octets: Vec<&str> = trimmed.split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(ControllerError::AddressInvalid(s.to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one connection attempt. The session issues a fresh id with
/// every `Connect`; events tagged with an older id are stale.
pub type LinkId = u64;

/// Callbacks from the transport, as a closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link is up.
    Connected,
    /// Link is down. `status` is a [`link_status`](super::ble_constants::link_status) code.
    Disconnected { status: u8 },
    /// Service discovery finished.
    ServicesDiscovered(std::result::Result<AttributeTable, String>),
    /// Characteristic value notification.
    CharacteristicChanged { uuid: Uuid, value: Vec<u8> },
    /// Result of a characteristic read.
    CharacteristicRead { uuid: Uuid, value: Vec<u8> },
    /// Remote signal strength.
    RemoteRssi(i16),
}

/// A [`TransportEvent`] tagged with the link it was produced for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub link: LinkId,
    pub event: TransportEvent,
}

impl LinkEvent {
    pub fn new(link: LinkId, event: TransportEvent) -> Self {
        Self { link, event }
    }
}

/// Requests the session issues to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    Connect { address: PeripheralAddress, link: LinkId },
    DiscoverServices,
    ReadRssi,
    SetNotify { uuid: Uuid, enabled: bool },
    Disconnect,
    Close,
}

/// Trait for GATT client transports.
pub trait GattTransport: Send + Sync {
    /// Get the backend name (e.g., "BlueZ").
    fn backend_name(&self) -> &'static str;

    /// Whether a powered adapter is present.
    fn adapter_available(&self) -> bool;

    /// Open a link to the peripheral. Completion arrives as `Connected`.
    ///
    /// Every event produced for this link must carry `link`. An `Err` means
    /// the request was refused and no event will follow.
    fn connect(&self, address: &PeripheralAddress, link: LinkId) -> Result<()>;

    /// Start service discovery.
    fn discover_services(&self) -> Result<()>;

    /// Request a remote RSSI reading.
    fn read_rssi(&self) -> Result<()>;

    /// Enable or disable notifications on a characteristic.
    fn set_notify(&self, uuid: Uuid, enabled: bool) -> Result<()>;

    /// Write a value to a characteristic.
    fn write(&self, uuid: Uuid, value: Vec<u8>) -> Result<()>;

    /// Read a characteristic value.
    fn read(&self, uuid: Uuid) -> Result<()>;

    /// Request link teardown. Completion arrives as `Disconnected`.
    fn disconnect(&self) -> Result<()>;

    /// Release the link handle. Safe to call repeatedly.
    fn close(&self);

    /// Apply a session action.
    fn apply(&self, action: &TransportAction) -> Result<()> {
        match action {
            TransportAction::Connect { address, link } => self.connect(address, *link),
            TransportAction::DiscoverServices => self.discover_services(),
            TransportAction::ReadRssi => self.read_rssi(),
            TransportAction::SetNotify { uuid, enabled } => self.set_notify(*uuid, *enabled),
            TransportAction::Disconnect => self.disconnect(),
            TransportAction::Close => {
                self.close();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse() {
        let addr: PeripheralAddress = "24:0a:c4:12:34:56".parse().unwrap();
        assert_eq!(addr.as_str(), "24:0A:C4:12:34:56");
        assert_eq!(addr.to_string(), "24:0A:C4:12:34:56");
    }

    #[test]
    fn test_address_rejects_garbage() {
        for bad in ["", "24:0A:C4:12:34", "24:0A:C4:12:34:5G", "240AC4123456", "24-0A-C4-12-34-56"] {
            assert!(matches!(
                bad.parse::<PeripheralAddress>(),
                Err(ControllerError::AddressInvalid(_))
            ));
        }
    }
}
