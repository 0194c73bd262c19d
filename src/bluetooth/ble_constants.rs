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

//! BLE service and characteristic UUIDs of the HRV control unit.

use uuid::Uuid;

/// HRV control GATT service UUID.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Control input characteristic UUID (host writes commands here).
/// Properties: Write
pub const CONTROL_INPUT_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Control acknowledgement characteristic UUID (peripheral confirms commands).
/// Properties: Notify
pub const CONTROL_ACK_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a9);

/// Countdown timer value characteristic UUID.
/// Properties: Read
pub const TIMER_VALUE_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26aa);

/// Human readable names for the known attributes.
const ATTRIBUTE_NAMES: &[(Uuid, &str)] = &[
    (SERVICE_UUID, "HRV Control Service"),
    (CONTROL_INPUT_UUID, "HRV Control Characteristic"),
    (CONTROL_ACK_UUID, "Control Input Acknowledgement"),
    (TIMER_VALUE_UUID, "Countdown Timer Value"),
];

/// Look up the display name of a known attribute, falling back to `default`.
pub fn lookup<'a>(uuid: &Uuid, default: &'a str) -> &'a str {
    ATTRIBUTE_NAMES
        .iter()
        .find(|(known, _)| known == uuid)
        .map(|(_, name)| *name)
        .unwrap_or(default)
}

/// Low-level link status codes reported alongside a disconnect.
pub mod link_status {
    /// Ordinary, requested or remote-initiated disconnect.
    pub const NORMAL: u8 = 0x00;
    /// Link supervision timeout.
    pub const CONNECTION_TIMEOUT: u8 = 0x08;
    /// Generic GATT failure, typically a half-open link.
    pub const GATT_ERROR: u8 = 0x85;

    /// Whether the status marks a link that must be force-closed.
    pub fn is_abnormal(status: u8) -> bool {
        matches!(status, CONNECTION_TIMEOUT | GATT_ERROR)
    }
}
