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

//! Resolution of the discovered attribute table against the HRV profile.

use tracing::debug;
use uuid::Uuid;

use super::ble_constants::{self, CONTROL_ACK_UUID, CONTROL_INPUT_UUID, SERVICE_UUID, TIMER_VALUE_UUID};
use crate::error::{ControllerError, Result};

/// A discovered service and the characteristics it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Snapshot of the services reported after discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeTable {
    pub services: Vec<ServiceEntry>,
}

impl AttributeTable {
    pub fn new(services: Vec<ServiceEntry>) -> Self {
        Self { services }
    }

    /// Find a service by UUID.
    pub fn service(&self, uuid: &Uuid) -> Option<&ServiceEntry> {
        self.services.iter().find(|s| &s.uuid == uuid)
    }

    /// One line per attribute, with display names where known.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for service in &self.services {
            lines.push(format!(
                "{} ({})",
                ble_constants::lookup(&service.uuid, "Unknown Service"),
                service.uuid
            ));
            for characteristic in &service.characteristics {
                lines.push(format!(
                    "  {} ({})",
                    ble_constants::lookup(characteristic, "Unknown Characteristic"),
                    characteristic
                ));
            }
        }
        lines
    }
}

/// Handles resolved for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAttributes {
    pub service: Uuid,
    pub control_input: Uuid,
    pub control_ack: Option<Uuid>,
    pub timer_value: Option<Uuid>,
}

/// Identifiers the binder looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeProfile {
    pub service: Uuid,
    pub control_input: Uuid,
    pub control_ack: Uuid,
    pub timer_value: Uuid,
}

impl Default for AttributeProfile {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            control_input: CONTROL_INPUT_UUID,
            control_ack: CONTROL_ACK_UUID,
            timer_value: TIMER_VALUE_UUID,
        }
    }
}

/// Resolves an [`AttributeTable`] into [`BoundAttributes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeBinder {
    profile: AttributeProfile,
}

impl AttributeBinder {
    pub fn new(profile: AttributeProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &AttributeProfile {
        &self.profile
    }

    /// Bind the table. The main service and control input are mandatory.
    ///
    /// Arming notifications on `control_ack` is left to the caller, which
    /// owns the transport.
    pub fn bind(&self, table: &AttributeTable) -> Result<BoundAttributes> {
        let service = table
            .service(&self.profile.service)
            .ok_or(ControllerError::NotSupported)?;

        let has = |uuid: &Uuid| service.characteristics.contains(uuid);

        if !has(&self.profile.control_input) {
            debug!("Control input characteristic missing");
            return Err(ControllerError::NotSupported);
        }

        let bound = BoundAttributes {
            service: service.uuid,
            control_input: self.profile.control_input,
            control_ack: has(&self.profile.control_ack).then_some(self.profile.control_ack),
            timer_value: has(&self.profile.timer_value).then_some(self.profile.timer_value),
        };
        debug!("Bound attributes: {:?}", bound);
        Ok(bound)
    }
}

#[cfg(test)]
pub(crate) fn full_table() -> AttributeTable {
    AttributeTable::new(vec![
        ServiceEntry {
            uuid: Uuid::from_u128(0x1800),
            characteristics: vec![Uuid::from_u128(0x2a00)],
        },
        ServiceEntry {
            uuid: SERVICE_UUID,
            characteristics: vec![CONTROL_INPUT_UUID, CONTROL_ACK_UUID, TIMER_VALUE_UUID],
        },
    ])
}
