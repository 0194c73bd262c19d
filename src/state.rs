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

//! View state shown by the front end.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::countdown::format_remaining;

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but the peripheral lacks the control service.
    Unsupported,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Unsupported => "Connected (unsupported device)",
        }
    }
}

/// Shared view state.
#[derive(Debug)]
pub struct ViewState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Whether the 20/40/60 timer options are selectable.
    pub timer_controls_enabled: RwLock<bool>,

    /// Whether the stop control is enabled.
    pub stop_enabled: RwLock<bool>,

    /// Countdown text; `None` when blank.
    pub countdown_display: RwLock<Option<String>>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            timer_controls_enabled: RwLock::new(false),
            stop_enabled: RwLock::new(false),
            countdown_display: RwLock::new(None),
        }
    }
}

impl ViewState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connecting(&self) {
        *self.connection_status.write() = ConnectionStatus::Connecting;
        *self.stop_enabled.write() = false;
    }

    pub fn set_connected(&self, is_correct_device: bool) {
        *self.connection_status.write() = if is_correct_device {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Unsupported
        };
        *self.stop_enabled.write() = is_correct_device;
    }

    pub fn set_disconnected(&self) {
        *self.connection_status.write() = ConnectionStatus::Disconnected;
        *self.stop_enabled.write() = false;
    }

    pub fn set_timer_controls(&self, enabled: bool) {
        *self.timer_controls_enabled.write() = enabled;
    }

    pub fn show_remaining(&self, seconds: u32) {
        *self.countdown_display.write() = Some(format_remaining(seconds));
    }

    pub fn clear_countdown_display(&self) {
        *self.countdown_display.write() = None;
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn timer_controls_enabled(&self) -> bool {
        *self.timer_controls_enabled.read()
    }

    pub fn stop_enabled(&self) -> bool {
        *self.stop_enabled.read()
    }

    pub fn get_countdown_display(&self) -> Option<String> {
        self.countdown_display.read().clone()
    }

    /// One-line summary for the status command.
    pub fn summary(&self) -> String {
        format!(
            "{} | timer {} | stop {} | {}",
            self.get_status().as_str(),
            if self.timer_controls_enabled() { "enabled" } else { "disabled" },
            if self.stop_enabled() { "enabled" } else { "disabled" },
            self.get_countdown_display().as_deref().unwrap_or("--:--"),
        )
    }
}
