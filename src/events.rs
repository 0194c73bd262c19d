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

//! Event processing for the front end.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bluetooth::ble_constants;
use crate::controller::ControllerEvent;
use crate::state::ViewState;

/// Folds controller events into the [`ViewState`].
pub struct EventProcessor {
    state: Arc<ViewState>,
}

impl EventProcessor {
    /// Create a new event processor.
    pub fn new(state: Arc<ViewState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ViewState> {
        &self.state
    }

    /// Called when the user starts a connection attempt.
    pub fn connecting(&self) {
        self.state.set_connecting();
    }

    /// Called when the user requests a countdown.
    pub fn countdown_requested(&self, minutes: u8) {
        self.state.set_timer_controls(false);
        self.state.show_remaining(u32::from(minutes) * 60);
    }

    /// Called when the user stops the countdown.
    pub fn countdown_stopped(&self) {
        self.state.set_timer_controls(true);
        self.state.clear_countdown_display();
    }

    /// Process a single event.
    ///
    /// Returns a notice for the user, if the event warrants one.
    pub fn process_event(&mut self, event: ControllerEvent) -> Option<String> {
        match event {
            ControllerEvent::Connected => {
                info!("Device connected, discovering services");
                None
            }
            ControllerEvent::Disconnected { countdown_active } => {
                info!("Device disconnected (countdown active: {})", countdown_active);
                if !countdown_active {
                    self.state.clear_countdown_display();
                }
                self.state.set_disconnected();
                self.state.set_timer_controls(false);
                Some(self.state.get_status().as_str().to_string())
            }
            ControllerEvent::ServicesReady { is_correct_device } => {
                self.state.set_connected(is_correct_device);
                if is_correct_device {
                    self.state.set_timer_controls(true);
                } else {
                    warn!("Connected peripheral is not an HRV controller");
                }
                Some(self.state.get_status().as_str().to_string())
            }
            ControllerEvent::DataAvailable { countdown_started } => {
                debug!(
                    "Acknowledgement from peripheral (countdown started: {})",
                    countdown_started
                );
                if countdown_started {
                    self.state.set_timer_controls(false);
                }
                None
            }
            ControllerEvent::ValueRead { uuid, value } => Some(format!(
                "{}: {}",
                ble_constants::lookup(&uuid, "Unknown Characteristic"),
                String::from_utf8_lossy(&value).trim_end()
            )),
            ControllerEvent::CountdownTick { remaining } => {
                self.state.show_remaining(remaining);
                None
            }
            ControllerEvent::CountdownFinished => {
                info!("Countdown finished");
                self.state.set_timer_controls(true);
                self.state.clear_countdown_display();
                Some("Countdown finished".to_string())
            }
        }
    }
}
