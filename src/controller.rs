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

//! Session facade used by the front end.
//!
//! Owns the single [`Session`], the [`Countdown`] and the countdown intent
//! behind one lock, pumps transport events through the session, and
//! publishes [`ControllerEvent`]s in transport order.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bluetooth::{
    AttributeBinder, AttributeTable, Command, CommandKind, ConnectionState, GattTransport,
    LinkEvent, PeripheralAddress, Session, SessionEvent, Transition, TransportAction,
};
use crate::countdown::{Countdown, CountdownEvent};
use crate::error::{ControllerError, Result};

/// Events delivered to the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Connected,
    /// Link lost or closed. `countdown_active` is sampled with the transition.
    Disconnected { countdown_active: bool },
    ServicesReady { is_correct_device: bool },
    /// Recognized acknowledgement arrived. `countdown_started` is set when
    /// it armed a requested countdown.
    DataAvailable { countdown_started: bool },
    ValueRead { uuid: Uuid, value: Vec<u8> },
    CountdownTick { remaining: u32 },
    CountdownFinished,
}

impl From<CountdownEvent> for ControllerEvent {
    fn from(event: CountdownEvent) -> Self {
        match event {
            CountdownEvent::Tick { remaining } => Self::CountdownTick { remaining },
            CountdownEvent::Finished => Self::CountdownFinished,
        }
    }
}

/// Facade settings.
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    /// Template for timer commands; `timer_minutes` is overridden per call.
    pub command: Command,
    /// Cancel a running countdown when the link drops.
    pub cancel_countdown_on_disconnect: bool,
    pub binder: AttributeBinder,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            command: Command::new(CommandKind::Mode3, 0xFF, 0, 1),
            cancel_countdown_on_disconnect: false,
            binder: AttributeBinder::default(),
        }
    }
}

/// Everything guarded by the controller lock.
struct Inner {
    session: Session,
    countdown: Countdown<ControllerEvent>,
    /// Seconds to count once the next acknowledgement arrives.
    countdown_intent: Option<u32>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl Inner {
    /// Issue a transition's actions, then publish its events.
    ///
    /// A refused `Connect` or `Disconnect` means no callback will settle the
    /// session, so it is closed here and the failure returned.
    fn apply(
        &mut self,
        transport: &dyn GattTransport,
        settings: &ControllerSettings,
        transition: Transition,
    ) -> Result<()> {
        let mut refused = None;
        for action in &transition.actions {
            if let Err(e) = transport.apply(action) {
                error!("Transport action {:?} failed: {}", action, e);
                if matches!(
                    action,
                    TransportAction::Connect { .. } | TransportAction::Disconnect
                ) {
                    refused.get_or_insert(e);
                }
            }
        }
        self.publish(settings, transition.events);

        match refused {
            None => Ok(()),
            Some(e) => {
                let rollback = self.session.close();
                for action in &rollback.actions {
                    if let Err(e) = transport.apply(action) {
                        warn!("Transport action {:?} failed during rollback: {}", action, e);
                    }
                }
                self.publish(settings, rollback.events);
                Err(ControllerError::Transport(e.to_string()))
            }
        }
    }

    fn publish(&mut self, settings: &ControllerSettings, events: Vec<SessionEvent>) {
        for event in events {
            let event = match event {
                SessionEvent::Connected => ControllerEvent::Connected,
                SessionEvent::Disconnected => {
                    if settings.cancel_countdown_on_disconnect {
                        self.countdown_intent = None;
                        self.countdown.cancel();
                    }
                    ControllerEvent::Disconnected {
                        countdown_active: self.countdown.is_running(),
                    }
                }
                SessionEvent::ServicesReady { is_correct_device } => {
                    ControllerEvent::ServicesReady { is_correct_device }
                }
                SessionEvent::DataAvailable(_) => {
                    let countdown_started = match self.countdown_intent.take() {
                        Some(seconds) => self.countdown.arm(seconds),
                        None => {
                            debug!("Acknowledgement without a pending countdown");
                            false
                        }
                    };
                    ControllerEvent::DataAvailable { countdown_started }
                }
                SessionEvent::ValueRead { uuid, value } => ControllerEvent::ValueRead { uuid, value },
            };
            let _ = self.event_tx.send(event);
        }
    }

    fn write(&self, transport: &dyn GattTransport, command: &Command) -> Result<()> {
        let text = command.encode()?;
        let target = self.session.control_input()?;
        debug!("Writing command {:?}", text);
        transport
            .write(target, text.into_bytes())
            .map_err(|e| ControllerError::Transport(e.to_string()))
    }

    fn bound_attribute(&self, attribute: Result<Uuid>) -> Result<Uuid> {
        if self.session.state() != ConnectionState::ServicesBound {
            return Err(ControllerError::NotBound);
        }
        attribute
    }
}

/// The boundary object the front end talks to.
pub struct Controller {
    inner: Arc<Mutex<Inner>>,
    transport: Arc<dyn GattTransport>,
    settings: ControllerSettings,
    pump: JoinHandle<()>,
}

impl Controller {
    /// Create a controller and start pumping `transport_rx`.
    ///
    /// Returns the controller and the receiver for its events.
    pub fn start(
        transport: Arc<dyn GattTransport>,
        transport_rx: mpsc::UnboundedReceiver<LinkEvent>,
        settings: ControllerSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Mutex::new(Inner {
            session: Session::new(settings.binder),
            countdown: Countdown::new(event_tx.clone()),
            countdown_intent: None,
            event_tx,
        }));

        info!("Controller started on {} transport", transport.backend_name());

        let pump = tokio::spawn(Self::pump(
            inner.clone(),
            transport.clone(),
            settings,
            transport_rx,
        ));

        (
            Self {
                inner,
                transport,
                settings,
                pump,
            },
            event_rx,
        )
    }

    async fn pump(
        inner: Arc<Mutex<Inner>>,
        transport: Arc<dyn GattTransport>,
        settings: ControllerSettings,
        mut transport_rx: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        debug!("Transport event loop started");
        while let Some(event) = transport_rx.recv().await {
            debug!("Transport event: {:?}", event);
            let mut inner = inner.lock();
            let transition = inner.session.handle_link(event);
            // Failures are logged and settled inside apply.
            let _ = inner.apply(transport.as_ref(), &settings, transition);
        }
        info!("Transport event loop exited");
    }

    /// Connect to the peripheral at `address`.
    ///
    /// If the transport refuses the request the session is back in
    /// `Disconnected` when this returns.
    pub fn connect(&self, address: &str) -> Result<()> {
        let address: PeripheralAddress = address.parse()?;
        let mut inner = self.inner.lock();
        let transition = inner
            .session
            .connect(address, self.transport.adapter_available())?;
        inner.apply(self.transport.as_ref(), &self.settings, transition)
    }

    /// Request disconnection; completion arrives as `Disconnected`.
    ///
    /// A refused request closes the session immediately instead.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        let transition = inner.session.disconnect();
        let _ = inner.apply(self.transport.as_ref(), &self.settings, transition);
    }

    /// Encode and write a command to the control input.
    pub fn write_command(&self, command: &Command) -> Result<()> {
        self.inner.lock().write(self.transport.as_ref(), command)
    }

    /// Send a timed command; the countdown starts once the peripheral acknowledges.
    pub fn start_countdown(&self, minutes: u8) -> Result<()> {
        if minutes == 0 {
            return Err(ControllerError::InvalidCommand(
                "use stop_countdown to send a zero timer".to_string(),
            ));
        }
        let command = Command {
            timer_minutes: minutes,
            ..self.settings.command
        };

        let mut inner = self.inner.lock();
        command.validate()?;
        inner.countdown.cancel();
        inner.countdown_intent = None;
        inner.write(self.transport.as_ref(), &command)?;
        inner.countdown_intent = Some(u32::from(minutes) * 60);
        info!("Requested {} minute countdown", minutes);
        Ok(())
    }

    /// Cancel the local countdown and tell the peripheral to stop.
    ///
    /// The local countdown is cancelled even when the write is rejected.
    pub fn stop_countdown(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.countdown_intent = None;
        inner.countdown.cancel();
        inner.write(self.transport.as_ref(), &self.settings.command.stop())
    }

    /// Request a read of the timer value attribute.
    pub fn read_timer_value(&self) -> Result<()> {
        let inner = self.inner.lock();
        let uuid = inner.bound_attribute(inner.session.timer_value())?;
        self.transport
            .read(uuid)
            .map_err(|e| ControllerError::Transport(e.to_string()))
    }

    /// Enable or disable acknowledgement notifications.
    pub fn set_ack_notifications(&self, enabled: bool) -> Result<()> {
        let inner = self.inner.lock();
        let uuid = inner.bound_attribute(inner.session.control_ack())?;
        self.transport
            .set_notify(uuid, enabled)
            .map_err(|e| ControllerError::Transport(e.to_string()))
    }

    /// Attribute table of the bound peripheral.
    pub fn supported_attributes(&self) -> Option<AttributeTable> {
        self.inner.lock().session.supported_attributes().cloned()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().session.state()
    }

    pub fn countdown_running(&self) -> bool {
        self.inner.lock().countdown.is_running()
    }

    pub fn countdown_remaining(&self) -> u32 {
        self.inner.lock().countdown.remaining()
    }

    /// Release the transport handle. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        let transition = inner.session.close();
        let _ = inner.apply(self.transport.as_ref(), &self.settings, transition);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.close();
        self.pump.abort();
    }
}
