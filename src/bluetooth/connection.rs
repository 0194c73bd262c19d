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

//! Peripheral connection state machine.
//!
//! The session never touches the transport. Each call returns the
//! [`TransportAction`]s to issue and the [`SessionEvent`]s to publish, in
//! order, so the owner can apply them under its own lock.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ble_constants::link_status;
use super::binder::{AttributeBinder, AttributeTable, BoundAttributes};
use super::protocol::{AckKind, Notification};
use super::transport::{LinkEvent, LinkId, PeripheralAddress, TransportAction, TransportEvent};
use crate::error::{ControllerError, Result};

/// State of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link.
    Disconnected,
    /// Connect requested, waiting for the transport.
    Connecting,
    /// Link up, attributes not (yet) bound.
    Connected,
    /// Control attributes resolved; commands accepted.
    ServicesBound,
}

/// Events emitted by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    ServicesReady { is_correct_device: bool },
    DataAvailable(AckKind),
    ValueRead { uuid: Uuid, value: Vec<u8> },
}

/// Outcome of one session step.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Transition {
    pub actions: Vec<TransportAction>,
    pub events: Vec<SessionEvent>,
}

impl Transition {
    fn action(mut self, action: TransportAction) -> Self {
        self.actions.push(action);
        self
    }

    fn event(mut self, event: SessionEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// A peripheral session.
///
/// One session is reused for every connection the controller makes. The
/// address is set by [`Session::connect`] and stays fixed until the next
/// successful `connect`; each connection gets its own [`LinkId`].
#[derive(Debug)]
pub struct Session {
    binder: AttributeBinder,
    address: Option<PeripheralAddress>,
    link: LinkId,
    state: ConnectionState,
    handle_open: bool,
    table: Option<AttributeTable>,
    bound: Option<BoundAttributes>,
}

impl Session {
    /// Create a new session.
    pub fn new(binder: AttributeBinder) -> Self {
        Self {
            binder,
            address: None,
            link: 0,
            state: ConnectionState::Disconnected,
            handle_open: false,
            table: None,
            bound: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> Option<&PeripheralAddress> {
        self.address.as_ref()
    }

    /// Id of the current (or most recent) link.
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Whether the transport handle is still held.
    pub fn handle_open(&self) -> bool {
        self.handle_open
    }

    pub fn bound(&self) -> Option<&BoundAttributes> {
        self.bound.as_ref()
    }

    /// The discovered table, once attributes are bound.
    pub fn supported_attributes(&self) -> Option<&AttributeTable> {
        self.bound.as_ref().and(self.table.as_ref())
    }

    /// Write target for commands.
    pub fn control_input(&self) -> Result<Uuid> {
        match (self.state, &self.bound) {
            (ConnectionState::ServicesBound, Some(bound)) => Ok(bound.control_input),
            _ => Err(ControllerError::NotBound),
        }
    }

    pub fn control_ack(&self) -> Result<Uuid> {
        self.bound
            .and_then(|b| b.control_ack)
            .ok_or(ControllerError::NotBound)
    }

    pub fn timer_value(&self) -> Result<Uuid> {
        self.bound
            .and_then(|b| b.timer_value)
            .ok_or(ControllerError::NotBound)
    }

    /// Start connecting. Precondition failures leave the state untouched,
    /// including the address of the current connection.
    pub fn connect(
        &mut self,
        address: PeripheralAddress,
        adapter_available: bool,
    ) -> Result<Transition> {
        if !adapter_available {
            return Err(ControllerError::AdapterUnavailable);
        }
        if self.state != ConnectionState::Disconnected {
            return Err(ControllerError::InvalidState { state: self.state });
        }

        let mut transition = Transition::default();
        if self.handle_open {
            // Previous link was never released.
            warn!("Closing stale transport handle before reconnecting");
            transition = transition.action(TransportAction::Close);
        }

        self.link += 1;
        info!("Connecting to {} (link {})", address, self.link);
        self.address = Some(address.clone());
        self.state = ConnectionState::Connecting;
        self.handle_open = true;
        Ok(transition.action(TransportAction::Connect {
            address,
            link: self.link,
        }))
    }

    /// Request disconnection. The state changes when the transport confirms.
    pub fn disconnect(&mut self) -> Transition {
        if self.state == ConnectionState::Disconnected {
            debug!("Disconnect requested while already disconnected");
            return Transition::default();
        }
        info!("Disconnect requested ({:?})", self.state);
        Transition::default().action(TransportAction::Disconnect)
    }

    /// Release the transport handle. Idempotent.
    pub fn close(&mut self) -> Transition {
        let mut transition = Transition::default();
        if self.handle_open {
            transition = transition.action(TransportAction::Close);
            self.handle_open = false;
        }
        if self.state != ConnectionState::Disconnected {
            transition = transition.event(SessionEvent::Disconnected);
        }
        self.reset();
        transition
    }

    /// Fold a tagged transport callback into the session. Callbacks from
    /// an earlier link are dropped.
    pub fn handle_link(&mut self, event: LinkEvent) -> Transition {
        if event.link != self.link {
            debug!(
                "Dropping {:?} from link {} (current {})",
                event.event, event.link, self.link
            );
            return Transition::default();
        }
        self.handle(event.event)
    }

    /// Fold a transport callback into the session.
    pub fn handle(&mut self, event: TransportEvent) -> Transition {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected { status } => self.on_disconnected(status),
            TransportEvent::ServicesDiscovered(Ok(table)) => self.on_services(table),
            TransportEvent::ServicesDiscovered(Err(e)) => {
                warn!("Service discovery failed: {}", e);
                Transition::default()
            }
            TransportEvent::CharacteristicChanged { uuid, value } => {
                self.on_notification(uuid, &value)
            }
            TransportEvent::CharacteristicRead { uuid, value } => {
                if self.state == ConnectionState::ServicesBound {
                    Transition::default().event(SessionEvent::ValueRead { uuid, value })
                } else {
                    debug!("Dropping read result for {} while {:?}", uuid, self.state);
                    Transition::default()
                }
            }
            TransportEvent::RemoteRssi(rssi) => {
                debug!("Remote RSSI: {} dBm", rssi);
                Transition::default()
            }
        }
    }

    fn on_connected(&mut self) -> Transition {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                info!("Connected to {:?}", self.address);
                self.state = ConnectionState::Connected;
                Transition::default()
                    .event(SessionEvent::Connected)
                    .action(TransportAction::ReadRssi)
                    .action(TransportAction::DiscoverServices)
            }
            state => {
                warn!("Ignoring connected callback while {:?}", state);
                Transition::default()
            }
        }
    }

    fn on_disconnected(&mut self, status: u8) -> Transition {
        if self.state == ConnectionState::Disconnected && !self.handle_open {
            debug!("Duplicate disconnect callback (status {})", status);
            self.reset();
            return Transition::default();
        }

        let mut transition = Transition::default();
        if link_status::is_abnormal(status) {
            warn!("{}", ControllerError::LinkAbnormal { status });
            transition = transition.action(TransportAction::Disconnect);
        } else {
            info!("Disconnected (status {})", status);
        }

        if self.handle_open {
            transition = transition.action(TransportAction::Close);
            self.handle_open = false;
        }
        self.state = ConnectionState::Disconnected;
        self.reset();
        transition.event(SessionEvent::Disconnected)
    }

    fn on_services(&mut self, table: AttributeTable) -> Transition {
        if self.state != ConnectionState::Connected {
            warn!("Ignoring service discovery result while {:?}", self.state);
            return Transition::default();
        }

        debug!("Discovered {} services", table.services.len());
        let result = self.binder.bind(&table);
        self.table = Some(table);

        match result {
            Ok(bound) => {
                info!("HRV control service bound");
                self.bound = Some(bound);
                self.state = ConnectionState::ServicesBound;
                let mut transition = Transition::default();
                if let Some(ack) = bound.control_ack {
                    transition = transition.action(TransportAction::SetNotify {
                        uuid: ack,
                        enabled: true,
                    });
                }
                transition.event(SessionEvent::ServicesReady {
                    is_correct_device: true,
                })
            }
            Err(e) => {
                warn!("{}", e);
                Transition::default().event(SessionEvent::ServicesReady {
                    is_correct_device: false,
                })
            }
        }
    }

    fn on_notification(&mut self, uuid: Uuid, value: &[u8]) -> Transition {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::ServicesBound
        ) {
            debug!("Dropping notification from {} while {:?}", uuid, self.state);
            return Transition::default();
        }

        match Notification::classify(value) {
            Notification::Recognized(kind) => {
                info!("Acknowledgement received: {:?}", kind);
                Transition::default().event(SessionEvent::DataAvailable(kind))
            }
            unknown => {
                debug!("Ignoring notification from {}: {}", uuid, unknown);
                Transition::default()
            }
        }
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.table = None;
        self.bound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::binder::{full_table, ServiceEntry};
    use crate::bluetooth::ble_constants::{CONTROL_ACK_UUID, CONTROL_INPUT_UUID, SERVICE_UUID};

    fn address() -> PeripheralAddress {
        "24:0A:C4:12:34:56".parse().unwrap()
    }

    fn bound_session() -> Session {
        let mut session = Session::new(AttributeBinder::default());
        session.connect(address(), true).unwrap();
        session.handle(TransportEvent::Connected);
        session.handle(TransportEvent::ServicesDiscovered(Ok(full_table())));
        session
    }

    #[test]
    fn test_connect_requires_adapter() {
        let mut session = Session::new(AttributeBinder::default());
        assert_eq!(
            session.connect(address(), false),
            Err(ControllerError::AdapterUnavailable)
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.handle_open());
    }

    #[test]
    fn test_connect_only_from_disconnected() {
        let mut session = Session::new(AttributeBinder::default());
        let t = session.connect(address(), true).unwrap();
        assert_eq!(
            t.actions,
            vec![TransportAction::Connect {
                address: address(),
                link: 1
            }]
        );
        assert_eq!(session.state(), ConnectionState::Connecting);

        assert_eq!(
            session.connect(address(), true),
            Err(ControllerError::InvalidState {
                state: ConnectionState::Connecting
            })
        );
    }

    #[test]
    fn test_rejected_connect_keeps_address() {
        let mut session = Session::new(AttributeBinder::default());
        session.connect(address(), true).unwrap();
        let other: PeripheralAddress = "24:0A:C4:65:43:21".parse().unwrap();
        assert!(session.connect(other, true).is_err());
        assert_eq!(session.address(), Some(&address()));
        assert_eq!(session.link(), 1);
    }

    #[test]
    fn test_reconnect_replaces_address() {
        let mut session = Session::new(AttributeBinder::default());
        session.connect(address(), true).unwrap();
        session.handle(TransportEvent::Disconnected { status: 0 });

        let other: PeripheralAddress = "24:0A:C4:65:43:21".parse().unwrap();
        let t = session.connect(other.clone(), true).unwrap();
        assert_eq!(
            t.actions,
            vec![TransportAction::Connect {
                address: other.clone(),
                link: 2
            }]
        );
        assert_eq!(session.address(), Some(&other));
    }

    #[test]
    fn test_connected_triggers_discovery() {
        let mut session = Session::new(AttributeBinder::default());
        session.connect(address(), true).unwrap();
        let t = session.handle(TransportEvent::Connected);
        assert_eq!(t.events, vec![SessionEvent::Connected]);
        assert!(t.actions.contains(&TransportAction::DiscoverServices));
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_connected_ignored_when_disconnected() {
        let mut session = Session::new(AttributeBinder::default());
        let t = session.handle(TransportEvent::Connected);
        assert_eq!(t, Transition::default());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_full_bind() {
        let mut session = Session::new(AttributeBinder::default());
        session.connect(address(), true).unwrap();
        session.handle(TransportEvent::Connected);
        let t = session.handle(TransportEvent::ServicesDiscovered(Ok(full_table())));

        assert_eq!(
            t.events,
            vec![SessionEvent::ServicesReady {
                is_correct_device: true
            }]
        );
        assert_eq!(
            t.actions,
            vec![TransportAction::SetNotify {
                uuid: CONTROL_ACK_UUID,
                enabled: true
            }]
        );
        assert_eq!(session.state(), ConnectionState::ServicesBound);
        assert_eq!(session.control_input(), Ok(CONTROL_INPUT_UUID));
        assert!(session.supported_attributes().is_some());
    }

    #[test]
    fn test_unsupported_device_stays_connected() {
        let mut session = Session::new(AttributeBinder::default());
        session.connect(address(), true).unwrap();
        session.handle(TransportEvent::Connected);
        let table = AttributeTable::new(vec![ServiceEntry {
            uuid: SERVICE_UUID,
            characteristics: vec![CONTROL_ACK_UUID],
        }]);
        let t = session.handle(TransportEvent::ServicesDiscovered(Ok(table)));

        assert_eq!(
            t.events,
            vec![SessionEvent::ServicesReady {
                is_correct_device: false
            }]
        );
        assert!(t.actions.is_empty());
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.control_input(), Err(ControllerError::NotBound));
        assert!(session.supported_attributes().is_none());
    }

    #[test]
    fn test_discovery_failure_is_silent() {
        let mut session = Session::new(AttributeBinder::default());
        session.connect(address(), true).unwrap();
        session.handle(TransportEvent::Connected);
        let t = session.handle(TransportEvent::ServicesDiscovered(Err("timeout".into())));
        assert_eq!(t, Transition::default());
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_bind_happens_once() {
        let mut session = bound_session();
        let t = session.handle(TransportEvent::ServicesDiscovered(Ok(full_table())));
        assert_eq!(t, Transition::default());
        assert_eq!(session.state(), ConnectionState::ServicesBound);
    }

    #[test]
    fn test_disconnect_clears_binding() {
        let mut session = bound_session();
        let t = session.handle(TransportEvent::Disconnected {
            status: link_status::NORMAL,
        });
        assert_eq!(t.events, vec![SessionEvent::Disconnected]);
        assert_eq!(t.actions, vec![TransportAction::Close]);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.bound().is_none());
        assert!(session.supported_attributes().is_none());
        assert_eq!(session.control_input(), Err(ControllerError::NotBound));
        assert!(!session.handle_open());
    }

    #[test]
    fn test_abnormal_link_forces_close() {
        let mut session = bound_session();
        let t = session.handle(TransportEvent::Disconnected {
            status: link_status::GATT_ERROR,
        });
        assert_eq!(
            t.actions,
            vec![TransportAction::Disconnect, TransportAction::Close]
        );
        assert_eq!(t.events, vec![SessionEvent::Disconnected]);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connection_timeout_forces_close() {
        let mut session = bound_session();
        let t = session.handle(TransportEvent::Disconnected {
            status: link_status::CONNECTION_TIMEOUT,
        });
        assert_eq!(
            t.actions,
            vec![TransportAction::Disconnect, TransportAction::Close]
        );
        assert_eq!(t.events, vec![SessionEvent::Disconnected]);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.handle_open());
    }

    #[test]
    fn test_stale_link_events_are_dropped() {
        let mut session = Session::new(AttributeBinder::default());
        session.connect(address(), true).unwrap();
        session.handle_link(LinkEvent::new(1, TransportEvent::Connected));
        session.handle_link(LinkEvent::new(1, TransportEvent::Disconnected { status: 0 }));

        session.connect(address(), true).unwrap();
        assert_eq!(session.link(), 2);
        session.handle_link(LinkEvent::new(2, TransportEvent::Connected));

        // Late duplicate from the first link.
        let t = session.handle_link(LinkEvent::new(
            1,
            TransportEvent::Disconnected {
                status: link_status::GATT_ERROR,
            },
        ));
        assert_eq!(t, Transition::default());
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.handle_open());

        let t = session.handle_link(LinkEvent::new(2, TransportEvent::Disconnected { status: 0 }));
        assert_eq!(t.events, vec![SessionEvent::Disconnected]);
    }

    #[test]
    fn test_duplicate_disconnect_is_quiet() {
        let mut session = bound_session();
        session.handle(TransportEvent::Disconnected { status: 0 });
        let t = session.handle(TransportEvent::Disconnected { status: 0 });
        assert_eq!(t, Transition::default());
    }

    #[test]
    fn test_disconnect_request_while_connecting() {
        let mut session = Session::new(AttributeBinder::default());
        session.connect(address(), true).unwrap();
        let t = session.disconnect();
        assert_eq!(t.actions, vec![TransportAction::Disconnect]);
        // State only changes on the callback.
        assert_eq!(session.state(), ConnectionState::Connecting);

        session.handle(TransportEvent::Disconnected { status: 0 });
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.connect(address(), true).is_ok());
    }

    #[test]
    fn test_disconnect_when_idle_is_noop() {
        let mut session = Session::new(AttributeBinder::default());
        assert_eq!(session.disconnect(), Transition::default());
    }

    #[test]
    fn test_recognized_notification() {
        let mut session = bound_session();
        let t = session.handle(TransportEvent::CharacteristicChanged {
            uuid: CONTROL_ACK_UUID,
            value: b"rt2,1\r\n".to_vec(),
        });
        assert_eq!(
            t.events,
            vec![SessionEvent::DataAvailable(AckKind::CountdownStart)]
        );

        let t = session.handle(TransportEvent::CharacteristicChanged {
            uuid: CONTROL_ACK_UUID,
            value: b"garbage".to_vec(),
        });
        assert!(t.events.is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = bound_session();
        let t = session.close();
        assert_eq!(t.actions, vec![TransportAction::Close]);
        assert_eq!(t.events, vec![SessionEvent::Disconnected]);
        assert_eq!(session.close(), Transition::default());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_always_defined() {
        let events = [
            TransportEvent::Connected,
            TransportEvent::ServicesDiscovered(Ok(full_table())),
            TransportEvent::Disconnected { status: 8 },
            TransportEvent::CharacteristicChanged {
                uuid: CONTROL_ACK_UUID,
                value: b"rt2,1\r\n".to_vec(),
            },
            TransportEvent::ServicesDiscovered(Err("x".into())),
            TransportEvent::RemoteRssi(-60),
        ];
        let mut session = Session::new(AttributeBinder::default());
        for round in 0..events.len() {
            if session.state() == ConnectionState::Disconnected {
                session.connect(address(), true).unwrap();
            }
            for event in events.iter().cycle().skip(round).take(events.len()) {
                session.handle(event.clone());
                let bound = session.bound().is_some();
                assert_eq!(bound, session.state() == ConnectionState::ServicesBound);
            }
        }
    }
}
