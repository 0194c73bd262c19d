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

//! GATT client transport backed by BlueZ.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, Address, Device, DeviceEvent, DeviceProperty, ErrorKind};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ble_constants::link_status;
use super::binder::{AttributeTable, ServiceEntry};
use super::transport::{GattTransport, LinkEvent, LinkId, PeripheralAddress, TransportEvent};

/// How long to wait for BlueZ to resolve services.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const DISCOVERY_POLL: Duration = Duration::from_millis(200);

/// One open link.
struct Link {
    id: LinkId,
    device: Device,
    characteristics: HashMap<Uuid, Characteristic>,
    notify_tasks: HashMap<Uuid, JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    fn abort_all(&mut self) {
        for (_, task) in self.notify_tasks.drain() {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[derive(Default)]
struct Shared {
    /// Bumped on every close so late results from an old link are dropped.
    generation: u64,
    /// Id of the most recent connect request.
    last_link: LinkId,
    link: Option<Link>,
}

/// Sends events for one link, tagged with its id.
#[derive(Clone)]
struct Emitter {
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    link: LinkId,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl Emitter {
    /// Send `event` unless the link it belongs to has been closed.
    fn emit(&self, event: TransportEvent) {
        let shared = self.shared.lock();
        if shared.generation == self.generation {
            let _ = self.tx.send(LinkEvent::new(self.link, event));
        } else {
            debug!("Dropping stale transport event {:?}", event);
        }
    }

    fn disconnected(&self, status: u8) {
        self.emit(TransportEvent::Disconnected { status });
    }
}

/// Watch a connected link until it drops, then report `Disconnected`.
///
/// A watcher that cannot be opened counts as a dropped link.
async fn watch_link<S, E>(events: std::result::Result<S, E>, emitter: &Emitter)
where
    S: Stream<Item = DeviceEvent>,
    E: Display,
{
    let events = match events {
        Ok(events) => events,
        Err(e) => {
            error!("Cannot watch device events, dropping link: {}", e);
            emitter.disconnected(link_status::NORMAL);
            return;
        }
    };
    let mut events = Box::pin(events);
    while let Some(event) = events.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
            info!("Link {} lost", emitter.link);
            break;
        }
    }
    emitter.disconnected(link_status::NORMAL);
}

/// Map a BlueZ connect failure onto a link status code.
fn status_for(error: &bluer::Error) -> u8 {
    match error.kind {
        ErrorKind::ConnectionAttemptFailed => link_status::GATT_ERROR,
        ErrorKind::AuthenticationTimeout => link_status::CONNECTION_TIMEOUT,
        _ => link_status::NORMAL,
    }
}

/// BlueZ implementation of [`GattTransport`].
pub struct BluezTransport {
    _session: bluer::Session,
    adapter: Option<Adapter>,
    runtime: Handle,
    shared: Arc<Mutex<Shared>>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
}

impl BluezTransport {
    /// Open a BlueZ session and pick the default adapter.
    ///
    /// A missing or unpowerable adapter is not an error here; it shows up as
    /// `adapter_available() == false`.
    pub async fn new(event_tx: mpsc::UnboundedSender<LinkEvent>) -> Result<Self> {
        info!("Initializing BlueZ GATT client...");

        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let adapter = match Self::open_adapter(&session).await {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                warn!("No usable Bluetooth adapter: {}", e);
                None
            }
        };

        Ok(Self {
            _session: session,
            adapter,
            runtime: Handle::current(),
            shared: Arc::new(Mutex::new(Shared::default())),
            event_tx,
        })
    }

    async fn open_adapter(session: &bluer::Session) -> Result<Adapter> {
        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }
        Ok(adapter)
    }

    /// Run `work` against the current link, tracking the task on it.
    fn spawn_on_link<F, Fut>(&self, work: F) -> Result<()>
    where
        F: FnOnce(Device, Emitter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shared = self.shared.lock();
        let generation = shared.generation;
        let link = shared.link.as_mut().ok_or_else(|| anyhow!("No open link"))?;
        let emitter = Emitter {
            shared: self.shared.clone(),
            generation,
            link: link.id,
            tx: self.event_tx.clone(),
        };
        let fut = work(link.device.clone(), emitter);
        link.tasks.retain(|t| !t.is_finished());
        link.tasks.push(self.runtime.spawn(fut));
        Ok(())
    }

    fn device_for(&self, address: &PeripheralAddress) -> Result<Device> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| anyhow!("Bluetooth adapter unavailable"))?;
        let address: Address = address
            .as_str()
            .parse()
            .map_err(|e| anyhow!("Invalid address {}: {}", address, e))?;
        Ok(adapter.device(address)?)
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        let shared = self.shared.lock();
        let link = shared.link.as_ref().ok_or_else(|| anyhow!("No open link"))?;
        link.characteristics
            .get(&uuid)
            .cloned()
            .ok_or_else(|| anyhow!("Characteristic {} not discovered", uuid))
    }
}

async fn collect_services(device: &Device) -> bluer::Result<(AttributeTable, HashMap<Uuid, Characteristic>)> {
    let mut services = Vec::new();
    let mut characteristics = HashMap::new();

    for service in device.services().await? {
        let mut entry = ServiceEntry {
            uuid: service.uuid().await?,
            characteristics: Vec::new(),
        };
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            entry.characteristics.push(uuid);
            characteristics.insert(uuid, characteristic);
        }
        services.push(entry);
    }

    Ok((AttributeTable::new(services), characteristics))
}

impl GattTransport for BluezTransport {
    fn backend_name(&self) -> &'static str {
        "BlueZ"
    }

    fn adapter_available(&self) -> bool {
        self.adapter.is_some()
    }

    fn connect(&self, address: &PeripheralAddress, link: LinkId) -> Result<()> {
        let device = self.device_for(address)?;

        {
            let mut shared = self.shared.lock();
            if let Some(mut old) = shared.link.take() {
                old.abort_all();
            }
            shared.last_link = link;
            shared.link = Some(Link {
                id: link,
                device,
                characteristics: HashMap::new(),
                notify_tasks: HashMap::new(),
                tasks: Vec::new(),
            });
        }

        self.spawn_on_link(|device, emitter| async move {
            debug!("Connecting to {}", device.address());
            if let Err(e) = device.connect().await {
                warn!("Connect to {} failed: {}", device.address(), e);
                emitter.disconnected(status_for(&e));
                return;
            }
            emitter.emit(TransportEvent::Connected);
            watch_link(device.events().await, &emitter).await;
        })
    }

    fn discover_services(&self) -> Result<()> {
        self.spawn_on_link(|device, emitter| async move {
            let resolved = tokio::time::timeout(DISCOVERY_TIMEOUT, async {
                loop {
                    match device.is_services_resolved().await {
                        Ok(true) => return Ok(()),
                        Ok(false) => tokio::time::sleep(DISCOVERY_POLL).await,
                        Err(e) => return Err(e.to_string()),
                    }
                }
            })
            .await
            .unwrap_or_else(|_| Err("Timed out waiting for services".to_string()));

            let result = match resolved {
                Ok(()) => collect_services(&device).await.map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };

            let event = match result {
                Ok((table, characteristics)) => {
                    let mut guard = emitter.shared.lock();
                    if guard.generation == emitter.generation {
                        if let Some(link) = guard.link.as_mut() {
                            link.characteristics = characteristics;
                        }
                    }
                    drop(guard);
                    TransportEvent::ServicesDiscovered(Ok(table))
                }
                Err(e) => TransportEvent::ServicesDiscovered(Err(e)),
            };
            emitter.emit(event);
        })
    }

    fn read_rssi(&self) -> Result<()> {
        self.spawn_on_link(|device, emitter| async move {
            match device.rssi().await {
                Ok(Some(rssi)) => emitter.emit(TransportEvent::RemoteRssi(rssi)),
                Ok(None) => debug!("RSSI not available"),
                Err(e) => debug!("RSSI read failed: {}", e),
            }
        })
    }

    fn set_notify(&self, uuid: Uuid, enabled: bool) -> Result<()> {
        let mut shared = self.shared.lock();
        let generation = shared.generation;
        let link = shared.link.as_mut().ok_or_else(|| anyhow!("No open link"))?;

        if let Some(task) = link.notify_tasks.remove(&uuid) {
            task.abort();
        }
        if !enabled {
            debug!("Notifications disabled on {}", uuid);
            return Ok(());
        }

        let characteristic = link
            .characteristics
            .get(&uuid)
            .cloned()
            .ok_or_else(|| anyhow!("Characteristic {} not discovered", uuid))?;
        let emitter = Emitter {
            shared: self.shared.clone(),
            generation,
            link: link.id,
            tx: self.event_tx.clone(),
        };

        let task = self.runtime.spawn(async move {
            let stream = match characteristic.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to enable notifications on {}: {}", uuid, e);
                    return;
                }
            };
            debug!("Notifications enabled on {}", uuid);
            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                emitter.emit(TransportEvent::CharacteristicChanged { uuid, value });
            }
            debug!("Notification stream on {} ended", uuid);
        });
        link.notify_tasks.insert(uuid, task);
        Ok(())
    }

    fn write(&self, uuid: Uuid, value: Vec<u8>) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;
        self.spawn_on_link(|_, _| async move {
            if let Err(e) = characteristic.write(&value).await {
                error!("Write to {} failed: {}", uuid, e);
            }
        })
    }

    fn read(&self, uuid: Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;
        self.spawn_on_link(|_, emitter| async move {
            match characteristic.read().await {
                Ok(value) => emitter.emit(TransportEvent::CharacteristicRead { uuid, value }),
                Err(e) => error!("Read of {} failed: {}", uuid, e),
            }
        })
    }

    fn disconnect(&self) -> Result<()> {
        let result = self.spawn_on_link(|device, emitter| async move {
            if let Err(e) = device.disconnect().await {
                warn!("Disconnect from {} failed: {}", device.address(), e);
            }
            emitter.disconnected(link_status::NORMAL);
        });

        // No link to tear down; confirm straight away.
        if result.is_err() {
            let last_link = self.shared.lock().last_link;
            let _ = self.event_tx.send(LinkEvent::new(
                last_link,
                TransportEvent::Disconnected {
                    status: link_status::NORMAL,
                },
            ));
        }
        Ok(())
    }

    fn close(&self) {
        let mut shared = self.shared.lock();
        shared.generation += 1;
        if let Some(mut link) = shared.link.take() {
            debug!("Releasing link to {}", link.device.address());
            link.abort_all();
            let device = link.device;
            self.runtime.spawn(async move {
                if let Ok(true) = device.is_connected().await {
                    let _ = device.disconnect().await;
                }
            });
        }
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn emitter(link: LinkId) -> (Emitter, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Emitter {
            shared: Arc::new(Mutex::new(Shared::default())),
            generation: 0,
            link,
            tx,
        };
        (emitter, rx)
    }

    fn disconnected(link: LinkId) -> LinkEvent {
        LinkEvent::new(
            link,
            TransportEvent::Disconnected {
                status: link_status::NORMAL,
            },
        )
    }

    #[tokio::test]
    async fn test_watcher_failure_reports_disconnect() {
        let (emitter, mut rx) = emitter(4);
        let events: std::result::Result<stream::Empty<DeviceEvent>, _> = Err("no D-Bus match");
        watch_link(events, &emitter).await;
        assert_eq!(rx.try_recv().unwrap(), disconnected(4));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watcher_reports_lost_link() {
        let (emitter, mut rx) = emitter(2);
        let events = stream::iter(vec![
            DeviceEvent::PropertyChanged(DeviceProperty::Rssi(-60)),
            DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)),
            DeviceEvent::PropertyChanged(DeviceProperty::Connected(true)),
        ]);
        watch_link(Ok::<_, String>(events), &emitter).await;
        assert_eq!(rx.try_recv().unwrap(), disconnected(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_link_emits_nothing() {
        let (emitter, mut rx) = emitter(1);
        emitter.shared.lock().generation += 1;
        emitter.emit(TransportEvent::Connected);
        assert!(rx.try_recv().is_err());
    }
}
