use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::future::join_all;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use tokio::time::timeout;

use crate::config::types::HandshakeConfig;
use crate::device::constants::{PROGRESS_CHARACTERISTICS, PROGRESS_PRIMARY_SERVICE};
use crate::device::events::EventSink;
use crate::device::protocol::{CharacteristicMap, Connection, ProtocolInitializer, ProtocolLink};
use crate::device::scanner::DiscoveryScanner;
use crate::device::transport::{RemoteService, Transport};
use crate::device::types::{DeviceEvent, DeviceId, DiscoveredDevice, HandshakeState};
use crate::device::uuids::{device_info_label, UuidRegistry};
use crate::error::{DeviceError, HandshakeError};

#[derive(Debug)]
enum Step {
    SelectDevice,
    StopScan {
        device: DiscoveredDevice,
    },
    Connect {
        device: DiscoveredDevice,
    },
    VerifyConnected {
        device: DiscoveredDevice,
    },
    ResolvePrimaryService {
        device: DiscoveredDevice,
    },
    EnumerateCharacteristics {
        device: DiscoveredDevice,
        service: RemoteService,
    },
    EnumerateSecondaryServices {
        device: DiscoveredDevice,
        characteristics: CharacteristicMap,
    },
    InitializeProtocol {
        device: DiscoveredDevice,
        characteristics: CharacteristicMap,
    },
    Ready(Connection),
}

impl Step {
    fn state(&self) -> HandshakeState {
        match self {
            Step::SelectDevice => HandshakeState::SelectDevice,
            Step::StopScan { .. } => HandshakeState::StopScan,
            Step::Connect { .. } => HandshakeState::Connect,
            Step::VerifyConnected { .. } => HandshakeState::VerifyConnected,
            Step::ResolvePrimaryService { .. } => HandshakeState::ResolvePrimaryService,
            Step::EnumerateCharacteristics { .. } => HandshakeState::EnumerateCharacteristics,
            Step::EnumerateSecondaryServices { .. } => HandshakeState::EnumerateSecondaryServices,
            Step::InitializeProtocol { .. } => HandshakeState::InitializeProtocol,
            Step::Ready(_) => HandshakeState::Ready,
        }
    }
}

/**
 * Walks a selected device from "seen in a scan" to "protocol initialized". Steps run
 * strictly in order; the first failing step ends the handshake.
 */
pub struct Handshake<'a> {
    transport: Arc<dyn Transport>,
    registry: &'a UuidRegistry,
    scanner: &'a DiscoveryScanner,
    events: &'a EventSink,
    config: &'a HandshakeConfig,
}

impl<'a> Handshake<'a> {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: &'a UuidRegistry,
        scanner: &'a DiscoveryScanner,
        events: &'a EventSink,
        config: &'a HandshakeConfig,
    ) -> Self {
        Handshake { transport, registry, scanner, events, config }
    }

    /**
     * Runs every step. The terminal Ready/Failed state is left to the caller to announce.
     * A handshake that fails once the connect attempt was made disconnects the device
     * again.
     */
    pub async fn run(&self, selected: Option<DiscoveredDevice>, initializer: &mut dyn ProtocolInitializer) -> Result<Connection, HandshakeError> {
        let mut step = Step::SelectDevice;
        let mut selected = selected;
        let mut linked: Option<DeviceId> = None;

        loop {
            if let Step::Ready(connection) = step {
                return Ok(connection);
            }

            self.events.emit(DeviceEvent::Handshake(step.state()));
            if let Step::Connect { device } = &step {
                linked = Some(device.id.clone());
            }

            step = match step {
                Step::SelectDevice => match selected.take() {
                    Some(device) => Step::StopScan { device },
                    None => return Err(HandshakeError::NoSelection),
                },
                step => match self.advance(step, initializer).await {
                    Ok(next) => next,
                    Err(err) => {
                        if let Some(device) = &linked {
                            self.release(device).await;
                        }
                        return Err(err);
                    },
                },
            };
        }
    }

    async fn release(&self, device: &DeviceId) {
        if let Err(err) = self.transport.disconnect(device).await {
            warn!("Failed to disconnect {} after a failed handshake: {}", device, err);
        }
    }

    async fn advance(&self, step: Step, initializer: &mut dyn ProtocolInitializer) -> Result<Step, HandshakeError> {
        match step {
            Step::StopScan { device } => {
                // connecting while scanning is known to upset some stacks (GATT error 133)
                if let Err(err) = self.scanner.stop_scan().await {
                    warn!("Failed to stop scan before connecting: {}", err);
                }
                Ok(Step::Connect { device })
            },
            Step::Connect { device } => {
                info!("attempting connection to {}", device.name);
                let result = self.bounded("connect", self.transport.connect(&device.id)).await;
                if let Err(source) = result {
                    return Err(HandshakeError::ConnectFailed { name: device.name.clone(), source });
                }
                Ok(Step::VerifyConnected { device })
            },
            Step::VerifyConnected { device } => {
                let connected = self.bounded("connected devices", self.transport.connected_devices()).await
                    .map_err(|source| HandshakeError::ConnectFailed { name: device.name.clone(), source })?;

                if !connected.contains(&device.id) {
                    return Err(HandshakeError::NotConnected { name: device.name.clone() });
                }

                info!("successfully connected to {}", device.name);
                Ok(Step::ResolvePrimaryService { device })
            },
            Step::ResolvePrimaryService { device } => {
                let uuid = self.registry.primary_service();
                debug!("connecting to primary service {}", uuid);

                let service = self.bounded("primary service", self.transport.service(&device.id, &uuid)).await?
                    .ok_or(HandshakeError::MissingPrimaryService { uuid })?;

                debug!("found primary service {}", service.uuid);
                self.events.progress(PROGRESS_PRIMARY_SERVICE);
                Ok(Step::EnumerateCharacteristics { device, service })
            },
            Step::EnumerateCharacteristics { device, service } => {
                debug!("reading characteristics of service {}", service.uuid);
                let remote = self.bounded("characteristics", self.transport.characteristics(&device.id, &service)).await?;

                let mut characteristics = CharacteristicMap::new();
                for characteristic in remote {
                    match self.registry.lookup(&characteristic.uuid) {
                        Some(name) => {
                            if characteristics.insert(name, characteristic).is_some() {
                                warn!("characteristic {} reported twice", name);
                            }
                        },
                        None => warn!("ignoring unrecognized characteristic {}", characteristic.uuid),
                    }
                }

                debug!("Registered characteristics:");
                for (name, characteristic) in characteristics.iter() {
                    debug!("  {} {}", characteristic.uuid, name);
                }

                let missing = characteristics.missing(&initializer.required());
                if !missing.is_empty() {
                    return Err(HandshakeError::MissingCharacteristics { names: missing });
                }

                self.events.progress(PROGRESS_CHARACTERISTICS);
                Ok(Step::EnumerateSecondaryServices { device, characteristics })
            },
            Step::EnumerateSecondaryServices { mut device, characteristics } => {
                debug!("polling device for other services");
                let deadline = Duration::from_millis(self.config.device_info_timeout_ms);
                let info = Mutex::new(IndexMap::new());

                if timeout(deadline, self.read_device_info(&device, &info)).await.is_err() {
                    warn!("Reading device information took too long, keeping what was read so far");
                }

                device.info.extend(info.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()));

                Ok(Step::InitializeProtocol { device, characteristics })
            },
            Step::InitializeProtocol { device, characteristics } => {
                debug!("initializing spectrometer");
                let characteristics = Arc::new(characteristics);
                let link = ProtocolLink {
                    transport: self.transport.clone(),
                    device: device.id.clone(),
                    characteristics: characteristics.clone(),
                };

                initializer.initialize(link, self.events).await?;
                Ok(Step::Ready(Connection { device, characteristics }))
            },
            Step::SelectDevice => Err(HandshakeError::NoSelection),
            Step::Ready(connection) => Ok(Step::Ready(connection)),
        }
    }

    /**
     * Reads every readable characteristic of the non-primary services into `info`, one
     * value at a time, so whatever was read survives a deadline. Failures are logged
     * and skipped.
     */
    async fn read_device_info(&self, device: &DiscoveredDevice, info: &Mutex<IndexMap<String, String>>) {
        let primary = self.registry.primary_service();
        let services = match self.transport.services(&device.id).await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to list services: {}", err);
                return;
            },
        };

        let secondary = services.into_iter().filter(|service| service.uuid != primary);
        join_all(secondary.map(|service| self.read_service_info(device, service, info))).await;
    }

    async fn read_service_info(&self, device: &DiscoveredDevice, service: RemoteService, info: &Mutex<IndexMap<String, String>>) {
        debug!("examining service {}", service.uuid);
        let characteristics = match self.transport.characteristics(&device.id, &service).await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to read characteristics of service {}: {}", service.uuid, err);
                return;
            },
        };

        for characteristic in characteristics.iter().filter(|c| c.readable) {
            match self.transport.read(&device.id, characteristic).await {
                Ok(value) => {
                    let name = device_info_label(&characteristic.uuid)
                        .map(str::to_string)
                        .unwrap_or_else(|| characteristic.uuid.to_string());
                    let value = to_ascii(&value);
                    debug!("  storing {} = {}", name, value);
                    info.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(name, value);
                },
                Err(err) => warn!("Failed to read {}: {}", characteristic.uuid, err),
            }
        }
    }

    async fn bounded<T>(&self, step: &'static str, fut: impl Future<Output = Result<T, DeviceError>>) -> Result<T, DeviceError> {
        let millis = match self.config.step_timeout_ms {
            None => return fut.await,
            Some(millis) => millis,
        };

        match timeout(Duration::from_millis(millis), fut).await {
            Ok(result) => result,
            Err(_) => {
                error!("{} took too long", step);
                Err(DeviceError::Timeout { step, millis })
            },
        }
    }
}

/**
 * Printable ASCII up to the first NUL; anything else becomes '.'.
 */
pub fn to_ascii(value: &[u8]) -> String {
    value.iter()
        .take_while(|b| **b != 0)
        .map(|b| if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' })
        .collect()
}
