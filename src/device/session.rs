use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use futures::channel::mpsc::UnboundedReceiver;
use log::{error, info, warn};

use crate::config::types::{Config, HandshakeConfig};
use crate::device::events::EventSink;
use crate::device::handshake::Handshake;
use crate::device::protocol::{Connection, ProtocolInitializer};
use crate::device::scanner::DiscoveryScanner;
use crate::device::transport::Transport;
use crate::device::types::{DeviceEvent, DeviceId, DiscoveredDevice, HandshakeState};
use crate::device::uuids::{CharacteristicName, UuidRegistry};
use crate::error::{HandshakeError, ScanError};
use crate::permission::{Capability, PermissionGate, PermissionProvider};

/**
 * Clears the in-flight flag however the handshake ends.
 */
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/**
 * The one spectrometer session of the application: scanning, the selected device and
 * at most one live connection.
 */
pub struct Session {
    transport: Arc<dyn Transport>,
    registry: UuidRegistry,
    events: EventSink,
    handshake_config: HandshakeConfig,
    scanner: DiscoveryScanner,
    selected: Mutex<Option<DeviceId>>,
    connection: RwLock<Option<Arc<Connection>>>,
    in_flight: AtomicBool,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: &Config, events: EventSink) -> Self {
        let scanner = DiscoveryScanner::new(transport.clone(), events.clone(), config.scan.name_filters.clone());

        Session {
            transport,
            registry: UuidRegistry::new(),
            events,
            handshake_config: config.handshake.clone(),
            scanner,
            selected: Mutex::new(None),
            connection: RwLock::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &UuidRegistry {
        &self.registry
    }

    pub fn scanner(&self) -> &DiscoveryScanner {
        &self.scanner
    }

    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.scanner.devices()
    }

    /**
     * Checks `capabilities` and starts a scan. A scan that is already running is left
     * alone; scanning during a handshake is refused.
     */
    pub async fn scan<P: PermissionProvider>(&self, gate: &PermissionGate<P>, capabilities: &[Capability]) -> Result<(), ScanError> {
        if self.is_connecting() {
            warn!("scan requested while a handshake is in progress");
            return Err(ScanError::Busy);
        }

        if let Err(capability) = gate.ensure_all(capabilities).await {
            error!("can't obtain {} permission", capability);
            return Err(ScanError::PermissionDenied { capability });
        }

        self.lock_selected().take();
        match self.scanner.start_scan().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_permission_denied() => {
                warn!("Scanning failed {:?}", err);
                Err(ScanError::PermissionDenied { capability: Capability::Bluetooth })
            },
            Err(err) => {
                error!("caught exception during scan: {}", err);
                Err(ScanError::Device { source: err })
            },
        }
    }

    pub async fn stop_scan(&self) -> Result<(), ScanError> {
        Ok(self.scanner.stop_scan().await?)
    }

    /**
     * Selects a device from the current scan results; None clears the selection.
     */
    pub fn select_device(&self, id: Option<&DeviceId>) -> Option<DiscoveredDevice> {
        let device = match id {
            Some(id) => self.scanner.select(id),
            None => {
                self.scanner.clear_selection();
                None
            },
        };

        *self.lock_selected() = device.as_ref().map(|device| device.id.clone());
        if let Some(device) = &device {
            info!("selected device {}", device.name);
        }
        self.events.emit(DeviceEvent::ConnectAvailable(device.is_some() && !self.is_connecting()));
        device
    }

    pub fn selected_device(&self) -> Option<DiscoveredDevice> {
        let selected = self.lock_selected().clone();
        selected.and_then(|id| self.scanner.find(&id))
    }

    pub fn is_connecting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /**
     * Runs the handshake against the selected device. Rejected with `InProgress` while
     * another handshake is running; otherwise replaces any previous connection.
     */
    pub async fn connect(&self, initializer: &mut dyn ProtocolInitializer) -> Result<Arc<Connection>, HandshakeError> {
        let _in_flight = match InFlight::acquire(&self.in_flight) {
            Some(guard) => guard,
            None => {
                warn!("connect requested while a handshake is in progress");
                return Err(HandshakeError::InProgress);
            },
        };

        self.reset().await;
        self.events.progress(0.0);
        self.events.emit(DeviceEvent::ConnectAvailable(false));

        let handshake = Handshake::new(
            self.transport.clone(),
            &self.registry,
            &self.scanner,
            &self.events,
            &self.handshake_config,
        );
        let result = handshake.run(self.selected_device(), initializer).await;

        let result = match result {
            Ok(connection) => {
                let connection = Arc::new(connection);
                *self.write_connection() = Some(connection.clone());
                self.events.emit(DeviceEvent::Handshake(HandshakeState::Ready));
                self.events.emit(DeviceEvent::Ready { name: connection.device.name.clone() });
                Ok(connection)
            },
            Err(err) => {
                error!("{}", err);
                self.events.emit(DeviceEvent::Handshake(HandshakeState::Failed));
                self.events.emit(DeviceEvent::Failed { message: err.to_string() });
                Err(err)
            },
        };

        self.events.progress(0.0);
        self.events.emit(DeviceEvent::ConnectAvailable(true));
        result
    }

    /**
     * Read-only snapshot of the current connection.
     */
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn has_characteristic(&self, name: CharacteristicName) -> bool {
        self.connection()
            .map(|connection| connection.characteristics.contains(name))
            .unwrap_or(false)
    }

    /**
     * Drops the current connection and disconnects its device.
     */
    pub async fn reset(&self) {
        let previous = self.write_connection().take();

        if let Some(connection) = previous {
            info!("disconnecting from {}", connection.device.name);
            if let Err(err) = self.transport.disconnect(&connection.device.id).await {
                warn!("Failed to disconnect {}: {}", connection.device.name, err);
            }
        }
    }

    fn write_connection(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<Connection>>> {
        self.connection.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_selected(&self) -> std::sync::MutexGuard<'_, Option<DeviceId>> {
        self.selected.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
