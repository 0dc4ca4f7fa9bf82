use std::fmt;
use indexmap::IndexMap;

use crate::telemetry::battery::BatteryReading;

/**
 * Platform handle of a peripheral, stable for the lifetime of the adapter.
 */
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/**
 * One advertisement sighting, as reported by the transport while scanning.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: DeviceId,
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub address: String,
    pub name: String,
    pub rssi: Option<i16>,
    /// UI highlight only.
    pub selected: bool,
    /// Free-form properties read from the informational services after connecting.
    pub info: IndexMap<String, String>,
}

impl DiscoveredDevice {
    pub fn new(id: DeviceId, address: String, name: String, rssi: Option<i16>) -> Self {
        DiscoveredDevice {
            id,
            address,
            name,
            rssi,
            selected: false,
            info: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    SelectDevice,
    StopScan,
    Connect,
    VerifyConnected,
    ResolvePrimaryService,
    EnumerateCharacteristics,
    EnumerateSecondaryServices,
    InitializeProtocol,
    Ready,
    Failed,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Ready | HandshakeState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    ScanState(ScanState),
    DeviceDiscovered(DiscoveredDevice),
    Handshake(HandshakeState),
    Progress(f32), // [0, 1]
    ConnectAvailable(bool),
    Ready { name: String },
    Failed { message: String },
    Battery(BatteryReading),
}
