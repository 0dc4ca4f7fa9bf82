use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;
use uuid::Uuid;

use crate::device::types::DeviceId;
use crate::device::uuids::CharacteristicName;
use crate::permission::Capability;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to initialize logging: {message}")]
    Logging { message: String },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Bluetooth failure: {source}")]
    Device { #[from] source: DeviceError },

    #[error("Failed to start async runtime: {source}")]
    Runtime { #[from] source: io::Error },

    #[error("{source}")]
    Scan { #[from] source: ScanError },

    #[error("No spectrometer matching {query:?} was discovered")]
    DeviceNotFound { query: String },

    #[error("{source}")]
    Handshake { #[from] source: HandshakeError },

    #[error("{source}")]
    Decode { #[from] source: DecodeError },

    #[error("{source}")]
    Spectrometer { #[from] source: SpectrometerError },

    #[error("Invalid hex payload {input:?}")]
    InvalidHex { input: String },

    #[error("Invalid {name} {value:?}")]
    InvalidSetting { name: &'static str, value: String },
}

/**
 * Failures of the underlying BLE transport.
 */
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    AdapterUnavailable,

    #[error("Device {0} was not seen by this adapter")]
    UnknownDevice(DeviceId),

    #[error("Characteristic {0} is not exposed by the device")]
    UnknownCharacteristic(Uuid),

    #[error("{step} took longer than {millis} ms")]
    Timeout { step: &'static str, millis: u64 },

    #[error("{0}")]
    Other(String),
}

impl DeviceError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DeviceError::Btle { source: btleplug::Error::PermissionDenied })
    }
}

/**
 * A fixed-layout characteristic payload could not be decoded.
 */
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{name}: no response")]
    Missing { name: &'static str },

    #[error("{name}: invalid response (expected {expected} bytes, got {actual})")]
    Length { name: &'static str, expected: usize, actual: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PermissionError(pub String);

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Can't obtain {capability} permission")]
    PermissionDenied { capability: Capability },

    #[error("Can't scan while a connection attempt is in progress")]
    Busy,

    #[error("Scan failed: {source}")]
    Device { #[from] source: DeviceError },
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("must select a device before connecting")]
    NoSelection,

    #[error("a connection attempt is already in progress")]
    InProgress,

    #[error("exception connecting to {name} ({source})")]
    ConnectFailed { name: String, #[source] source: DeviceError },

    #[error("failed connection to {name}")]
    NotConnected { name: String },

    #[error("did not find primary service {uuid}")]
    MissingPrimaryService { uuid: Uuid },

    #[error("missing required characteristics: {}", format_names(.names))]
    MissingCharacteristics { names: Vec<CharacteristicName> },

    #[error("Error communicating with device: {source}")]
    Transport { #[from] source: DeviceError },

    #[error("failed to initialize protocol: {source}")]
    Initialize { #[from] source: SpectrometerError },
}

impl HandshakeError {
    /**
     * Protocol mismatches need a fresh connect attempt against a different device or
     * firmware; everything else may succeed on a plain retry.
     */
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            HandshakeError::MissingPrimaryService { .. } | HandshakeError::MissingCharacteristics { .. }
        )
    }
}

fn format_names(names: &[CharacteristicName]) -> String {
    names.iter().map(|name| name.to_string()).collect::<Vec<_>>().join(", ")
}

#[derive(Error, Debug)]
pub enum SpectrometerError {
    #[error("spectrometer is not connected")]
    NotConnected,

    #[error("characteristic {0} was not resolved during the handshake")]
    MissingCharacteristic(CharacteristicName),

    #[error("laser is not available (raman mode enabled or battery low)")]
    LaserUnavailable,

    #[error("{source}")]
    Decode { #[from] source: DecodeError },

    #[error("{source}")]
    Device { #[from] source: DeviceError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_mismatch_is_not_recoverable() {
        let err = HandshakeError::MissingPrimaryService { uuid: Uuid::nil() };
        assert!(!err.is_recoverable());

        let err = HandshakeError::NotConnected { name: "SiG-290".to_string() };
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "failed connection to SiG-290");
    }

    #[test]
    fn missing_characteristics_lists_names() {
        let err = HandshakeError::MissingCharacteristics {
            names: vec![CharacteristicName::Pixels, CharacteristicName::BatteryStatus],
        };
        assert_eq!(err.to_string(), "missing required characteristics: pixels, batteryStatus");
    }
}
