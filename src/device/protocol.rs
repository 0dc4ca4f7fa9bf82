use std::sync::Arc;
use async_trait::async_trait;
use indexmap::IndexMap;

use crate::device::events::EventSink;
use crate::device::transport::{RemoteCharacteristic, Transport};
use crate::device::types::{DeviceId, DiscoveredDevice};
use crate::device::uuids::CharacteristicName;
use crate::error::SpectrometerError;

/**
 * Characteristics of the primary service that matched the registry, by logical name.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacteristicMap {
    entries: IndexMap<CharacteristicName, RemoteCharacteristic>,
}

impl CharacteristicMap {
    pub fn new() -> Self {
        CharacteristicMap::default()
    }

    pub fn insert(&mut self, name: CharacteristicName, characteristic: RemoteCharacteristic) -> Option<RemoteCharacteristic> {
        self.entries.insert(name, characteristic)
    }

    pub fn get(&self, name: CharacteristicName) -> Option<&RemoteCharacteristic> {
        self.entries.get(&name)
    }

    pub fn contains(&self, name: CharacteristicName) -> bool {
        self.entries.contains_key(&name)
    }

    pub fn missing(&self, required: &[CharacteristicName]) -> Vec<CharacteristicName> {
        required.iter().copied().filter(|name| !self.contains(*name)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CharacteristicName, &RemoteCharacteristic)> {
        self.entries.iter().map(|(name, characteristic)| (*name, characteristic))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/**
 * A device that completed the handshake.
 */
#[derive(Debug, Clone)]
pub struct Connection {
    pub device: DiscoveredDevice,
    pub characteristics: Arc<CharacteristicMap>,
}

/**
 * What a protocol initializer gets to talk to the device with.
 */
#[derive(Clone)]
pub struct ProtocolLink {
    pub transport: Arc<dyn Transport>,
    pub device: DeviceId,
    pub characteristics: Arc<CharacteristicMap>,
}

impl ProtocolLink {
    fn characteristic(&self, name: CharacteristicName) -> Result<&RemoteCharacteristic, SpectrometerError> {
        self.characteristics.get(name).ok_or(SpectrometerError::MissingCharacteristic(name))
    }

    pub async fn read(&self, name: CharacteristicName) -> Result<Vec<u8>, SpectrometerError> {
        let characteristic = self.characteristic(name)?;
        Ok(self.transport.read(&self.device, characteristic).await?)
    }

    pub async fn write(&self, name: CharacteristicName, data: &[u8]) -> Result<(), SpectrometerError> {
        let characteristic = self.characteristic(name)?;
        self.transport.write(&self.device, characteristic, data).await?;
        Ok(())
    }
}

/**
 * The last step of the handshake: turns the resolved characteristics into a usable
 * device.
 */
#[async_trait]
pub trait ProtocolInitializer: Send {
    /// Characteristics that must have been resolved before `initialize` may run.
    fn required(&self) -> Vec<CharacteristicName>;

    /// `progress` should be advanced from its current checkpoint towards 1.0.
    async fn initialize(&mut self, link: ProtocolLink, progress: &EventSink) -> Result<(), SpectrometerError>;
}
