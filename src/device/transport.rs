use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::device::types::{Advertisement, DeviceId};
use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    pub uuid: Uuid,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCharacteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub readable: bool,
    pub writable: bool,
}

/**
 * The BLE central operations the scanner and the handshake need. Every method is a
 * suspension point; implementations must not block.
 */
#[async_trait]
pub trait Transport: Send + Sync {
    /**
     * Start scanning and return the stream of advertisements seen from now on.
     */
    async fn start_scan(&self) -> Result<BoxStream<'static, Advertisement>, DeviceError>;

    async fn stop_scan(&self) -> Result<(), DeviceError>;

    async fn connect(&self, device: &DeviceId) -> Result<(), DeviceError>;

    /**
     * Drop the link to `device`. Disconnecting a device that is not connected succeeds.
     */
    async fn disconnect(&self, device: &DeviceId) -> Result<(), DeviceError>;

    async fn connected_devices(&self) -> Result<Vec<DeviceId>, DeviceError>;

    async fn services(&self, device: &DeviceId) -> Result<Vec<RemoteService>, DeviceError>;

    async fn service(&self, device: &DeviceId, uuid: &Uuid) -> Result<Option<RemoteService>, DeviceError> {
        let services = self.services(device).await?;
        Ok(services.into_iter().find(|service| service.uuid == *uuid))
    }

    async fn characteristics(&self, device: &DeviceId, service: &RemoteService) -> Result<Vec<RemoteCharacteristic>, DeviceError>;

    async fn read(&self, device: &DeviceId, characteristic: &RemoteCharacteristic) -> Result<Vec<u8>, DeviceError>;

    async fn write(&self, device: &DeviceId, characteristic: &RemoteCharacteristic, data: &[u8]) -> Result<(), DeviceError>;
}
