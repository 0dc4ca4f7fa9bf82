//! Scripted in-memory transport for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::device::transport::{RemoteCharacteristic, RemoteService, Transport};
use crate::device::types::{Advertisement, DeviceId};
use crate::device::uuids::{make_primary_service_uuid, CharacteristicName};
use crate::error::DeviceError;

pub struct FakeService {
    pub service: RemoteService,
    pub characteristics: Vec<RemoteCharacteristic>,
    pub fail: bool,
}

pub struct FakeTransport {
    calls: Mutex<Vec<String>>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    advertiser: Mutex<Option<UnboundedSender<Advertisement>>>,
    adapter_available: bool,
    connect_error: Option<String>,
    stays_disconnected: bool,
    connect_gate: Option<Arc<Notify>>,
    services: Vec<FakeService>,
    stalled_read: Option<Uuid>,
    connected: Mutex<Vec<DeviceId>>,
}

pub fn remote_characteristic(uuid: Uuid, service_uuid: Uuid) -> RemoteCharacteristic {
    RemoteCharacteristic { uuid, service_uuid, readable: true, writable: true }
}

pub fn spectrometer_advertisement(id: &str, name: &str) -> Advertisement {
    Advertisement {
        id: DeviceId(id.to_string()),
        address: format!("AA:BB:CC:DD:EE:{}", id),
        name: Some(name.to_string()),
        rssi: Some(-60),
    }
}

pub fn device_information_service() -> FakeService {
    let uuid = Uuid::parse_str("0000180a-0000-1000-8000-00805f9b34fb").unwrap();
    let manufacturer = Uuid::parse_str("00002a29-0000-1000-8000-00805f9b34fb").unwrap();
    let firmware = Uuid::parse_str("00002a26-0000-1000-8000-00805f9b34fb").unwrap();

    FakeService {
        service: RemoteService { uuid, primary: false },
        characteristics: vec![remote_characteristic(manufacturer, uuid), remote_characteristic(firmware, uuid)],
        fail: false,
    }
}

impl FakeTransport {
    /**
     * A spectrometer exposing every known characteristic plus a device information
     * service.
     */
    pub fn spectrometer() -> Self {
        let primary = make_primary_service_uuid();
        let mut characteristics = CharacteristicName::all()
            .into_iter()
            .map(|name| remote_characteristic(name.uuid(), primary))
            .collect::<Vec<_>>();
        // not part of the protocol, must be ignored
        characteristics.push(remote_characteristic(Uuid::from_u128(0x1234), primary));

        let mut values = HashMap::new();
        values.insert(CharacteristicName::Pixels.uuid(), vec![0x04, 0x00]);
        values.insert(CharacteristicName::IntegrationTimeMs.uuid(), vec![0x01, 0x90]);
        values.insert(CharacteristicName::GainDb.uuid(), vec![0x08, 0x80]);
        values.insert(CharacteristicName::LaserEnable.uuid(), vec![0x00]);
        values.insert(CharacteristicName::BatteryStatus.uuid(), vec![0x64, 0x01]);
        values.insert(Uuid::parse_str("00002a29-0000-1000-8000-00805f9b34fb").unwrap(), b"Wasatch Photonics".to_vec());
        values.insert(Uuid::parse_str("00002a26-0000-1000-8000-00805f9b34fb").unwrap(), b"1.2.3\0".to_vec());

        FakeTransport {
            calls: Mutex::new(vec![]),
            values: Mutex::new(values),
            advertiser: Mutex::new(None),
            adapter_available: true,
            connect_error: None,
            stays_disconnected: false,
            connect_gate: None,
            services: vec![
                FakeService {
                    service: RemoteService { uuid: primary, primary: true },
                    characteristics,
                    fail: false,
                },
                device_information_service(),
            ],
            stalled_read: None,
            connected: Mutex::new(vec![]),
        }
    }

    pub fn without_adapter(mut self) -> Self {
        self.adapter_available = false;
        self
    }

    pub fn failing_connect(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    pub fn staying_disconnected(mut self) -> Self {
        self.stays_disconnected = true;
        self
    }

    pub fn gated_connect(mut self, gate: Arc<Notify>) -> Self {
        self.connect_gate = Some(gate);
        self
    }

    pub fn without_primary_service(mut self) -> Self {
        self.services.retain(|s| !s.service.primary);
        self
    }

    /// Keep only the named characteristics on the primary service.
    pub fn with_characteristics(mut self, names: &[CharacteristicName]) -> Self {
        let keep = names.iter().map(|name| name.uuid()).collect::<Vec<_>>();
        for service in self.services.iter_mut().filter(|s| s.service.primary) {
            service.characteristics.retain(|c| keep.contains(&c.uuid));
        }
        self
    }

    pub fn with_broken_primary_service(mut self) -> Self {
        for service in self.services.iter_mut().filter(|s| s.service.primary) {
            service.fail = true;
        }
        self
    }

    /// Reads of `uuid` never complete.
    pub fn stalling_read(mut self, uuid: Uuid) -> Self {
        self.stalled_read = Some(uuid);
        self
    }

    pub fn with_broken_secondary_services(mut self) -> Self {
        for service in self.services.iter_mut().filter(|s| !s.service.primary) {
            service.fail = true;
        }
        self
    }

    pub fn set_value(&self, uuid: Uuid, value: Vec<u8>) {
        self.values.lock().unwrap().insert(uuid, value);
    }

    pub fn value(&self, uuid: Uuid) -> Option<Vec<u8>> {
        self.values.lock().unwrap().get(&uuid).cloned()
    }

    pub fn advertise(&self, advertisement: Advertisement) {
        if let Some(sender) = self.advertiser.lock().unwrap().as_ref() {
            sender.unbounded_send(advertisement).unwrap();
        }
    }

    pub fn connected(&self) -> Vec<DeviceId> {
        self.connected.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start_scan(&self) -> Result<BoxStream<'static, Advertisement>, DeviceError> {
        self.record("start_scan");
        if !self.adapter_available {
            return Err(DeviceError::AdapterUnavailable);
        }

        let (tx, rx) = unbounded();
        *self.advertiser.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.record("stop_scan");
        self.advertiser.lock().unwrap().take();
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<(), DeviceError> {
        self.record("connect");
        if let Some(gate) = &self.connect_gate {
            gate.notified().await;
        }
        if let Some(message) = &self.connect_error {
            return Err(DeviceError::Other(message.clone()));
        }
        if !self.stays_disconnected {
            self.connected.lock().unwrap().push(device.clone());
        }
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<(), DeviceError> {
        self.record(format!("disconnect {}", device));
        self.connected.lock().unwrap().retain(|connected| connected != device);
        Ok(())
    }

    async fn connected_devices(&self) -> Result<Vec<DeviceId>, DeviceError> {
        self.record("connected_devices");
        Ok(self.connected.lock().unwrap().clone())
    }

    async fn services(&self, _device: &DeviceId) -> Result<Vec<RemoteService>, DeviceError> {
        self.record("services");
        Ok(self.services.iter().map(|s| s.service.clone()).collect())
    }

    async fn service(&self, _device: &DeviceId, uuid: &Uuid) -> Result<Option<RemoteService>, DeviceError> {
        self.record("service");
        Ok(self.services.iter().map(|s| s.service.clone()).find(|s| s.uuid == *uuid))
    }

    async fn characteristics(&self, _device: &DeviceId, service: &RemoteService) -> Result<Vec<RemoteCharacteristic>, DeviceError> {
        let primary = if service.primary { "primary" } else { "secondary" };
        self.record(format!("characteristics {}", primary));

        let found = self.services.iter()
            .find(|s| s.service.uuid == service.uuid)
            .ok_or_else(|| DeviceError::Other("no such service".to_string()))?;
        if found.fail {
            return Err(DeviceError::Other("service went away".to_string()));
        }
        Ok(found.characteristics.clone())
    }

    async fn read(&self, _device: &DeviceId, characteristic: &RemoteCharacteristic) -> Result<Vec<u8>, DeviceError> {
        self.record(format!("read {}", characteristic.uuid));
        if self.stalled_read == Some(characteristic.uuid) {
            std::future::pending::<()>().await;
        }
        self.value(characteristic.uuid).ok_or(DeviceError::UnknownCharacteristic(characteristic.uuid))
    }

    async fn write(&self, _device: &DeviceId, characteristic: &RemoteCharacteristic, data: &[u8]) -> Result<(), DeviceError> {
        self.record(format!("write {}", characteristic.uuid));
        self.set_value(characteristic.uuid, data.to_vec());
        Ok(())
    }
}
