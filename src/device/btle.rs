use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use log::{debug, info, warn};

use crate::device::transport::{RemoteCharacteristic, RemoteService, Transport};
use crate::device::types::{Advertisement, DeviceId};
use crate::error::DeviceError;

type PeripheralTable = Arc<Mutex<HashMap<DeviceId, Peripheral>>>;
type Announced = Arc<Mutex<HashSet<DeviceId>>>;

/**
 * `Transport` backed by the first bluetooth adapter btleplug reports.
 */
pub struct BtleTransport {
    adapter: Adapter,
    peripherals: PeripheralTable,
    // devices already reported during the current scan
    announced: Announced,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::AdapterUnavailable)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        Ok(BtleTransport {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            announced: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    fn table(&self) -> MutexGuard<'_, HashMap<DeviceId, Peripheral>> {
        lock_table(&self.peripherals)
    }

    fn peripheral(&self, device: &DeviceId) -> Result<Peripheral, DeviceError> {
        self.table()
            .get(device)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownDevice(device.clone()))
    }

    fn find_characteristic(peripheral: &Peripheral, wanted: &RemoteCharacteristic) -> Result<Characteristic, DeviceError> {
        peripheral.characteristics()
            .into_iter()
            .find(|c| c.uuid == wanted.uuid && c.service_uuid == wanted.service_uuid)
            .ok_or(DeviceError::UnknownCharacteristic(wanted.uuid))
    }
}

fn lock_table(table: &PeripheralTable) -> MutexGuard<'_, HashMap<DeviceId, Peripheral>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_announced(announced: &Announced) -> MutexGuard<'_, HashSet<DeviceId>> {
    announced.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/**
 * btleplug reports only the first sighting of a peripheral as `DeviceDiscovered`; every
 * later one, including those in a later scan, arrives as `DeviceUpdated`. A scan reports
 * each device once, as soon as an advertisement carrying its name has been seen.
 */
fn first_named_sighting(announced: &mut HashSet<DeviceId>, device: &DeviceId, name: Option<&str>) -> bool {
    match name {
        Some(name) if !name.is_empty() => announced.insert(device.clone()),
        _ => false,
    }
}

fn device_id(peripheral: &Peripheral) -> DeviceId {
    DeviceId(format!("{:?}", peripheral.id()))
}

fn to_remote_characteristic(characteristic: &Characteristic) -> RemoteCharacteristic {
    RemoteCharacteristic {
        uuid: characteristic.uuid,
        service_uuid: characteristic.service_uuid,
        readable: characteristic.properties.contains(CharPropFlags::READ),
        writable: characteristic.properties.intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE),
    }
}

async fn to_advertisement(adapter: Adapter, peripherals: PeripheralTable, announced: Announced, event: CentralEvent) -> Option<Advertisement> {
    let id = match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
        _ => return None,
    };

    let peripheral = match adapter.peripheral(&id).await {
        Ok(v) => v,
        Err(err) => {
            warn!("Could not look up discovered peripheral {:?}: {}", id, err);
            return None;
        },
    };

    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => {
            debug!("Peripheral {:?} has no properties", id);
            return None;
        },
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            return None;
        },
    };

    let device = device_id(&peripheral);
    lock_table(&peripherals).insert(device.clone(), peripheral);

    if !first_named_sighting(&mut lock_announced(&announced), &device, properties.local_name.as_deref()) {
        return None;
    }

    Some(Advertisement {
        id: device,
        address: properties.address.to_string(),
        name: properties.local_name,
        rssi: properties.rssi,
    })
}

#[async_trait]
impl Transport for BtleTransport {
    async fn start_scan(&self) -> Result<BoxStream<'static, Advertisement>, DeviceError> {
        let events = self.adapter.events().await?;
        lock_announced(&self.announced).clear();
        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let announced = self.announced.clone();

        let stream = events
            .filter_map(move |event| to_advertisement(adapter.clone(), peripherals.clone(), announced.clone(), event))
            .boxed();

        Ok(stream)
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(device)?;
        peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<(), DeviceError> {
        let peripheral = match self.table().get(device).cloned() {
            Some(peripheral) => peripheral,
            None => {
                debug!("Not disconnecting {}, it was never seen", device);
                return Ok(());
            },
        };

        if peripheral.is_connected().await? {
            info!("Disconnecting {}", device);
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn connected_devices(&self) -> Result<Vec<DeviceId>, DeviceError> {
        let known = self.table().iter().map(|(id, p)| (id.clone(), p.clone())).collect::<Vec<_>>();
        let mut connected = vec![];

        for (id, peripheral) in known {
            if peripheral.is_connected().await? {
                connected.push(id);
            }
        }

        Ok(connected)
    }

    async fn services(&self, device: &DeviceId) -> Result<Vec<RemoteService>, DeviceError> {
        let peripheral = self.peripheral(device)?;
        peripheral.discover_services().await?;

        Ok(peripheral.services()
            .iter()
            .map(|service| RemoteService { uuid: service.uuid, primary: service.primary })
            .collect())
    }

    async fn characteristics(&self, device: &DeviceId, service: &RemoteService) -> Result<Vec<RemoteCharacteristic>, DeviceError> {
        let peripheral = self.peripheral(device)?;
        if peripheral.services().is_empty() {
            peripheral.discover_services().await?;
        }

        let services: Vec<Service> = peripheral.services().into_iter().collect();
        Ok(services
            .iter()
            .filter(|candidate| candidate.uuid == service.uuid)
            .flat_map(|candidate| candidate.characteristics.iter().map(to_remote_characteristic))
            .collect())
    }

    async fn read(&self, device: &DeviceId, characteristic: &RemoteCharacteristic) -> Result<Vec<u8>, DeviceError> {
        let peripheral = self.peripheral(device)?;
        let target = BtleTransport::find_characteristic(&peripheral, characteristic)?;
        Ok(peripheral.read(&target).await?)
    }

    async fn write(&self, device: &DeviceId, characteristic: &RemoteCharacteristic, data: &[u8]) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(device)?;
        let target = BtleTransport::find_characteristic(&peripheral, characteristic)?;
        peripheral.write(&target, data, WriteType::WithResponse).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_named_device_is_announced_once_per_scan() {
        let mut announced = HashSet::new();
        let device = DeviceId("01".to_string());

        // the first advertisement may lack the name
        assert!(!first_named_sighting(&mut announced, &device, None));
        assert!(!first_named_sighting(&mut announced, &device, Some("")));
        assert!(first_named_sighting(&mut announced, &device, Some("SiG-290")));
        assert!(!first_named_sighting(&mut announced, &device, Some("SiG-290")));

        // a new scan starts from an empty set
        announced.clear();
        assert!(first_named_sighting(&mut announced, &device, Some("SiG-290")));
    }
}
