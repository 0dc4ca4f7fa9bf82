use std::sync::{Arc, Mutex, MutexGuard};
use futures::StreamExt;
use futures::stream::BoxStream;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::events::EventSink;
use crate::device::transport::Transport;
use crate::device::types::{Advertisement, DeviceEvent, DeviceId, DiscoveredDevice, ScanState};
use crate::error::DeviceError;

type DeviceList = Arc<Mutex<Vec<DiscoveredDevice>>>;

struct ScanTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/**
 * Returns true if an advertised name looks like one of our spectrometers.
 */
pub fn accepts_name(name: Option<&str>, filters: &[String]) -> bool {
    let name = match name {
        Some(name) if !name.is_empty() => name.to_lowercase(),
        _ => return false,
    };

    filters.iter().any(|filter| name.contains(&filter.to_lowercase()))
}

/**
 * Runs BLE scans and keeps the list of spectrometers seen during the current one, in
 * discovery order.
 */
pub struct DiscoveryScanner {
    transport: Arc<dyn Transport>,
    events: EventSink,
    name_filters: Arc<Vec<String>>,
    devices: DeviceList,
    scan: tokio::sync::Mutex<Option<ScanTask>>,
}

impl DiscoveryScanner {
    pub fn new(transport: Arc<dyn Transport>, events: EventSink, name_filters: Vec<String>) -> Self {
        DiscoveryScanner {
            transport,
            events,
            name_filters: Arc::new(name_filters),
            devices: Arc::new(Mutex::new(vec![])),
            scan: tokio::sync::Mutex::new(None),
        }
    }

    /**
     * Clears the device list and starts scanning. Does nothing more if a scan is already
     * running.
     */
    pub async fn start_scan(&self) -> Result<(), DeviceError> {
        let mut scan = self.scan.lock().await;
        lock_devices(&self.devices).clear();

        if let Some(task) = scan.as_ref() {
            if !task.handle.is_finished() {
                debug!("Already scanning");
                return Ok(());
            }
        }

        info!("Starting scan");
        let advertisements = self.transport.start_scan().await?;

        let cancel = CancellationToken::new();
        let handle = scan_task(
            cancel.clone(),
            advertisements,
            self.devices.clone(),
            self.name_filters.clone(),
            self.events.clone(),
        );

        *scan = Some(ScanTask { cancel, handle });
        self.events.emit(DeviceEvent::ScanState(ScanState::Scanning));
        Ok(())
    }

    /**
     * Stops the current scan, if any. Calling this while idle is a no-op.
     */
    pub async fn stop_scan(&self) -> Result<(), DeviceError> {
        let task = match self.scan.lock().await.take() {
            Some(task) => task,
            None => return Ok(()),
        };

        info!("Stopping scan");
        task.cancel.cancel();
        if let Err(err) = task.handle.await {
            warn!("Scan task finished with an unexpected join error: {:?}", err);
        }

        let result = self.transport.stop_scan().await;
        self.events.emit(DeviceEvent::ScanState(ScanState::Idle));
        result
    }

    pub async fn is_scanning(&self) -> bool {
        match self.scan.lock().await.as_ref() {
            Some(task) => !task.handle.is_finished(),
            None => false,
        }
    }

    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        lock_devices(&self.devices).clone()
    }

    pub fn find(&self, id: &DeviceId) -> Option<DiscoveredDevice> {
        lock_devices(&self.devices).iter().find(|device| device.id == *id).cloned()
    }

    /**
     * Highlights `id` (and only `id`) in the list. Returns the device, or None if it is
     * not in the current list.
     */
    pub fn select(&self, id: &DeviceId) -> Option<DiscoveredDevice> {
        let mut devices = lock_devices(&self.devices);
        for device in devices.iter_mut() {
            device.selected = device.id == *id;
        }

        devices.iter().find(|device| device.selected).cloned()
    }

    pub fn clear_selection(&self) {
        for device in lock_devices(&self.devices).iter_mut() {
            device.selected = false;
        }
    }
}

fn lock_devices(devices: &DeviceList) -> MutexGuard<'_, Vec<DiscoveredDevice>> {
    devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn on_advertisement(advertisement: Advertisement, devices: &DeviceList, name_filters: &[String], events: &EventSink) {
    if !accepts_name(advertisement.name.as_deref(), name_filters) {
        return;
    }

    let Advertisement { id, address, name, rssi } = advertisement;
    let device = DiscoveredDevice::new(id, address, name.unwrap_or_default(), rssi);
    debug!("discovered {} (RSSI {:?} Id {})", device.name, device.rssi, device.id);

    lock_devices(devices).push(device.clone());
    events.emit(DeviceEvent::DeviceDiscovered(device));
}

fn scan_task(
    cancel: CancellationToken,
    mut advertisements: BoxStream<'static, Advertisement>,
    devices: DeviceList,
    name_filters: Arc<Vec<String>>,
    events: EventSink,
) -> JoinHandle<()> {
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                advertisement = advertisements.next() => match advertisement {
                    Some(advertisement) => on_advertisement(advertisement, &devices, &name_filters, &events),
                    None => {
                        info!("Advertisement stream has ended");
                        break 'mainloop;
                    },
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use futures::channel::mpsc::UnboundedReceiver;
    use tokio::time::timeout;
    use super::*;
    use crate::device::constants::DEFAULT_NAME_FILTERS;
    use crate::device::fake::{spectrometer_advertisement, FakeTransport};

    fn filters() -> Vec<String> {
        DEFAULT_NAME_FILTERS.iter().map(|f| f.to_string()).collect()
    }

    fn scanner(transport: Arc<FakeTransport>) -> (DiscoveryScanner, UnboundedReceiver<DeviceEvent>) {
        let events = EventSink::new();
        let rx = events.subscribe();
        (DiscoveryScanner::new(transport, events, filters()), rx)
    }

    async fn next_discovery(rx: &mut UnboundedReceiver<DeviceEvent>) -> DiscoveredDevice {
        loop {
            let event = timeout(Duration::from_secs(5), rx.next()).await.unwrap().unwrap();
            if let DeviceEvent::DeviceDiscovered(device) = event {
                return device;
            }
        }
    }

    #[test]
    fn name_filter() {
        let filters = filters();
        assert!(accepts_name(Some("SiG-290"), &filters));
        assert!(accepts_name(Some("WP-Device"), &filters));
        assert!(!accepts_name(Some("RandomBLE"), &filters));
        assert!(!accepts_name(Some(""), &filters));
        assert!(!accepts_name(None, &filters));
    }

    #[tokio::test]
    async fn keeps_matching_devices_in_discovery_order() {
        let transport = Arc::new(FakeTransport::spectrometer());
        let (scanner, mut rx) = scanner(transport.clone());

        scanner.start_scan().await.unwrap();
        assert!(scanner.is_scanning().await);

        transport.advertise(spectrometer_advertisement("01", "WP-Device"));
        transport.advertise(spectrometer_advertisement("02", "RandomBLE"));
        transport.advertise(spectrometer_advertisement("03", "SiG-290"));
        transport.advertise(spectrometer_advertisement("01", "WP-Device"));

        assert_eq!(next_discovery(&mut rx).await.name, "WP-Device");
        assert_eq!(next_discovery(&mut rx).await.name, "SiG-290");
        next_discovery(&mut rx).await;

        let names = scanner.devices().into_iter().map(|d| d.id.0).collect::<Vec<_>>();
        assert_eq!(names, vec!["01", "03", "01"]);
    }

    #[tokio::test]
    async fn second_start_is_a_no_op_but_clears_the_list() {
        let transport = Arc::new(FakeTransport::spectrometer());
        let (scanner, mut rx) = scanner(transport.clone());

        scanner.start_scan().await.unwrap();
        transport.advertise(spectrometer_advertisement("01", "SiG-290"));
        next_discovery(&mut rx).await;
        assert_eq!(scanner.devices().len(), 1);

        scanner.start_scan().await.unwrap();
        assert_eq!(transport.count("start_scan"), 1);
        assert!(scanner.devices().is_empty());
    }

    #[tokio::test]
    async fn stop_scan_is_idempotent() {
        let transport = Arc::new(FakeTransport::spectrometer());
        let (scanner, _rx) = scanner(transport.clone());

        scanner.stop_scan().await.unwrap();
        assert_eq!(transport.count("stop_scan"), 0);

        scanner.start_scan().await.unwrap();
        scanner.stop_scan().await.unwrap();
        scanner.stop_scan().await.unwrap();

        assert_eq!(transport.count("stop_scan"), 1);
        assert!(!scanner.is_scanning().await);
    }

    #[tokio::test]
    async fn missing_adapter_fails_the_scan() {
        let transport = Arc::new(FakeTransport::spectrometer().without_adapter());
        let (scanner, _rx) = scanner(transport);

        assert!(matches!(scanner.start_scan().await, Err(DeviceError::AdapterUnavailable)));
        assert!(!scanner.is_scanning().await);
    }

    #[tokio::test]
    async fn select_highlights_exactly_one_device() {
        let transport = Arc::new(FakeTransport::spectrometer());
        let (scanner, mut rx) = scanner(transport.clone());

        scanner.start_scan().await.unwrap();
        transport.advertise(spectrometer_advertisement("01", "SiG-290"));
        transport.advertise(spectrometer_advertisement("02", "WP-Device"));
        next_discovery(&mut rx).await;
        next_discovery(&mut rx).await;

        let selected = scanner.select(&DeviceId("02".to_string())).unwrap();
        assert_eq!(selected.name, "WP-Device");
        let flags = scanner.devices().into_iter().map(|d| d.selected).collect::<Vec<_>>();
        assert_eq!(flags, vec![false, true]);

        assert!(scanner.select(&DeviceId("99".to_string())).is_none());
        assert!(scanner.devices().iter().all(|d| !d.selected));
    }
}
