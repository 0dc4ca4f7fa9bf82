use async_trait::async_trait;
use log::{debug, info};

use crate::device::constants::PROGRESS_CHARACTERISTICS;
use crate::device::events::EventSink;
use crate::device::protocol::{ProtocolInitializer, ProtocolLink};
use crate::device::types::DeviceEvent;
use crate::device::uuids::CharacteristicName;
use crate::error::SpectrometerError;
use crate::telemetry::battery::BatteryReading;
use crate::telemetry::fields::{Gain, IntegrationTime, LaserState, PixelCount};
use crate::telemetry::{Encode, FixedLayout, Latest};

const REQUIRED: [CharacteristicName; 5] = [
    CharacteristicName::Pixels,
    CharacteristicName::IntegrationTimeMs,
    CharacteristicName::GainDb,
    CharacteristicName::LaserEnable,
    CharacteristicName::BatteryStatus,
];

/**
 * Downstream protocol state of a connected spectrometer: acquisition settings, battery
 * and laser gating.
 */
#[derive(Default)]
pub struct Spectrometer {
    link: Option<ProtocolLink>,
    events: Option<EventSink>,
    pixels: Option<PixelCount>,
    integration_time: Option<IntegrationTime>,
    gain: Option<Gain>,
    battery: Latest<BatteryReading>,
    laser_enabled: bool,
    raman_mode: bool,
}

impl Spectrometer {
    pub fn new() -> Self {
        Spectrometer::default()
    }

    pub fn pixels(&self) -> Option<u16> {
        self.pixels.map(|p| p.0)
    }

    pub fn integration_time_ms(&self) -> Option<u16> {
        self.integration_time.map(|t| t.0)
    }

    pub fn gain_db(&self) -> Option<f32> {
        self.gain.map(|g| g.0)
    }

    pub fn battery(&self) -> Option<&BatteryReading> {
        self.battery.get()
    }

    pub fn laser_enabled(&self) -> bool {
        self.laser_enabled
    }

    pub fn raman_mode(&self) -> bool {
        self.raman_mode
    }

    /**
     * Raman mode controls the laser itself; while it is on, or while the battery is low
     * or has not been read yet, manual laser control is unavailable.
     */
    pub fn laser_available(&self) -> bool {
        let battery_ok = self.battery.get().map(|b| !b.is_low()).unwrap_or(false);
        let available = !self.raman_mode && battery_ok;
        if !available {
            debug!(
                "laser not available because raman mode ({}) or battery low ({:?})",
                self.raman_mode,
                self.battery.get().map(|b| b.level)
            );
        }
        available
    }

    pub fn set_raman_mode(&mut self, enabled: bool) {
        debug!("raman mode -> {}", enabled);
        self.raman_mode = enabled;
    }

    fn link(&self) -> Result<&ProtocolLink, SpectrometerError> {
        self.link.as_ref().ok_or(SpectrometerError::NotConnected)
    }

    /**
     * Reads `batteryStatus`. A malformed payload is logged and the previous reading kept;
     * only transport failures are returned as errors.
     */
    pub async fn refresh_battery(&mut self) -> Result<Option<BatteryReading>, SpectrometerError> {
        let payload = self.link()?.read(CharacteristicName::BatteryStatus).await?;

        if let Ok(reading) = self.battery.update(Some(payload.as_slice())) {
            let reading = *reading;
            if let Some(events) = &self.events {
                events.emit(DeviceEvent::Battery(reading));
            }
        }

        Ok(self.battery.get().copied())
    }

    pub async fn set_integration_time(&mut self, millis: u16) -> Result<(), SpectrometerError> {
        let value = IntegrationTime(millis);
        self.link()?.write(CharacteristicName::IntegrationTimeMs, &value.encode()).await?;
        self.integration_time = Some(value);
        Ok(())
    }

    pub async fn set_gain(&mut self, db: f32) -> Result<(), SpectrometerError> {
        let encoded = Gain(db).encode();
        self.link()?.write(CharacteristicName::GainDb, &encoded).await?;
        self.gain = Some(Gain::from_fixed(&encoded));
        Ok(())
    }

    pub async fn set_laser_enabled(&mut self, enabled: bool) -> Result<(), SpectrometerError> {
        if enabled && !self.laser_available() {
            return Err(SpectrometerError::LaserUnavailable);
        }

        self.link()?.write(CharacteristicName::LaserEnable, &LaserState(enabled).encode()).await?;
        self.laser_enabled = enabled;
        Ok(())
    }
}

async fn read<T: FixedLayout>(link: &ProtocolLink, name: CharacteristicName) -> Result<T, SpectrometerError> {
    let payload = link.read(name).await?;
    Ok(T::decode(Some(payload.as_slice()))?)
}

#[async_trait]
impl ProtocolInitializer for Spectrometer {
    fn required(&self) -> Vec<CharacteristicName> {
        REQUIRED.to_vec()
    }

    /**
     * The link is only kept once every read succeeded; a failed initialization leaves the
     * spectrometer disconnected.
     */
    async fn initialize(&mut self, link: ProtocolLink, progress: &EventSink) -> Result<(), SpectrometerError> {
        *self = Spectrometer { raman_mode: self.raman_mode, ..Spectrometer::default() };

        let steps = 4.0_f32;
        let report = |done: f32| progress.progress(PROGRESS_CHARACTERISTICS + (1.0 - PROGRESS_CHARACTERISTICS) * done / steps);

        let pixels = read::<PixelCount>(&link, CharacteristicName::Pixels).await?;
        report(1.0);

        let integration_time = read::<IntegrationTime>(&link, CharacteristicName::IntegrationTimeMs).await?;
        report(2.0);

        let gain = read::<Gain>(&link, CharacteristicName::GainDb).await?;
        report(3.0);

        let laser = read::<LaserState>(&link, CharacteristicName::LaserEnable).await?;
        let battery = link.read(CharacteristicName::BatteryStatus).await?;

        self.pixels = Some(pixels);
        self.integration_time = Some(integration_time);
        self.gain = Some(gain);
        self.laser_enabled = laser.0;
        if let Ok(reading) = self.battery.update(Some(battery.as_slice())) {
            progress.emit(DeviceEvent::Battery(*reading));
        }
        self.link = Some(link);
        self.events = Some(progress.clone());
        report(4.0);

        info!(
            "spectrometer initialized: {} pixels, {} ms, {} dB, {}",
            self.pixels().unwrap_or(0),
            self.integration_time_ms().unwrap_or(0),
            self.gain_db().unwrap_or(0.0),
            self.battery().map(|b| b.to_string()).unwrap_or("battery unknown".to_string())
        );
        Ok(())
    }
}
