use std::fmt;
use log::debug;

use crate::device::constants::{LOW_BATTERY_LEVEL, WARN_BATTERY_LEVEL};
use crate::telemetry::FixedLayout;

/**
 * Decoded `batteryStatus` payload.
 *
 * Layout (2 bytes): byte 0 is the level in percent, byte 1 is a state bitfield where
 * bit 0 means charging.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryReading {
    pub level: u8,
    pub charging: bool,
    raw: u16,
}

impl BatteryReading {
    pub fn percent(&self) -> f64 {
        f64::from(self.level)
    }

    /// The laser must not be enabled while this is true.
    pub fn is_low(&self) -> bool {
        self.level < LOW_BATTERY_LEVEL
    }

    pub fn is_warning(&self) -> bool {
        self.level <= WARN_BATTERY_LEVEL
    }

    pub fn raw(&self) -> u16 {
        self.raw
    }
}

impl FixedLayout for BatteryReading {
    const NAME: &'static str = "Battery";
    const LEN: usize = 2;

    fn from_fixed(bytes: &[u8]) -> Self {
        let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
        let level = (raw >> 8) as u8;
        let state = (raw & 0xff) as u8;

        debug!("Battery: raw 0x{:04x} (lvl {}, st 0x{:02x})", raw, level, state);

        BatteryReading {
            level,
            charging: state & 1 == 1,
            raw,
        }
    }
}

impl fmt::Display for BatteryReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Battery {} ({}%)",
            if self.charging { "charging" } else { "discharging" },
            self.percent().round() as i64
        )
    }
}
