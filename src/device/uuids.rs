use std::fmt;
use std::str::FromStr;
use enum_iterator::{all, Sequence};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::device::constants::{PRIMARY_SERVICE_CODE, SHORT_CODE_SHIFT, UUID_PREFIX, UUID_SUFFIX, UUID_TEMPLATE};

/**
 * Build the 128-bit identifier for a short code, e.g. `0xff09` becomes
 * `D1A7FF09-AF78-4449-A34F-4DA1AFAF51BC`.
 */
pub const fn make_uuid(short_code: u16) -> Uuid {
    Uuid::from_u128(UUID_TEMPLATE | ((short_code as u128) << SHORT_CODE_SHIFT))
}

/**
 * The textual layout the firmware uses: prefix, four hex digits, suffix.
 */
pub fn uuid_text(short_code: u16) -> String {
    format!("{}{:04X}{}", UUID_PREFIX, short_code, UUID_SUFFIX)
}

pub const fn make_primary_service_uuid() -> Uuid {
    make_uuid(PRIMARY_SERVICE_CODE)
}

/**
 * The closed vocabulary of characteristics exposed by the primary service.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Sequence)]
pub enum CharacteristicName {
    Pixels,
    IntegrationTimeMs,
    GainDb,
    LaserEnable,
    AcquireSpectrum,
    Spectrum,
    EepromCmd,
    EepromData,
    BatteryStatus,
    SpectrumRequest,
}

impl CharacteristicName {
    pub fn all() -> Vec<CharacteristicName> {
        all::<CharacteristicName>().collect::<Vec<_>>()
    }

    pub const fn short_code(self) -> u16 {
        match self {
            CharacteristicName::Pixels => 0xff01,
            CharacteristicName::IntegrationTimeMs => 0xff02,
            CharacteristicName::GainDb => 0xff03,
            CharacteristicName::LaserEnable => 0xff04,
            CharacteristicName::AcquireSpectrum => 0xff05,
            CharacteristicName::Spectrum => 0xff06,
            CharacteristicName::EepromCmd => 0xff07,
            CharacteristicName::EepromData => 0xff08,
            CharacteristicName::BatteryStatus => 0xff09,
            CharacteristicName::SpectrumRequest => 0xff0a,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CharacteristicName::Pixels => "pixels",
            CharacteristicName::IntegrationTimeMs => "integrationTimeMS",
            CharacteristicName::GainDb => "gainDb",
            CharacteristicName::LaserEnable => "laserEnable",
            CharacteristicName::AcquireSpectrum => "acquireSpectrum",
            CharacteristicName::Spectrum => "spectrum",
            CharacteristicName::EepromCmd => "eepromCmd",
            CharacteristicName::EepromData => "eepromData",
            CharacteristicName::BatteryStatus => "batteryStatus",
            CharacteristicName::SpectrumRequest => "spectrumRequest",
        }
    }

    pub const fn uuid(self) -> Uuid {
        make_uuid(self.short_code())
    }
}

impl fmt::Display for CharacteristicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCharacteristicName(pub String);

impl fmt::Display for UnknownCharacteristicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown characteristic name {:?}", self.0)
    }
}

impl std::error::Error for UnknownCharacteristicName {}

impl FromStr for CharacteristicName {
    type Err = UnknownCharacteristicName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        all::<CharacteristicName>()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownCharacteristicName(s.to_string()))
    }
}

/**
 * Logical name to UUID table, built once and then only read.
 */
#[derive(Debug, Clone)]
pub struct UuidRegistry {
    uuids: IndexMap<CharacteristicName, Uuid>,
}

impl UuidRegistry {
    pub fn new() -> Self {
        let uuids = all::<CharacteristicName>()
            .map(|name| (name, name.uuid()))
            .collect();

        UuidRegistry { uuids }
    }

    pub fn primary_service(&self) -> Uuid {
        make_primary_service_uuid()
    }

    pub fn resolve(&self, name: CharacteristicName) -> Uuid {
        // every variant is inserted by new()
        self.uuids[&name]
    }

    pub fn lookup(&self, uuid: &Uuid) -> Option<CharacteristicName> {
        self.uuids
            .iter()
            .find(|(_, candidate)| *candidate == uuid)
            .map(|(name, _)| *name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CharacteristicName, Uuid)> + '_ {
        self.uuids.iter().map(|(name, uuid)| (*name, *uuid))
    }
}

impl Default for UuidRegistry {
    fn default() -> Self {
        UuidRegistry::new()
    }
}

/**
 * Labels for the standard Device Information characteristics (Bluetooth SIG 16-bit codes).
 */
pub fn device_info_label(uuid: &Uuid) -> Option<&'static str> {
    let (high, mid, low, tail) = uuid.as_fields();
    // 0000xxxx-0000-1000-8000-00805F9B34FB
    if high >> 16 != 0 || mid != 0 || low != 0x1000 || tail != &[0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB] {
        return None;
    }

    match high {
        0x2A23 => Some("systemId"),
        0x2A24 => Some("modelNumber"),
        0x2A25 => Some("serialNumber"),
        0x2A26 => Some("firmwareRevision"),
        0x2A27 => Some("hardwareRevision"),
        0x2A28 => Some("softwareRevision"),
        0x2A29 => Some("manufacturerName"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_matches_firmware_layout() {
        assert_eq!(
            CharacteristicName::BatteryStatus.uuid().to_string(),
            "d1a7ff09-af78-4449-a34f-4da1afaf51bc"
        );
        assert_eq!(make_primary_service_uuid().to_string(), "d1a7ff00-af78-4449-a34f-4da1afaf51bc");
        assert_eq!(uuid_text(0xff0a), "D1A7FF0A-AF78-4449-A34F-4DA1AFAF51BC");
    }

    #[test]
    fn resolve_agrees_with_text_template() {
        let registry = UuidRegistry::new();

        for name in CharacteristicName::all() {
            let parsed = Uuid::parse_str(&uuid_text(name.short_code())).unwrap();
            assert_eq!(registry.resolve(name), parsed, "{}", name);
            assert_eq!(registry.lookup(&parsed), Some(name));
        }
    }

    #[test]
    fn uuids_are_unique() {
        let registry = UuidRegistry::new();
        let mut uuids = registry.iter().map(|(_, uuid)| uuid).collect::<Vec<_>>();
        uuids.sort();
        uuids.dedup();
        assert_eq!(uuids.len(), 10);
        assert!(!uuids.contains(&registry.primary_service()));
    }

    #[test]
    fn names_parse_from_protocol_vocabulary() {
        assert_eq!("integrationTimeMS".parse::<CharacteristicName>(), Ok(CharacteristicName::IntegrationTimeMs));
        assert_eq!("laserEnable".parse::<CharacteristicName>(), Ok(CharacteristicName::LaserEnable));
        assert!("laserState".parse::<CharacteristicName>().is_err());
    }

    #[test]
    fn lookup_ignores_foreign_uuids() {
        let registry = UuidRegistry::new();
        assert_eq!(registry.lookup(&make_uuid(0xff00)), None);
        assert_eq!(registry.lookup(&Uuid::nil()), None);
    }

    #[test]
    fn device_info_labels() {
        let manufacturer = Uuid::parse_str("00002a29-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(device_info_label(&manufacturer), Some("manufacturerName"));
        assert_eq!(device_info_label(&CharacteristicName::Pixels.uuid()), None);
    }
}
