use crate::telemetry::{Encode, FixedLayout};

/**
 * Number of pixels on the detector (`pixels`, u16 big-endian).
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelCount(pub u16);

impl FixedLayout for PixelCount {
    const NAME: &'static str = "Pixels";
    const LEN: usize = 2;

    fn from_fixed(bytes: &[u8]) -> Self {
        PixelCount(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

/**
 * Integration time in milliseconds (`integrationTimeMS`, u16 big-endian).
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrationTime(pub u16);

impl FixedLayout for IntegrationTime {
    const NAME: &'static str = "IntegrationTime";
    const LEN: usize = 2;

    fn from_fixed(bytes: &[u8]) -> Self {
        IntegrationTime(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

impl Encode for IntegrationTime {
    fn encode(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }
}

/**
 * Detector gain in dB (`gainDb`): byte 0 holds the integral part, byte 1 the
 * fraction in 256ths.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain(pub f32);

impl FixedLayout for Gain {
    const NAME: &'static str = "Gain";
    const LEN: usize = 2;

    fn from_fixed(bytes: &[u8]) -> Self {
        Gain(f32::from(bytes[0]) + f32::from(bytes[1]) / 256.0)
    }
}

impl Encode for Gain {
    fn encode(&self) -> Vec<u8> {
        let clamped = self.0.clamp(0.0, 255.0 + 255.0 / 256.0);
        let integral = clamped.trunc();
        let fraction = ((clamped - integral) * 256.0).round().min(255.0);
        vec![integral as u8, fraction as u8]
    }
}

/**
 * Laser firing state (`laserEnable`, one byte, non-zero means enabled).
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaserState(pub bool);

impl FixedLayout for LaserState {
    const NAME: &'static str = "LaserState";
    const LEN: usize = 1;

    fn from_fixed(bytes: &[u8]) -> Self {
        LaserState(bytes[0] != 0)
    }
}

impl Encode for LaserState {
    fn encode(&self) -> Vec<u8> {
        vec![u8::from(self.0)]
    }
}
