//! Decoders for the fixed-layout characteristic payloads.
//!
//! Every payload follows the same shape: an exact length check, fields at fixed
//! offsets, and a new immutable value. A payload of the wrong length never produces a
//! value.

use log::{debug, error};

use crate::error::DecodeError;

pub mod battery;
pub mod fields;

pub trait FixedLayout: Sized {
    /// Used in diagnostics.
    const NAME: &'static str;
    const LEN: usize;

    /// Called with a payload already known to be `LEN` bytes long.
    fn from_fixed(bytes: &[u8]) -> Self;

    fn decode(payload: Option<&[u8]>) -> Result<Self, DecodeError> {
        let bytes = check_len(payload, Self::NAME, Self::LEN)?;
        Ok(Self::from_fixed(bytes))
    }
}

/**
 * Values that can be written back to their characteristic.
 */
pub trait Encode {
    fn encode(&self) -> Vec<u8>;
}

pub fn check_len<'a>(payload: Option<&'a [u8]>, name: &'static str, expected: usize) -> Result<&'a [u8], DecodeError> {
    let bytes = payload.ok_or(DecodeError::Missing { name })?;

    if bytes.len() != expected {
        return Err(DecodeError::Length { name, expected, actual: bytes.len() });
    }

    Ok(bytes)
}

/**
 * The most recent successfully decoded value of a characteristic.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct Latest<T> {
    value: Option<T>,
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Latest { value: None }
    }
}

impl<T: FixedLayout + std::fmt::Debug> Latest<T> {
    pub fn new() -> Self {
        Latest::default()
    }

    /**
     * Decode `payload` and replace the stored value. On failure the error is logged and
     * the previous value is kept.
     */
    pub fn update(&mut self, payload: Option<&[u8]>) -> Result<&T, DecodeError> {
        match T::decode(payload) {
            Ok(decoded) => {
                debug!("{}.parse: {:?}", T::NAME, decoded);
                Ok(self.value.insert(decoded))
            },
            Err(err) => {
                error!("{}", err);
                Err(err)
            },
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::battery::BatteryReading;

    #[test]
    fn check_len_reports_missing_and_wrong_length() {
        assert_eq!(check_len(None, "x", 2), Err(DecodeError::Missing { name: "x" }));
        assert_eq!(
            check_len(Some(&[1, 2, 3]), "x", 2),
            Err(DecodeError::Length { name: "x", expected: 2, actual: 3 })
        );
        assert_eq!(check_len(Some(&[1, 2]), "x", 2), Ok(&[1u8, 2][..]));
    }

    #[test]
    fn latest_keeps_previous_value_on_failure() {
        let mut latest = Latest::<BatteryReading>::new();
        assert!(latest.get().is_none());

        latest.update(Some(&[0x64, 0x01])).unwrap();
        let before = latest.get().cloned();

        for bad in [&[][..], &[0x10][..], &[0x10, 0x00, 0x00][..]] {
            assert!(latest.update(Some(bad)).is_err());
            assert_eq!(latest.get().cloned(), before);
        }
        assert!(latest.update(None).is_err());
        assert_eq!(latest.get().cloned(), before);

        latest.update(Some(&[0x03, 0x00])).unwrap();
        assert_eq!(latest.get().map(|b| b.level), Some(3));
    }
}
