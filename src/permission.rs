use std::fmt;
use async_trait::async_trait;
use log::{debug, error};

use crate::error::PermissionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Required by recent mobile platforms before a BLE scan may run.
    Location,
    Storage,
    /// OS-level access to the bluetooth adapter itself (e.g. macOS privacy settings).
    Bluetooth,
}

impl Capability {
    pub fn rationale(&self) -> &'static str {
        match self {
            Capability::Location => "Bluetooth requires access to the 'Location' service in order to function.",
            Capability::Storage => "App needs to be able to save spectra to local filesystem.",
            Capability::Bluetooth => "App needs access to Bluetooth to find and talk to the spectrometer.",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Capability::Location => "Location",
            Capability::Storage => "Storage",
            Capability::Bluetooth => "Bluetooth",
        };

        write!(f, "{}", result)
    }
}

/**
 * Capabilities that must be granted before scanning.
 */
pub const SCAN_CAPABILITIES: [Capability; 2] = [Capability::Location, Capability::Storage];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Unknown,
}

/**
 * Platform permission API.
 */
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn check(&self, capability: Capability) -> Result<PermissionStatus, PermissionError>;

    async fn should_show_rationale(&self, capability: Capability) -> Result<bool, PermissionError>;

    async fn show_rationale(&self, capability: Capability, reason: &str) -> Result<(), PermissionError>;

    async fn request(&self, capability: Capability) -> Result<PermissionStatus, PermissionError>;
}

/**
 * Desktop bluetooth stacks have no runtime permission prompt; access problems surface
 * as btleplug errors when scanning instead.
 */
pub struct DesktopPermissions;

#[async_trait]
impl PermissionProvider for DesktopPermissions {
    async fn check(&self, _capability: Capability) -> Result<PermissionStatus, PermissionError> {
        Ok(PermissionStatus::Granted)
    }

    async fn should_show_rationale(&self, _capability: Capability) -> Result<bool, PermissionError> {
        Ok(false)
    }

    async fn show_rationale(&self, _capability: Capability, _reason: &str) -> Result<(), PermissionError> {
        Ok(())
    }

    async fn request(&self, _capability: Capability) -> Result<PermissionStatus, PermissionError> {
        Ok(PermissionStatus::Granted)
    }
}

pub struct PermissionGate<P> {
    provider: P,
}

impl<P: PermissionProvider> PermissionGate<P> {
    pub fn new(provider: P) -> Self {
        PermissionGate { provider }
    }

    /**
     * Returns true if `capability` is granted, asking for it if needed. Denials and
     * provider failures are logged and reported as false.
     */
    pub async fn ensure(&self, capability: Capability) -> bool {
        match self.request_if_needed(capability).await {
            Ok(PermissionStatus::Granted) => {
                debug!("{} permission granted", capability);
                true
            },
            Ok(status) => {
                error!("{} permission not granted ({:?})", capability, status);
                false
            },
            Err(err) => {
                error!("Exception obtaining {} permission: {}", capability, err);
                false
            },
        }
    }

    /**
     * Checks capabilities in order, stopping at the first one that is not granted.
     */
    pub async fn ensure_all(&self, capabilities: &[Capability]) -> Result<(), Capability> {
        for capability in capabilities {
            if !self.ensure(*capability).await {
                return Err(*capability);
            }
        }

        Ok(())
    }

    async fn request_if_needed(&self, capability: Capability) -> Result<PermissionStatus, PermissionError> {
        let status = self.provider.check(capability).await?;
        if status == PermissionStatus::Granted {
            return Ok(status);
        }

        if self.provider.should_show_rationale(capability).await? {
            self.provider.show_rationale(capability, capability.rationale()).await?;
        }

        self.provider.request(capability).await
    }
}
