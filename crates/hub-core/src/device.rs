//! Device identifiers and delivery targets.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Sentinel target string meaning "every connected device".
pub const ALL_TARGET: &str = "all";

/// Prefix used for identifiers synthesised by the registry.
pub const ANON_DEVICE_PREFIX: &str = "anon-";

/// Logical identifier of a connected playback device.
///
/// Either chosen by the device (`?device_id=` on connect, or a later
/// `register` message) or synthesised as `anon-N`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a DeviceId without validation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a DeviceId, rejecting empty or blank strings.
    pub fn parse(id: &str) -> DomainResult<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DomainError::empty("device_id"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Synthesised identifier for a device that did not name itself.
    pub fn anonymous(counter: u64) -> Self {
        Self(format!("{ANON_DEVICE_PREFIX}{counter}"))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Targets
// ============================================================================

/// Addressee of a control intent: one device, or every device.
///
/// Serialised as a plain string; `"all"` is the broadcast sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every currently connected device.
    All,
    /// A single device.
    Device(DeviceId),
}

impl Target {
    /// Shorthand for a single-device target.
    pub fn device(id: impl Into<String>) -> Self {
        Self::Device(DeviceId::new(id))
    }

    /// Returns true for the broadcast target.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Returns true if `id` is addressed by this target.
    pub fn matches(&self, id: &DeviceId) -> bool {
        match self {
            Self::All => true,
            Self::Device(target) => target == id,
        }
    }

    /// String form used as the relay key for this target.
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => ALL_TARGET,
            Self::Device(id) => id.as_str(),
        }
    }
}

impl FromStr for Target {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::empty("target"));
        }
        if trimmed == ALL_TARGET {
            return Ok(Self::All);
        }
        Ok(Self::Device(DeviceId::new(trimmed)))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DeviceId> for Target {
    fn from(id: DeviceId) -> Self {
        Self::Device(id)
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
