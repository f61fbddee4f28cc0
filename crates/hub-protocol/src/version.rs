//! Protocol version stamped on outgoing intents.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control protocol version carried as `proto_ver` in every intent.
///
/// A single integer; devices are expected to ignore intents whose
/// version they do not understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    /// Current protocol version.
    pub const CURRENT: ProtocolVersion = ProtocolVersion(1);
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_serializes_as_integer() {
        let json = serde_json::to_string(&ProtocolVersion::CURRENT).unwrap();
        assert_eq!(json, "1");
        assert_eq!(format!("{}", ProtocolVersion::CURRENT), "1");
    }

    #[test]
    fn test_version_deserializes_from_integer() {
        let version: ProtocolVersion = serde_json::from_str("1").unwrap();
        assert_eq!(version, ProtocolVersion::CURRENT);
    }
}
