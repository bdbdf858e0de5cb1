//! Protocol versioning for Tidal.
//!
//! Only the major version travels on the wire; the minor version is
//! informational.

use crate::codec::ProtocolError;
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major version - breaking changes increment this.
    pub major: u8,
    /// Minor version - backwards-compatible changes increment this.
    pub minor: u8,
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// The value sent in `Connect` and `Connected` frames.
    #[must_use]
    pub const fn wire(&self) -> u8 {
        self.major
    }

    /// Check a version announced by the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer's major version differs.
    pub fn accept(&self, remote: u8) -> Result<(), ProtocolError> {
        if remote == self.major {
            Ok(())
        } else {
            Err(ProtocolError::UnsupportedVersion(remote))
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_remote_version() {
        assert!(PROTOCOL_VERSION.accept(1).is_ok());
        assert!(matches!(
            PROTOCOL_VERSION.accept(2),
            Err(ProtocolError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(Version::new(1, 2).to_string(), "1.2");
        assert_eq!(Version::new(3, 1).wire(), 3);
    }
}
