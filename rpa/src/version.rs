//! RPA archive version identification

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Supported RPA archive versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpaVersion {
    /// Headerless archive with a sibling `.rpi` index file
    V1,
    /// `RPA-2.0` header carrying the index offset
    V2,
    /// `RPA-3.0` header carrying the index offset and obfuscation step
    V3,
    /// `RPA-3.2` variant, identical layout to 3.0
    V32,
}

impl RpaVersion {
    /// Magic prefix of the header line, if the version has one
    pub fn magic(self) -> Option<&'static str> {
        match self {
            Self::V1 => None,
            Self::V2 => Some("RPA-2.0 "),
            Self::V3 => Some("RPA-3.0 "),
            Self::V32 => Some("RPA-3.2 "),
        }
    }

    /// Byte length of the header line, including the trailing newline
    pub fn header_len(self) -> u64 {
        match self {
            Self::V1 => 0,
            Self::V2 => 25,
            Self::V3 | Self::V32 => 34,
        }
    }

    /// Whether index offsets and lengths are XOR-obfuscated with the step
    pub fn is_obfuscated(self) -> bool {
        matches!(self, Self::V3 | Self::V32)
    }

    /// Whether index tuples carry a third prefix element
    pub fn index_has_prefix(self) -> bool {
        matches!(self, Self::V3 | Self::V32)
    }
}

impl fmt::Display for RpaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::V1 => "1.0",
            Self::V2 => "2.0",
            Self::V3 => "3.0",
            Self::V32 => "3.2",
        };
        f.write_str(s)
    }
}

impl FromStr for RpaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "1.0" => Ok(Self::V1),
            "2" | "2.0" => Ok(Self::V2),
            "3" | "3.0" => Ok(Self::V3),
            "3.2" => Ok(Self::V32),
            other => Err(Error::VersionNotSupported(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_roundtrip() {
        for version in [
            RpaVersion::V1,
            RpaVersion::V2,
            RpaVersion::V3,
            RpaVersion::V32,
        ] {
            let parsed: RpaVersion = version.to_string().parse().unwrap();
            assert_eq!(parsed, version);
        }
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert!("4.0".parse::<RpaVersion>().is_err());
        assert!("".parse::<RpaVersion>().is_err());
    }

    #[test]
    fn test_header_lengths() {
        assert_eq!(RpaVersion::V1.header_len(), 0);
        assert_eq!(RpaVersion::V2.header_len(), 25);
        assert_eq!(RpaVersion::V3.header_len(), 34);
        assert_eq!(RpaVersion::V32.header_len(), 34);
    }

    #[test]
    fn test_obfuscation_by_version() {
        assert!(!RpaVersion::V1.is_obfuscated());
        assert!(!RpaVersion::V2.is_obfuscated());
        assert!(RpaVersion::V3.is_obfuscated());
        assert!(RpaVersion::V32.is_obfuscated());
    }

    #[test]
    fn test_magic_prefixes() {
        assert_eq!(RpaVersion::V1.magic(), None);
        assert_eq!(RpaVersion::V2.magic(), Some("RPA-2.0 "));
        assert_eq!(RpaVersion::V3.magic(), Some("RPA-3.0 "));
        assert_eq!(RpaVersion::V32.magic(), Some("RPA-3.2 "));
    }
}
