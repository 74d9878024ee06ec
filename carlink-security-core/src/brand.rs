use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ModuleError;

/// Vehicle brand the module authenticates against.
///
/// The brand selects the bundled default certificate and is mixed into key
/// derivation, so the same application gets distinct signing identities per
/// brand.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    Display,
    Serialize,
    Deserialize,
    uniffi::Enum,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    /// BMW head units.
    Bmw,
    /// MINI head units.
    Mini,
    /// Test bench brand with its own reference certificate.
    Test,
}

impl Brand {
    /// Label used in key derivation. Changing it changes every derived key.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Bmw => "bmw",
            Self::Mini => "mini",
            Self::Test => "test",
        }
    }

    /// Common name of the brand's bundled connection certificate.
    #[must_use]
    pub const fn connection_common_name(&self) -> &'static str {
        match self {
            Self::Bmw => "a4a_app_BMWTouchCommand_Connection_00.00.10",
            Self::Mini => "a4a_app_MINITouchCommand_Connection_00.00.10",
            Self::Test => "a4a_app_TestTouchCommand_Connection_00.00.10",
        }
    }

    /// Parses a brand name as handed over by the host application.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidConfiguration`] for unrecognized names.
    pub fn parse(name: &str) -> Result<Self, ModuleError> {
        name.trim()
            .parse()
            .map_err(|_| ModuleError::InvalidConfiguration {
                reason: format!("unrecognized brand {name:?}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Brand::parse("Test").unwrap(), Brand::Test);
        assert_eq!(Brand::parse("BMW").unwrap(), Brand::Bmw);
        assert_eq!(Brand::parse(" mini ").unwrap(), Brand::Mini);
    }

    #[test]
    fn test_parse_rejects_unknown_brand() {
        match Brand::parse("rolls-royce") {
            Err(ModuleError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("rolls-royce"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(Brand::parse("").is_err());
    }

    #[test]
    fn test_display_matches_label() {
        for brand in [Brand::Bmw, Brand::Mini, Brand::Test] {
            assert_eq!(brand.to_string(), brand.as_label());
        }
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&Brand::Mini).unwrap();
        assert_eq!(json, "\"mini\"");
        let parsed: Brand = serde_json::from_str("\"bmw\"").unwrap();
        assert_eq!(parsed, Brand::Bmw);
    }
}
