//! Simulated device profiles
//!
//! A profile describes the platform the simulated device pretends to be: its API level, which
//! permissions the app holds and whether the mock provider is switched on in developer
//! settings. Profiles are stored as plist files with PascalCase keys.
//!
//! ```xml
//! <dict>
//!   <key>ApiLevel</key><integer>28</integer>
//!   <key>PackageName</key><string>com.fakelocation.app</string>
//!   <key>GrantedPermissions</key>
//!   <array><string>android.permission.MOCK_LOCATION</string></array>
//!   <key>MockProvider</key><string>Enabled</string>
//! </dict>
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    Coordinate, SpoofError,
    platform::{ACCESS_COARSE_LOCATION, ACCESS_FINE_LOCATION, MOCK_LOCATION},
};

/// State of the developer-facing mock provider toggle
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderAvailability {
    #[default]
    Enabled,
    Disabled,
    /// The platform has no way to query the toggle
    Unsupported,
}

/// Description of a simulated device
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceProfile {
    pub api_level: u32,
    pub package_name: String,
    #[serde(default)]
    pub granted_permissions: Vec<String>,
    #[serde(default)]
    pub mock_provider: ProviderAvailability,
    /// Position reported while mock mode is off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_position: Option<Coordinate>,
}

impl TryFrom<String> for ProviderAvailability {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "Enabled" => Ok(Self::Enabled),
            "Disabled" => Ok(Self::Disabled),
            "Unsupported" => Ok(Self::Unsupported),
            _ => Err(format!("unknown mock provider state `{s}`")),
        }
    }
}

impl From<ProviderAvailability> for String {
    fn from(p: ProviderAvailability) -> Self {
        match p {
            ProviderAvailability::Enabled => "Enabled",
            ProviderAvailability::Disabled => "Disabled",
            ProviderAvailability::Unsupported => "Unsupported",
        }
        .to_string()
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            api_level: 33,
            package_name: "com.fakelocation.app".to_string(),
            granted_permissions: vec![
                MOCK_LOCATION.to_string(),
                ACCESS_FINE_LOCATION.to_string(),
                ACCESS_COARSE_LOCATION.to_string(),
            ],
            mock_provider: ProviderAvailability::Enabled,
            true_position: None,
        }
    }
}

impl DeviceProfile {
    /// Reads a profile from disk
    ///
    /// # Errors
    /// Returns `SpoofError` if the file cannot be read or isn't a valid profile plist
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, SpoofError> {
        let f = std::fs::read(path)?;
        Self::from_bytes(&f)
    }

    /// Parses a profile from XML or binary plist bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SpoofError> {
        match plist::from_bytes::<Self>(bytes) {
            Ok(p) => Ok(p),
            Err(e) => {
                warn!("Unable to parse device profile: {e:?}");
                Err(SpoofError::Plist(e))
            }
        }
    }

    /// Serializes the profile as an XML plist
    pub fn serialize(&self) -> Result<Vec<u8>, SpoofError> {
        let mut buf = Vec::new();
        plist::to_writer_xml(&mut buf, self)?;
        Ok(buf)
    }

    pub fn grants(&self, permission: &str) -> bool {
        self.granted_permissions.iter().any(|p| p == permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>ApiLevel</key><integer>28</integer>
  <key>PackageName</key><string>com.example.spoof</string>
  <key>GrantedPermissions</key>
  <array>
    <string>android.permission.MOCK_LOCATION</string>
  </array>
  <key>MockProvider</key><string>Disabled</string>
  <key>TruePosition</key>
  <dict>
    <key>latitude</key><real>52.52</real>
    <key>longitude</key><real>13.405</real>
  </dict>
</dict>
</plist>"#;

    #[test]
    fn parses_profile_plist() {
        let p = DeviceProfile::from_bytes(LEGACY.as_bytes()).unwrap();
        assert_eq!(p.api_level, 28);
        assert_eq!(p.package_name, "com.example.spoof");
        assert!(p.grants(MOCK_LOCATION));
        assert!(!p.grants(ACCESS_FINE_LOCATION));
        assert_eq!(p.mock_provider, ProviderAvailability::Disabled);
        let pos = p.true_position.unwrap();
        assert_eq!(pos.latitude(), 52.52);
        assert_eq!(pos.accuracy(), crate::coordinate::DEFAULT_ACCURACY);
    }

    #[test]
    fn rejects_invalid_true_position() {
        let bad = LEGACY.replace("<real>52.52</real>", "<real>152.52</real>");
        assert!(DeviceProfile::from_bytes(bad.as_bytes()).is_err());
    }

    #[test]
    fn serialize_then_parse_keeps_fields() {
        let profile = DeviceProfile::default();
        let bytes = profile.serialize().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("<key>ApiLevel</key>"));
        assert_eq!(DeviceProfile::from_bytes(&bytes).unwrap(), profile);
    }
}
