//! User-facing device properties.

use serde::{Deserialize, Serialize};

use crate::error::{Result, XblcError};

/// String descriptors are capped at 255 bytes: a 2-byte header plus 126 UTF-16 code units.
const MAX_STRING_UNITS: usize = 126;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XblcConfig {
    /// Distinguishes several communicators on one bus in logs.
    pub device_index: u8,
    /// Reported as string descriptor 3.
    pub serial: String,
    /// Open the microphone channel.
    pub capture: bool,
    /// Open the speaker channel.
    pub playback: bool,
}

impl Default for XblcConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            serial: "1".to_string(),
            capture: true,
            playback: true,
        }
    }
}

impl XblcConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| XblcError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial.is_empty() {
            return Err(XblcError::Config("serial must not be empty".into()));
        }
        let units = self.serial.encode_utf16().count();
        if units > MAX_STRING_UNITS {
            return Err(XblcError::Config(format!(
                "serial is {units} UTF-16 units long (max {MAX_STRING_UNITS})"
            )));
        }
        Ok(())
    }
}
