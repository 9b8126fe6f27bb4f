//! Session configuration, loadable from TOML.

use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::protocol::*;

/// Configuration for a PCD session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// USB vendor id of the target.
    pub vendor_id: u16,
    /// USB product id of the target.
    pub product_id: u16,
    /// Interface holding the bulk command endpoints.
    pub interface: u8,
    /// Transfer timeout applied when a session opens, in seconds.
    pub default_timeout_secs: u32,
    /// Vendor control request used for target reset.
    pub reset_request: u8,
    /// Lock file for cross-process exclusion. `None` uses the temp directory.
    pub lock_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            interface: DEFAULT_INTERFACE,
            default_timeout_secs: PCDUSB_TMO_DEFAULT,
            reset_request: VENDOR_REQUEST_TARGET_RESET,
            lock_file: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(PCDUSB_TMO_MIN..=PCDUSB_TMO_MAX).contains(&self.default_timeout_secs) {
            bail!(
                "default_timeout_secs must be within {}..={}, got {}",
                PCDUSB_TMO_MIN,
                PCDUSB_TMO_MAX,
                self.default_timeout_secs
            );
        }
        Ok(())
    }

    /// Lock file path, falling back to the temp directory.
    pub fn lock_file_path(&self) -> PathBuf {
        self.lock_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(LOCK_FILE_NAME))
    }
}
