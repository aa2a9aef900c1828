//! Configuration for the hardware composer bridge
//!
//! Loads configuration from a TOML file at `$PLAYDROID_HWC_CONFIG`, falling
//! back to `<config dir>/playdroid/hwcomposer.toml`.
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::buffer::AllocatorBackend;

/// LCD density assumed when none is configured
pub const DEFAULT_LCD_DENSITY: i32 = 180;

/// Bridge configuration, read once when a session opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Display server socket
    pub socket_path: PathBuf,
    /// Gralloc implementation name: "default", "gbm", "minigbm_*", ...
    pub gralloc: String,
    /// Screen density in dots per inch
    pub lcd_density: i32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: playdroid_ipc::socket_path(),
            gralloc: "default".to_string(),
            lcd_density: DEFAULT_LCD_DENSITY,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path:?}"))?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Allocator backend named by `gralloc`
    pub fn backend(&self) -> AllocatorBackend {
        AllocatorBackend::from_name(&self.gralloc)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os("PLAYDROID_HWC_CONFIG") {
            return Ok(PathBuf::from(path));
        }

        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("playdroid");

        Ok(config_dir.join("hwcomposer.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}
