//! Input configuration
//!
//! The `[input]` section an embedding application deserializes from its
//! TOML config. Empty strings mean "system default".

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::input::manager::{DEFAULT_REPEAT_DELAY, DEFAULT_REPEAT_RATE};
use crate::input::KeymapParams;

/// Input settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Key repeat delay in milliseconds (default: 250)
    pub repeat_delay: u32,
    /// Key repeat interval in milliseconds (default: 50)
    pub repeat_rate: u32,
    /// XKB keyboard model (empty = default)
    pub xkb_model: String,
    /// XKB keyboard layout (e.g., "us", "jp", empty = default)
    pub xkb_layout: String,
    /// XKB keyboard variant (empty = default)
    pub xkb_variant: String,
    /// XKB keyboard options (e.g., "ctrl:nocaps", empty = default)
    pub xkb_options: String,
    /// Locale for compose sequences (empty = from environment)
    pub locale: String,
    /// Path of a textual keymap overriding the XKB names (empty = none)
    pub keymap_file: String,
    /// Path of a compose file overriding the locale's table (empty = none)
    pub compose_file: String,
    /// Handle mice, touchpads and tablets
    pub mouse: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            repeat_delay: DEFAULT_REPEAT_DELAY,
            repeat_rate: DEFAULT_REPEAT_RATE,
            xkb_model: String::new(),
            xkb_layout: String::new(),
            xkb_variant: String::new(),
            xkb_options: String::new(),
            locale: String::new(),
            keymap_file: String::new(),
            compose_file: String::new(),
            mouse: true,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn read_optional(path: &str) -> Result<Option<String>> {
    if path.is_empty() {
        return Ok(None);
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    Ok(Some(content))
}

impl InputConfig {
    /// Parse an `[input]` section body
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse input config")
    }

    /// Keymap parameters for `InputManager::new`; reads the keymap and
    /// compose files if configured
    pub fn keymap_params(&self) -> Result<KeymapParams> {
        Ok(KeymapParams {
            model: non_empty(&self.xkb_model),
            layout: non_empty(&self.xkb_layout),
            variant: non_empty(&self.xkb_variant),
            options: non_empty(&self.xkb_options),
            locale: non_empty(&self.locale),
            keymap: read_optional(&self.keymap_file)?,
            compose_file: read_optional(&self.compose_file)?,
        })
    }
}
