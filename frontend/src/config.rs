//! User-facing TOML config: display scale, save directory, camera device.
//! Lives next to the platform config dir (`dirs::config_dir()`); absent or
//! unreadable config falls back to built-in defaults rather than erroring,
//! since nothing here is required for the emulator to run.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_scale")]
    pub scale: u32,
    #[serde(default)]
    pub save_dir: Option<PathBuf>,
    #[serde(default)]
    pub camera_device: Option<String>,
}

fn default_scale() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            save_dir: None,
            camera_device: None,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        toml::from_str(&text).unwrap_or_else(|e| {
            eprintln!("Warning: ignoring malformed config at {}: {e}", path.display());
            Self::default()
        })
    }

    pub fn save_dir(&self) -> PathBuf {
        self.save_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("spg293")
        })
    }
}

fn config_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("spg293").join("config.toml"))
}
