use crate::engine::EngineOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILENAME: &str = "padbus_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Grab claimed devices so other applications stop seeing them.
    pub exclusive_mode: bool,
    pub start_on_startup: bool,
    pub start_minimized: bool,
    pub poll_interval_ms: u64,
    pub worker_join_timeout_ms: u64,
    /// Bus device node; the platform default when unset.
    pub bus_device_path: Option<String>,
    /// Directory holding per-device mapping files, relative to the executable.
    pub mapping_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exclusive_mode: false,
            start_on_startup: false,
            start_minimized: false,
            poll_interval_ms: 1,
            worker_join_timeout_ms: 500,
            bus_device_path: None,
            mapping_dir: "configs".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Option<Self> {
        let path = Self::config_path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::from_json(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {:?}", path);
                        return Some(config);
                    }
                    Err(e) => {
                        log::error!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    log::error!("Failed to read config file: {}", e);
                }
            }
        }
        None
    }

    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str(contents)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        log::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        Self::base_dir().join(CONFIG_FILENAME)
    }

    fn base_dir() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Mapping directory resolved against the executable's directory.
    pub fn mapping_path(&self) -> PathBuf {
        let dir = PathBuf::from(&self.mapping_dir);
        if dir.is_absolute() {
            dir
        } else {
            Self::base_dir().join(dir)
        }
    }

    pub fn bus_path(&self) -> Option<PathBuf> {
        self.bus_device_path.as_ref().map(PathBuf::from)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            exclusive_mode: self.exclusive_mode,
            poll_interval: self.poll_interval(),
            join_timeout: Duration::from_millis(self.worker_join_timeout_ms),
        }
    }
}
