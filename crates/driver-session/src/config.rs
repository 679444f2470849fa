use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::history::Identity;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_CHAT_PATH: &str = "/tmp/chat";
pub const DEFAULT_MAX_CONTEXT_BYTES: usize = 100 * 1024;

pub const ENV_API_BASE: &str = "DRIVER_API_BASE";
pub const ENV_API_TOKEN: &str = "DRIVER_API_TOKEN";
pub const ENV_ORG: &str = "DRIVER_ORG";
pub const ENV_USER_ID: &str = "DRIVER_USER_ID";
pub const ENV_DATA_DIR: &str = "DRIVER_DATA_DIR";

const CONFIG_FILE_PATH: &str = "driver.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    pub api_base: String,
    pub chat_path: String,
    pub api_token: Option<String>,
    pub organization: Option<String>,
    pub user_id: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub max_context_bytes: usize,
    pub default_root_node_id: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            api_token: None,
            organization: None,
            user_id: None,
            data_dir: None,
            max_context_bytes: DEFAULT_MAX_CONTEXT_BYTES,
            default_root_node_id: None,
        }
    }
}

fn driver_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".driver")
}

fn driver_config_json_path() -> PathBuf {
    driver_dir().join("config.json")
}

impl DriverConfig {
    /// `~/.driver/config.json`, else `./driver.toml`, else defaults; then
    /// `DRIVER_*` environment overrides.
    pub fn load() -> Self {
        let mut config = Self::from_files(&driver_config_json_path(), Path::new(CONFIG_FILE_PATH));
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn from_files(json_path: &Path, toml_path: &Path) -> Self {
        if json_path.exists() {
            match std::fs::read_to_string(json_path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<DriverConfig>(&content).map_err(|e| e.to_string())
                }) {
                Ok(config) => return config,
                Err(e) => log::warn!("Ignoring {}: {}", json_path.display(), e),
            }
        }

        if toml_path.exists() {
            match std::fs::read_to_string(toml_path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    toml::from_str::<DriverConfig>(&content).map_err(|e| e.to_string())
                }) {
                Ok(config) => return config,
                Err(e) => log::warn!("Ignoring {}: {}", toml_path.display(), e),
            }
        }

        Self::default()
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(api_base) = var(ENV_API_BASE) {
            self.api_base = api_base;
        }
        if let Some(token) = var(ENV_API_TOKEN) {
            self.api_token = Some(token);
        }
        if let Some(org) = var(ENV_ORG) {
            self.organization = Some(org);
        }
        if let Some(user_id) = var(ENV_USER_ID) {
            self.user_id = Some(user_id);
        }
        if let Some(data_dir) = var(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(data_dir));
        }
    }

    /// The identity history is stored under, when both halves are known.
    pub fn identity(&self) -> Option<Identity> {
        match (&self.organization, &self.user_id) {
            (Some(org), Some(user)) => Some(Identity::new(org.clone(), user.clone())),
            _ => None,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| driver_dir().join("data"))
    }
}
