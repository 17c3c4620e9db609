use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tokio::time::Duration;

pub const DEFAULT_SERVER: &str = "127.0.0.1:8000";

pub const ENV_SERVER: &str = "PRIVCHAT_SERVER";
pub const ENV_SESSION: &str = "PRIVCHAT_SESSION";
pub const ENV_SECURE: &str = "PRIVCHAT_SECURE";

/// Client settings as stored on disk. The session id is kept base64-encoded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: String,
    pub secure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub typing_timeout_ms: u64,
    pub typing_throttle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: DEFAULT_SERVER.to_string(),
            secure: false,
            session_id: None,
            typing_timeout_ms: 5000,
            typing_throttle_ms: 5000,
        }
    }
}

/// Values given on the command line; `None` means not given
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub secure: Option<bool>,
    pub session: Option<String>,
}

impl Config {
    pub fn set_session(&mut self, session: &str) {
        self.session_id = Some(BASE64.encode(session));
    }

    pub fn session(&self) -> Option<String> {
        self.session_id.as_ref().and_then(|encoded| {
            BASE64
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn typing_throttle(&self) -> Duration {
        Duration::from_millis(self.typing_throttle_ms)
    }

    /// Layer environment values from `lookup` over this config
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup(ENV_SERVER) {
            self.server = server;
        }
        if let Some(session) = lookup(ENV_SESSION) {
            self.set_session(&session);
        }
        if let Some(secure) = lookup(ENV_SECURE) {
            self.secure = matches!(secure.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(server) = &overrides.server {
            self.server = server.clone();
        }
        if let Some(secure) = overrides.secure {
            self.secure = secure;
        }
        if let Some(session) = &overrides.session {
            self.set_session(session);
        }
    }
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Point config loading at another file. Only the first call takes effect.
pub fn set_config_path_override(path: PathBuf) -> Result<()> {
    CONFIG_PATH_OVERRIDE
        .set(path)
        .map_err(|path| anyhow!("Config path already overridden, ignoring {}", path.display()))
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("privchat");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(config, &get_config_path()?)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot write {}", path.display()))?;
    serde_json::to_writer_pretty(file, config)?;
    info!("Config saved to {}", path.display());
    Ok(())
}

/// Read the config file, or `None` if there is none yet
pub fn load_config_from(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        debug!("No config file at {}", path.display());
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    info!("Loaded config for {} from {}", config.server, path.display());
    Ok(Some(config))
}

/// Resolve the effective config: command line over environment over file over defaults
pub fn load_config(overrides: &Overrides) -> Result<Config> {
    let mut config = load_config_from(&get_config_path()?)?.unwrap_or_default();
    config.apply_env(|key| std::env::var(key).ok());
    config.apply_overrides(overrides);
    Ok(config)
}
