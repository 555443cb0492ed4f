use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::{collections::HashMap, env, fmt, fs, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info};

pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
pub const DEBUG_VAR: &str = "DEBUG";
pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";
pub const DATA_DIR_VAR: &str = "DATA_DIR";
pub const LOGS_DIR_VAR: &str = "LOGS_DIR";
pub const FLOW_TIMEOUT_VAR: &str = "FLOW_TIMEOUT";
pub const MAX_RETRIES_VAR: &str = "MAX_RETRIES";

/// A source of string settings, such as the process environment.
#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn del(&self, key: &str);
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads the process environment, after loading `env_file` into it when
/// the file exists. `set` and `del` also rewrite the file.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            dotenvy::from_path(&env_file).ok();
            info!("Loaded .env from {}", env_file.display());
        } else {
            debug!("no .env at {}", env_file.display())
        }

        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        unsafe {
            env::set_var(key, value);
        };
        let content = fs::read_to_string(&self.env_file).unwrap_or_default();
        let mut found = false;
        let mut lines: Vec<String> = content
            .lines()
            .map(|line| match line.split_once('=') {
                Some((k, _)) if k.trim() == key => {
                    found = true;
                    format!("{key}={value}")
                }
                _ => line.to_string(),
            })
            .collect();

        if !found {
            lines.push(format!("{key}={value}"));
        }

        fs::write(&self.env_file, lines.join("\n")).map_err(|e| e.to_string())
    }

    async fn del(&self, key: &str) {
        unsafe {
            env::remove_var(key);
        };
        if let Ok(content) = fs::read_to_string(&self.env_file) {
            let lines: Vec<&str> = content
                .lines()
                .filter(|line| !matches!(line.split_once('='), Some((k, _)) if k.trim() == key))
                .collect();

            if let Err(e) = fs::write(&self.env_file, lines.join("\n")) {
                error!("could not update {}: {}", self.env_file.display(), e);
            }
        }
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        "EnvConfigManager".to_string()
    }
}

/// In-memory settings, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Box<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Box::new(Self { map })
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) {
        self.map.remove(key);
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("anthropic_api_key is required (set ANTHROPIC_API_KEY)")]
    MissingApiKey,
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Explicit settings that win over the config source. Unset fields fall
/// back to the source, then to the defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub anthropic_api_key: Option<String>,
    pub debug: Option<bool>,
    pub log_level: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub logs_dir: Option<PathBuf>,
    pub flow_timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub extra: HashMap<String, Value>,
}

#[derive(Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub debug: bool,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Seconds.
    pub flow_timeout: u64,
    pub max_retries: u32,
    pub extra: HashMap<String, Value>,
}

impl Config {
    pub async fn load(overrides: ConfigOverrides, source: &ConfigManager) -> Result<Self, ConfigError> {
        let source = source.0.as_ref();

        let anthropic_api_key = match overrides.anthropic_api_key {
            Some(key) => Some(key),
            None => source.get(API_KEY_VAR).await,
        }
        .filter(|key| !key.is_empty())
        .ok_or(ConfigError::MissingApiKey)?;

        let debug = match overrides.debug {
            Some(debug) => debug,
            None => source.get(DEBUG_VAR).await.is_some_and(|v| is_truthy(&v)),
        };
        let log_level = match overrides.log_level {
            Some(level) => level,
            None => source.get(LOG_LEVEL_VAR).await.unwrap_or_else(|| "INFO".to_string()),
        };
        let flow_timeout = match overrides.flow_timeout {
            Some(timeout) => timeout,
            None => parse_var(source, FLOW_TIMEOUT_VAR, 300).await?,
        };
        let max_retries = match overrides.max_retries {
            Some(retries) => retries,
            None => parse_var(source, MAX_RETRIES_VAR, 3).await?,
        };
        let data_dir = match overrides.data_dir {
            Some(dir) => dir,
            None => PathBuf::from(source.get(DATA_DIR_VAR).await.unwrap_or_else(|| "data".to_string())),
        };
        let logs_dir = match overrides.logs_dir {
            Some(dir) => dir,
            None => PathBuf::from(source.get(LOGS_DIR_VAR).await.unwrap_or_else(|| "logs".to_string())),
        };

        for dir in [&data_dir, &logs_dir] {
            if let Err(e) = fs::create_dir_all(dir) {
                debug!("skipping creation of {}: {}", dir.display(), e);
            }
        }

        Ok(Self {
            anthropic_api_key,
            debug,
            log_level,
            data_dir,
            logs_dir,
            flow_timeout,
            max_retries,
            extra: overrides.extra,
        })
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout)
    }

    /// Every setting, extras included, minus the names in `exclude`.
    pub fn to_map(&self, exclude: &[&str]) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("anthropic_api_key".into(), self.anthropic_api_key.clone().into());
        map.insert("debug".into(), self.debug.into());
        map.insert("log_level".into(), self.log_level.clone().into());
        map.insert("data_dir".into(), self.data_dir.display().to_string().into());
        map.insert("logs_dir".into(), self.logs_dir.display().to_string().into());
        map.insert("flow_timeout".into(), self.flow_timeout.into());
        map.insert("max_retries".into(), self.max_retries.into());
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map.retain(|key, _| !exclude.contains(&key.as_str()));
        map
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("anthropic_api_key", &"<redacted>")
            .field("debug", &self.debug)
            .field("log_level", &self.log_level)
            .field("data_dir", &self.data_dir)
            .field("logs_dir", &self.logs_dir)
            .field("flow_timeout", &self.flow_timeout)
            .field("max_retries", &self.max_retries)
            .field("extra", &self.extra)
            .finish()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

async fn parse_var<T: std::str::FromStr>(
    source: &dyn ConfigManagerType,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match source.get(key).await {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}
