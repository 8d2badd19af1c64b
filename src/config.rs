use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "bernat", "btcsheet")
}

fn default_data_dir() -> PathBuf {
    if let Some(path) = std::env::var_os("BTCSHEET_DATA_DIR") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.data_dir().to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".btcsheet")
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("BTCSHEET_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.config_dir().join("config.toml");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".btcsheet-config.toml")
}

pub fn google_token_path() -> PathBuf {
    default_data_dir().join("google_token.json")
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub google: GoogleConfig,
    pub sheet: SheetConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TelegramConfig {
    /// Base URL of a Bot API compatible gateway that exposes channel
    /// history (e.g. a local tdlight bot-api server).
    pub api_base: String,
    pub bot_token: String,
    pub channel: String,
    pub page_size: u32,
    pub timeout_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8081".to_string(),
            bot_token: String::new(),
            channel: "bitpanda_de".to_string(),
            page_size: 100,
            timeout_seconds: 30,
        }
    }
}

impl TelegramConfig {
    pub fn resolve_bot_token(&self) -> String {
        if !self.bot_token.trim().is_empty() {
            return self.bot_token.trim().to_string();
        }
        std::env::var("BTCSHEET_BOT_TOKEN").unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SheetConfig {
    pub keyword: String,
    pub tab_title: String,
    pub new_tab_rows: u32,
    pub new_tab_cols: u32,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            keyword: "btc".to_string(),
            tab_title: "BTC Messages".to_string(),
            new_tab_rows: 100,
            new_tab_cols: 2,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = config_path();

        let config = if let Ok(content) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to parse config.toml ({config_path:?}), using defaults: {e}");
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        if !config_path.exists() {
            let _ = config.save_to_path(&config_path);
        }

        config
    }

    pub fn save_to_path(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).unwrap_or_default();
        fs::write(path, content)
    }
}
