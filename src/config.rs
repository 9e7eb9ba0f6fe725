use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cli::Cli;

pub const DEFAULT_RALLY_URL: &str = "https://rally1.rallydev.com";
pub const DEFAULT_TRELLO_URL: &str = "https://api.trello.com/1";
pub const DEFAULT_LIST: &str = "To Do";
const LOCAL_CONFIG: &str = "rally-trello.toml";

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub rally: RallyConfig,
    #[serde(default)]
    pub trello: TrelloConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct RallyConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub workspace: Option<String>,
    pub project: Option<String>,
    pub iteration: Option<String>,
    pub defects: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TrelloConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub board: Option<String>,
    pub list: Option<String>,
}

/// Fully validated settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub rally: RallySettings,
    pub trello: TrelloSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RallySettings {
    pub base_url: String,
    pub api_key: String,
    pub workspace: String,
    pub project: String,
    pub iteration: String,
    pub import_defects: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrelloSettings {
    pub base_url: String,
    pub api_key: String,
    pub token: String,
    pub board: String,
    pub list: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{}", .0.join("\n"))]
    Missing(Vec<String>),
}

fn default_config_path() -> PathBuf {
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rally-trello")
        .join("config.toml")
}

/// Load the config file. An explicit path must exist; the default
/// locations are optional.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = default_config_path();
            if !path.exists() {
                log::debug!("no config file at {}, using defaults", path.display());
                return Ok(AppConfig::default());
            }
            path
        }
    };
    log::debug!("reading config from {}", path.display());
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}

impl AppConfig {
    /// Command-line values win over the file.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        fn set(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        set(&mut self.rally.workspace, &cli.rally_workspace);
        set(&mut self.rally.project, &cli.rally_project);
        set(&mut self.rally.iteration, &cli.rally_iteration);
        set(&mut self.rally.api_key, &cli.rally_api_key);
        if cli.rally_defects {
            self.rally.defects = Some(true);
        }
        set(&mut self.trello.board, &cli.trello_board);
        set(&mut self.trello.list, &cli.trello_list);
        set(&mut self.trello.api_key, &cli.trello_api_key);
        set(&mut self.trello.token, &cli.trello_token);
    }

    /// Check every required value, reporting all missing ones at once.
    pub fn validate(self) -> Result<Settings, ConfigError> {
        let mut missing = Vec::new();
        let mut require = |value: Option<String>, message: &str| -> String {
            match value.filter(|v| !v.trim().is_empty()) {
                Some(v) => v,
                None => {
                    missing.push(message.to_string());
                    String::new()
                }
            }
        };

        let iteration = require(
            self.rally.iteration,
            "Rally iteration must be specified on the command line (-i)",
        );
        let workspace = require(
            self.rally.workspace,
            "Rally workspace must be specified in the config file or on the command line (-w)",
        );
        let project = require(
            self.rally.project,
            "Rally project must be specified in the config file or on the command line (-p)",
        );
        let rally_key = require(
            self.rally.api_key,
            "Rally API key must be specified in the config file or RALLY_API_KEY",
        );
        let trello_key = require(
            self.trello.api_key,
            "Trello API key must be specified in the config file or TRELLO_API_KEY",
        );
        let token = require(
            self.trello.token,
            "Trello user token must be specified in the config file or TRELLO_TOKEN",
        );
        let board = require(
            self.trello.board,
            "Trello board must be specified in the config file or on the command line (-b)",
        );
        let list = require(
            self.trello.list.or_else(|| Some(DEFAULT_LIST.to_string())),
            "Trello list must be specified in the config file or on the command line (-l)",
        );

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        Ok(Settings {
            rally: RallySettings {
                base_url: trim_url(self.rally.base_url, DEFAULT_RALLY_URL),
                api_key: rally_key,
                workspace,
                project,
                iteration,
                import_defects: self.rally.defects.unwrap_or(false),
            },
            trello: TrelloSettings {
                base_url: trim_url(self.trello.base_url, DEFAULT_TRELLO_URL),
                api_key: trello_key,
                token,
                board,
                list,
            },
        })
    }
}

fn trim_url(url: Option<String>, default: &str) -> String {
    url.unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}
