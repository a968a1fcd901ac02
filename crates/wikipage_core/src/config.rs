use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_APP_NAME: &str = "Wiki";
pub const DEFAULT_HOME_PAGE: &str = "Wiki/Home";
pub const DEFAULT_BASE_URL: &str = "http://localhost";
pub const DEFAULT_FORMAT: &str = "Default";
pub const DEFAULT_DATE_FORMAT: &str = "%x";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub permissions: BTreeMap<String, PermissionEntryConfig>,
    #[serde(default)]
    pub users: BTreeMap<String, UserConfig>,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub name: Option<String>,
    pub home_page: Option<String>,
    pub base_url: Option<String>,
    pub format: Option<String>,
    pub date_format: Option<String>,
    #[serde(default)]
    pub admins: Vec<String>,
}

/// One permission registry entry, flags spelled as `show`, `read`, `edit`, `delete`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PermissionEntryConfig {
    #[serde(default)]
    pub guest: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub user: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct UserConfig {
    pub fullname: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl WikiSection {
    /// Application name used in notification mail subjects: env WIKI_NAME > config > default.
    pub fn app_name(&self) -> String {
        env_override("WIKI_NAME")
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string())
    }

    pub fn home_page(&self) -> &str {
        self.home_page
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_HOME_PAGE)
    }

    /// Resolve base URL: env WIKI_BASE_URL > config > DEFAULT_BASE_URL.
    pub fn base_url(&self) -> String {
        env_override("WIKI_BASE_URL")
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Markup dialect name: env WIKI_FORMAT > config > DEFAULT_FORMAT.
    pub fn format_name(&self) -> String {
        env_override("WIKI_FORMAT")
            .or_else(|| self.format.clone())
            .unwrap_or_else(|| DEFAULT_FORMAT.to_string())
    }

    pub fn date_format(&self) -> &str {
        self.date_format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT)
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.admins.iter().any(|admin| admin == user)
    }
}

impl LoggingSection {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }
}

/// Load and parse a WikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
