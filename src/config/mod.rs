//! Ecosystem configuration: loading, dumping, and validation.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::{
    app::{ExecMode, LaunchSpec},
    signal::SignalConfig,
};

pub mod app;
pub mod signal;

static APP_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("Failed to compile app name expression")
});

/// Errors produced while reading, writing, or validating an ecosystem
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing TOML config")]
    ParseToml(#[from] toml::de::Error),

    #[error("Error parsing JSON config")]
    ParseJson(#[source] serde_json::Error),

    #[error("Error writing TOML config")]
    SerializeToml(#[from] toml::ser::Error),

    #[error("Error writing JSON config")]
    SerializeJson(#[source] serde_json::Error),

    #[error("No apps are defined")]
    NoApps,

    #[error("Unknown app {0:?}")]
    UnknownApp(String),

    #[error("Duplicate app name {0:?}")]
    DuplicateName(String),

    #[error("Invalid app name {0:?}")]
    InvalidName(String),

    #[error("App {0:?} has an empty `script`")]
    EmptyCommand(String),

    #[error("Unable to split `args` for app {name:?}")]
    InvalidArguments {
        name: String,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("App {0:?} must run at least one instance")]
    InvalidInstances(String),

    #[error("App {0:?} uses cluster mode, which is not supported")]
    UnsupportedExecMode(String),

    #[error("App {0:?} enables `watch`, which is not supported")]
    UnsupportedWatch(String),

    #[error("App {name:?} has an invalid environment variable name {var:?}")]
    InvalidEnvName { name: String, var: String },

    #[error("App {name:?} has an invalid port {value:?}")]
    InvalidPort { name: String, value: String },

    #[error("App {name:?} sets PORT={env} but passes --port {flag}")]
    PortMismatch { name: String, env: u16, flag: u16 },
}

/// On-disk format of an ecosystem file.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Picks the format from the file extension: `.json` is JSON,
    /// everything else is TOML.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Top-level ecosystem configuration: the list of apps to launch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub apps: Vec<LaunchSpec>,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::ParseJson)
    }

    pub fn parse(s: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        match format {
            ConfigFormat::Toml => Self::from_toml_str(s),
            ConfigFormat::Json => Self::from_json_str(s),
        }
    }

    /// Reads and parses the config file at `path`. The config is not
    /// validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;

        tracing::debug!(?path, "Read config file");
        Self::parse(&text, ConfigFormat::from_path(path))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        let mut json = serde_json::to_string_pretty(self).map_err(ConfigError::SerializeJson)?;
        json.push('\n');
        Ok(json)
    }

    /// Writes the config in its canonical form.
    pub fn dump(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Toml => self.to_toml_string(),
            ConfigFormat::Json => self.to_json_string(),
        }
    }

    pub fn app(&self, name: &str) -> Option<&LaunchSpec> {
        self.apps.iter().find(|app| app.name == name)
    }

    /// Keeps only the named apps (in their original order).
    pub fn retain_apps(&mut self, names: &[String]) -> Result<(), ConfigError> {
        if let Some(unknown) = names.iter().find(|name| self.app(name).is_none()) {
            return Err(ConfigError::UnknownApp(unknown.clone()));
        }

        self.apps.retain(|app| names.contains(&app.name));
        Ok(())
    }

    /// Checks every app, and the app list as a whole, for errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.apps.is_empty() {
            return Err(ConfigError::NoApps);
        }

        let mut names = HashSet::new();
        for app in &self.apps {
            if !names.insert(app.name.as_str()) {
                return Err(ConfigError::DuplicateName(app.name.clone()));
            }

            validate_app(app)?;
        }

        Ok(())
    }
}

fn validate_app(app: &LaunchSpec) -> Result<(), ConfigError> {
    let name = &app.name;

    // Purely numeric names would be indistinguishable from instance
    // indexes in output prefixes.
    if !APP_NAME.is_match(name) || name.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidName(name.clone()));
    }

    if app.command.trim().is_empty() {
        return Err(ConfigError::EmptyCommand(name.clone()));
    }

    if app.instances == 0 {
        return Err(ConfigError::InvalidInstances(name.clone()));
    }

    if app.exec_mode == ExecMode::Cluster {
        return Err(ConfigError::UnsupportedExecMode(name.clone()));
    }

    if app.watch {
        return Err(ConfigError::UnsupportedWatch(name.clone()));
    }

    if let Some(var) = app
        .environment
        .keys()
        .find(|var| var.is_empty() || var.contains('=') || var.contains('\0'))
    {
        return Err(ConfigError::InvalidEnvName {
            name: name.clone(),
            var: var.clone(),
        });
    }

    let port_flag = app
        .port_flag()
        .map_err(|source| ConfigError::InvalidArguments {
            name: name.clone(),
            source,
        })?;

    let parse_port = |value: &str| {
        value.parse::<u16>().map_err(|_| ConfigError::InvalidPort {
            name: name.clone(),
            value: value.to_owned(),
        })
    };

    let flag = port_flag.as_deref().map(parse_port).transpose()?;
    let env = app.env_port().map(parse_port).transpose()?;
    if let (Some(env), Some(flag)) = (env, flag) {
        if env != flag {
            return Err(ConfigError::PortMismatch {
                name: name.clone(),
                env,
                flag,
            });
        }
    }

    Ok(())
}
