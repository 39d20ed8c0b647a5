//! App (launch) configuration.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Deserializer, Serialize};

use super::signal::SignalConfig;

const DEFAULT_MAX_RESTARTS: u32 = 16;
const DEFAULT_MIN_UPTIME_MS: u64 = 1000;
const DEFAULT_KILL_TIMEOUT_MS: u64 = 1600;

/// Process model used to run an app's instances.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Each instance is a plain child process.
    #[serde(alias = "fork_mode")]
    Fork,

    /// Instances share a listening socket through a cluster primary.
    #[serde(alias = "cluster_mode")]
    Cluster,
}

impl Default for ExecMode {
    fn default() -> Self {
        Self::Fork
    }
}

/// Declarative description of one app: what to run, with which
/// arguments and environment, and how it should be supervised.
///
/// Field order matters for serialization: TOML requires the `env`
/// table to come after every plain value.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchSpec {
    /// Unique name of the app.
    pub name: String,

    /// Program to execute.
    #[serde(rename = "script")]
    pub command: String,

    /// Argument line passed to the program, kept exactly as written.
    #[serde(rename = "args", default, skip_serializing_if = "String::is_empty")]
    pub arguments: String,

    /// Restart the app when files change (unsupported; must be `false`).
    #[serde(default)]
    pub watch: bool,

    /// Number of copies of the app to run.
    #[serde(default = "default_instances")]
    pub instances: u32,

    #[serde(default)]
    pub exec_mode: ExecMode,

    /// Working directory, relative to the config file's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// User to run the app as, otherwise the user that started the
    /// launcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autorestart: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,

    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_uptime: Option<u64>,

    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_delay: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_exit_codes: Vec<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_signal: Option<SignalConfig>,

    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_timeout: Option<u64>,

    /// Prefix output lines with a timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<bool>,

    /// Environment variables added to the app's environment.
    #[serde(
        rename = "env",
        default,
        deserialize_with = "deserialize_environment",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub environment: BTreeMap<String, String>,
}

fn default_instances() -> u32 {
    1
}

impl LaunchSpec {
    /// Creates a single-instance, fork-mode spec with every optional
    /// setting left at its default.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            arguments: String::new(),
            watch: false,
            instances: default_instances(),
            exec_mode: ExecMode::Fork,
            cwd: None,
            user: None,
            autorestart: None,
            max_restarts: None,
            min_uptime: None,
            restart_delay: None,
            stop_exit_codes: Vec::new(),
            kill_signal: None,
            kill_timeout: None,
            time: None,
            environment: BTreeMap::new(),
        }
    }

    /// Splits the argument line into words using POSIX shell rules.
    pub fn argv(&self) -> Result<Vec<String>, shell_words::ParseError> {
        shell_words::split(&self.arguments)
    }

    /// Returns the raw value of the `--port` argument (either
    /// `--port N` or `--port=N`), if there is one. A trailing `--port`
    /// with nothing after it yields an empty value.
    pub fn port_flag(&self) -> Result<Option<String>, shell_words::ParseError> {
        let argv = self.argv()?;
        let mut words = argv.into_iter();
        while let Some(word) = words.next() {
            if word == "--port" {
                return Ok(Some(words.next().unwrap_or_default()));
            }
            if let Some(value) = word.strip_prefix("--port=") {
                return Ok(Some(value.to_owned()));
            }
        }
        Ok(None)
    }

    /// Returns the `PORT` environment variable, if set.
    pub fn env_port(&self) -> Option<&str> {
        self.environment.get("PORT").map(String::as_str)
    }

    pub fn autorestart(&self) -> bool {
        self.autorestart.unwrap_or(true)
    }

    pub fn max_restarts(&self) -> u32 {
        self.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS)
    }

    pub fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime.unwrap_or(DEFAULT_MIN_UPTIME_MS))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay.unwrap_or(0))
    }

    pub fn kill_signal(&self) -> SignalConfig {
        self.kill_signal.unwrap_or_default()
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout.unwrap_or(DEFAULT_KILL_TIMEOUT_MS))
    }

    pub fn timestamps(&self) -> bool {
        self.time.unwrap_or(false)
    }
}

/// Environment values may be written as strings, numbers, or booleans
/// (`PORT = 3000`); they always reach the process as strings.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum EnvValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl From<EnvValue> for String {
    fn from(value: EnvValue) -> Self {
        match value {
            EnvValue::String(s) => s,
            EnvValue::Integer(i) => i.to_string(),
            EnvValue::Float(f) => f.to_string(),
            EnvValue::Boolean(b) => b.to_string(),
        }
    }
}

fn deserialize_environment<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, EnvValue>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
}
