//! Signal configuration.

use serde::{Deserialize, Serialize};

/// Signal sent to an app's process group when it is asked to stop.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub enum SignalConfig {
    SIGHUP,
    SIGINT,
    SIGQUIT,
    SIGTERM,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self::SIGINT
    }
}

impl From<SignalConfig> for nix::sys::signal::Signal {
    fn from(signal: SignalConfig) -> Self {
        match signal {
            SignalConfig::SIGHUP => Self::SIGHUP,
            SignalConfig::SIGINT => Self::SIGINT,
            SignalConfig::SIGQUIT => Self::SIGQUIT,
            SignalConfig::SIGTERM => Self::SIGTERM,
        }
    }
}
