use crate::error::{NotifyError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// How the alertmanager fleet is discovered. Selected once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Endpoints come from a static URL list resolved via DNS.
    Dns,
    /// Endpoints come from live ring membership events; outbound
    /// requests travel over the gRPC carrier.
    Ring,
}

impl Default for DiscoveryMode {
    fn default() -> Self {
        DiscoveryMode::Dns
    }
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryMode::Dns => write!(f, "dns"),
            DiscoveryMode::Ring => write!(f, "ring"),
        }
    }
}

impl std::str::FromStr for DiscoveryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dns" => Ok(DiscoveryMode::Dns),
            "ring" => Ok(DiscoveryMode::Ring),
            _ => Err(format!("unknown discovery mode: {s}")),
        }
    }
}

/// A single alertmanager target within a [`NotifierConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct AlertmanagerConfig {
    /// Base URL of the member, including any HTTP path prefix.
    pub url: Url,
    pub timeout: Duration,
    pub mode: DiscoveryMode,
}

/// The process-wide notifier configuration: the derived product of the
/// static ruler configuration and the current discovery entries.
/// Rebuilt in full on every membership change and applied to every live
/// tenant notifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifierConfig {
    pub alertmanagers: Vec<AlertmanagerConfig>,
}

impl NotifierConfig {
    /// An empty alertmanager set is valid (alerts are dropped); a
    /// target with an unusable scheme or a zero timeout is not.
    pub fn validate(&self) -> Result<()> {
        for am in &self.alertmanagers {
            match am.url.scheme() {
                "http" | "https" => {}
                other => {
                    return Err(NotifyError::InvalidConfig(format!(
                        "unsupported scheme '{other}' in alertmanager URL '{}'",
                        am.url
                    )))
                }
            }
            if am.timeout.is_zero() {
                return Err(NotifyError::InvalidConfig(format!(
                    "notification timeout for '{}' must be greater than zero",
                    am.url
                )));
            }
        }
        Ok(())
    }
}
