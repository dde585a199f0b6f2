use oxruler_notify::config::DiscoveryMode;
use serde::Deserialize;
use url::Url;

/// Static configuration for the ruler process.
#[derive(Debug, Clone, Deserialize)]
pub struct RulerConfig {
    /// Root of the local scratch area rule files are materialised
    /// under. Must not be shared across process instances.
    #[serde(default = "default_rule_path")]
    pub rule_path: String,

    #[serde(default = "default_notification_queue_capacity")]
    pub notification_queue_capacity: usize,

    /// Default evaluation interval handed to tenant engines; groups
    /// may override it per group.
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,

    /// External URL advertised in alert source links.
    #[serde(default)]
    pub external_url: String,

    /// Whether rule groups may read series owned by other tenants.
    #[serde(default)]
    pub tenant_federation_enabled: bool,

    #[serde(default)]
    pub alertmanager_mode: DiscoveryMode,

    /// Static alertmanager URL list, used in dns mode.
    #[serde(default)]
    pub alertmanager_urls: Vec<String>,

    #[serde(default = "default_alertmanager_refresh_secs")]
    pub alertmanager_refresh_secs: u64,

    /// HTTP path prefix appended when keying ring-discovered members.
    #[serde(default = "default_alertmanager_http_prefix")]
    pub alertmanager_http_prefix: String,

    #[serde(default = "default_notification_timeout_secs")]
    pub notification_timeout_secs: u64,
}

fn default_rule_path() -> String {
    "data/rules".to_string()
}

fn default_notification_queue_capacity() -> usize {
    10000
}

fn default_evaluation_interval_secs() -> u64 {
    60
}

fn default_alertmanager_refresh_secs() -> u64 {
    30
}

fn default_alertmanager_http_prefix() -> String {
    "/alertmanager".to_string()
}

fn default_notification_timeout_secs() -> u64 {
    10
}

impl Default for RulerConfig {
    fn default() -> Self {
        Self {
            rule_path: default_rule_path(),
            notification_queue_capacity: default_notification_queue_capacity(),
            evaluation_interval_secs: default_evaluation_interval_secs(),
            external_url: String::new(),
            tenant_federation_enabled: false,
            alertmanager_mode: DiscoveryMode::default(),
            alertmanager_urls: Vec::new(),
            alertmanager_refresh_secs: default_alertmanager_refresh_secs(),
            alertmanager_http_prefix: default_alertmanager_http_prefix(),
            notification_timeout_secs: default_notification_timeout_secs(),
        }
    }
}

impl RulerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rule_path.is_empty() {
            anyhow::bail!("rule_path must not be empty");
        }
        if self.notification_timeout_secs == 0 {
            anyhow::bail!("notification_timeout_secs must be greater than zero");
        }
        for raw in &self.alertmanager_urls {
            Url::parse(raw)
                .map_err(|e| anyhow::anyhow!("invalid alertmanager URL '{raw}': {e}"))?;
        }
        Ok(())
    }
}
