use crate::config::RulerConfig;
use anyhow::Context;
use async_trait::async_trait;
use oxruler_common::types::Instance;
use oxruler_notify::config::{AlertmanagerConfig, NotifierConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A discovery entry for one alertmanager endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEntry {
    /// host:port the endpoint resolves to.
    pub address: String,
    pub refresh_interval: Duration,
}

/// Process-wide map from endpoint key to its discovery entry. Keys are
/// full URLs: the static list in dns mode,
/// `http://{addr}{http_prefix}` for ring members.
pub type DiscoveryConfigs = HashMap<String, DiscoveryEntry>;

/// Synthesises entries from the static URL list. Used once at startup
/// when the fleet is dns-discovered.
pub fn build_discovery_configs(
    urls: &[String],
    refresh_interval: Duration,
    configs: &mut DiscoveryConfigs,
) -> anyhow::Result<()> {
    for raw in urls {
        let url = Url::parse(raw).with_context(|| format!("invalid alertmanager URL '{raw}'"))?;
        let host = url
            .host_str()
            .with_context(|| format!("alertmanager URL '{raw}' has no host"))?;
        let address = match url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        configs.insert(
            url.to_string(),
            DiscoveryEntry {
                address,
                refresh_interval,
            },
        );
    }
    Ok(())
}

/// Builds the notifier configuration from the static ruler config and
/// the current discovery entries. The output is sorted so repeated
/// builds over the same entries compare equal.
pub fn build_notifier_config(
    cfg: &RulerConfig,
    discovery: &DiscoveryConfigs,
) -> anyhow::Result<NotifierConfig> {
    let mut alertmanagers = Vec::with_capacity(discovery.len());
    for key in discovery.keys() {
        let url =
            Url::parse(key).with_context(|| format!("invalid alertmanager endpoint key '{key}'"))?;
        alertmanagers.push(AlertmanagerConfig {
            url,
            timeout: Duration::from_secs(cfg.notification_timeout_secs),
            mode: cfg.alertmanager_mode,
        });
    }
    alertmanagers.sort_by(|a, b| a.url.as_str().cmp(b.url.as_str()));

    let config = NotifierConfig { alertmanagers };
    config
        .validate()
        .context("built notifier configuration is invalid")?;
    Ok(config)
}

/// Membership listener surface. The manager implements this and hands
/// itself to the ring subservice; `instance_changed` is defined as
/// added-if-in-use, removed otherwise.
#[async_trait]
pub trait InstanceEventListener: Send + Sync {
    async fn instance_added(&self, instance: &Instance);
    async fn instance_removed(&self, instance: &Instance);
    async fn instance_changed(&self, instance: &Instance);
}

/// The optional child subservice driving ring membership events.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Starts the subservice; returns once it is running. No listener
    /// event may be emitted before this returns.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stops the subservice and waits for it to terminate.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Resolves with the subservice's terminal failure. Pending
    /// forever while the subservice is healthy.
    async fn failed(&self) -> anyhow::Error;
}

/// Constructor for the ring subservice. Receives the listener (the
/// manager itself) so membership callbacks can reach back into it.
pub type DiscoveryServiceBuilder =
    Box<dyn FnOnce(Arc<dyn InstanceEventListener>) -> anyhow::Result<Arc<dyn DiscoveryService>> + Send>;
