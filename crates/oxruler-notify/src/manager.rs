use crate::config::NotifierConfig;
use crate::error::Result;
use crate::{Alert, NotifyError, OutboundRequest, RequestExecutor};
use prometheus::{Counter, Opts, Registry};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing;
use url::Url;

/// Construction parameters for a [`NotifierManager`].
pub struct NotifierOptions {
    /// Tenant the pipeline belongs to; used for log context and the
    /// `user` label on the pipeline's metrics.
    pub tenant: String,
    /// Maximum number of alerts held in the queue. When full, the
    /// oldest alert is dropped to make room.
    pub queue_capacity: usize,
    pub executor: RequestExecutor,
}

struct NotifierMetrics {
    queued: Counter,
    dropped: Counter,
    sent: Counter,
    errors: Counter,
}

impl NotifierMetrics {
    fn new(tenant: &str, registry: &Registry) -> Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace("cortex")
                .subsystem("ruler_notifier")
                .const_label("user", tenant)
        };

        let queued = Counter::with_opts(opts(
            "alerts_queued_total",
            "Total number of alerts queued for delivery.",
        ))?;
        let dropped = Counter::with_opts(opts(
            "alerts_dropped_total",
            "Total number of alerts dropped due to a full queue or no configured alertmanagers.",
        ))?;
        let sent = Counter::with_opts(opts(
            "alerts_sent_total",
            "Total number of alerts successfully delivered to an alertmanager.",
        ))?;
        let errors = Counter::with_opts(opts(
            "notification_errors_total",
            "Total number of failed notification attempts.",
        ))?;

        registry.register(Box::new(queued.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            queued,
            dropped,
            sent,
            errors,
        })
    }
}

/// A per-tenant notification pipeline: a bounded alert queue plus a
/// driver loop delivering batches to every configured alertmanager.
///
/// `send` and `apply_config` are safe to call from any task at any
/// time; `run` is driven by exactly one task (the tenant notifier's).
pub struct NotifierManager {
    tenant: String,
    queue: Mutex<VecDeque<Alert>>,
    queue_capacity: usize,
    more: Notify,
    config: RwLock<NotifierConfig>,
    client: reqwest::Client,
    executor: RequestExecutor,
    stop: CancellationToken,
    metrics: NotifierMetrics,
}

impl NotifierManager {
    pub fn new(options: NotifierOptions, registry: &Registry) -> Result<Self> {
        Ok(Self {
            metrics: NotifierMetrics::new(&options.tenant, registry)?,
            tenant: options.tenant,
            queue: Mutex::new(VecDeque::new()),
            queue_capacity: options.queue_capacity.max(1),
            more: Notify::new(),
            config: RwLock::new(NotifierConfig::default()),
            client: reqwest::Client::new(),
            executor: options.executor,
            stop: CancellationToken::new(),
        })
    }

    /// Enqueues alerts for delivery. When the queue is full the oldest
    /// alerts are evicted first.
    pub fn send(&self, alerts: Vec<Alert>) {
        if alerts.is_empty() {
            return;
        }

        let count = alerts.len();
        {
            let mut queue = self.queue.lock().unwrap();
            for alert in alerts {
                if queue.len() >= self.queue_capacity {
                    queue.pop_front();
                    self.metrics.dropped.inc();
                    tracing::warn!(
                        tenant = %self.tenant,
                        "Notification queue is full, dropping the oldest alert"
                    );
                }
                queue.push_back(alert);
            }
        }
        self.metrics.queued.inc_by(count as f64);
        self.more.notify_one();
    }

    /// Swaps in a new configuration without touching the queue. An
    /// invalid configuration is rejected and the previous one stays in
    /// force.
    pub fn apply_config(&self, config: NotifierConfig) -> Result<()> {
        config.validate()?;
        *self.config.write().unwrap() = config;
        Ok(())
    }

    /// Snapshot of the currently applied configuration.
    pub fn config(&self) -> NotifierConfig {
        self.config.read().unwrap().clone()
    }

    /// Signals the driver loop to drain and halt. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// The driver loop. Returns after `stop()`, once the remaining
    /// queue has been drained.
    pub async fn run(&self) {
        tracing::debug!(tenant = %self.tenant, "Notifier driver started");
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = self.more.notified() => self.drain_queue().await,
            }
        }
        // Deliver whatever was queued before the stop signal.
        self.drain_queue().await;
        tracing::debug!(tenant = %self.tenant, "Notifier driver stopped");
    }

    async fn drain_queue(&self) {
        loop {
            let batch: Vec<Alert> = {
                let mut queue = self.queue.lock().unwrap();
                if queue.is_empty() {
                    return;
                }
                queue.drain(..).collect()
            };
            self.dispatch(&batch).await;
        }
    }

    async fn dispatch(&self, alerts: &[Alert]) {
        let config = self.config();
        if config.alertmanagers.is_empty() {
            self.metrics.dropped.inc_by(alerts.len() as f64);
            tracing::debug!(
                tenant = %self.tenant,
                count = alerts.len(),
                "No alertmanagers configured, dropping alerts"
            );
            return;
        }

        let body = match serde_json::to_vec(alerts) {
            Ok(body) => body,
            Err(err) => {
                self.metrics.errors.inc();
                tracing::error!(
                    tenant = %self.tenant,
                    error = %err,
                    "Failed to encode alert payload"
                );
                return;
            }
        };

        for am in &config.alertmanagers {
            let url = match push_url(&am.url) {
                Ok(url) => url,
                Err(err) => {
                    self.metrics.errors.inc();
                    tracing::error!(
                        tenant = %self.tenant,
                        alertmanager = %am.url,
                        error = %err,
                        "Unusable alertmanager URL"
                    );
                    continue;
                }
            };

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            let request = OutboundRequest {
                url,
                headers,
                body: body.clone(),
            };

            let delivery = (self.executor)(self.client.clone(), request);
            match tokio::time::timeout(am.timeout, delivery).await {
                Ok(Ok(())) => self.metrics.sent.inc_by(alerts.len() as f64),
                Ok(Err(err)) => {
                    self.metrics.errors.inc();
                    tracing::warn!(
                        tenant = %self.tenant,
                        alertmanager = %am.url,
                        error = %err,
                        "Failed to send alerts to alertmanager"
                    );
                }
                Err(_) => {
                    self.metrics.errors.inc();
                    tracing::warn!(
                        tenant = %self.tenant,
                        alertmanager = %am.url,
                        "Timed out sending alerts to alertmanager"
                    );
                }
            }
        }
    }
}

/// The alert push endpoint for an alertmanager base URL. The base may
/// carry a path prefix, so the endpoint is appended textually rather
/// than via `Url::join`.
pub(crate) fn push_url(base: &Url) -> Result<Url> {
    let joined = format!("{}/api/v2/alerts", base.as_str().trim_end_matches('/'));
    Url::parse(&joined)
        .map_err(|e| NotifyError::InvalidConfig(format!("invalid alertmanager URL '{base}': {e}")))
}

/// The cheap, cloneable handle a tenant engine uses to submit alerts.
#[derive(Clone)]
pub struct NotifierHandle {
    manager: Arc<NotifierManager>,
}

impl NotifierHandle {
    pub fn new(manager: Arc<NotifierManager>) -> Self {
        Self { manager }
    }

    pub fn send(&self, alerts: Vec<Alert>) {
        self.manager.send(alerts);
    }
}
