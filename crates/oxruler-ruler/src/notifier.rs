use oxruler_notify::carrier::{check_response, encode_request, CarrierClient};
use oxruler_notify::config::{DiscoveryMode, NotifierConfig};
use oxruler_notify::manager::{NotifierHandle, NotifierManager};
use oxruler_notify::{NotifyError, OutboundRequest, RequestExecutor};
use reqwest::header::HeaderValue;
use std::sync::Arc;
use tracing::Instrument;

/// Header carrying the tenant id on outbound alert notifications.
pub const TENANT_ID_HEADER: &str = "X-Scope-OrgID";

/// A tenant's notifier: the dispatch pipeline plus its driving task.
/// Created lazily alongside the tenant's first engine; unlike engines
/// it survives tenant deletion and is only halted at process shutdown.
pub struct TenantNotifier {
    manager: Arc<NotifierManager>,
}

impl TenantNotifier {
    pub fn new(manager: Arc<NotifierManager>) -> Self {
        Self { manager }
    }

    /// Launches the pipeline's driver task. Called once at creation.
    pub fn run(&self) {
        let manager = self.manager.clone();
        tokio::spawn(async move { manager.run().await });
    }

    /// Initiates shutdown. The driver drains the remaining queue and
    /// exits on its own.
    pub fn stop(&self) {
        self.manager.stop();
    }

    pub fn apply_config(&self, config: NotifierConfig) -> Result<(), NotifyError> {
        self.manager.apply_config(config)
    }

    pub fn config(&self) -> NotifierConfig {
        self.manager.config()
    }

    /// The handle engines use to submit alerts.
    pub fn handle(&self) -> NotifierHandle {
        NotifierHandle::new(self.manager.clone())
    }
}

/// The ruler's request executor: injects the tenant id header, opens a
/// tenant-tagged tracing span, and dispatches over HTTP, or over the
/// gRPC carrier when the fleet is ring-discovered.
pub fn ruler_request_executor(tenant: &str, mode: DiscoveryMode) -> RequestExecutor {
    let tenant = tenant.to_string();
    Arc::new(move |client, mut request| {
        let tenant = tenant.clone();
        Box::pin(async move {
            let span = tracing::info_span!("notify", tenant = %tenant);
            async move {
                let value = HeaderValue::from_str(&tenant).map_err(|e| {
                    NotifyError::Other(format!("tenant id is not a valid header value: {e}"))
                })?;
                request.headers.insert(TENANT_ID_HEADER, value);

                match mode {
                    DiscoveryMode::Ring => send_carried(request).await,
                    DiscoveryMode::Dns => send_http(client, request).await,
                }
            }
            .instrument(span)
            .await
        })
    })
}

async fn send_http(client: reqwest::Client, request: OutboundRequest) -> Result<(), NotifyError> {
    let response = client
        .post(request.url.clone())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::BadStatus(status.as_u16()));
    }
    Ok(())
}

/// In ring mode the discovered address is the member's gRPC endpoint,
/// so the request is re-encoded before sending. Method, URL, headers
/// and body all travel inside the carried message.
async fn send_carried(request: OutboundRequest) -> Result<(), NotifyError> {
    let authority = match (request.url.host_str(), request.url.port_or_known_default()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => {
            return Err(NotifyError::Other(format!(
                "alertmanager URL '{}' has no host",
                request.url
            )))
        }
    };

    let carried = encode_request(&request);
    let mut client = CarrierClient::connect(&authority).await?;
    let response = client.handle(carried).await?;
    check_response(&response)
}
