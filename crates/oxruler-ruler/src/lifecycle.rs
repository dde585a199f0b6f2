use crate::discovery::DiscoveryService;
use crate::manager::MultiTenantManager;
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing;

/// Forwards the terminal failure of a watched subservice into a
/// channel the running phase can select on.
pub(crate) struct FailureWatcher {
    tx: mpsc::UnboundedSender<anyhow::Error>,
    rx: Mutex<mpsc::UnboundedReceiver<anyhow::Error>>,
}

impl FailureWatcher {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub(crate) fn watch(&self, service: Arc<dyn DiscoveryService>) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let err = service.failed().await;
            let _ = tx.send(err);
        });
    }

    pub(crate) async fn recv(&self) -> anyhow::Error {
        match self.rx.lock().await.recv().await {
            Some(err) => err,
            None => anyhow::anyhow!("failure watcher channel closed"),
        }
    }
}

/// The service state machine wrapping the manager.
///
/// Starting brings up the optional discovery subservice (under a
/// failure watcher) and schedules the engines; running blocks until
/// the shutdown token fires or the subservice fails terminally;
/// stopping tears the subservice and the manager down.
pub struct RulerService {
    manager: Arc<MultiTenantManager>,
    shutdown: CancellationToken,
    watcher: FailureWatcher,
}

impl RulerService {
    pub fn new(manager: Arc<MultiTenantManager>) -> Self {
        Self {
            manager,
            shutdown: CancellationToken::new(),
            watcher: FailureWatcher::new(),
        }
    }

    /// Token that moves the service from running to stopping when
    /// cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn manager(&self) -> &Arc<MultiTenantManager> {
        &self.manager
    }

    /// Drives the three phases to completion. The returned error, if
    /// any, is the discovery subservice's terminal failure.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.starting().await?;
        let result = self.running().await;
        self.stopping().await;
        result
    }

    async fn starting(&self) -> anyhow::Result<()> {
        if let Some(service) = self.manager.discovery_service() {
            self.watcher.watch(service.clone());
            service
                .start()
                .await
                .context("failed to start alertmanager discovery subservice")?;
        }
        self.manager.start().await;
        Ok(())
    }

    async fn running(&self) -> anyhow::Result<()> {
        if self.manager.discovery_service().is_some() {
            tokio::select! {
                _ = self.shutdown.cancelled() => Ok(()),
                err = self.watcher.recv() => {
                    Err(err).context("alertmanager discovery subservice failed")
                }
            }
        } else {
            self.shutdown.cancelled().await;
            Ok(())
        }
    }

    async fn stopping(&self) {
        if let Some(service) = self.manager.discovery_service() {
            if let Err(err) = service.stop().await {
                tracing::warn!(error = %err, "Failed to stop alertmanager discovery subservice");
            }
        }
        self.manager.stop().await;
    }
}
