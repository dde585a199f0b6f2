use async_trait::async_trait;
use oxruler_common::types::RuleGroup;
use oxruler_notify::manager::NotifierHandle;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A long-running worker evaluating one tenant's rule groups. The
/// manager owns its lifecycle but is otherwise oblivious to how it
/// evaluates; each live tenant has exactly one engine running in its
/// own task.
#[async_trait]
pub trait TenantEngine: Send + Sync {
    /// Runs the evaluation loop; blocks until `stop()` is called.
    async fn run(&self);

    /// Stops evaluation and returns once it is quiesced. Idempotent.
    async fn stop(&self);

    /// Atomically swaps the loaded rule set for the given files.
    async fn update(
        &self,
        interval: Duration,
        files: &[PathBuf],
        external_labels: BTreeMap<String, String>,
        external_url: &str,
    ) -> anyhow::Result<()>;

    /// Snapshot of the currently loaded rule groups.
    async fn groups(&self) -> Vec<RuleGroup>;
}

/// Injected constructor producing an engine bound to a tenant id, the
/// tenant's notifier handle, and its metrics sub-registry.
pub type EngineFactory = Arc<
    dyn Fn(&str, NotifierHandle, &prometheus::Registry) -> anyhow::Result<Arc<dyn TenantEngine>>
        + Send
        + Sync,
>;
