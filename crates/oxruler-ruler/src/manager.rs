use crate::config::RulerConfig;
use crate::discovery::{
    build_discovery_configs, build_notifier_config, DiscoveryConfigs, DiscoveryEntry,
    DiscoveryService, DiscoveryServiceBuilder, InstanceEventListener,
};
use crate::engine::{EngineFactory, TenantEngine};
use crate::error::ValidationError;
use crate::mapper::RuleMapper;
use crate::metrics::{RulerMetrics, TenantRegistries};
use crate::notifier::{ruler_request_executor, TenantNotifier};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use oxruler_common::types::{Instance, Rule, RuleGroup, RuleGroupsByTenant};
use oxruler_notify::config::{DiscoveryMode, NotifierConfig};
use oxruler_notify::manager::{NotifierHandle, NotifierManager, NotifierOptions};
use prometheus::Registry;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing;

/// Upper bound on tenants synced in parallel within one sync call.
const MAX_SYNC_CONCURRENCY: usize = 10;

/// Marker error for a sync fan-out interrupted by cancellation; the
/// only error a fan-out can produce.
struct SyncCancelled;

struct NotifierState {
    /// The currently applied notifier configuration. Guarded together
    /// with the notifiers map so a new notifier always observes the
    /// config every existing notifier observes.
    config: NotifierConfig,
    notifiers: HashMap<String, TenantNotifier>,
}

/// The synchronisation engine: reconciles an authoritative
/// tenant→rule-groups map against the live set of tenant engines and
/// notifiers, and follows the alertmanager fleet through the
/// discovery layer.
///
/// Lock order, outermost first: discovery, notifiers, engines. The
/// only nested acquisition is `update_notifier_config`, which takes
/// the notifiers lock while the discovery lock is held.
pub struct MultiTenantManager {
    cfg: RulerConfig,

    discovery: Mutex<DiscoveryConfigs>,
    discovery_service: StdMutex<Option<Arc<dyn DiscoveryService>>>,

    engine_factory: EngineFactory,
    mapper: RuleMapper,

    engines: RwLock<HashMap<String, Arc<dyn TenantEngine>>>,
    tenant_registries: TenantRegistries,

    notifiers: Mutex<NotifierState>,

    metrics: RulerMetrics,
    registry: Registry,

    /// Read on the engine-creation hot path; written only under the
    /// engines write lock in `start()`.
    running: AtomicBool,
}

impl MultiTenantManager {
    /// Builds the manager. In ring mode the given builder constructs
    /// the membership subservice with the manager itself as its
    /// listener; the subservice must not emit events before its own
    /// start completes.
    pub fn new(
        cfg: RulerConfig,
        engine_factory: EngineFactory,
        ring_builder: Option<DiscoveryServiceBuilder>,
        registry: &Registry,
    ) -> anyhow::Result<Arc<Self>> {
        cfg.validate()?;
        let metrics =
            RulerMetrics::new(registry).context("failed to register ruler metrics")?;

        let mut discovery = DiscoveryConfigs::new();
        match cfg.alertmanager_mode {
            DiscoveryMode::Ring => {
                tracing::info!("Using ring based alertmanager discovery");
            }
            DiscoveryMode::Dns => {
                tracing::info!("Using dns based alertmanager discovery");
                build_discovery_configs(
                    &cfg.alertmanager_urls,
                    Duration::from_secs(cfg.alertmanager_refresh_secs),
                    &mut discovery,
                )?;
            }
        }

        let notifier_config = build_notifier_config(&cfg, &discovery)?;
        let mapper = RuleMapper::new(&cfg.rule_path);

        let manager = Arc::new(Self {
            cfg,
            discovery: Mutex::new(discovery),
            discovery_service: StdMutex::new(None),
            engine_factory,
            mapper,
            engines: RwLock::new(HashMap::new()),
            tenant_registries: TenantRegistries::new(),
            notifiers: Mutex::new(NotifierState {
                config: notifier_config,
                notifiers: HashMap::new(),
            }),
            metrics,
            registry: registry.clone(),
            running: AtomicBool::new(false),
        });

        if manager.cfg.alertmanager_mode == DiscoveryMode::Ring {
            if let Some(builder) = ring_builder {
                let listener: Arc<dyn InstanceEventListener> = manager.clone();
                let service = builder(listener)?;
                *manager.discovery_service.lock().unwrap() = Some(service);
            }
        }

        Ok(manager)
    }

    pub(crate) fn discovery_service(&self) -> Option<Arc<dyn DiscoveryService>> {
        self.discovery_service.lock().unwrap().clone()
    }

    /// Reconciles against an authoritative full snapshot: after this
    /// returns, no engine exists for a tenant missing from `by_tenant`.
    ///
    /// Not safe to call concurrently with itself or with
    /// `sync_partial`; a single synchroniser is assumed.
    pub async fn sync_full(
        self: &Arc<Self>,
        token: &CancellationToken,
        by_tenant: &RuleGroupsByTenant,
    ) {
        let by_tenant = self.federation_filtered(by_tenant);

        let work: Vec<(String, Vec<RuleGroup>)> = by_tenant
            .iter()
            .map(|(tenant, groups)| (tenant.clone(), groups.clone()))
            .collect();

        if self
            .sync_rule_groups_concurrently(token, work)
            .await
            .is_err()
        {
            // The only error the fan-out can return is cancellation.
            return;
        }

        self.remove_tenants_if(|tenant| !by_tenant.contains_key(tenant))
            .await;
    }

    /// Delta-style reconciliation: a tenant present with an empty group
    /// list is deleted, an absent tenant is left untouched.
    ///
    /// Not safe to call concurrently with itself or with `sync_full`.
    pub async fn sync_partial(
        self: &Arc<Self>,
        token: &CancellationToken,
        by_tenant: &RuleGroupsByTenant,
    ) {
        let by_tenant = self.federation_filtered(by_tenant);
        let (work, removed) = filter_not_empty_tenants(&by_tenant);

        if self
            .sync_rule_groups_concurrently(token, work)
            .await
            .is_err()
        {
            return;
        }

        self.remove_tenants_if(|tenant| removed.contains(tenant))
            .await;
    }

    fn federation_filtered<'a>(
        &self,
        by_tenant: &'a RuleGroupsByTenant,
    ) -> Cow<'a, RuleGroupsByTenant> {
        if self.cfg.tenant_federation_enabled {
            Cow::Borrowed(by_tenant)
        } else {
            Cow::Owned(remove_federated_rule_groups(by_tenant))
        }
    }

    /// Fans the per-tenant work out with bounded parallelism. A tenant
    /// whose work has started runs to completion even when the token
    /// fires: rule files and engine state must not diverge.
    async fn sync_rule_groups_concurrently(
        self: &Arc<Self>,
        token: &CancellationToken,
        work: Vec<(String, Vec<RuleGroup>)>,
    ) -> Result<(), SyncCancelled> {
        let semaphore = Arc::new(Semaphore::new(MAX_SYNC_CONCURRENCY));
        let mut handles = Vec::with_capacity(work.len());
        let mut cancelled = false;

        for (tenant, groups) in work {
            let permit = tokio::select! {
                // Cancellation wins over an available permit, so no new
                // tenant work is dispatched after the token fires.
                biased;
                _ = token.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    // The semaphore is never closed.
                    Err(_) => break,
                },
            };

            let manager = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                manager.sync_tenant(&tenant, &groups).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        // The gauge is refreshed even when the fan-out was cut short.
        let engines = self.engines.read().await;
        self.metrics.managers_total.set(engines.len() as f64);
        drop(engines);

        if cancelled {
            Err(SyncCancelled)
        } else {
            Ok(())
        }
    }

    /// Maps one tenant's rules to disk and advances its engine. Every
    /// failure is isolated to the tenant: it is logged, reflected in
    /// the reload metric, and never aborts the surrounding sync.
    async fn sync_tenant(self: &Arc<Self>, tenant: &str, groups: &[RuleGroup]) {
        let (changed, files) = match self.mapper.map_rules(tenant, groups) {
            Ok(mapped) => mapped,
            Err(err) => {
                self.metrics
                    .last_reload_successful
                    .with_label_values(&[tenant])
                    .set(0.0);
                tracing::error!(
                    tenant = %tenant,
                    error = %err,
                    "Unable to map rule files to disk"
                );
                return;
            }
        };

        let (engine, created) = match self.get_or_create_engine(tenant).await {
            Ok(engine) => engine,
            Err(err) => {
                self.metrics
                    .last_reload_successful
                    .with_label_values(&[tenant])
                    .set(0.0);
                tracing::error!(
                    tenant = %tenant,
                    error = %err,
                    "Unable to create rule evaluation engine"
                );
                return;
            }
        };

        // The engine only needs an update when it was just created or
        // the on-disk rules moved.
        if !(created || changed) {
            tracing::debug!(tenant = %tenant, "Rules have not changed, skipping engine update");
            return;
        }

        tracing::debug!(tenant = %tenant, "Updating rules");
        self.metrics
            .config_updates_total
            .with_label_values(&[tenant])
            .inc();

        let interval = Duration::from_secs(self.cfg.evaluation_interval_secs);
        if let Err(err) = engine
            .update(
                interval,
                &files,
                std::collections::BTreeMap::new(),
                &self.cfg.external_url,
            )
            .await
        {
            self.metrics
                .last_reload_successful
                .with_label_values(&[tenant])
                .set(0.0);
            tracing::error!(
                tenant = %tenant,
                error = %err,
                "Unable to update rule evaluation engine"
            );
            return;
        }

        self.metrics
            .last_reload_successful
            .with_label_values(&[tenant])
            .set(1.0);
        self.metrics
            .last_reload_successful_timestamp
            .with_label_values(&[tenant])
            .set(Utc::now().timestamp() as f64);
    }

    /// Double-checked engine lookup. Syncs run frequently, so the
    /// engine usually exists and the read lock suffices.
    async fn get_or_create_engine(
        self: &Arc<Self>,
        tenant: &str,
    ) -> anyhow::Result<(Arc<dyn TenantEngine>, bool)> {
        {
            let engines = self.engines.read().await;
            if let Some(engine) = engines.get(tenant) {
                return Ok((engine.clone(), false));
            }
        }

        // The notifier is created before the engines write lock is
        // taken: the notifiers lock is ordered before the engines lock.
        let notifier = self.get_or_create_notifier(tenant).await?;

        let mut engines = self.engines.write().await;
        if let Some(engine) = engines.get(tenant) {
            return Ok((engine.clone(), false));
        }

        tracing::debug!(tenant = %tenant, "Creating rule evaluation engine");
        let registry = Registry::new();
        let engine = (self.engine_factory)(tenant, notifier, &registry)?;
        self.tenant_registries.add(tenant, registry);

        // Engines created while the service is not yet running stay
        // dormant until start() scans the map.
        if self.running.load(Ordering::SeqCst) {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await });
        }

        engines.insert(tenant.to_string(), engine.clone());
        Ok((engine, true))
    }

    /// Lazily creates the tenant's notifier: pipeline, driver task and
    /// metrics, with the current notifier configuration applied before
    /// the entry is published.
    async fn get_or_create_notifier(self: &Arc<Self>, tenant: &str) -> anyhow::Result<NotifierHandle> {
        let mut state = self.notifiers.lock().await;
        if let Some(notifier) = state.notifiers.get(tenant) {
            return Ok(notifier.handle());
        }

        let manager = NotifierManager::new(
            NotifierOptions {
                tenant: tenant.to_string(),
                queue_capacity: self.cfg.notification_queue_capacity,
                executor: ruler_request_executor(tenant, self.cfg.alertmanager_mode),
            },
            &self.registry,
        )?;
        let notifier = TenantNotifier::new(Arc::new(manager));
        notifier.run();

        // The stored config was validated when it was built, so a
        // failure here is a programming mistake and is returned.
        notifier
            .apply_config(state.config.clone())
            .context("failed to apply initial notifier configuration")?;

        let handle = notifier.handle();
        state.notifiers.insert(tenant.to_string(), notifier);
        Ok(handle)
    }

    /// Stops and removes every engine the predicate selects, cleaning
    /// its rule files, metric series and sub-registry.
    async fn remove_tenants_if<F>(&self, should_remove: F)
    where
        F: Fn(&str) -> bool,
    {
        let mut engines = self.engines.write().await;
        engines.retain(|tenant, engine| {
            if !should_remove(tenant) {
                return true;
            }

            // Stop is fire and forget here; engines are only awaited at
            // process shutdown.
            let engine = engine.clone();
            tokio::spawn(async move { engine.stop().await });

            self.mapper.cleanup_tenant(tenant);
            self.metrics.remove_tenant(tenant);
            self.tenant_registries.remove(tenant);
            tracing::info!(tenant = %tenant, "Deleted rule evaluation engine and local rule files");
            false
        });

        self.metrics.managers_total.set(engines.len() as f64);
    }

    /// Transitions to running: schedules every already-created engine
    /// and marks the manager so later engines are scheduled on
    /// creation. Idempotent.
    pub async fn start(&self) {
        let engines = self.engines.write().await;

        if self.running.load(Ordering::SeqCst) {
            return;
        }

        for engine in engines.values() {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await });
        }
        self.running.store(true, Ordering::SeqCst);
    }

    /// Halts all notifiers, stops and awaits every engine, then removes
    /// the on-disk scratch area.
    pub async fn stop(&self) {
        {
            let state = self.notifiers.lock().await;
            for notifier in state.notifiers.values() {
                notifier.stop();
            }
        }

        tracing::info!("Stopping tenant engines");
        let mut engines = self.engines.write().await;
        let mut stops = Vec::with_capacity(engines.len());
        for (tenant, engine) in engines.drain() {
            tracing::debug!(tenant = %tenant, "Shutting down tenant engine");
            stops.push(tokio::spawn(async move {
                engine.stop().await;
                tracing::debug!(tenant = %tenant, "Tenant engine shut down");
            }));
        }
        for stop in stops {
            let _ = stop.await;
        }
        drop(engines);
        tracing::info!("All tenant engines stopped");

        self.mapper.cleanup();
    }

    /// Snapshot of the rule groups currently loaded for a tenant;
    /// empty when the tenant has no engine.
    pub async fn rules(&self, tenant: &str) -> Vec<RuleGroup> {
        let engine = {
            let engines = self.engines.read().await;
            engines.get(tenant).cloned()
        };
        match engine {
            Some(engine) => engine.groups().await,
            None => Vec::new(),
        }
    }

    /// Structural validation of a rule group. Collects every violation
    /// found; rule-level problems do not mask one another.
    pub fn validate_rule_group(&self, group: &RuleGroup) -> Vec<ValidationError> {
        let mut errs = Vec::new();

        if group.name.is_empty() {
            errs.push(ValidationError::EmptyGroupName);
            return errs;
        }

        if group.rules.is_empty() {
            errs.push(ValidationError::NoRules(group.name.clone()));
            return errs;
        }

        if !self.cfg.tenant_federation_enabled && group.is_federated() {
            errs.push(ValidationError::FederationDisabled(group.name.clone()));
        }

        for (index, rule) in group.rules.iter().enumerate() {
            for message in validate_rule(rule) {
                errs.push(ValidationError::InvalidRule {
                    group: group.name.clone(),
                    index,
                    rule_name: rule.name().to_string(),
                    message,
                });
            }
        }

        errs
    }

    fn alertmanager_http_address(&self, instance: &Instance) -> String {
        format!(
            "http://{}{}",
            instance.address, self.cfg.alertmanager_http_prefix
        )
    }

    /// Rebuilds the notifier configuration from the given discovery
    /// entries and applies it to every live notifier. Called with the
    /// discovery lock held; takes the notifiers lock (the one nested
    /// pair, in declared order).
    async fn update_notifier_config(&self, discovery: &DiscoveryConfigs) {
        let config = match build_notifier_config(&self.cfg, discovery) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "Unable to build updated notifier configuration");
                return;
            }
        };

        let mut state = self.notifiers.lock().await;
        state.config = config;
        for (tenant, notifier) in state.notifiers.iter() {
            if let Err(err) = notifier.apply_config(state.config.clone()) {
                tracing::error!(
                    tenant = %tenant,
                    error = %err,
                    "Unable to update notifier configuration"
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn engine_count(&self) -> usize {
        self.engines.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn notifier_config_for(&self, tenant: &str) -> Option<NotifierConfig> {
        let state = self.notifiers.lock().await;
        state.notifiers.get(tenant).map(|n| n.config())
    }

    #[cfg(test)]
    pub(crate) fn has_tenant_registry(&self, tenant: &str) -> bool {
        self.tenant_registries.get(tenant).is_some()
    }
}

#[async_trait]
impl InstanceEventListener for MultiTenantManager {
    async fn instance_added(&self, instance: &Instance) {
        if !instance.in_use {
            return;
        }
        let mut discovery = self.discovery.lock().await;
        tracing::info!(address = %instance.address, "Adding alertmanager instance");
        discovery.insert(
            self.alertmanager_http_address(instance),
            DiscoveryEntry {
                address: instance.address.clone(),
                refresh_interval: Duration::from_secs(self.cfg.alertmanager_refresh_secs),
            },
        );
        self.update_notifier_config(&discovery).await;
    }

    async fn instance_removed(&self, instance: &Instance) {
        let mut discovery = self.discovery.lock().await;
        tracing::info!(address = %instance.address, "Removing alertmanager instance");
        discovery.remove(&self.alertmanager_http_address(instance));
        self.update_notifier_config(&discovery).await;
    }

    async fn instance_changed(&self, instance: &Instance) {
        if instance.in_use {
            self.instance_added(instance).await;
        } else {
            self.instance_removed(instance).await;
        }
    }
}

/// Strips federated rule groups from a copy of the input. The caller's
/// map is never mutated, in case it caches the rule groups.
fn remove_federated_rule_groups(by_tenant: &RuleGroupsByTenant) -> RuleGroupsByTenant {
    let mut filtered = RuleGroupsByTenant::with_capacity(by_tenant.len());
    for (tenant, groups) in by_tenant {
        let kept: Vec<RuleGroup> = groups
            .iter()
            .filter(|group| {
                if group.is_federated() {
                    tracing::warn!(
                        tenant = %tenant,
                        group = %group.name,
                        "Dropping federated rule group; tenant federation is disabled"
                    );
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        filtered.insert(tenant.clone(), kept);
    }
    filtered
}

/// Splits the input into tenants that still own rule groups and the
/// set marked for deletion by an empty group list.
fn filter_not_empty_tenants(
    by_tenant: &RuleGroupsByTenant,
) -> (Vec<(String, Vec<RuleGroup>)>, HashSet<String>) {
    let mut work = Vec::with_capacity(by_tenant.len());
    let mut removed = HashSet::new();
    for (tenant, groups) in by_tenant {
        if groups.is_empty() {
            removed.insert(tenant.clone());
        } else {
            work.push((tenant.clone(), groups.clone()));
        }
    }
    (work, removed)
}

fn validate_rule(rule: &Rule) -> Vec<String> {
    let mut errs = Vec::new();
    match rule {
        Rule::Recording(r) => {
            if r.record.is_empty() {
                errs.push("field 'record' must be set".to_string());
            }
        }
        Rule::Alerting(r) => {
            if r.alert.is_empty() {
                errs.push("field 'alert' must be set".to_string());
            }
        }
    }
    if rule.expr().is_empty() {
        errs.push("field 'expr' must be set".to_string());
    }
    errs
}
