use prometheus::{CounterVec, Gauge, GaugeVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::Mutex;

/// The ruler's own metric families. Per-tenant series carry a `user`
/// label and are dropped when the tenant is deleted.
pub struct RulerMetrics {
    pub managers_total: Gauge,
    pub last_reload_successful: GaugeVec,
    pub last_reload_successful_timestamp: GaugeVec,
    pub config_updates_total: CounterVec,
}

impl RulerMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let managers_total = Gauge::with_opts(
            Opts::new(
                "managers_total",
                "Total number of rule evaluation engines registered and running in the ruler.",
            )
            .namespace("cortex")
            .subsystem("ruler"),
        )?;
        let last_reload_successful = GaugeVec::new(
            Opts::new(
                "config_last_reload_successful",
                "Boolean set to 1 whenever the last configuration reload attempt was successful.",
            )
            .namespace("cortex")
            .subsystem("ruler"),
            &["user"],
        )?;
        let last_reload_successful_timestamp = GaugeVec::new(
            Opts::new(
                "config_last_reload_successful_seconds",
                "Timestamp of the last successful configuration reload.",
            )
            .namespace("cortex")
            .subsystem("ruler"),
            &["user"],
        )?;
        let config_updates_total = CounterVec::new(
            Opts::new(
                "config_updates_total",
                "Total number of config updates triggered by a tenant.",
            )
            .namespace("cortex")
            .subsystem("ruler"),
            &["user"],
        )?;

        registry.register(Box::new(managers_total.clone()))?;
        registry.register(Box::new(last_reload_successful.clone()))?;
        registry.register(Box::new(last_reload_successful_timestamp.clone()))?;
        registry.register(Box::new(config_updates_total.clone()))?;

        Ok(Self {
            managers_total,
            last_reload_successful,
            last_reload_successful_timestamp,
            config_updates_total,
        })
    }

    /// Drops every per-tenant series of a deleted tenant.
    pub fn remove_tenant(&self, tenant: &str) {
        let _ = self.last_reload_successful.remove_label_values(&[tenant]);
        let _ = self
            .last_reload_successful_timestamp
            .remove_label_values(&[tenant]);
        let _ = self.config_updates_total.remove_label_values(&[tenant]);
    }
}

/// Per-tenant metrics sub-registries, created and destroyed in
/// lockstep with the tenant engines. Each engine gets its own registry
/// so a tenant's series disappear wholesale when it is deleted.
#[derive(Default)]
pub struct TenantRegistries {
    registries: Mutex<HashMap<String, Registry>>,
}

impl TenantRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tenant: &str, registry: Registry) {
        self.registries
            .lock()
            .unwrap()
            .insert(tenant.to_string(), registry);
    }

    pub fn remove(&self, tenant: &str) -> bool {
        self.registries.lock().unwrap().remove(tenant).is_some()
    }

    pub fn get(&self, tenant: &str) -> Option<Registry> {
        self.registries.lock().unwrap().get(tenant).cloned()
    }

    pub fn len(&self) -> usize {
        self.registries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
