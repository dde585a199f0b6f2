use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Mapping from tenant id to the ordered rule groups it owns.
///
/// A tenant absent from the map owns no rules from the caller's
/// perspective. An empty group list under a tenant id means the same
/// thing during a partial sync; during a full sync it is a valid shape
/// (a tenant with an engine and no loaded rules).
pub type RuleGroupsByTenant = HashMap<String, Vec<RuleGroup>>;

/// A named collection of evaluation rules belonging to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    /// Evaluation interval override. When absent the engine falls back
    /// to the process-wide evaluation interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    pub rules: Vec<Rule>,
    /// Tenants whose series this group's queries may read. A non-empty
    /// list marks the group as federated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_tenants: Vec<String>,
}

impl RuleGroup {
    /// A federated group reads series owned by other tenants and is
    /// only accepted when tenant federation is enabled.
    pub fn is_federated(&self) -> bool {
        !self.source_tenants.is_empty()
    }
}

/// A single evaluation rule. The variant is determined by which name
/// field is present in the source document: `record` for recording
/// rules, `alert` for alerting rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rule {
    Recording(RecordingRule),
    Alerting(AlertingRule),
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::Recording(r) => &r.record,
            Rule::Alerting(r) => &r.alert,
        }
    }

    pub fn expr(&self) -> &str {
        match self {
            Rule::Recording(r) => &r.expr,
            Rule::Alerting(r) => &r.expr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingRule {
    pub record: String,
    pub expr: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertingRule {
    pub alert: String,
    pub expr: String,
    /// How long the condition must hold before the alert fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// The on-disk document written by the rule mapper and loaded by the
/// tenant engines: one file per rule group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFile {
    pub groups: Vec<RuleGroup>,
}

/// An alertmanager fleet member as reported by the membership oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// host:port of the member.
    pub address: String,
    /// Whether the member currently takes traffic.
    pub in_use: bool,
}
