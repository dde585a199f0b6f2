use std::path::PathBuf;

/// Errors from the rule mapper. Any failure is treated by the manager
/// as a per-tenant failure: the tenant's engine is not advanced and the
/// reload metric is marked unsuccessful.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("Mapper: I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mapper: failed to serialize rule group '{group}': {source}")]
    Serialize {
        group: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A structural problem with a rule group. Validation collects every
/// violation; it never aborts a sync.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid rules configuration: rule group name must not be empty")]
    EmptyGroupName,

    #[error("invalid rules configuration: rule group '{0}' has no rules")]
    NoRules(String),

    #[error(
        "invalid rules configuration: rule group '{0}' is a federated rule group, \
         but rules federation is disabled; please contact your service administrator \
         to have it enabled"
    )]
    FederationDisabled(String),

    #[error("invalid rules configuration: group '{group}', rule {index}, '{rule_name}': {message}")]
    InvalidRule {
        group: String,
        index: usize,
        rule_name: String,
        message: String,
    },
}
