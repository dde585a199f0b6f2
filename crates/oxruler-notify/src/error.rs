/// Errors that can occur within the notification pipeline.
///
/// Per-alertmanager delivery failures are logged and counted by the
/// [`crate::manager::NotifierManager`] rather than propagated; these
/// variants surface at the seams (construction, config apply, and the
/// injected request executor).
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The notifier configuration is structurally invalid (bad URL
    /// scheme, zero timeout). Applying it leaves the previous
    /// configuration in force.
    #[error("Notify: invalid notifier configuration: {0}")]
    InvalidConfig(String),

    /// An HTTP request to an alertmanager failed.
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The alertmanager answered with a non-success status code.
    #[error("Notify: alertmanager returned status {0}")]
    BadStatus(u16),

    /// Alert payload serialization failed.
    #[error("Notify: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registering the pipeline's metrics failed; indicates a duplicate
    /// construction for the same tenant.
    #[error("Notify: metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The gRPC carrier could not reach the discovered member.
    #[error("Notify: carrier transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The gRPC carrier call was rejected by the member.
    #[error("Notify: carrier call failed: {0}")]
    Carrier(#[from] tonic::Status),

    /// Generic notification error for cases not covered by other variants.
    #[error("Notify: {0}")]
    Other(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
