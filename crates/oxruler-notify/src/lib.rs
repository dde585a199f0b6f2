//! Tenant-scoped alert-dispatch pipeline.
//!
//! Each tenant engine hands its firing alerts to a [`manager::NotifierManager`],
//! which queues them and delivers batches to every alertmanager in the
//! current [`config::NotifierConfig`]. Delivery itself goes through an
//! injected [`RequestExecutor`], so the same pipeline serves plain HTTP
//! dispatch and the ring-discovery path where the request is re-encoded
//! as a gRPC-carried message (see [`carrier`]).

pub mod carrier;
pub mod config;
pub mod error;
pub mod manager;

#[cfg(test)]
mod tests;

pub use error::NotifyError;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// A firing or resolved alert as posted to the alertmanager push API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "generatorURL"
    )]
    pub generator_url: Option<String>,
}

/// A transport-neutral outbound notification request. The pipeline
/// builds one per alertmanager and batch; the executor decides how it
/// travels.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: Url,
    pub headers: reqwest::header::HeaderMap,
    pub body: Vec<u8>,
}

/// Injected delivery capability.
///
/// Given the pipeline's shared HTTP client and an outbound request, the
/// executor delivers it. The ruler's executor injects the tenant id
/// header, opens a tenant-tagged tracing span, and dispatches either
/// directly over HTTP or through the gRPC carrier when the discovered
/// address is a ring member.
pub type RequestExecutor = Arc<
    dyn Fn(reqwest::Client, OutboundRequest) -> BoxFuture<'static, error::Result<()>>
        + Send
        + Sync,
>;
