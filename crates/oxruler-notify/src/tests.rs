use crate::carrier::{check_response, encode_request, HttpResponsePb};
use crate::config::{AlertmanagerConfig, DiscoveryMode, NotifierConfig};
use crate::manager::{push_url, NotifierManager, NotifierOptions};
use crate::{Alert, OutboundRequest, RequestExecutor};
use chrono::Utc;
use prometheus::Registry;
use reqwest::header::{HeaderMap, HeaderValue};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

fn alert(name: &str) -> Alert {
    let mut labels = BTreeMap::new();
    labels.insert("alertname".to_string(), name.to_string());
    Alert {
        labels,
        annotations: BTreeMap::new(),
        starts_at: Utc::now(),
        ends_at: None,
        generator_url: None,
    }
}

fn alertmanager(url: &str) -> AlertmanagerConfig {
    AlertmanagerConfig {
        url: Url::parse(url).unwrap(),
        timeout: Duration::from_secs(5),
        mode: DiscoveryMode::Dns,
    }
}

fn recording_executor(seen: Arc<Mutex<Vec<OutboundRequest>>>) -> RequestExecutor {
    Arc::new(move |_client, request| {
        let seen = seen.clone();
        Box::pin(async move {
            seen.lock().unwrap().push(request);
            Ok(())
        })
    })
}

fn new_manager(tenant: &str, capacity: usize, seen: Arc<Mutex<Vec<OutboundRequest>>>) -> NotifierManager {
    NotifierManager::new(
        NotifierOptions {
            tenant: tenant.to_string(),
            queue_capacity: capacity,
            executor: recording_executor(seen),
        },
        &Registry::new(),
    )
    .unwrap()
}

#[test]
fn push_url_appends_endpoint_to_prefix() {
    let base = Url::parse("http://10.0.0.1:9094/alertmanager").unwrap();
    assert_eq!(
        push_url(&base).unwrap().as_str(),
        "http://10.0.0.1:9094/alertmanager/api/v2/alerts"
    );

    let bare = Url::parse("http://am.example.com:9093").unwrap();
    assert_eq!(
        push_url(&bare).unwrap().as_str(),
        "http://am.example.com:9093/api/v2/alerts"
    );
}

#[tokio::test]
async fn queue_overflow_drops_oldest() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let manager = new_manager("tenant-1", 2, seen.clone());
    manager
        .apply_config(NotifierConfig {
            alertmanagers: vec![alertmanager("http://am.example.com:9093")],
        })
        .unwrap();

    manager.send(vec![alert("first"), alert("second"), alert("third")]);
    manager.stop();
    manager.run().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let alerts: Vec<Alert> = serde_json::from_slice(&seen[0].body).unwrap();
    let names: Vec<&str> = alerts
        .iter()
        .map(|a| a.labels["alertname"].as_str())
        .collect();
    assert_eq!(names, vec!["second", "third"]);
}

#[test]
fn apply_config_rejects_zero_timeout() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let manager = new_manager("tenant-1", 16, seen);

    let mut am = alertmanager("http://am.example.com:9093");
    am.timeout = Duration::ZERO;
    let result = manager.apply_config(NotifierConfig {
        alertmanagers: vec![am],
    });
    assert!(result.is_err());

    // The previous (empty) configuration stays in force.
    assert!(manager.config().alertmanagers.is_empty());
}

#[test]
fn apply_config_rejects_bad_scheme() {
    let config = NotifierConfig {
        alertmanagers: vec![alertmanager("ftp://am.example.com")],
    };
    assert!(config.validate().is_err());
}

#[tokio::test]
async fn run_delivers_queued_alerts() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let manager = Arc::new(new_manager("tenant-1", 16, seen.clone()));
    manager
        .apply_config(NotifierConfig {
            alertmanagers: vec![alertmanager("http://am.example.com:9093/am")],
        })
        .unwrap();

    let driver = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run().await })
    };

    manager.send(vec![alert("HighCpu")]);
    for _ in 0..100 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    manager.stop();
    driver.await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0].url.as_str(),
        "http://am.example.com:9093/am/api/v2/alerts"
    );
    let alerts: Vec<Alert> = serde_json::from_slice(&seen[0].body).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].labels["alertname"], "HighCpu");
}

#[tokio::test]
async fn stop_drains_remaining_queue() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let manager = Arc::new(new_manager("tenant-1", 16, seen.clone()));
    manager
        .apply_config(NotifierConfig {
            alertmanagers: vec![alertmanager("http://am.example.com:9093")],
        })
        .unwrap();

    // Enqueue before the driver ever runs, then stop immediately: the
    // final drain must still deliver the batch.
    manager.send(vec![alert("Pending")]);
    manager.stop();
    manager.run().await;

    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn apply_config_swap_preserves_queue() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let manager = Arc::new(new_manager("tenant-1", 16, seen.clone()));

    // Queued with no targets configured yet.
    manager.send(vec![alert("Early")]);
    manager
        .apply_config(NotifierConfig {
            alertmanagers: vec![alertmanager("http://am.example.com:9093")],
        })
        .unwrap();

    manager.stop();
    manager.run().await;

    // The alert queued before the swap reaches the new target.
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn alert_payload_uses_alertmanager_field_names() {
    let payload = serde_json::to_string(&vec![alert("X")]).unwrap();
    assert!(payload.contains("\"startsAt\""));
    assert!(!payload.contains("ends_at"));
}

#[test]
fn carrier_roundtrip_preserves_request_shape() {
    let mut headers = HeaderMap::new();
    headers.insert("x-scope-orgid", HeaderValue::from_static("tenant-1"));
    headers.append("accept", HeaderValue::from_static("application/json"));
    let request = OutboundRequest {
        url: Url::parse("http://10.0.0.1:9094/alertmanager/api/v2/alerts").unwrap(),
        headers,
        body: b"[]".to_vec(),
    };

    let carried = encode_request(&request);
    assert_eq!(carried.method, "POST");
    assert_eq!(
        carried.url,
        "http://10.0.0.1:9094/alertmanager/api/v2/alerts"
    );
    assert_eq!(carried.body, b"[]");
    let org = carried
        .headers
        .iter()
        .find(|h| h.name == "x-scope-orgid")
        .unwrap();
    assert_eq!(org.values, vec!["tenant-1"]);
}

#[test]
fn carrier_response_status_mapping() {
    let ok = HttpResponsePb {
        code: 200,
        headers: vec![],
        body: vec![],
    };
    assert!(check_response(&ok).is_ok());

    let err = HttpResponsePb {
        code: 500,
        headers: vec![],
        body: vec![],
    };
    assert!(check_response(&err).is_err());
}
