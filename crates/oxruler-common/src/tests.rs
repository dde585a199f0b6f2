use crate::types::{AlertingRule, RecordingRule, Rule, RuleFile, RuleGroup};
use std::collections::BTreeMap;

fn recording(record: &str, expr: &str) -> Rule {
    Rule::Recording(RecordingRule {
        record: record.to_string(),
        expr: expr.to_string(),
        labels: BTreeMap::new(),
    })
}

fn alerting(alert: &str, expr: &str) -> Rule {
    Rule::Alerting(AlertingRule {
        alert: alert.to_string(),
        expr: expr.to_string(),
        for_secs: Some(300),
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
    })
}

#[test]
fn rule_variant_from_document_shape() {
    let doc = r#"
groups:
  - name: node
    rules:
      - record: instance:cpu:rate5m
        expr: rate(cpu_seconds_total[5m])
      - alert: HighCpu
        expr: instance:cpu:rate5m > 0.9
        for_secs: 600
        labels:
          severity: critical
"#;
    let file: RuleFile = serde_yaml::from_str(doc).unwrap();
    assert_eq!(file.groups.len(), 1);
    let rules = &file.groups[0].rules;
    assert!(matches!(rules[0], Rule::Recording(_)));
    assert!(matches!(rules[1], Rule::Alerting(_)));
    assert_eq!(rules[0].name(), "instance:cpu:rate5m");
    assert_eq!(rules[1].name(), "HighCpu");
}

#[test]
fn federated_group_detection() {
    let mut group = RuleGroup {
        name: "g".to_string(),
        interval_secs: None,
        rules: vec![recording("r", "1")],
        source_tenants: vec![],
    };
    assert!(!group.is_federated());

    group.source_tenants = vec!["other-tenant".to_string()];
    assert!(group.is_federated());
}

#[test]
fn serialization_is_deterministic() {
    let group = RuleGroup {
        name: "g".to_string(),
        interval_secs: Some(30),
        rules: vec![alerting("A", "up == 0"), recording("r", "1")],
        source_tenants: vec![],
    };
    let file = RuleFile {
        groups: vec![group],
    };
    let first = serde_yaml::to_string(&file).unwrap();
    let second = serde_yaml::to_string(&file).unwrap();
    assert_eq!(first, second);
    // Optional fields that are unset must not appear in the document.
    assert!(!first.contains("source_tenants"));
    assert!(!first.contains("labels"));
}
