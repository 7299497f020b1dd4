use super::*;

#[test]
fn instant_query_response_parses() {
    let body = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [
                {
                    "metric": {"__name__": "kubevirt_vmi_info", "namespace": "vm-tests", "phase": "running"},
                    "value": [1724236800.781, "1"]
                }
            ]
        }
    }"#;

    let response: QueryResponse = serde_json::from_str(body).unwrap();
    assert_eq!(response.status, "success");

    let samples = response.data.unwrap().result;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].label("namespace"), Some("vm-tests"));
    assert!((samples[0].value().unwrap() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn error_response_carries_the_server_message() {
    let body = r#"{"status": "error", "error": "parse error: unexpected end of input"}"#;
    let response: QueryResponse = serde_json::from_str(body).unwrap();

    assert_eq!(response.status, "error");
    assert!(response.error.unwrap().contains("parse error"));
}

#[test]
fn non_numeric_sample_value_is_a_parse_error() {
    let sample: InstantSample = serde_json::from_str(
        r#"{"metric": {}, "value": [1724236800.0, "NaN-ish-garbage"]}"#,
    )
    .unwrap();

    assert!(matches!(
        sample.value(),
        Err(PrometheusError::ParseError(_))
    ));
}

#[test]
fn alerts_response_parses_states() {
    let body = r#"{
        "status": "success",
        "data": {
            "alerts": [
                {
                    "labels": {"alertname": "KubeVirtVMStuckInErrorState", "namespace": "vm-tests", "severity": "warning"},
                    "annotations": {"summary": "VM stuck in error state"},
                    "state": "firing",
                    "activeAt": "2026-08-21T09:00:00Z",
                    "value": "1e+00"
                },
                {
                    "labels": {"alertname": "CDIDataVolumeUnusualRestartCount"},
                    "annotations": {},
                    "state": "pending"
                }
            ]
        }
    }"#;

    let response: AlertsResponse = serde_json::from_str(body).unwrap();
    let alerts = response.data.unwrap().alerts;

    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].name(), Some("KubeVirtVMStuckInErrorState"));
    assert!(alerts[0].is_firing());
    assert!(alerts[0].active_at.is_some());
    assert!(!alerts[1].is_firing());
    assert!(alerts[1].active_at.is_none());
}

#[test]
fn matcher_requires_name_and_label_subset() {
    let alert = Alert {
        labels: [
            ("alertname".to_string(), "KubeVirtVMStuckInErrorState".to_string()),
            ("namespace".to_string(), "vm-tests".to_string()),
            ("severity".to_string(), "warning".to_string()),
        ]
        .into(),
        annotations: HashMap::new(),
        state: "firing".to_string(),
        active_at: None,
    };

    let by_name = AlertMatcher::new("KubeVirtVMStuckInErrorState");
    assert!(by_name.matches(&alert));

    let with_labels = AlertMatcher::new("KubeVirtVMStuckInErrorState")
        .label("namespace", "vm-tests")
        .label("severity", "warning");
    assert!(with_labels.matches(&alert));

    let wrong_label = AlertMatcher::new("KubeVirtVMStuckInErrorState")
        .label("namespace", "other-ns");
    assert!(!wrong_label.matches(&alert));

    let wrong_name = AlertMatcher::new("SomeOtherAlert");
    assert!(!wrong_name.matches(&alert));
}

#[test]
fn query_builders_scope_by_labels() {
    let count = build_vmi_count_query("vm-tests");
    assert!(count.contains("kubevirt_vmi_info"));
    assert!(count.contains(r#"namespace="vm-tests""#));

    let phases = build_vmi_phase_count_query("Running");
    assert!(phases.contains("kubevirt_vmi_phase_count"));
    assert!(phases.contains(r#"phase="Running""#));

    let memory = build_vmi_memory_query("vm-tests", "vm-a");
    assert!(memory.contains(r#"name="vm-a""#));
}

#[test]
fn client_normalizes_trailing_slash() {
    let client = PrometheusClient::new("https://thanos.example:9091/", "token", true).unwrap();
    assert_eq!(client.base_url, "https://thanos.example:9091");
}
