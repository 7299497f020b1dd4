//! Prometheus integration: querying metrics and alerts through the
//! cluster monitoring stack, plus the waits tests build on top.
//!
//! The endpoint is discovered from the thanos-querier route, since
//! that is the only query API exposed outside the monitoring namespace.

use std::collections::HashMap;
use std::time::Duration;

use kube::api::{Api, DynamicObject};
use kube::core::ApiResource;
use kube::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PrometheusSettings;
use crate::sampler::{SamplerError, TimeoutSampler};

#[derive(Debug, Error)]
pub enum PrometheusError {
    #[error("Prometheus HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("No data returned from Prometheus")]
    NoData,

    #[error("Route {namespace}/{name} not found; is this an OpenShift cluster?")]
    RouteNotFound { namespace: String, name: String },

    #[error("Bearer token env var {0} is not set")]
    TokenMissing(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Wait(#[from] SamplerError),
}

fn route_resource() -> ApiResource {
    ApiResource {
        group: "route.openshift.io".to_string(),
        version: "v1".to_string(),
        api_version: "route.openshift.io/v1".to_string(),
        kind: "Route".to_string(),
        plural: "routes".to_string(),
    }
}

/// One instant-query result: labels plus a sampled value.
#[derive(Debug, Clone, Deserialize)]
pub struct InstantSample {
    #[serde(default)]
    pub metric: HashMap<String, String>,

    /// `[unix_timestamp, "value"]` as Prometheus encodes it.
    value: (f64, String),
}

impl InstantSample {
    pub fn value(&self) -> Result<f64, PrometheusError> {
        self.value
            .1
            .parse()
            .map_err(|_| PrometheusError::ParseError(format!("not a float: {}", self.value.1)))
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.metric.get(name).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<InstantSample>,
}

/// An alert as reported by /api/v1/alerts.
#[derive(Debug, Clone, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub annotations: HashMap<String, String>,

    /// "firing", "pending" or "inactive".
    pub state: String,

    #[serde(rename = "activeAt", default)]
    pub active_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Alert {
    pub fn name(&self) -> Option<&str> {
        self.labels.get("alertname").map(String::as_str)
    }

    pub fn is_firing(&self) -> bool {
        self.state == "firing"
    }
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    status: String,
    #[serde(default)]
    data: Option<AlertsData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlertsData {
    alerts: Vec<Alert>,
}

/// Selects alerts by name plus an exact subset of labels.
#[derive(Debug, Clone)]
pub struct AlertMatcher {
    pub alertname: String,
    pub labels: HashMap<String, String>,
}

impl AlertMatcher {
    pub fn new(alertname: &str) -> Self {
        AlertMatcher {
            alertname: alertname.to_string(),
            labels: HashMap::new(),
        }
    }

    pub fn label(mut self, name: &str, value: &str) -> Self {
        self.labels.insert(name.to_string(), value.to_string());
        self
    }

    /// Name matches and every matcher label is present with the same
    /// value. State is checked by the caller.
    pub fn matches(&self, alert: &Alert) -> bool {
        if alert.name() != Some(self.alertname.as_str()) {
            return false;
        }
        self.labels
            .iter()
            .all(|(k, v)| alert.labels.get(k) == Some(v))
    }
}

#[derive(Clone)]
pub struct PrometheusClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl PrometheusClient {
    pub fn new(base_url: &str, token: &str, insecure: bool) -> Result<Self, PrometheusError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PrometheusError::HttpError(e.to_string()))?;

        Ok(PrometheusClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Build a client from the configured URL, or from the
    /// thanos-querier route when none is set. The bearer token comes
    /// from the configured env var either way.
    pub async fn discover(
        kube: &Client,
        settings: &PrometheusSettings,
    ) -> Result<Self, PrometheusError> {
        let token = std::env::var(&settings.token_env)
            .map_err(|_| PrometheusError::TokenMissing(settings.token_env.clone()))?;

        if let Some(url) = &settings.url {
            return Self::new(url, &token, settings.insecure_skip_tls_verify);
        }

        let routes: Api<DynamicObject> =
            Api::namespaced_with(kube.clone(), &settings.route_namespace, &route_resource());

        let route = match routes.get(&settings.route_name).await {
            Ok(route) => route,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(PrometheusError::RouteNotFound {
                    namespace: settings.route_namespace.clone(),
                    name: settings.route_name.clone(),
                });
            }
            Err(e) => return Err(PrometheusError::Kube(e)),
        };

        let host = route
            .data
            .get("spec")
            .and_then(|s| s.get("host"))
            .and_then(|h| h.as_str())
            .ok_or_else(|| {
                PrometheusError::ParseError("route has no spec.host".to_string())
            })?;

        info!(host, "Discovered Prometheus query endpoint");
        Self::new(&format!("https://{}", host), &token, settings.insecure_skip_tls_verify)
    }

    /// Run an instant query.
    pub async fn query(&self, promql: &str) -> Result<Vec<InstantSample>, PrometheusError> {
        debug!(query = promql, "Prometheus instant query");
        let response = self
            .http
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", promql)])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PrometheusError::HttpError(e.to_string()))?;

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| PrometheusError::ParseError(e.to_string()))?;

        if body.status != "success" {
            return Err(PrometheusError::InvalidQuery(
                body.error.unwrap_or_else(|| promql.to_string()),
            ));
        }
        Ok(body.data.map(|d| d.result).unwrap_or_default())
    }

    /// Run an instant query expected to produce a single number.
    pub async fn query_scalar(&self, promql: &str) -> Result<f64, PrometheusError> {
        let samples = self.query(promql).await?;
        samples.first().ok_or(PrometheusError::NoData)?.value()
    }

    /// All alerts currently known to the alerting engine.
    pub async fn alerts(&self) -> Result<Vec<Alert>, PrometheusError> {
        let response = self
            .http
            .get(format!("{}/api/v1/alerts", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PrometheusError::HttpError(e.to_string()))?;

        let body: AlertsResponse = response
            .json()
            .await
            .map_err(|e| PrometheusError::ParseError(e.to_string()))?;

        if body.status != "success" {
            return Err(PrometheusError::HttpError(
                body.error.unwrap_or_else(|| "alerts query failed".to_string()),
            ));
        }
        Ok(body.data.map(|d| d.alerts).unwrap_or_default())
    }

    /// Wait until a matching alert is firing and return it.
    pub async fn wait_for_alert_firing(
        &self,
        matcher: &AlertMatcher,
        timeout: Duration,
    ) -> Result<Alert, PrometheusError> {
        let client = self.clone();
        let matcher = matcher.clone();
        let alert = TimeoutSampler::new(format!("alert {} firing", matcher.alertname), timeout)
            .run(|| {
                let client = client.clone();
                let matcher = matcher.clone();
                async move {
                    let alerts = client.alerts().await?;
                    Ok::<_, PrometheusError>(
                        alerts
                            .into_iter()
                            .find(|a| a.is_firing() && matcher.matches(a)),
                    )
                }
            })
            .await?;
        Ok(alert)
    }

    /// Wait until no matching alert remains in any state. Used after
    /// fixing the condition an alert fired on.
    pub async fn wait_for_alert_cleared(
        &self,
        matcher: &AlertMatcher,
        timeout: Duration,
    ) -> Result<(), PrometheusError> {
        let client = self.clone();
        let matcher = matcher.clone();
        TimeoutSampler::new(format!("alert {} cleared", matcher.alertname), timeout)
            .run(|| {
                let client = client.clone();
                let matcher = matcher.clone();
                async move {
                    let alerts = client.alerts().await?;
                    if alerts.iter().any(|a| matcher.matches(a)) {
                        Ok::<_, PrometheusError>(None)
                    } else {
                        Ok(Some(()))
                    }
                }
            })
            .await?;
        Ok(())
    }

    /// Wait until a scalar query returns a value the predicate accepts.
    /// "No data" counts as "not yet": metrics lag resource creation.
    pub async fn wait_for_metric_value<F>(
        &self,
        promql: &str,
        predicate: F,
        timeout: Duration,
    ) -> Result<f64, PrometheusError>
    where
        F: Fn(f64) -> bool,
    {
        let client = self.clone();
        let query = promql.to_string();
        let value = TimeoutSampler::new(format!("metric {}", promql), timeout)
            .run(|| {
                let client = client.clone();
                let query = query.clone();
                let predicate = &predicate;
                async move {
                    match client.query_scalar(&query).await {
                        Ok(v) if predicate(v) => Ok(Some(v)),
                        Ok(_) => Ok(None),
                        Err(PrometheusError::NoData) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(value)
    }
}

/// Count of VMIs in a namespace, as the metrics stack sees it.
pub fn build_vmi_count_query(namespace: &str) -> String {
    format!(r#"count(kubevirt_vmi_info{{namespace="{}"}})"#, namespace)
}

/// Count of VMIs in a phase across the cluster.
pub fn build_vmi_phase_count_query(phase: &str) -> String {
    format!(r#"sum(kubevirt_vmi_phase_count{{phase="{}"}})"#, phase)
}

/// Guest memory available to a named VMI, in bytes.
pub fn build_vmi_memory_query(namespace: &str, name: &str) -> String {
    format!(
        r#"kubevirt_vmi_memory_available_bytes{{namespace="{}",name="{}"}}"#,
        namespace, name
    )
}

#[cfg(test)]
#[path = "prometheus_test.rs"]
mod tests;
