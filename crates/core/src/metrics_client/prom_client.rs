//! Prometheus-compatible HTTP read-API backend (instant and range queries).

use super::{InstantValue, MetricsClientConfig, MetricsAuth, RangeSeries, VectorSample};
use crate::error::{ControllerError, Result, Target};
use serde::Deserialize;
use std::collections::BTreeMap;

pub struct PrometheusBackend {
    http: reqwest::Client,
    base_url: String,
    tenant_id: Option<String>,
    auth: MetricsAuth,
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    data: Option<PromData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", rename_all = "lowercase")]
enum PromData {
    Scalar { result: (f64, String) },
    Vector { result: Vec<PromVectorEntry> },
    Matrix { result: Vec<PromMatrixEntry> },
}

#[derive(Debug, Deserialize)]
struct PromVectorEntry {
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct PromMatrixEntry {
    metric: BTreeMap<String, String>,
    values: Vec<(f64, String)>,
}

impl PrometheusBackend {
    pub fn new(config: &MetricsClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ControllerError::InvalidConfig(format!("failed to build metrics HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.metrics_endpoint.trim_end_matches('/').to_string(),
            tenant_id: config.tenant_id.clone(),
            auth: config.auth.clone(),
        })
    }

    fn apply_auth(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(tenant) = &self.tenant_id {
            req = req.header("X-Scope-OrgID", tenant);
        }
        match &self.auth {
            MetricsAuth::None => req,
            MetricsAuth::Basic { username, password } => req.basic_auth(username, Some(password)),
            MetricsAuth::Bearer(token) => req.bearer_auth(token),
            MetricsAuth::Headers(headers) => {
                for (k, v) in headers {
                    req = req.header(k, v);
                }
                req
            }
        }
    }

    fn classify_transport_error(e: reqwest::Error) -> ControllerError {
        if e.is_timeout() {
            ControllerError::Timeout(Target::Metrics)
        } else if let Some(status) = e.status() {
            if status.as_u16() == 403 {
                ControllerError::PermissionDenied {
                    verb: "query".to_string(),
                    resource: "metrics store".to_string(),
                }
            } else if status.as_u16() == 404 {
                ControllerError::NotFound {
                    resource: "metrics series".to_string(),
                    id: "query".to_string(),
                }
            } else {
                ControllerError::TransientExternal {
                    target: Target::Metrics,
                    message: format!("HTTP {status}"),
                }
            }
        } else {
            ControllerError::TransientExternal {
                target: Target::Metrics,
                message: e.to_string(),
            }
        }
    }

    pub async fn query_instant(&self, promql: &str) -> Result<InstantValue> {
        let url = format!("{}/api/v1/query", self.base_url);
        let req = self.apply_auth(self.http.get(&url).query(&[("query", promql)]));
        let resp = req.send().await.map_err(Self::classify_transport_error)?;
        let parsed: PromResponse = resp.json().await.map_err(Self::classify_transport_error)?;
        Self::into_instant(parsed)
    }

    pub async fn query_range(&self, promql: &str, start: i64, end: i64, step_secs: i64) -> Result<Vec<RangeSeries>> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let req = self.apply_auth(self.http.get(&url).query(&[
            ("query", promql.to_string()),
            ("start", start.to_string()),
            ("end", end.to_string()),
            ("step", format!("{step_secs}s")),
        ]));
        let resp = req.send().await.map_err(Self::classify_transport_error)?;
        let parsed: PromResponse = resp.json().await.map_err(Self::classify_transport_error)?;
        Self::into_range(parsed)
    }

    fn into_instant(parsed: PromResponse) -> Result<InstantValue> {
        if parsed.status != "success" {
            return Err(ControllerError::TransientExternal {
                target: Target::Metrics,
                message: parsed.error.unwrap_or_else(|| "query failed".to_string()),
            });
        }
        match parsed.data {
            Some(PromData::Scalar { result }) => Ok(InstantValue::Scalar(result.1.parse().unwrap_or(0.0))),
            Some(PromData::Vector { result }) => Ok(InstantValue::Vector(
                result
                    .into_iter()
                    .map(|entry| VectorSample {
                        labels: entry.metric,
                        value: entry.value.1.parse().unwrap_or(0.0),
                    })
                    .collect(),
            )),
            _ => Ok(InstantValue::Vector(Vec::new())),
        }
    }

    fn into_range(parsed: PromResponse) -> Result<Vec<RangeSeries>> {
        if parsed.status != "success" {
            return Err(ControllerError::TransientExternal {
                target: Target::Metrics,
                message: parsed.error.unwrap_or_else(|| "range query failed".to_string()),
            });
        }
        match parsed.data {
            Some(PromData::Matrix { result }) => Ok(result
                .into_iter()
                .map(|entry| RangeSeries {
                    labels: entry.metric,
                    points: entry
                        .values
                        .into_iter()
                        .map(|(ts, v)| (ts as i64, v.parse().unwrap_or(0.0)))
                        .collect(),
                })
                .collect()),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_successful_vector_response() {
        let body = PromResponse {
            status: "success".to_string(),
            error: None,
            data: Some(PromData::Vector {
                result: vec![PromVectorEntry {
                    metric: BTreeMap::from([("pod".to_string(), "a-0".to_string())]),
                    value: (1700000000.0, "42.5".to_string()),
                }],
            }),
        };
        match PrometheusBackend::into_instant(body).unwrap() {
            InstantValue::Vector(samples) => {
                assert_eq!(samples.len(), 1);
                assert_eq!(samples[0].value, 42.5);
            }
            _ => panic!("expected vector"),
        }
    }

    #[test]
    fn surfaces_error_status_as_transient() {
        let body = PromResponse {
            status: "error".to_string(),
            error: Some("bad query".to_string()),
            data: None,
        };
        let err = PrometheusBackend::into_instant(body).unwrap_err();
        assert!(err.is_degraded());
    }

    #[tokio::test]
    async fn query_instant_parses_response_from_live_server() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v1/query")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{"pod":"a-0"},"value":[1700000000,"42.5"]}]}}"#,
            )
            .create_async()
            .await;

        let config = MetricsClientConfig {
            metrics_endpoint: server.url(),
            ..MetricsClientConfig::default()
        };
        let backend = PrometheusBackend::new(&config).unwrap();
        match backend.query_instant("up").await.unwrap() {
            InstantValue::Vector(samples) => {
                assert_eq!(samples.len(), 1);
                assert_eq!(samples[0].value, 42.5);
            }
            _ => panic!("expected vector"),
        }
    }

    #[tokio::test]
    async fn query_instant_surfaces_http_error_as_transient() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v1/query")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let config = MetricsClientConfig {
            metrics_endpoint: server.url(),
            ..MetricsClientConfig::default()
        };
        let backend = PrometheusBackend::new(&config).unwrap();
        let err = backend.query_instant("up").await.unwrap_err();
        assert!(err.is_degraded());
    }
}
