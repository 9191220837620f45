use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use url::Url;

use super::payload::IncidentPayload;
use crate::IncidentReport;

pub const API_KEY_HEADER: &str = "X-API-KEY";

const REPORT_PATH: [&str; 3] = ["api", "proctor", "report"];
const HEALTH_PATH: [&str; 3] = ["api", "proctor", "health"];
const MAX_ERROR_BODY: u64 = 512;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend unreachable: {0}")]
    Connect(String),
    #[error("backend answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Other(String),
}

/// Where admitted reports go. Implementations must be callable from any
/// dispatcher worker.
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one report. A returned error is final; callers do not retry.
    fn send(&self, report: &IncidentReport) -> Result<(), TransportError>;
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub base_url: Url,
    pub api_key: String,
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("parse backend url")?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported backend scheme '{}'; expected http(s)",
                base_url.scheme()
            ));
        }
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(anyhow!("backend api key must not be empty"));
        }
        if timeout.is_zero() {
            return Err(anyhow!("backend timeout must be positive"));
        }
        Ok(Self {
            base_url,
            api_key,
            timeout,
        })
    }
}

/// Blocking HTTP client for the grading backend.
pub struct BackendClient {
    agent: ureq::Agent,
    report_url: Url,
    health_url: Url,
    api_key: String,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .build();
        Ok(Self {
            agent,
            report_url: endpoint(&config.base_url, &REPORT_PATH)?,
            health_url: endpoint(&config.base_url, &HEALTH_PATH)?,
            api_key: config.api_key,
            timeout: config.timeout,
        })
    }

    pub fn report_url(&self) -> &Url {
        &self.report_url
    }

    /// Probe the backend's health endpoint; returns its body on 200.
    pub fn health(&self) -> Result<String, TransportError> {
        let response = self
            .agent
            .get(self.health_url.as_str())
            .call()
            .map_err(|e| self.classify(e))?;
        if response.status() != 200 {
            return Err(rejected(response));
        }
        response
            .into_string()
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    fn classify(&self, err: ureq::Error) -> TransportError {
        match err {
            ureq::Error::Status(_, response) => rejected(response),
            ureq::Error::Transport(transport) => {
                let timed_out = std::error::Error::source(&transport)
                    .and_then(|source| source.downcast_ref::<std::io::Error>())
                    .is_some_and(|io| {
                        matches!(
                            io.kind(),
                            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                        )
                    });
                if timed_out {
                    return TransportError::Timeout(self.timeout);
                }
                match transport.kind() {
                    ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns => {
                        TransportError::Connect(transport.to_string())
                    }
                    _ => TransportError::Other(transport.to_string()),
                }
            }
        }
    }
}

impl ReportSink for BackendClient {
    fn name(&self) -> &str {
        "backend"
    }

    fn send(&self, report: &IncidentReport) -> Result<(), TransportError> {
        let body = serde_json::to_string(&IncidentPayload::from(report))?;
        let response = self
            .agent
            .post(self.report_url.as_str())
            .set(API_KEY_HEADER, &self.api_key)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| self.classify(e))?;
        if response.status() != 200 {
            return Err(rejected(response));
        }
        Ok(())
    }
}

fn endpoint(base: &Url, path: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("backend url {} cannot carry a path", base))?
        .pop_if_empty()
        .extend(path);
    Ok(url)
}

fn rejected(response: ureq::Response) -> TransportError {
    let status = response.status();
    let mut body = String::new();
    let _ = response
        .into_reader()
        .take(MAX_ERROR_BODY)
        .read_to_string(&mut body);
    TransportError::Rejected {
        status,
        body: body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> BackendConfig {
        BackendConfig::new(base, "secret", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn endpoints_append_to_base_path() -> Result<()> {
        let client = BackendClient::new(config("http://localhost:8080"))?;
        assert_eq!(
            client.report_url().as_str(),
            "http://localhost:8080/api/proctor/report"
        );
        assert_eq!(
            client.health_url.as_str(),
            "http://localhost:8080/api/proctor/health"
        );

        let prefixed = BackendClient::new(config("https://grading.example/exam/"))?;
        assert_eq!(
            prefixed.report_url().as_str(),
            "https://grading.example/exam/api/proctor/report"
        );
        Ok(())
    }

    #[test]
    fn config_validates_inputs() {
        assert!(BackendConfig::new("ftp://host", "k", Duration::from_secs(5)).is_err());
        assert!(BackendConfig::new("http://host", "  ", Duration::from_secs(5)).is_err());
        assert!(BackendConfig::new("http://host", "k", Duration::ZERO).is_err());
        assert!(BackendConfig::new("not a url", "k", Duration::from_secs(5)).is_err());
    }
}
