//! Post-bootstrap health probes

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Checks that a bootstrapped host serves what it should
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One check against `addr`; `Err` carries the reason it failed
    async fn check(&self, addr: &str) -> Result<(), String>;

    fn probe_type(&self) -> &'static str;
}

/// HTTP GET expecting a 2xx response
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    port: u16,
    path: String,
}

impl HttpProbe {
    /// Probe `http://{addr}:{port}{path}` with a per-request `timeout`
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(port: u16, path: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Ok(Self { client, port, path })
    }

    /// URL probed for `addr`
    #[must_use]
    pub fn url_for(&self, addr: &str) -> String {
        if addr.contains(':') && !addr.starts_with('[') {
            format!("http://[{addr}]:{}{}", self.port, self.path)
        } else {
            format!("http://{addr}:{}{}", self.port, self.path)
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self, addr: &str) -> Result<(), String> {
        let url = self.url_for(addr);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("GET {url}: {e}"))?;

        let status = response.status();
        debug!(url = %url, status = %status, "health probe response");
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("GET {url} returned {status}"))
        }
    }

    fn probe_type(&self) -> &'static str {
        "http"
    }
}
