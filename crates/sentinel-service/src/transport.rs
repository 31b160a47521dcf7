//! HTTP uplink and connectivity probes for the edge role.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use sentinel_core::{ConnectivityProbe, Error, Transport};

use crate::config::{ProbeConfig, SyncSettings};

/// Header carrying the publish topic.
pub const TOPIC_HEADER: &str = "x-sentinel-topic";

/// Publishes readings to the ingestion service with `POST /api/readings`.
///
/// Any 2xx response is a delivery. The service answers malformed payloads
/// with `202 Accepted` as well, so a record that can never be ingested
/// does not block the buffer.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport for the service at `endpoint`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/api/readings", endpoint.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> sentinel_core::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(TOPIC_HEADER, topic)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| Error::publish(topic, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            trace!("Published {} bytes to {} ({})", payload.len(), self.url, status);
            Ok(())
        } else {
            Err(Error::publish(topic, format!("server returned {}", status)))
        }
    }
}

/// Online if a `GET` to the URL gets any HTTP response.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Probe {} failed: {}", self.url, e);
                false
            }
        }
    }
}

/// Online if a TCP connection to the address opens within the timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", self.address, e);
                false
            }
            Err(_) => {
                debug!("Probe {} timed out after {:?}", self.address, self.timeout);
                false
            }
        }
    }
}

/// Always online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl ConnectivityProbe for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Build the probe selected by the sync settings.
pub fn build_probe(settings: &SyncSettings) -> Result<Arc<dyn ConnectivityProbe>, reqwest::Error> {
    let timeout = Duration::from_secs(settings.probe_timeout_secs);
    let probe: Arc<dyn ConnectivityProbe> = match &settings.probe {
        ProbeConfig::Http { .. } => {
            let url = settings
                .probe_url()
                .unwrap_or_else(|| format!("{}/api/health", settings.endpoint));
            Arc::new(HttpProbe::new(url, timeout)?)
        }
        ProbeConfig::Tcp { address } => Arc::new(TcpProbe::new(address.clone(), timeout)),
        ProbeConfig::Always => Arc::new(AlwaysOnline),
    };
    Ok(probe)
}
