//! Edge role: the durable buffer drained to the ingestion service.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use sentinel_core::{SyncAgent, SyncStatsSnapshot, TickOutcome};
use sentinel_store::Buffer;

use crate::config::{Config, SyncSettings};
use crate::transport::{HttpTransport, build_probe};

/// A sync agent wired to a SQLite buffer and the HTTP uplink.
pub struct Edge {
    buffer: Arc<Buffer>,
    agent: SyncAgent,
}

impl Edge {
    /// Open the configured buffer and build the agent.
    pub fn from_config(config: &Config) -> Result<Self, EdgeError> {
        let buffer = Arc::new(Buffer::open(&config.edge.buffer_path)?);
        Self::new(buffer, &config.sync)
    }

    /// Build the agent for an already open buffer.
    pub fn new(buffer: Arc<Buffer>, settings: &SyncSettings) -> Result<Self, EdgeError> {
        let agent_config = settings.agent_config();
        agent_config.validate()?;

        let transport = HttpTransport::new(
            &settings.endpoint,
            Duration::from_secs(settings.publish_timeout_secs),
        )?;
        let probe = build_probe(settings)?;

        info!("Uplink: {}", transport.url());
        let agent = SyncAgent::new(buffer.clone(), Arc::new(transport), probe, agent_config);
        Ok(Self { buffer, agent })
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn agent(&self) -> &SyncAgent {
        &self.agent
    }

    /// Run a single sync cycle.
    pub async fn sync_once(&self) -> Result<TickOutcome, EdgeError> {
        Ok(self.agent.tick().await?)
    }

    /// Sync until `shutdown` is cancelled and return the final counters.
    pub async fn run(&self, shutdown: CancellationToken) -> SyncStatsSnapshot {
        let pending = self.buffer.count().unwrap_or_default();
        info!("Edge agent starting with {} pending record(s)", pending);
        self.agent.run(shutdown).await;
        self.agent.stats().snapshot()
    }
}

/// Edge startup and sync errors.
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] sentinel_store::Error),
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Sync error: {0}")]
    Sync(#[from] sentinel_core::Error),
}
