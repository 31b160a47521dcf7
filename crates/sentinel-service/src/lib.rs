//! Edge sync agent and cloud ingestion API for greenhouse sensors.
//!
//! The `sentinel` binary runs in one of two roles:
//!
//! - **edge**: drains the local SQLite buffer to the ingestion service over
//!   HTTP whenever the uplink is available
//! - **cloud**: serves the ingestion REST API, computing derived metrics and
//!   alerts and keeping live state plus history in SQLite
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `POST /api/readings` - Ingest one JSON reading
//! - `GET /api/greenhouses` - Live state of every greenhouse
//! - `GET /api/greenhouses/{id}` - Live state of one greenhouse
//! - `GET /api/greenhouses/{id}/history` - Reading history, newest first
//!
//! # Configuration
//!
//! The service reads `~/.config/agro-sentinel/sentinel.toml` (see
//! [`config`] for all sections):
//!
//! ```toml
//! [sync]
//! endpoint = "http://cloud.example:8080"
//!
//! [cloud]
//! bind = "0.0.0.0:8080"
//! ```

pub mod api;
pub mod config;
pub mod edge;
pub mod state;
pub mod transport;

pub use config::{
    CloudConfig, Config, ConfigError, EdgeConfig, ProbeConfig, SyncSettings, ValidationError,
};
pub use edge::{Edge, EdgeError};
pub use state::AppState;
pub use transport::{AlwaysOnline, HttpProbe, HttpTransport, TcpProbe};
