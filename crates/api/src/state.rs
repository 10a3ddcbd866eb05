use std::sync::Arc;

use recon_core::config::ServiceConfig;
use recon_core::queue::DispatchQueue;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Where accepted submissions are published.
    pub queue: Arc<dyn DispatchQueue>,
    pub config: Arc<ServerConfig>,
    /// Configuration echoed by `GET /health`.
    pub service: Arc<ServiceInfo>,
}

/// Static facts about the deployment reported by the health endpoint.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub provider: String,
    pub binary: String,
    pub pipeline: String,
    pub bucket: String,
}

impl ServiceInfo {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            provider: config.reconstruction.provider.clone(),
            binary: config.reconstruction.binary.display().to_string(),
            pipeline: config.reconstruction.pipeline_path.display().to_string(),
            bucket: config.storage.bucket.clone(),
        }
    }
}
