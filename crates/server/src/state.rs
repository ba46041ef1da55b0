//! Application state shared across handlers.

use pantry_catalog::CatalogStore;
use pantry_core::config::AppConfig;
use std::sync::Arc;

/// Shared server state: the configuration and a read handle on the
/// catalog. The server never mutates either.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog: Arc<dyn CatalogStore>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: AppConfig, catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            config: Arc::new(config),
            catalog,
        }
    }
}
