//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use ducat_core::backend::BackendFactory;
use ducat_core::TaxiiService;

use crate::auth::AuthRegistry;
use crate::config::Config;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Protocol service over the configured storage backend
    pub service: Arc<TaxiiService>,
    /// Credential registry for Basic and Token authentication
    pub auth: Arc<AuthRegistry>,
}

impl AppState {
    pub fn new(service: TaxiiService, auth: AuthRegistry) -> Self {
        AppState {
            service: Arc::new(service),
            auth: Arc::new(auth),
        }
    }

    /// Connect the configured backend and assemble the shared state.
    pub async fn from_config(config: &Config) -> ducat_core::Result<Self> {
        let backend = BackendFactory::create(&config.backend).await?;
        let service = TaxiiService::new(backend, config.taxii.service_policy());
        let auth = AuthRegistry::from_config(&config.auth);
        Ok(AppState::new(service, auth))
    }
}
