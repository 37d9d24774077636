//! Ducat Server Library - TAXII 2.1 REST API components
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod state;

pub use auth::{hash_password, verify_password, AuthRegistry, Authenticated};
pub use config::{AuthConfig, Config, TaxiiConfig};
pub use error::ApiError;
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_config};
pub use state::AppState;
