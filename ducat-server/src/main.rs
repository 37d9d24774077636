//! Ducat Server - TAXII 2.1 REST API for sharing threat intelligence
//!
//! Serves ducat-core collections over HTTP:
//! - GET /taxii2/ - Server discovery
//! - GET/POST {api_root}/collections/{id}/objects/ - Pull and push STIX objects
//! - GET {api_root}/status/{id}/ - Poll add request outcomes

use tracing_subscriber::EnvFilter;

use ducat_server::{create_router_with_config, AppState, Config};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("╔════════════════════════════════════════════╗");
    println!("║        DUCAT TAXII 2.1 Server v0.1.0       ║");
    println!("║      Threat Intelligence Sharing API       ║");
    println!("╚════════════════════════════════════════════╝");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let state = match AppState::from_config(&config).await {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Failed to initialize backend: {}", e);
            std::process::exit(1);
        }
    };
    let backend = state.service.backend().clone();

    let app = create_router_with_config(state, &config);

    let addr = config.socket_addr();
    println!("\nListening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /taxii2/                                  - Server discovery");
    println!("  GET  /{{api_root}}/collections/                  - List collections");
    println!("  GET  /{{api_root}}/collections/{{id}}/objects/     - Pull objects");
    println!("  POST /{{api_root}}/collections/{{id}}/objects/     - Push objects");
    println!("  GET  /{{api_root}}/status/{{id}}/                  - Poll add status");
    println!("  GET  /docs                                     - Swagger UI");
    println!("  GET  /health                                   - Health check");
    println!("\nExample:");
    println!("  curl http://{}/taxii2/ \\", addr);
    println!("    -H 'Accept: application/taxii+json;version=2.1'");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // Flush persistence before the process exits.
    if let Err(e) = backend.shutdown().await {
        tracing::error!(error = %e, "backend shutdown failed");
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutdown signal received");
    }
}
