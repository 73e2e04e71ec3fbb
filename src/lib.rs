pub mod admin;
pub mod admission;
pub mod config;
pub mod cors;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod policy;
pub mod rate_limit;
pub mod security;
pub mod upstream;

use crate::admission::{admission_middleware, AdmissionState};
use crate::config::AdmissionConfig;
use crate::error::{AdmissionError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::upstream::{forward_handler, not_found_handler, UpstreamState};
use axum::{middleware, routing::get, Router as AxumRouter};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Assemble the application routes behind the admission layer
///
/// Every route is merged before the layers are applied; axum only wraps
/// routes that already exist when `layer` is called.
pub fn build_router(
    config: &AdmissionConfig,
    state: AdmissionState,
    metrics: Option<MetricsService>,
) -> Result<AxumRouter> {
    let mut app = AxumRouter::new();

    if let Some(metrics_service) = metrics {
        app = app.merge(
            AxumRouter::new()
                .route(&config.metrics.path, get(metrics_handler))
                .with_state(metrics_service),
        );
        info!("Metrics exposed at {}", config.metrics.path);
    }

    if config.admin.enabled {
        if let Some(limiter) = &state.limiter {
            app = app.merge(admin::admin_routes(&config.admin.path, limiter.clone()));
            info!("Admin endpoints mounted at {}", config.admin.path);
        }
    }

    let app = match &config.upstream {
        Some(upstream) => {
            let upstream_state =
                UpstreamState::new(upstream, Duration::from_secs(config.server.timeout_secs))?;
            info!("Forwarding admitted requests to {}", upstream.url);
            app.fallback_service(
                AxumRouter::new()
                    .fallback(forward_handler)
                    .with_state(upstream_state),
            )
        }
        None => app.fallback(not_found_handler),
    };

    Ok(app
        .layer(middleware::from_fn_with_state(state, admission_middleware))
        .layer(TraceLayer::new_for_http()))
}

/// Build the admission state and router from configuration
pub async fn build_app(config: &AdmissionConfig) -> Result<AxumRouter> {
    let state = AdmissionState::from_config(config).await?;
    build_router(config, state, None)
}

/// Initialize the admission server
pub async fn init_admission(config: AdmissionConfig) -> Result<()> {
    config.validate()?;

    info!("Starting admission layer");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let state = AdmissionState::from_config(&config).await?;
    if let Some(limiter) = &state.limiter {
        info!(store = limiter.store_name(), "Rate limiter ready");
        limiter.spawn_eviction(
            config.rate_limiting.eviction_interval(),
            config.rate_limiting.eviction_grace(),
        );
    }

    let metrics = if config.metrics.enabled {
        Some(MetricsService::new()?)
    } else {
        None
    };
    let app = build_router(&config, state, metrics)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(AdmissionError::Io)?;

    info!("Admission layer ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| AdmissionError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "admission=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
