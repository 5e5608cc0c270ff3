//! Read-only status API.
//!
//! # Endpoints
//! - `GET /status`: version and consumer count
//! - `GET /consumers`, `GET /consumers/{id}`: last result, error, attempts
//! - `GET /circuits`: every circuit's state
//! - `GET /metrics`: [`PerformanceMetrics`](crate::observability::PerformanceMetrics)
//!
//! Every route requires the bearer token when one is configured.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::guard::PollGuard;

/// State shared by the status handlers.
pub struct AdminState<V> {
    pub guard: PollGuard<V>,
    pub api_key: Option<Arc<str>>,
}

impl<V> Clone for AdminState<V> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

impl<V> AdminState<V> {
    pub fn new(guard: PollGuard<V>, api_key: Option<String>) -> Self {
        Self {
            guard,
            api_key: api_key.map(Arc::from),
        }
    }
}

#[allow(deprecated)]
pub fn setup_admin_router<V>(state: AdminState<V>, request_timeout: Duration) -> Router
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    Router::new()
        .route("/status", get(get_status::<V>))
        .route("/consumers", get(get_consumers::<V>))
        .route("/consumers/{id}", get(get_consumer::<V>))
        .route("/circuits", get(get_circuits::<V>))
        .route("/metrics", get(get_metrics::<V>))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware::<V>,
        ))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Serve `router` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Status API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Status API stopped");
    Ok(())
}
