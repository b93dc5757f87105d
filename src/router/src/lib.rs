use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use common::Backends;
use common::config::Configuration;
use reconciler::{ReconcileError, Reconciler};
use tower_http::trace::TraceLayer;

pub mod endpoints;

pub trait RouterState: std::fmt::Debug + Clone + Send + Sync + 'static {
    fn reconciler(&self) -> &Reconciler;
}

/// Shared state handed to every route handler
#[derive(Clone)]
pub struct ReconcilerState {
    reconciler: Arc<Reconciler>,
}

impl std::fmt::Debug for ReconcilerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerState")
            .field("reconciler", &"Reconciler")
            .finish()
    }
}

impl ReconcilerState {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
        }
    }

    pub fn from_config(
        backends: &Backends,
        config: &Configuration,
    ) -> Result<Self, ReconcileError> {
        Ok(Self::new(Reconciler::from_config(backends, config)?))
    }
}

impl RouterState for ReconcilerState {
    fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}

/// Create a new router instance with all routes configured
pub fn create_router<S: RouterState>(state: S) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/migrate", post(endpoints::migration::migrate::<S>))
        .route("/delete", post(endpoints::deletion::delete::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use common::testing::{TestBackends, TestConfigBuilder};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let test = TestBackends::default();
        let state =
            ReconcilerState::from_config(&test.backends(), &TestConfigBuilder::new().build())
                .unwrap();

        let response = create_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
