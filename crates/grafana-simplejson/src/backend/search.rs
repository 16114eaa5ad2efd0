//! The `/search` route.
use std::{future::Future, sync::Arc};

use axum::{extract::State, routing::post, Json, Router};

/// Trait for services listing the targets available to Grafana's query editor.
///
/// This is implemented for [`TargetTable`][crate::backend::TargetTable], and for any
/// async closure taking no arguments and returning a `Vec<String>`.
#[async_trait::async_trait]
pub trait SearchService: Send + Sync {
    /// List the available targets.
    ///
    /// The request body sent by Grafana is ignored.
    async fn search(&self) -> Vec<String>;
}

#[async_trait::async_trait]
impl<F, Fut> SearchService for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<String>> + Send + 'static,
{
    async fn search(&self) -> Vec<String> {
        self().await
    }
}

pub(crate) fn router<S: SearchService + 'static>(service: S) -> Router {
    Router::new()
        .route("/search", post(search::<S>))
        .with_state(Arc::new(service))
}

#[tracing::instrument(skip_all, level = "debug")]
async fn search<S: SearchService + 'static>(State(service): State<Arc<S>>) -> Json<Vec<String>> {
    Json(service.search().await)
}
