//! The `/annotations` route.
use std::{future::Future, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use http::StatusCode;
use thiserror::Error;

use crate::{
    backend::{read_json_request, BoxError, ErrIntoHttpResponse},
    data::{Annotation, AnnotationRequest, AnnotationResponse},
};

/// Errors returned while answering an annotation request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnnotationError {
    /// The annotation function returned an error.
    #[error("{0}")]
    Callback(BoxError),
}

impl ErrIntoHttpResponse for AnnotationError {}

/// Trait for services that produce annotations for a dashboard.
///
/// This is implemented for any async closure taking an [`AnnotationRequest`], so
/// most users will not need to implement it directly.
///
/// Each returned [`Annotation`] is sent back to Grafana together with the annotation
/// descriptor from the request.
///
/// # Example
///
/// ```rust
/// use grafana_simplejson::{
///     backend::{BoxError, Server},
///     data::{Annotation, AnnotationRequest},
/// };
///
/// let server = Server::new().annotation_service(|request: AnnotationRequest| async move {
///     Ok::<_, BoxError>(vec![
///         Annotation::new(request.range.from, "deploy", "v1.2.3 deployed").with_tags(["deploy"]),
///     ])
/// });
/// assert!(server.capabilities().annotations);
/// ```
#[async_trait::async_trait]
pub trait AnnotationService: Send + Sync {
    /// Produce the annotations for a request.
    async fn annotations(&self, request: AnnotationRequest) -> Result<Vec<Annotation>, BoxError>;
}

#[async_trait::async_trait]
impl<F, Fut> AnnotationService for F
where
    F: Fn(AnnotationRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Annotation>, BoxError>> + Send + 'static,
{
    async fn annotations(&self, request: AnnotationRequest) -> Result<Vec<Annotation>, BoxError> {
        self(request).await
    }
}

pub(crate) fn router<A: AnnotationService + 'static>(service: A) -> Router {
    Router::new()
        .route(
            "/annotations",
            post(annotations::<A>).options(preflight),
        )
        .with_state(Arc::new(service))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

#[tracing::instrument(skip_all, level = "debug")]
async fn annotations<A: AnnotationService + 'static>(
    State(service): State<Arc<A>>,
    body: Bytes,
) -> Response {
    let request: AnnotationRequest = match read_json_request(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting annotation request");
            return e.into_http_response();
        }
    };
    let descriptor = request.annotation.clone();
    match service.annotations(request).await {
        Ok(annotations) => Json(
            annotations
                .iter()
                .map(|result| AnnotationResponse {
                    annotation: &descriptor,
                    result,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => {
            let e = AnnotationError::Callback(e);
            tracing::warn!(error = %e, "Error answering annotation request");
            e.into_http_response()
        }
    }
}
