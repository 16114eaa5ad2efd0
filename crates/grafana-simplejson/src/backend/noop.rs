//! No-op service implementations for each server service.
use super::*;

/// A no-op service which implements each of the available service traits.
///
/// This is used as a default type parameter of [`crate::backend::Server`]
/// to enable a more type-safe API. The `Server` starts off in a state where
/// every `service` field is assumed to be an optional `NoopService`;
/// calling the `*_service()` methods constructs a new `Server` with type
/// parameterized by the provided service, which replaces this struct.
/// Routes are only added for services which are present, so this struct
/// never needs to be constructed.
///
/// This struct cannot be constructed, so
/// the `unreachable`s in this module should never be reached.
#[derive(Debug)]
pub struct NoopService {
    _priv: (),
}

#[async_trait::async_trait]
impl SearchService for NoopService {
    async fn search(&self) -> Vec<String> {
        unreachable!()
    }
}

#[async_trait::async_trait]
impl QueryService for NoopService {
    fn supports(&self, _kind: QueryKind) -> bool {
        unreachable!()
    }

    async fn time_series_query(
        &self,
        _target: &str,
        _args: QueryArgs,
    ) -> Result<TimeSeriesResponse, QueryError> {
        unreachable!()
    }

    async fn table_query(
        &self,
        _target: &str,
        _args: TableQueryArgs,
    ) -> Result<TableResponse, QueryError> {
        unreachable!()
    }
}

#[async_trait::async_trait]
impl AnnotationService for NoopService {
    async fn annotations(&self, _request: AnnotationRequest) -> Result<Vec<Annotation>, BoxError> {
        unreachable!()
    }
}
