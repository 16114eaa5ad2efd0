use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{body::Body, Router};
use chrono::prelude::*;
use grafana_simplejson::{
    backend::{BoxError, Endpoint, Server, TargetTable},
    data::{
        Annotation, AnnotationRequest, DataPoint, QueryArgs, TableQueryArgs, TableResponse,
        TimeSeriesResponse,
    },
    prelude::*,
};
use http::{Method, Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn query(args: QueryArgs) -> Result<TimeSeriesResponse, BoxError> {
    Ok(TimeSeriesResponse::new(args.target).with_datapoints([
        DataPoint::new(args.range.from, args.max_data_points as f64),
        DataPoint::new(args.range.to, 0.0),
    ]))
}

async fn unlabelled_query(args: QueryArgs) -> Result<TimeSeriesResponse, BoxError> {
    Ok(TimeSeriesResponse::default().with_datapoints([DataPoint::new(args.range.from, 1.0)]))
}

async fn table_query(args: TableQueryArgs) -> Result<TableResponse, BoxError> {
    Ok(TableResponse::new()
        .with_column([args.range.from].into_column("time"))
        .with_column([args.adhoc_filters.len() as f64].into_column("filters"))
        .with_column(["a"].into_column("label")))
}

async fn failing_query(_args: QueryArgs) -> Result<TimeSeriesResponse, BoxError> {
    Err(io::Error::new(io::ErrorKind::Other, "backend unavailable").into())
}

async fn annotations(request: AnnotationRequest) -> Result<Vec<Annotation>, BoxError> {
    Ok(vec![Annotation::new(
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
        "foo",
        "bar",
    )
    .with_tags([request.annotation.name])])
}

fn target_table() -> TargetTable {
    TargetTable::new()
        .with_target("query", Endpoint::new().with_query(query))
        .with_target("tablequery", Endpoint::new().with_table_query(table_query))
        .with_target(
            "both",
            Endpoint::new()
                .with_query(query)
                .with_table_query(table_query),
        )
        .with_target("empty", Endpoint::new())
        .with_target("unlabelled", Endpoint::new().with_query(unlabelled_query))
        .with_target("failing", Endpoint::new().with_query(failing_query))
}

fn router() -> Router {
    Server::new()
        .target_table(target_table())
        .annotation_service(annotations)
        .into_router()
}

async fn call(router: Router, method: Method, uri: &str, body: &str) -> (StatusCode, String) {
    let response = router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn query_request(targets: Value) -> String {
    json!({
        "range": {
            "from": "2020-01-01T00:00:00.000Z",
            "to": "2020-01-01T00:01:00.000Z"
        },
        "targets": targets,
        "maxDataPoints": 100,
        "intervalMs": 1000,
        "adhocFilters": [{"key": "host", "operator": "=", "value": "a"}]
    })
    .to_string()
}

#[tokio::test]
async fn hello() {
    let (status, body) = call(router(), Method::GET, "/", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Hello");
}

#[tokio::test]
async fn search() {
    let (status, body) = call(router(), Method::POST, "/search", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        r#"["both","failing","query","tablequery","unlabelled"]"#
    );
}

#[tokio::test]
async fn search_closure() {
    let router = Server::new()
        .search_service(|| async { vec!["a".to_string(), "b".to_string()] })
        .into_router();
    let (status, body) = call(router, Method::POST, "/search", r#"{"target": ""}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"["a","b"]"#);
}

#[tokio::test]
async fn mixed_query() {
    let (status, body) = call(
        router(),
        Method::POST,
        "/query",
        &query_request(json!([
            {"target": "query", "refId": "A", "type": "timeserie"},
            {"target": "tablequery", "refId": "B", "type": "table"},
            {"target": "both", "refId": "C", "type": "table"}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let table = json!({
        "columns": [
            {"text": "time", "type": "time"},
            {"text": "filters", "type": "number"},
            {"text": "label", "type": "string"}
        ],
        "rows": [[1577836800000_i64, 1.0, "a"]],
        "type": "table"
    });
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!([
            {
                "target": "query",
                "datapoints": [[100.0, 1577836800000_i64], [0.0, 1577836860000_i64]]
            },
            table,
            table,
        ])
    );
}

#[tokio::test]
async fn query_without_type() {
    let (status, body) = call(
        router(),
        Method::POST,
        "/query",
        &query_request(json!([
            {"target": "tablequery", "refId": "A"},
            {"target": "both", "refId": "B"}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body[0]["type"], json!("table"));
    assert_eq!(body[1]["target"], json!("both"));
}

#[tokio::test]
async fn empty_label_is_filled_with_target() {
    let (status, body) = call(
        router(),
        Method::POST,
        "/query",
        &query_request(json!([{"target": "unlabelled", "type": "timeserie"}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        r#"[{"target":"unlabelled","datapoints":[[1.0,1577836800000]]}]"#
    );
}

#[tokio::test]
async fn no_targets() {
    let (status, body) = call(router(), Method::POST, "/query", &query_request(json!([]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
}

#[tokio::test]
async fn unknown_target() {
    let (status, body) = call(
        router(),
        Method::POST,
        "/query",
        &query_request(json!([{"target": "invalid", "type": "timeserie"}])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({"error": "unknown target 'invalid' for Time Series Query"})
    );
}

#[tokio::test]
async fn not_implemented() {
    let (status, body) = call(
        router(),
        Method::POST,
        "/query",
        &query_request(json!([{"target": "empty", "type": "table"}])),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({"error": "target 'empty' does not implement Table Query"})
    );
}

#[tokio::test]
async fn kind_follows_the_target_callback() {
    let (status, body) = call(
        router(),
        Method::POST,
        "/query",
        &query_request(json!([
            {"target": "tablequery", "refId": "A", "type": "timeserie"},
            {"target": "query", "refId": "B", "type": "table"},
            {"target": "tablequery", "refId": "C", "type": "json"},
            {"target": "both", "refId": "D", "type": "json"}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body[0]["type"], json!("table"));
    assert_eq!(body[1]["target"], json!("query"));
    assert_eq!(body[2]["type"], json!("table"));
    assert_eq!(body[3]["target"], json!("both"));
}

#[tokio::test]
async fn first_failure_fails_the_request() {
    let (status, body) = call(
        router(),
        Method::POST,
        "/query",
        &query_request(json!([
            {"target": "query", "type": "timeserie"},
            {"target": "failing", "type": "timeserie"},
            {"target": "invalid", "type": "timeserie"}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({"error": "backend unavailable"})
    );
}

#[tokio::test]
async fn malformed_request() {
    for body in [r#"{"range": "#, r#"{"targets": []}"#, ""] {
        let (status, response) = call(router(), Method::POST, "/query", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        let response: Value = serde_json::from_str(&response).unwrap();
        assert!(response["error"]
            .as_str()
            .unwrap()
            .starts_with("Unexpected JSON in request"));
    }
}

#[tokio::test]
async fn annotations_preflight() {
    let (status, body) = call(router(), Method::OPTIONS, "/annotations", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "");
}

#[tokio::test]
async fn annotations_response() {
    let request = json!({
        "range": {
            "from": "2020-01-01T00:00:00.000Z",
            "to": "2020-12-31T00:00:00.000Z"
        },
        "annotation": {
            "name": "snafu",
            "datasource": "fubar",
            "enable": true,
            "query": ""
        }
    });
    let (status, body) = call(
        router(),
        Method::POST,
        "/annotations",
        &request.to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        r#"[{"annotation":{"name":"snafu","datasource":"fubar","enable":true,"query":""},"time":1609459200000,"title":"foo","text":"bar","tags":["snafu"]}]"#
    );
}

#[tokio::test]
async fn annotation_errors() {
    let router = Server::new()
        .annotation_service(|_request: AnnotationRequest| async {
            Err::<Vec<Annotation>, BoxError>("no annotations here".into())
        })
        .into_router();
    let request = json!({
        "range": {"from": "2020-01-01T00:00:00Z", "to": "2020-01-02T00:00:00Z"},
        "annotation": {"name": "a"}
    });
    let (status, body) = call(router, Method::POST, "/annotations", &request.to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, r#"{"error":"no annotations here"}"#);
}

#[tokio::test]
async fn disabled_routes() {
    let router = Server::new().into_router();
    for (method, uri) in [
        (Method::POST, "/search"),
        (Method::POST, "/query"),
        (Method::POST, "/annotations"),
        (Method::OPTIONS, "/annotations"),
        (Method::GET, "/metrics"),
    ] {
        let (status, _) = call(router.clone(), method, uri, "{}").await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }

    // A table with no query functions only serves `/search`.
    let router = Server::new()
        .target_table(TargetTable::new().with_target("empty", Endpoint::new()))
        .into_router();
    let (status, body) = call(router.clone(), Method::POST, "/search", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
    let (status, _) = call(router, Method::POST, "/query", &query_request(json!([]))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_recorder_observes_routes() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let router = Server::new()
        .target_table(target_table())
        .metrics_recorder({
            let observed = Arc::clone(&observed);
            move |path: &str, _duration: Duration| {
                observed.lock().unwrap().push(path.to_string());
            }
        })
        .into_router();
    call(router.clone(), Method::POST, "/search", "").await;
    call(
        router.clone(),
        Method::POST,
        "/query",
        &query_request(json!([])),
    )
    .await;
    let (status, _) = call(router, Method::POST, "/nothing", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(*observed.lock().unwrap(), vec!["/search", "/query"]);
}

#[cfg(feature = "prometheus")]
#[tokio::test]
async fn prometheus_metrics_route() {
    use grafana_simplejson::backend::PrometheusRecorder;

    let registry = prometheus::Registry::new();
    let router = Server::new()
        .target_table(target_table())
        .metrics_recorder(PrometheusRecorder::new(&registry).unwrap())
        .metrics_route(registry)
        .into_router();
    call(router.clone(), Method::POST, "/search", "").await;
    call(router.clone(), Method::POST, "/search", "").await;
    let (status, body) = call(router, Method::GET, "/metrics", "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body.contains(r#"grafana_api_duration_seconds_count{path="/search"} 2"#),
        "{body}"
    );
}
