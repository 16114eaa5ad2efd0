use chrono::prelude::*;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

use grafana_simplejson::{
    backend::{self, BoxError, Endpoint, PrometheusRecorder, Server, ServerConfig, TargetTable},
    data::{
        Annotation, AnnotationRequest, DataPoint, QueryArgs, TableQueryArgs, TableResponse,
        TimeRange, TimeSeriesResponse,
    },
    prelude::*,
};

/// Split `range` into at most `max_points` evenly spaced timestamps.
fn timestamps(range: TimeRange, max_points: u64) -> Vec<DateTime<Utc>> {
    let max_points = max_points.clamp(1, 1_000) as i32;
    let step = ((range.to - range.from) / max_points).max(chrono::Duration::seconds(1));
    std::iter::successors(Some(range.from), |t| Some(*t + step))
        .take_while(|t| *t <= range.to)
        .take(max_points as usize)
        .collect()
}

// A sine wave, sampled at the resolution Grafana asks for.
async fn series(args: QueryArgs) -> Result<TimeSeriesResponse, BoxError> {
    let max_points = match args.interval {
        Some(interval) if !interval.is_zero() => {
            let span = (args.range.to - args.range.from).to_std()?;
            (span.as_millis() / interval.as_millis()).try_into()?
        }
        _ => args.max_data_points,
    };
    let datapoints = timestamps(args.range, max_points)
        .into_iter()
        .map(|t| DataPoint::new(t, (t.timestamp() as f64 / 600.0).sin()));
    Ok(TimeSeriesResponse::new("sine").with_datapoints(datapoints))
}

// Two diverging series, one row per point.
async fn table(args: TableQueryArgs) -> Result<TableResponse, BoxError> {
    let times = timestamps(args.range, 100);
    let up = (0..times.len()).map(|i| i as f64).collect::<Vec<_>>();
    let down = up.iter().map(|x| -x).collect::<Vec<_>>();
    let hosts = args
        .adhoc_filters
        .iter()
        .find(|f| f.key == "host")
        .map_or("all", |f| f.value.as_str())
        .to_string();
    Ok(TableResponse::new()
        .with_column(times.iter().copied().into_column("timestamp"))
        .with_column(up.into_column("series A"))
        .with_column(down.into_column("series B"))
        .with_column(std::iter::repeat(hosts).take(times.len()).into_column("host")))
}

// Mark the start of every day in the range.
async fn annotations(request: AnnotationRequest) -> Result<Vec<Annotation>, BoxError> {
    let range = request.range;
    let first = range
        .from
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| Utc.from_utc_datetime(&t))
        .ok_or("invalid range")?;
    Ok(
        std::iter::successors(Some(first), |t| Some(*t + chrono::Duration::days(1)))
            .skip_while(|t| *t < range.from)
            .take_while(|t| *t <= range.to)
            .map(|t| {
                Annotation::new(t, "midnight", t.format("%A").to_string())
                    .with_time_end(t + chrono::Duration::minutes(5))
                    .with_tags([request.annotation.name.clone()])
            })
            .collect(),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(backend::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let config = ServerConfig::from_env();
    let listener = backend::bind(config.listen_addr()?).await?;

    let registry = prometheus::Registry::new();
    let targets = TargetTable::new()
        .with_target("series", Endpoint::new().with_query(series))
        .with_target("table", Endpoint::new().with_table_query(table))
        .with_target(
            "constant",
            Endpoint::new().with_query(|args: QueryArgs| async move {
                Ok::<_, BoxError>(
                    TimeSeriesResponse::default().with_datapoints(
                        timestamps(args.range, args.max_data_points)
                            .into_iter()
                            .map(|t| DataPoint::new(t, 1.0)),
                    ),
                )
            }),
        );
    info!(targets = ?targets.targets(), "Starting SimpleJSON server");

    Server::new()
        .target_table(targets)
        .annotation_service(annotations)
        .metrics_recorder(PrometheusRecorder::new(&registry)?)
        .metrics_route(registry)
        .configure(&config)?
        .start(listener)
        .await?;
    Ok(())
}
