//! `GET /statistics/…` (§6, §4.M): read-only JSON aggregations over the
//! Archive Store. Gated by `RpcAuth` like the rest of the query surface,
//! since these are the same kind of read operation `/api` exposes under
//! `statistics_buckets` et al., just reachable by plain GET for clients
//! that want a cacheable URL instead of a POST body.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::auth::RpcAuth;
use crate::error::AppError;
use crate::statistics::Granularity;

pub fn route() -> Router<App> {
    Router::<App>::new()
        .route("/statistics/buckets", get(handle_buckets))
        .route("/statistics/score-distribution", get(handle_score_distribution))
        .route("/statistics/top-informants", get(handle_top_informants))
        .route("/statistics/total", get(handle_total))
}

#[derive(Deserialize)]
struct RangeQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct BucketQuery {
    granularity: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TopInformantsQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    10
}

#[derive(Serialize)]
struct BucketOut {
    bucket: DateTime<Utc>,
    count: i64,
}

async fn handle_buckets(
    _auth: RpcAuth,
    State(app): State<App>,
    Query(q): Query<BucketQuery>,
) -> Result<Json<Vec<BucketOut>>, AppError> {
    let granularity = match q.granularity.as_str() {
        "hour" => Granularity::Hour,
        "day" => Granularity::Day,
        "week" => Granularity::Week,
        "month" => Granularity::Month,
        other => return Err(AppError::Validation(format!("unknown granularity `{other}`"))),
    };
    let rows = app
        .statistics
        .bucketed_counts(granularity, q.start, q.end)
        .await
        .map_err(|e| AppError::Unhandled(e.to_string()))?;
    Ok(Json(rows.into_iter().map(|r| BucketOut { bucket: r.bucket, count: r.count }).collect()))
}

async fn handle_score_distribution(
    _auth: RpcAuth,
    State(app): State<App>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<(i32, i64)>>, AppError> {
    let rows = app
        .statistics
        .score_distribution(q.start, q.end)
        .await
        .map_err(|e| AppError::Unhandled(e.to_string()))?;
    Ok(Json(rows))
}

async fn handle_top_informants(
    _auth: RpcAuth,
    State(app): State<App>,
    Query(q): Query<TopInformantsQuery>,
) -> Result<Json<Vec<(String, i64)>>, AppError> {
    let rows = app
        .statistics
        .top_informants(q.start, q.end, q.limit)
        .await
        .map_err(|e| AppError::Unhandled(e.to_string()))?;
    Ok(Json(rows))
}

async fn handle_total(
    _auth: RpcAuth,
    State(app): State<App>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<i64>, AppError> {
    let count = app.statistics.total_count(q.start, q.end).await.map_err(|e| AppError::Unhandled(e.to_string()))?;
    Ok(Json(count))
}
