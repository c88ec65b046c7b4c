//! `POST /collect` (§6): the Ingestion Queue's sole external producer
//! besides the startup replay loop. A submission is durably cached before
//! it is ever enqueued (invariant 1) — a crash between those two steps
//! still leaves the item recoverable by the startup replay scan.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json as AxumJson, Router};
use serde::Serialize;
use serde_json::Value;

use crate::app::App;
use crate::auth;
use crate::json::Json;
use crate::validator;

pub fn route() -> Router<App> {
    Router::<App>::new().route("/collect", post(handle_collect))
}

#[derive(Serialize)]
pub struct CollectResponse {
    resp: &'static str,
    uuid: String,
}

impl CollectResponse {
    fn queued(uuid: impl ToString) -> Self {
        CollectResponse { resp: "queued", uuid: uuid.to_string() }
    }

    fn error() -> Self {
        CollectResponse { resp: "error", uuid: String::new() }
    }

    fn invalid_token() -> Self {
        CollectResponse { resp: "invalid token", uuid: String::new() }
    }
}

async fn handle_collect(
    State(app): State<App>,
    headers: HeaderMap,
    Json(raw): Json<Value>,
) -> AxumJson<CollectResponse> {
    if auth::check(&headers, &app.config.collector_tokens, app.config.deny_on_empty_config).is_err() {
        return AxumJson(CollectResponse::invalid_token());
    }

    let item = match validator::validate_collected(raw) {
        Ok(item) => item,
        Err(e) => {
            tracing::warn!(%e, "rejected malformed /collect submission");
            return AxumJson(CollectResponse::error());
        }
    };

    if let Err(e) = app.cache_store.insert(&item).await {
        tracing::error!(%e, uuid = %item.uuid, "failed to write cache row for /collect submission");
        return AxumJson(CollectResponse::error());
    }

    let uuid = item.uuid;
    if app.ingestion_queue.put(item).await.is_err() {
        tracing::error!(%uuid, "ingestion queue full, submission accepted into cache but not enqueued");
        return AxumJson(CollectResponse::error());
    }

    app.counters.accepted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    AxumJson(CollectResponse::queued(uuid))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn queued_response_carries_uuid() {
        let id = uuid::Uuid::new_v4();
        let resp = CollectResponse::queued(id);
        assert_eq!(resp.resp, "queued");
        assert_eq!(resp.uuid, id.to_string());
    }

    #[test]
    fn invalid_token_response_has_empty_uuid() {
        let resp = CollectResponse::invalid_token();
        assert_eq!(resp.resp, "invalid token");
        assert!(resp.uuid.is_empty());
    }
}
