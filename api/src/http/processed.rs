//! `POST /processed` (§6): accepts an already-analyzed item from an
//! external analyzer, bypassing the Analysis Worker entirely. The item
//! still gets a cache row (so its terminal flag can be tracked like any
//! other submission) before it joins the Post-Process Queue directly.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json as AxumJson, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::app::App;
use crate::auth;
use crate::json::Json;
use crate::model::{compute_max_rate, CollectedItem, PendingArchival};
use crate::validator;

pub fn route() -> Router<App> {
    Router::<App>::new().route("/processed", post(handle_processed))
}

#[derive(Serialize)]
pub struct ProcessedResponse {
    resp: &'static str,
    uuid: String,
}

impl ProcessedResponse {
    fn queued(uuid: impl ToString) -> Self {
        ProcessedResponse { resp: "queued", uuid: uuid.to_string() }
    }

    fn error() -> Self {
        ProcessedResponse { resp: "error", uuid: String::new() }
    }

    fn invalid_token() -> Self {
        ProcessedResponse { resp: "invalid token", uuid: String::new() }
    }
}

async fn handle_processed(
    State(app): State<App>,
    headers: HeaderMap,
    Json(raw): Json<Value>,
) -> AxumJson<ProcessedResponse> {
    if auth::check(&headers, &app.config.processor_tokens, app.config.deny_on_empty_config).is_err() {
        return AxumJson(ProcessedResponse::invalid_token());
    }

    let submitter = auth::bearer_token(&headers).unwrap_or_default().to_string();

    let processed = match validator::validate_processed(raw.clone()) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(%e, "rejected malformed /processed submission");
            return AxumJson(ProcessedResponse::error());
        }
    };
    let uuid = processed.uuid;

    let cache_row = CollectedItem {
        uuid,
        token: submitter.clone(),
        source: None,
        target: None,
        prompt: None,
        title: Some(processed.event_title.clone()),
        authors: vec![],
        content: processed
            .event_text
            .clone()
            .unwrap_or_else(|| processed.event_brief.clone()),
        pub_time: processed.pub_time,
        informant: Some(processed.informant.clone()),
    };
    if let Err(e) = app.cache_store.insert(&cache_row).await {
        tracing::error!(%e, %uuid, "failed to write cache row for /processed submission");
        return AxumJson(ProcessedResponse::error());
    }

    if processed.event_text.is_none() {
        tracing::info!(%uuid, "processed submission carries no EVENT_TEXT, dropping");
        if let Err(e) = app
            .cache_store
            .mark_archived(uuid, crate::model::ArchivedFlag::Drop)
            .await
        {
            tracing::error!(%e, %uuid, "failed to mark cache row DROP for low-value /processed submission");
        }
        app.counters.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        return AxumJson(ProcessedResponse::queued(uuid));
    }

    let (max_rate_class, max_rate_score) = compute_max_rate(&processed.rate, &app.config.max_rate_exclude_class)
        .map(|(c, s)| (Some(c), Some(s)))
        .unwrap_or((None, None));

    let envelope = PendingArchival {
        processed,
        raw_data: raw,
        submitter,
        max_rate_class,
        max_rate_score,
        time_got: Some(Utc::now()),
        time_archived: Some(Utc::now()),
    };

    if app.post_process_queue.put(envelope).await.is_err() {
        tracing::error!(%uuid, "post-process queue full, /processed submission dropped");
        if let Err(e) = app
            .cache_store
            .mark_archived(uuid, crate::model::ArchivedFlag::Error)
            .await
        {
            tracing::error!(%e, %uuid, "failed to mark cache row ERROR after queue overflow");
        }
        return AxumJson(ProcessedResponse::error());
    }

    app.counters.accepted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    AxumJson(ProcessedResponse::queued(uuid))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_response_has_empty_uuid() {
        let resp = ProcessedResponse::error();
        assert_eq!(resp.resp, "error");
        assert!(resp.uuid.is_empty());
    }
}
