//! Analysis Worker (4.F): drains the Ingestion Queue, calls the LLM
//! through the key rotator's client, validates the result, and forwards
//! survivors to the Post-Process Queue.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use serde_json::Value;

use crate::app::App;
use crate::cache_store::CacheStore;
use crate::llm::{extract_pure_json_text, record_conversation, LlmError};
use crate::model::{compute_max_rate, ArchivedFlag, CollectedItem, ProcessedItem};
use crate::validator;

/// Renders every `CollectedItem` field except `content` as a metadata
/// block, matching the upstream request shape (metadata + content, kept
/// separate so the model can weigh provenance before the body).
fn build_user_message(item: &CollectedItem) -> String {
    let metadata = serde_json::json!({
        "UUID": item.uuid,
        "token": item.token,
        "source": item.source,
        "target": item.target,
        "prompt": item.prompt,
        "title": item.title,
        "authors": item.authors,
        "pub_time": item.pub_time,
        "informant": item.informant,
    });
    format!(
        "METADATA:\n{}\n\nCONTENT:\n{}",
        serde_json::to_string_pretty(&metadata).unwrap_or_default(),
        item.content
    )
}

/// Runs one Analysis Worker loop until the Ingestion Queue is closed or
/// the process is asked to stop. Multiple instances of this loop may run
/// concurrently over the same queue.
pub async fn run(app: Arc<App>) {
    while let Some(item) = app.ingestion_queue.get().await {
        if app.is_stopping() {
            break;
        }
        process_one(&app, item).await;
    }
}

async fn process_one(app: &App, item: CollectedItem) {
    let uuid = item.uuid;

    if app.processing_table.insert(uuid).is_err() {
        tracing::warn!(%uuid, "item already in-flight, skipping duplicate dequeue");
        return;
    }

    analyze(app, &item).await;

    app.processing_table.remove(&uuid);
}

async fn analyze(app: &App, item: &CollectedItem) {
    let cache_store = app.cache_store.as_ref();
    let uuid = item.uuid;

    let Some(llm) = app.llm.as_ref() else {
        tracing::info!(%uuid, "no LLM client configured, dropping item (no analyzer)");
        if let Err(e) = cache_store.mark_archived(uuid, ArchivedFlag::Drop).await {
            tracing::error!(%uuid, %e, "failed to mark cache row DROP for no-analyzer item");
        }
        app.counters.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let user_message = build_user_message(item);

    let reply = match llm.complete_with_retry(&user_message).await {
        Ok(reply) => reply,
        Err(LlmError::Transient(e)) | Err(LlmError::Permanent(e)) => {
            tracing::error!(%uuid, error = %e, "LLM analysis failed");
            if let Err(e) = cache_store.mark_archived(uuid, ArchivedFlag::Error).await {
                tracing::error!(%uuid, %e, "failed to mark cache row ERROR after LLM failure");
            }
            app.counters.errored.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    if let Err(e) = record_conversation(
        &app.config.conversation_log_dir,
        "analysis",
        &app.config.llm_system_prompt,
        &user_message,
        &reply,
    )
    .await
    {
        tracing::warn!(%uuid, %e, "failed to write conversation transcript");
    }

    let json_text = extract_pure_json_text(&reply);
    let parsed: Result<Value, _> = serde_json::from_str(&json_text);
    let Ok(raw) = parsed else {
        tracing::warn!(%uuid, "LLM reply was not valid JSON, dropping item");
        if let Err(e) = cache_store.mark_archived(uuid, ArchivedFlag::Drop).await {
            tracing::error!(%uuid, %e, "failed to mark cache row DROP after non-JSON reply");
        }
        app.counters.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let processed: ProcessedItem = match validator::validate_processed(raw) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(%uuid, %e, "LLM reply failed ProcessedItem validation, dropping item");
            if let Err(e) = cache_store.mark_archived(uuid, ArchivedFlag::Drop).await {
                tracing::error!(%uuid, %e, "failed to mark cache row DROP after validation failure");
            }
            app.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    if processed.event_text.is_none() {
        tracing::info!(%uuid, "LLM judged item unworthy of archival");
        if let Err(e) = cache_store.mark_archived(uuid, ArchivedFlag::Drop).await {
            tracing::error!(%uuid, %e, "failed to mark cache row DROP for low-value item");
        }
        app.counters.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let (max_rate_class, max_rate_score) = compute_max_rate(
        &processed.rate,
        &app.config.max_rate_exclude_class,
    )
    .map(|(c, s)| (Some(c), Some(s)))
    .unwrap_or((None, None));

    let envelope = crate::model::PendingArchival {
        processed,
        raw_data: raw,
        submitter: item.token.clone(),
        max_rate_class,
        max_rate_score,
        time_got: Some(item.pub_time.unwrap_or(Utc::now())),
        time_archived: Some(Utc::now()),
    };

    if app.post_process_queue.put(envelope).await.is_err() {
        tracing::error!(%uuid, "post-process queue full, item dropped");
        if let Err(e) = cache_store.mark_archived(uuid, ArchivedFlag::Error).await {
            tracing::error!(%uuid, %e, "failed to mark cache row ERROR after queue overflow");
        }
        app.counters.errored.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn user_message_omits_content_from_metadata_block() {
        let item = CollectedItem {
            uuid: uuid::Uuid::new_v4(),
            token: "tok".into(),
            source: None,
            target: None,
            prompt: Some("custom instructions".into()),
            title: Some("Headline".into()),
            authors: vec![],
            content: "the article body".into(),
            pub_time: None,
            informant: None,
        };
        let message = build_user_message(&item);
        assert!(message.contains("Headline"));
        assert!(message.contains("the article body"));
        let metadata_section = message.split("CONTENT:").next().unwrap();
        assert!(!metadata_section.contains("the article body"));
        assert!(metadata_section.contains("tok"));
        assert!(metadata_section.contains("custom instructions"));
    }
}
