//! Archival Worker (4.H): drains the Post-Process Queue and commits each
//! `PendingArchival` to durable storage. Each step's failure is logged and
//! the worker moves on to the next item rather than rolling back whatever
//! already committed — a partially-archived item is recoverable from its
//! cache row, a lost one is not.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use uuid::Uuid;

use crate::app::App;
use crate::cache_store::CacheStore;
use crate::model::{Appendix, ArchivedFlag, ArchivedItem, PendingArchival};
use crate::validator;

/// Re-runs `validate_processed` against the original raw reply before
/// building the row `ArchiveStore` persists, rather than trusting the
/// `ProcessedItem` the Analysis Worker already parsed. Catches a
/// `EVENT_TEXT` missing after all — the one required field the ingestion-
/// time validator does not itself enforce.
fn build_archived_item(pending: PendingArchival) -> Option<ArchivedItem> {
    let revalidated = validator::validate_processed(pending.raw_data.clone()).ok()?;
    let event_text = revalidated.event_text?;

    Some(ArchivedItem {
        uuid: revalidated.uuid,
        informant: revalidated.informant,
        pub_time: revalidated.pub_time,
        time: revalidated.time,
        location: revalidated.location,
        people: revalidated.people,
        organization: revalidated.organization,
        event_title: revalidated.event_title,
        event_brief: revalidated.event_brief,
        event_text: Some(event_text),
        rate: revalidated.rate,
        impact: revalidated.impact,
        tips: revalidated.tips,
        raw_data: pending.raw_data,
        submitter: pending.submitter,
        appendix: Appendix {
            time_got: pending.time_got,
            time_archived: pending.time_archived,
            max_rate_class: pending.max_rate_class,
            max_rate_score: pending.max_rate_score,
            ..Appendix::default()
        },
    })
}

pub async fn run(app: Arc<App>) {
    while let Some(pending) = app.post_process_queue.get().await {
        if app.is_stopping() {
            break;
        }
        archive_one(&app, pending).await;
    }
}

async fn archive_one(app: &App, pending: PendingArchival) {
    let cache_store = app.cache_store.as_ref();
    let uuid = pending.processed.uuid;

    let Some(item) = build_archived_item(pending) else {
        tracing::warn!(%uuid, "item failed re-validation before archival, dropping");
        if let Err(e) = cache_store.mark_archived(uuid, ArchivedFlag::Error).await {
            tracing::error!(%uuid, %e, "failed to mark cache row ERROR after re-validation failure");
        }
        app.counters.errored.fetch_add(1, Ordering::Relaxed);
        return;
    };

    if let Err(e) = app.archive_store.insert(&item).await {
        tracing::error!(%uuid, %e, "failed to write archive row");
        if let Err(e) = cache_store.mark_archived(uuid, ArchivedFlag::Error).await {
            tracing::error!(%uuid, %e, "failed to mark cache row ERROR after archive write failure");
        }
        app.counters.errored.fetch_add(1, Ordering::Relaxed);
        return;
    }

    if let Some(event_text) = item.event_text.as_deref() {
        if let Err(e) = app.vector_index.add_text(uuid, event_text).await {
            tracing::warn!(%uuid, %e, "failed to index item into vector store, archival stands");
        }
    }

    if let Err(e) = cache_store.mark_archived(uuid, ArchivedFlag::Archived).await {
        tracing::error!(%uuid, %e, "failed to mark cache row ARCHIVED");
    }

    app.rss
        .add_item(
            item_title(&item),
            format!("/intelligence/{uuid}"),
            item.event_brief.clone(),
            item.appendix.time_archived.unwrap_or_else(Utc::now),
        )
        .await;

    if item.appendix.max_rate_score.unwrap_or(0) >= app.config.archive_score_threshold {
        app.result_cache.encache(item).await;
    }

    app.counters.archived.fetch_add(1, Ordering::Relaxed);
}

fn item_title(item: &ArchivedItem) -> String {
    if item.event_title.trim().is_empty() {
        item.event_brief.clone()
    } else {
        item.event_title.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::ProcessedItem;

    fn sample_pending(event_text: Option<String>) -> PendingArchival {
        let processed = ProcessedItem {
            uuid: Uuid::new_v4(),
            informant: "inf".into(),
            pub_time: None,
            time: vec![],
            location: vec![],
            people: vec![],
            organization: vec![],
            event_title: "Headline".into(),
            event_brief: "Brief".into(),
            event_text,
            rate: indexmap::IndexMap::new(),
            impact: None,
            tips: None,
        };
        let raw_data = serde_json::to_value(&processed).unwrap();
        PendingArchival {
            processed,
            raw_data,
            submitter: "sub".into(),
            max_rate_class: None,
            max_rate_score: Some(7),
            time_got: None,
            time_archived: Some(Utc::now()),
        }
    }

    #[test]
    fn missing_event_text_fails_revalidation() {
        assert!(build_archived_item(sample_pending(None)).is_none());
    }

    #[test]
    fn complete_item_builds_successfully() {
        let item = build_archived_item(sample_pending(Some("body".into()))).unwrap();
        assert_eq!(item.event_text.as_deref(), Some("body"));
        assert_eq!(item.appendix.max_rate_score, Some(7));
    }

    #[test]
    fn malformed_raw_data_fails_revalidation() {
        let mut pending = sample_pending(Some("body".into()));
        pending.raw_data = serde_json::json!({ "not": "a processed item" });
        assert!(build_archived_item(pending).is_none());
    }

    #[test]
    fn title_falls_back_to_brief_when_empty() {
        let item = ArchivedItem {
            uuid: Uuid::new_v4(),
            informant: "inf".into(),
            pub_time: None,
            time: vec![],
            location: vec![],
            people: vec![],
            organization: vec![],
            event_title: String::new(),
            event_brief: "Brief".into(),
            event_text: Some("body".into()),
            rate: indexmap::IndexMap::new(),
            impact: None,
            tips: None,
            raw_data: serde_json::json!({}),
            submitter: "sub".into(),
            appendix: Appendix::default(),
        };
        assert_eq!(item_title(&item), "Brief");
    }
}
