//! Result Cache (4.K): an in-memory, descending-by-archive-time window of
//! recently archived items above a score threshold, ported from the
//! upstream `IntelligenceCache`. Bounded by whichever of `count_limit` /
//! `period_limit` is configured, checked together on every insert exactly
//! as the original's `_check_drop_out_of_period` does.

use std::collections::VecDeque;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::archive_store::ArchiveStore;
use crate::model::ArchivedItem;
use crate::query_engine::QueryEngine;

pub struct ResultCache {
    threshold: i32,
    count_limit: Option<usize>,
    period_limit: Option<ChronoDuration>,
    items: Mutex<VecDeque<ArchivedItem>>,
}

impl ResultCache {
    pub fn new(threshold: i32, count_limit: usize, period_limit_hours: i64) -> Self {
        ResultCache {
            threshold,
            count_limit: (count_limit > 0).then_some(count_limit),
            period_limit: (period_limit_hours > 0)
                .then(|| ChronoDuration::hours(period_limit_hours)),
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Inserts `item` keeping the deque sorted descending by
    /// `appendix.time_archived`. Rejects items below `threshold` or
    /// lacking an archive timestamp.
    pub async fn encache(&self, item: ArchivedItem) -> bool {
        let Some(archive_time) = item.appendix.time_archived else {
            return false;
        };
        if item.appendix.max_rate_score.unwrap_or(10) < self.threshold {
            return false;
        }

        let mut items = self.items.lock().await;
        let insert_at = items
            .iter()
            .position(|cached| {
                cached
                    .appendix
                    .time_archived
                    .is_some_and(|t| archive_time > t)
            })
            .unwrap_or(items.len());
        items.insert(insert_at, item);
        self.drop_out_of_period(&mut items);
        true
    }

    fn drop_out_of_period(&self, items: &mut VecDeque<ArchivedItem>) {
        let cutoff = self.period_limit.map(|p| Utc::now() - p);
        loop {
            if let Some(limit) = self.count_limit {
                if items.len() > limit {
                    items.pop_back();
                    continue;
                }
            }
            if let Some(cutoff) = cutoff {
                if let Some(oldest) = items.back() {
                    if oldest.appendix.time_archived.is_some_and(|t| t < cutoff) {
                        items.pop_back();
                        continue;
                    }
                }
            }
            break;
        }
    }

    /// Rebuilds the cache from the archive store at startup, matching
    /// `load_cache`'s two query strategies (count-bounded vs. time-window).
    pub async fn load_from_store(
        &self,
        archive_store: &ArchiveStore,
        query_engine: &QueryEngine,
    ) -> eyre::Result<()> {
        let results = if let Some(limit) = self.count_limit {
            query_engine
                .query_intelligence(Some(self.threshold), 0, Some(limit as i64), None)
                .await?
                .0
        } else if let Some(period) = self.period_limit {
            let end = Utc::now();
            let start = end - period;
            query_engine
                .query_intelligence(Some(self.threshold), 0, None, Some((start, end)))
                .await?
                .0
        } else {
            let _ = archive_store;
            Vec::new()
        };

        let mut sorted = results;
        sorted.sort_by(|a, b| b.appendix.time_archived.cmp(&a.appendix.time_archived));

        let mut items = self.items.lock().await;
        items.clear();
        items.extend(sorted);
        self.drop_out_of_period(&mut items);
        Ok(())
    }

    /// Returns cached items, most recent first, filtered and mapped, with
    /// an early-exit once `limit` matches have been found.
    pub async fn get_cached<T>(
        &self,
        filter: impl Fn(&ArchivedItem) -> bool,
        map: impl Fn(&ArchivedItem) -> T,
        limit: Option<usize>,
    ) -> Vec<T> {
        let items = self.items.lock().await;
        let mut out = Vec::new();
        for item in items.iter() {
            if filter(item) {
                out.push(map(item));
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Appendix;
    use indexmap::IndexMap;

    fn sample(score: i32, archived_offset_secs: i64) -> ArchivedItem {
        ArchivedItem {
            uuid: uuid::Uuid::new_v4(),
            informant: "inf".into(),
            pub_time: None,
            time: vec![],
            location: vec![],
            people: vec![],
            organization: vec![],
            event_title: "t".into(),
            event_brief: "b".into(),
            event_text: None,
            rate: IndexMap::new(),
            impact: None,
            tips: None,
            raw_data: serde_json::json!({}),
            submitter: "s".into(),
            appendix: Appendix {
                time_archived: Some(Utc::now() + ChronoDuration::seconds(archived_offset_secs)),
                max_rate_score: Some(score),
                ..Appendix::default()
            },
        }
    }

    #[tokio::test]
    async fn below_threshold_items_are_rejected() {
        let cache = ResultCache::new(6, 10, 0);
        assert!(!cache.encache(sample(3, 0)).await);
    }

    #[tokio::test]
    async fn items_are_kept_descending_by_archive_time() {
        let cache = ResultCache::new(0, 10, 0);
        cache.encache(sample(10, 0)).await;
        cache.encache(sample(10, 100)).await;
        cache.encache(sample(10, 50)).await;

        let times: Vec<_> = cache
            .get_cached(|_| true, |i| i.appendix.time_archived, None)
            .await;
        assert!(times[0] > times[1] && times[1] > times[2]);
    }

    #[tokio::test]
    async fn count_limit_evicts_oldest() {
        let cache = ResultCache::new(0, 2, 0);
        cache.encache(sample(10, 0)).await;
        cache.encache(sample(10, 10)).await;
        cache.encache(sample(10, 20)).await;

        let n = cache.get_cached(|_| true, |_| (), None).await.len();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn get_cached_respects_limit_with_early_exit() {
        let cache = ResultCache::new(0, 10, 0);
        for i in 0..5 {
            cache.encache(sample(10, i)).await;
        }
        let out = cache.get_cached(|_| true, |_| (), Some(2)).await;
        assert_eq!(out.len(), 2);
    }
}
