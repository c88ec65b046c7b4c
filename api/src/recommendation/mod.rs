//! Recommendation Manager (4.N): periodically asks the model to pick the
//! most significant archived items from a recent window and keeps a
//! rolling 48-hour in-memory cache of the results, ported from the
//! upstream `RecommendationManager`. One row per generation hour is also
//! persisted so the cache can be rebuilt across restarts.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::app::DbPool;
use crate::llm::{extract_pure_json_text, LlmClient};
use crate::model::{ArchivedItem, NewRecommendationSetRow, RecommendationSet, RecommendationSetRow};
use crate::query_engine::QueryEngine;
use crate::schema::recommendation_sets;

const CACHE_WINDOW: ChronoDuration = ChronoDuration::hours(48);

pub struct RecommendationManager {
    pool: DbPool,
    query_engine: std::sync::Arc<QueryEngine>,
    llm: std::sync::Arc<LlmClient>,
    prompt: String,
    default_period_hours: i64,
    candidate_limit: i64,
    generating: Mutex<bool>,
    cache: Mutex<Vec<RecommendationSet>>,
}

impl RecommendationManager {
    pub fn new(
        pool: DbPool,
        query_engine: std::sync::Arc<QueryEngine>,
        llm: std::sync::Arc<LlmClient>,
        prompt: String,
        default_period_hours: i64,
        candidate_limit: usize,
    ) -> Self {
        RecommendationManager {
            pool,
            query_engine,
            llm,
            prompt,
            default_period_hours,
            candidate_limit: candidate_limit as i64,
            generating: Mutex::new(false),
            cache: Mutex::new(Vec::new()),
        }
    }

    /// Rebuilds the in-memory cache from the last 48 hours of persisted
    /// rows, resolving each recommendation UUID back to its archived item.
    pub async fn load_initial(&self) -> eyre::Result<()> {
        let mut conn = self.pool.get().await?;
        let cutoff = Utc::now() - CACHE_WINDOW;
        let rows: Vec<RecommendationSetRow> = recommendation_sets::table
            .filter(recommendation_sets::generated_hour.ge(cutoff))
            .order(recommendation_sets::generated_hour.asc())
            .select(RecommendationSetRow::as_select())
            .load(&mut conn)
            .await?;

        let mut sets = Vec::with_capacity(rows.len());
        for row in rows {
            let mut recommendations = Vec::new();
            for uuid in row.recommendation_uuids.into_iter().flatten() {
                if let Some(item) = self.query_engine.get(uuid).await? {
                    recommendations.push(item);
                }
            }
            sets.push(RecommendationSet {
                generated_datetime: row.generated_hour,
                recommendations,
                candidate_uuids: row.candidate_uuids.into_iter().flatten().collect(),
            });
        }

        let mut cache = self.cache.lock().await;
        *cache = sets;
        Ok(())
    }

    fn truncate_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
        dt.date_naive()
            .and_hms_opt(dt.hour(), 0, 0)
            .expect("hour of an existing datetime is always valid")
            .and_utc()
    }

    /// Generates a fresh recommendation set for `period` (defaulting to
    /// the last `default_period_hours` up to the current top of the hour)
    /// above `threshold`. Returns `None` without calling the model if
    /// another generation is already running or no candidates qualify.
    pub async fn generate(
        &self,
        period: Option<(DateTime<Utc>, DateTime<Utc>)>,
        threshold: i32,
    ) -> eyre::Result<Option<RecommendationSet>> {
        {
            let mut generating = self.generating.lock().await;
            if *generating {
                return Ok(None);
            }
            *generating = true;
        }

        let result = self.generate_inner(period, threshold).await;

        *self.generating.lock().await = false;
        result
    }

    async fn generate_inner(
        &self,
        period: Option<(DateTime<Utc>, DateTime<Utc>)>,
        threshold: i32,
    ) -> eyre::Result<Option<RecommendationSet>> {
        let (start, end) = period.unwrap_or_else(|| {
            let end = Self::truncate_to_hour(Utc::now());
            (end - ChronoDuration::hours(self.default_period_hours), end)
        });

        let (candidates, _total) = self
            .query_engine
            .query_intelligence(Some(threshold), 0, Some(self.candidate_limit), Some((start, end)))
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let table = to_markdown_table(&candidates);
        let reply = self.llm.complete_with_system_and_retry(&self.prompt, &table).await?;
        let picked = parse_uuid_array(&extract_pure_json_text(&reply));

        let recommendations: Vec<ArchivedItem> = picked
            .into_iter()
            .filter_map(|uuid| candidates.iter().find(|c| c.uuid == uuid).cloned())
            .collect();
        let candidate_uuids: Vec<Uuid> = candidates.iter().map(|c| c.uuid).collect();

        let set = RecommendationSet {
            generated_datetime: end,
            recommendations,
            candidate_uuids,
        };
        self.save_and_cache(set.clone()).await?;
        Ok(Some(set))
    }

    async fn save_and_cache(&self, set: RecommendationSet) -> eyre::Result<()> {
        let mut conn = self.pool.get().await?;
        let new_row = NewRecommendationSetRow {
            generated_hour: set.generated_datetime,
            recommendation_uuids: set.recommendations.iter().map(|i| Some(i.uuid)).collect(),
            candidate_uuids: set.candidate_uuids.iter().cloned().map(Some).collect(),
        };
        diesel::insert_into(recommendation_sets::table)
            .values(&new_row)
            .on_conflict(recommendation_sets::generated_hour)
            .do_update()
            .set(&new_row)
            .execute(&mut conn)
            .await?;

        let mut cache = self.cache.lock().await;
        cache.retain(|existing| existing.generated_datetime != set.generated_datetime);
        cache.push(set);
        cache.sort_by_key(|s| s.generated_datetime);
        let cutoff = Utc::now() - CACHE_WINDOW;
        cache.retain(|s| s.generated_datetime >= cutoff);
        Ok(())
    }

    pub async fn get_latest_recommendation(&self) -> Option<RecommendationSet> {
        self.cache.lock().await.last().cloned()
    }

    /// Ranks recommended items by how many generations within `period`
    /// picked them, most-recommended first.
    pub async fn count_intelligence(
        &self,
        period: (DateTime<Utc>, DateTime<Utc>),
        limit: usize,
    ) -> Vec<(Uuid, usize)> {
        let cache = self.cache.lock().await;
        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        for set in cache.iter() {
            if set.generated_datetime < period.0 || set.generated_datetime > period.1 {
                continue;
            }
            for item in &set.recommendations {
                *counts.entry(item.uuid).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(Uuid, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }
}

/// Renders a markdown table of UUID / title / brief / score columns for
/// the candidate list sent to the model, in place of the upstream
/// `dict_list_to_markdown` helper.
fn to_markdown_table(items: &[ArchivedItem]) -> String {
    let mut out = String::from("| UUID | EVENT_TITLE | EVENT_BRIEF | MAX_RATE_SCORE |\n");
    out.push_str("| --- | --- | --- | --- |\n");
    for item in items {
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            item.uuid,
            item.event_title.replace('|', "\\|"),
            item.event_brief.replace('|', "\\|"),
            item.appendix.max_rate_score.map(|s| s.to_string()).unwrap_or_default(),
        ));
    }
    out
}

fn parse_uuid_array(text: &str) -> Vec<Uuid> {
    serde_json::from_str::<Vec<String>>(text)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| Uuid::parse_str(s.trim()).ok())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn markdown_table_escapes_pipe_characters() {
        let item = ArchivedItem {
            uuid: Uuid::new_v4(),
            informant: "inf".into(),
            pub_time: None,
            time: vec![],
            location: vec![],
            people: vec![],
            organization: vec![],
            event_title: "A | B".into(),
            event_brief: "brief".into(),
            event_text: None,
            rate: indexmap::IndexMap::new(),
            impact: None,
            tips: None,
            raw_data: serde_json::json!({}),
            submitter: "s".into(),
            appendix: crate::model::Appendix::default(),
        };
        let table = to_markdown_table(&[item]);
        assert!(table.contains("A \\| B"));
    }

    #[test]
    fn parse_uuid_array_skips_invalid_entries() {
        let id = Uuid::new_v4();
        let text = format!("[\"{id}\", \"not-a-uuid\"]");
        let parsed = parse_uuid_array(&text);
        assert_eq!(parsed, vec![id]);
    }

    #[test]
    fn truncate_to_hour_zeroes_minutes_and_seconds() {
        let dt = Utc::now();
        let truncated = RecommendationManager::truncate_to_hour(dt);
        assert_eq!(truncated.minute(), 0);
        assert_eq!(truncated.second(), 0);
    }
}
