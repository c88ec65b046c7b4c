//! Data model shared by every pipeline stage: the three record shapes a
//! submission takes on its way from `/collect` to the archive, plus the
//! smaller records owned by the key rotator, recommendation manager and
//! crawl record utility.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::schema::{archive_items, cache_items, crawl_records, recommendation_sets};

/// A raw submission as it arrives at `/collect` or `/processed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedItem {
    #[serde(rename = "UUID")]
    pub uuid: Uuid,
    pub token: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub content: String,
    #[serde(default)]
    pub pub_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub informant: Option<String>,
}

/// The result of an LLM analysis pass over a `CollectedItem`. `event_text`
/// absent means the model judged the item unworthy of archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedItem {
    #[serde(rename = "UUID")]
    pub uuid: Uuid,
    #[serde(rename = "INFORMANT")]
    pub informant: String,
    #[serde(rename = "PUB_TIME", default)]
    pub pub_time: Option<DateTime<Utc>>,
    #[serde(rename = "TIME", default)]
    pub time: Vec<String>,
    #[serde(rename = "LOCATION", default)]
    pub location: Vec<String>,
    #[serde(rename = "PEOPLE", default)]
    pub people: Vec<String>,
    #[serde(rename = "ORGANIZATION", default)]
    pub organization: Vec<String>,
    #[serde(rename = "EVENT_TITLE")]
    pub event_title: String,
    #[serde(rename = "EVENT_BRIEF")]
    pub event_brief: String,
    #[serde(rename = "EVENT_TEXT", default)]
    pub event_text: Option<String>,
    #[serde(rename = "RATE", default)]
    pub rate: indexmap::IndexMap<String, f64>,
    #[serde(rename = "IMPACT", default)]
    pub impact: Option<String>,
    #[serde(rename = "TIPS", default)]
    pub tips: Option<String>,
}

/// Terminal outcome written onto a cache row exactly once per lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchivedFlag {
    Archived,
    Drop,
    Error,
    Retry,
}

impl ArchivedFlag {
    pub fn as_char(self) -> char {
        match self {
            ArchivedFlag::Archived => 'A',
            ArchivedFlag::Drop => 'D',
            ArchivedFlag::Error => 'E',
            ArchivedFlag::Retry => 'R',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(ArchivedFlag::Archived),
            'D' => Some(ArchivedFlag::Drop),
            'E' => Some(ArchivedFlag::Error),
            'R' => Some(ArchivedFlag::Retry),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ArchivedFlag::Retry)
    }
}

/// Bookkeeping carried alongside every archived record. Field names mirror
/// the dunder-style `APPENDIX_*` keys of the upstream system without
/// reproducing the dunder spelling itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Appendix {
    pub time_got: Option<DateTime<Utc>>,
    pub time_post: Option<DateTime<Utc>>,
    pub time_done: Option<DateTime<Utc>>,
    pub time_archived: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_rate_class: Option<String>,
    pub max_rate_score: Option<i32>,
    pub link_items: Vec<Uuid>,
    pub parent_item: Option<Uuid>,
}

/// The name of the RATE dimension treated as a meta-signal rather than a
/// candidate for MAX_RATE_CLASS/SCORE. Matches the upstream default.
pub const DEFAULT_MAX_RATE_EXCLUDE_CLASS: &str = "内容准确率";

/// Scans `rate` in insertion order and returns the highest-scoring class,
/// excluding `exclude_class`. Ties keep the first-seen key.
pub fn compute_max_rate(
    rate: &indexmap::IndexMap<String, f64>,
    exclude_class: &str,
) -> Option<(String, i32)> {
    let mut best: Option<(String, f64)> = None;
    for (class, score) in rate {
        if class == exclude_class {
            continue;
        }
        match &best {
            Some((_, best_score)) if *best_score >= *score => {}
            _ => best = Some((class.clone(), *score)),
        }
    }
    best.map(|(class, score)| (class, score.round() as i32))
}

/// A fully archived intelligence record: a `ProcessedItem` plus the raw
/// submission and bookkeeping appendix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedItem {
    pub uuid: Uuid,
    pub informant: String,
    pub pub_time: Option<DateTime<Utc>>,
    pub time: Vec<String>,
    pub location: Vec<String>,
    pub people: Vec<String>,
    pub organization: Vec<String>,
    pub event_title: String,
    pub event_brief: String,
    pub event_text: Option<String>,
    pub rate: indexmap::IndexMap<String, f64>,
    pub impact: Option<String>,
    pub tips: Option<String>,
    pub raw_data: Json,
    pub submitter: String,
    pub appendix: Appendix,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = cache_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CacheRow {
    pub id: i64,
    pub uuid: Uuid,
    pub token: String,
    pub source: Option<String>,
    pub target: Option<String>,
    pub prompt: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<Option<String>>,
    pub content: String,
    pub pub_time: Option<DateTime<Utc>>,
    pub informant: Option<String>,
    pub archived_flag: Option<String>,
    pub retry_count: i32,
    pub time_got: DateTime<Utc>,
    pub time_post: Option<DateTime<Utc>>,
    pub time_done: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = cache_items)]
pub struct NewCacheRow {
    pub uuid: Uuid,
    pub token: String,
    pub source: Option<String>,
    pub target: Option<String>,
    pub prompt: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<Option<String>>,
    pub content: String,
    pub pub_time: Option<DateTime<Utc>>,
    pub informant: Option<String>,
}

impl From<&CollectedItem> for NewCacheRow {
    fn from(item: &CollectedItem) -> Self {
        NewCacheRow {
            uuid: item.uuid,
            token: item.token.clone(),
            source: item.source.clone(),
            target: item.target.clone(),
            prompt: item.prompt.clone(),
            title: item.title.clone(),
            authors: item.authors.iter().cloned().map(Some).collect(),
            content: item.content.clone(),
            pub_time: item.pub_time,
            informant: item.informant.clone(),
        }
    }
}

/// Rebuilds the submission shape from a cache row for startup replay —
/// every unflagged row becomes an `CollectedItem` pushed back onto the
/// Ingestion Queue exactly as if it had just arrived at `/collect`.
impl From<CacheRow> for CollectedItem {
    fn from(row: CacheRow) -> Self {
        CollectedItem {
            uuid: row.uuid,
            token: row.token,
            source: row.source,
            target: row.target,
            prompt: row.prompt,
            title: row.title,
            authors: row.authors.into_iter().flatten().collect(),
            content: row.content,
            pub_time: row.pub_time,
            informant: row.informant,
        }
    }
}

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = archive_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ArchiveRow {
    pub id: i64,
    pub uuid: Uuid,
    pub informant: String,
    pub pub_time: Option<DateTime<Utc>>,
    pub event_times: Vec<Option<String>>,
    pub locations: Vec<Option<String>>,
    pub peoples: Vec<Option<String>>,
    pub organizations: Vec<Option<String>>,
    pub event_title: String,
    pub event_brief: String,
    pub event_text: Option<String>,
    pub rate: Json,
    pub impact: Option<String>,
    pub tips: Option<String>,
    pub raw_data: Json,
    pub submitter: String,
    pub max_rate_class: Option<String>,
    pub max_rate_score: Option<i32>,
    pub link_items: Vec<Option<Uuid>>,
    pub parent_item: Option<Uuid>,
    pub time_got: Option<DateTime<Utc>>,
    pub time_post: Option<DateTime<Utc>>,
    pub time_done: Option<DateTime<Utc>>,
    pub time_archived: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = archive_items)]
pub struct NewArchiveRow {
    pub uuid: Uuid,
    pub informant: String,
    pub pub_time: Option<DateTime<Utc>>,
    pub event_times: Vec<Option<String>>,
    pub locations: Vec<Option<String>>,
    pub peoples: Vec<Option<String>>,
    pub organizations: Vec<Option<String>>,
    pub event_title: String,
    pub event_brief: String,
    pub event_text: Option<String>,
    pub rate: Json,
    pub impact: Option<String>,
    pub tips: Option<String>,
    pub raw_data: Json,
    pub submitter: String,
    pub max_rate_class: Option<String>,
    pub max_rate_score: Option<i32>,
    pub link_items: Vec<Option<Uuid>>,
    pub parent_item: Option<Uuid>,
    pub time_got: Option<DateTime<Utc>>,
    pub time_post: Option<DateTime<Utc>>,
    pub time_done: Option<DateTime<Utc>>,
    pub time_archived: DateTime<Utc>,
}

impl ArchiveRow {
    pub fn into_archived_item(self) -> ArchivedItem {
        ArchivedItem {
            uuid: self.uuid,
            informant: self.informant,
            pub_time: self.pub_time,
            time: self.event_times.into_iter().flatten().collect(),
            location: self.locations.into_iter().flatten().collect(),
            people: self.peoples.into_iter().flatten().collect(),
            organization: self.organizations.into_iter().flatten().collect(),
            event_title: self.event_title,
            event_brief: self.event_brief,
            event_text: self.event_text,
            rate: serde_json::from_value(self.rate).unwrap_or_default(),
            impact: self.impact,
            tips: self.tips,
            raw_data: self.raw_data,
            submitter: self.submitter,
            appendix: Appendix {
                time_got: self.time_got,
                time_post: self.time_post,
                time_done: self.time_done,
                time_archived: Some(self.time_archived),
                retry_count: 0,
                max_rate_class: self.max_rate_class,
                max_rate_score: self.max_rate_score,
                link_items: self.link_items.into_iter().flatten().collect(),
                parent_item: self.parent_item,
            },
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = recommendation_sets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RecommendationSetRow {
    pub id: i64,
    pub generated_hour: DateTime<Utc>,
    pub recommendation_uuids: Vec<Option<Uuid>>,
    pub candidate_uuids: Vec<Option<Uuid>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = recommendation_sets)]
pub struct NewRecommendationSetRow {
    pub generated_hour: DateTime<Utc>,
    pub recommendation_uuids: Vec<Option<Uuid>>,
    pub candidate_uuids: Vec<Option<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub generated_datetime: DateTime<Utc>,
    pub recommendations: Vec<ArchivedItem>,
    pub candidate_uuids: Vec<Uuid>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crawl_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CrawlRecordRow {
    pub id: i64,
    pub url: String,
    pub status: i32,
    pub error_count: i32,
    pub extra: Option<Json>,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crawl_records)]
pub struct NewCrawlRecordRow {
    pub url: String,
    pub status: i32,
    pub error_count: i32,
    pub extra: Option<Json>,
    pub updated_time: DateTime<Utc>,
}

/// A `ProcessedItem` enriched with the bookkeeping the Archival Worker (4.H)
/// needs to commit an `archive_items` row, queued between the two workers
/// so the Analysis Worker never has to know about archive storage.
#[derive(Debug, Clone)]
pub struct PendingArchival {
    pub processed: ProcessedItem,
    pub raw_data: Json,
    pub submitter: String,
    pub max_rate_class: Option<String>,
    pub max_rate_score: Option<i32>,
    pub time_got: Option<DateTime<Utc>>,
    pub time_archived: Option<DateTime<Utc>>,
}

/// Status and balance of a single LLM API key, persisted in the key record
/// file rather than the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Unknown,
    Valid,
    Error,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: String,
    pub balance: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub status: KeyStatus,
}

#[cfg(test)]
mod test {
    use super::*;

    fn rate(pairs: &[(&str, f64)]) -> indexmap::IndexMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn compute_max_rate_picks_highest_excluding_accuracy() {
        let r = rate(&[("军事", 7.0), ("内容准确率", 10.0), ("经济", 7.5)]);
        let (class, score) = compute_max_rate(&r, DEFAULT_MAX_RATE_EXCLUDE_CLASS).unwrap();
        assert_eq!(class, "经济");
        assert_eq!(score, 8);
    }

    #[test]
    fn compute_max_rate_ties_keep_first_seen() {
        let r = rate(&[("a", 5.0), ("b", 5.0), ("c", 5.0)]);
        let (class, _) = compute_max_rate(&r, DEFAULT_MAX_RATE_EXCLUDE_CLASS).unwrap();
        assert_eq!(class, "a");
    }

    #[test]
    fn compute_max_rate_empty_rate_is_none() {
        let r = rate(&[]);
        assert!(compute_max_rate(&r, DEFAULT_MAX_RATE_EXCLUDE_CLASS).is_none());
    }

    #[test]
    fn archived_flag_round_trips_through_char() {
        for flag in [
            ArchivedFlag::Archived,
            ArchivedFlag::Drop,
            ArchivedFlag::Error,
            ArchivedFlag::Retry,
        ] {
            assert_eq!(ArchivedFlag::from_char(flag.as_char()), Some(flag));
        }
    }
}
