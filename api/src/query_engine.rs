//! Query Engine (4.L): composable filter/sort/pagination over the Archive
//! Store, ported from `IntelligenceQueryEngine`. The original built a
//! MongoDB query document incrementally from optional filter arguments;
//! here the same incremental composition builds a `diesel` boxed query,
//! applying each active filter as its own `.filter()` call (diesel ANDs
//! sequential filters automatically, which is exactly how the keyword
//! AND-across-terms rule is expressed).
//!
//! Keyword matching is case-insensitive word-boundary regex (`~*` with
//! `\y...\y`, Postgres's ARE word-boundary escape — `\b` means backspace
//! in Postgres regex, not a boundary), each term OR-combined across
//! `event_brief`/`event_text` and AND-combined across terms. Built via
//! `diesel::dsl::sql` with bound parameters rather than `ilike`, since
//! `ilike('%cat%')` would wrongly match "category".

use chrono::{DateTime, Utc};
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use diesel::PgArrayExpressionMethods;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::app::DbPool;
use crate::model::{ArchiveRow, ArchivedItem};
use crate::schema::archive_items;

#[derive(Default, Clone)]
pub struct QueryFilter {
    pub archive_period: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub pub_period: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub locations: Vec<String>,
    pub peoples: Vec<String>,
    pub organizations: Vec<String>,
    pub keywords: Vec<String>,
    pub threshold: Option<i32>,
}

pub struct QueryEngine {
    pool: DbPool,
}

type BoxedQuery<'a> = archive_items::BoxedQuery<'a, diesel::pg::Pg>;

/// Escapes Postgres ARE metacharacters in `term` and wraps it in `\y`
/// word-boundary anchors, so a keyword search for "cat" matches "cat" and
/// "the cat sat" but not "category" or "concatenate".
fn word_boundary_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if "\\.^$|()[]{}*+?".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!(r"\y{escaped}\y")
}

impl QueryEngine {
    pub fn new(pool: DbPool) -> Self {
        QueryEngine { pool }
    }

    fn apply_filter(filter: &QueryFilter) -> BoxedQuery<'static> {
        let mut query = archive_items::table.into_boxed();

        if let Some((start, end)) = filter.archive_period {
            query = query.filter(archive_items::time_archived.between(start, end));
        }
        if let Some((start, end)) = filter.pub_period {
            query = query.filter(archive_items::pub_time.between(start, end));
        }
        if !filter.locations.is_empty() {
            query = query.filter(archive_items::locations.overlaps_with(
                filter.locations.iter().cloned().map(Some).collect::<Vec<_>>(),
            ));
        }
        if !filter.peoples.is_empty() {
            query = query.filter(archive_items::peoples.overlaps_with(
                filter.peoples.iter().cloned().map(Some).collect::<Vec<_>>(),
            ));
        }
        if !filter.organizations.is_empty() {
            query = query.filter(archive_items::organizations.overlaps_with(
                filter
                    .organizations
                    .iter()
                    .cloned()
                    .map(Some)
                    .collect::<Vec<_>>(),
            ));
        }
        for kw in &filter.keywords {
            let pattern = word_boundary_pattern(kw);
            let brief_match = sql::<Bool>("event_brief ~* ").bind::<Text, _>(pattern.clone());
            let text_match = sql::<Bool>("event_text ~* ").bind::<Text, _>(pattern);
            query = query.filter(brief_match.or(text_match));
        }
        if let Some(threshold) = filter.threshold {
            query = query.filter(archive_items::max_rate_score.ge(threshold));
        }

        query
    }

    /// Matches the original's `query_intelligence`, collapsing its several
    /// optional keyword arguments into a single `QueryFilter`. Returns
    /// `(rows, total_without_pagination)`.
    pub async fn query_intelligence(
        &self,
        threshold: Option<i32>,
        skip: i64,
        limit: Option<i64>,
        archive_period: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> eyre::Result<(Vec<ArchivedItem>, i64)> {
        let filter = QueryFilter {
            archive_period,
            threshold,
            ..Default::default()
        };
        self.query(&filter, skip, limit.unwrap_or(i64::MAX)).await
    }

    pub async fn query(
        &self,
        filter: &QueryFilter,
        skip: i64,
        limit: i64,
    ) -> eyre::Result<(Vec<ArchivedItem>, i64)> {
        let mut conn = self.pool.get().await?;

        let total = Self::apply_filter(filter).count().get_result(&mut conn).await?;

        let rows: Vec<ArchiveRow> = Self::apply_filter(filter)
            .order((
                archive_items::pub_time.desc(),
                archive_items::id.desc(),
            ))
            .offset(skip)
            .limit(limit)
            .select(ArchiveRow::as_select())
            .load(&mut conn)
            .await?;

        Ok((
            rows.into_iter().map(ArchiveRow::into_archived_item).collect(),
            total,
        ))
    }

    pub async fn get(&self, uuid: Uuid) -> eyre::Result<Option<ArchivedItem>> {
        let mut conn = self.pool.get().await?;
        let row = archive_items::table
            .filter(archive_items::uuid.eq(uuid))
            .select(ArchiveRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(ArchiveRow::into_archived_item))
    }

    /// Total count and newest UUID, used as a stable pagination anchor.
    pub async fn summary(&self) -> eyre::Result<(i64, Option<Uuid>)> {
        let mut conn = self.pool.get().await?;
        let total = archive_items::table.count().get_result(&mut conn).await?;
        let newest = archive_items::table
            .order(archive_items::pub_time.desc())
            .select(archive_items::uuid)
            .first(&mut conn)
            .await
            .optional()?;
        Ok((total, newest))
    }

    /// Uses `base_uuid`'s `pub_time` as an upper bound so pagination stays
    /// stable even as new rows are inserted ahead of the page.
    pub async fn paginate(
        &self,
        base_uuid: Option<Uuid>,
        offset: i64,
        limit: i64,
    ) -> eyre::Result<Vec<ArchivedItem>> {
        if limit <= 0 {
            return Ok(vec![]);
        }
        let mut conn = self.pool.get().await?;

        let base_pub_time = match base_uuid {
            Some(uuid) => {
                let pub_time: Option<DateTime<Utc>> = archive_items::table
                    .filter(archive_items::uuid.eq(uuid))
                    .select(archive_items::pub_time)
                    .first(&mut conn)
                    .await
                    .optional()?
                    .flatten();
                match pub_time {
                    Some(t) => Some(t),
                    None => return Ok(vec![]),
                }
            }
            None => None,
        };

        let mut query = archive_items::table.into_boxed();
        if let Some(base_pub_time) = base_pub_time {
            query = query.filter(archive_items::pub_time.le(base_pub_time));
        }

        let rows: Vec<ArchiveRow> = query
            .order((archive_items::pub_time.desc(), archive_items::id.desc()))
            .offset(offset)
            .limit(limit)
            .select(ArchiveRow::as_select())
            .load(&mut conn)
            .await?;

        Ok(rows.into_iter().map(ArchiveRow::into_archived_item).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn word_boundary_pattern_wraps_term_in_boundary_anchors() {
        assert_eq!(word_boundary_pattern("coup"), r"\ycoup\y");
    }

    #[test]
    fn word_boundary_pattern_escapes_regex_metacharacters() {
        assert_eq!(word_boundary_pattern("a.b(c)"), r"\ya\.b\(c\)\y");
    }

    #[test]
    fn query_filter_default_has_no_constraints() {
        let filter = QueryFilter::default();
        assert!(filter.locations.is_empty());
        assert!(filter.keywords.is_empty());
        assert!(filter.threshold.is_none());
    }
}
