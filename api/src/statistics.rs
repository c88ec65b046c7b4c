//! Statistics Engine (4.M): time-bucketed aggregations over the Archive
//! Store, ported from `IntelligenceStatisticsEngine`. The original grouped
//! via MongoDB's `$year`/`$month`/`$week`/`$hour` aggregation operators;
//! Postgres's `date_trunc` does the same job in a single `GROUP BY`.

use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Int4, Text, Timestamptz};
use diesel_async::RunQueryDsl;

use crate::app::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    fn trunc_field(self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }
}

#[derive(Debug, Clone, diesel::QueryableByName)]
pub struct BucketCount {
    #[diesel(sql_type = Timestamptz)]
    pub bucket: DateTime<Utc>,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

#[derive(Debug, Clone, diesel::QueryableByName)]
struct ScoreCount {
    #[diesel(sql_type = Int4)]
    score: i32,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(Debug, Clone, diesel::QueryableByName)]
struct InformantCount {
    #[diesel(sql_type = Text)]
    informant: String,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

pub struct StatisticsEngine {
    pool: DbPool,
}

impl StatisticsEngine {
    pub fn new(pool: DbPool) -> Self {
        StatisticsEngine { pool }
    }

    pub async fn bucketed_counts(
        &self,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> eyre::Result<Vec<BucketCount>> {
        let mut conn = self.pool.get().await?;
        let sql = format!(
            "SELECT date_trunc('{}', time_archived) AS bucket, COUNT(*) AS count \
             FROM archive_items \
             WHERE time_archived BETWEEN $1 AND $2 \
             GROUP BY bucket ORDER BY bucket ASC",
            granularity.trunc_field()
        );
        let rows = diesel::sql_query(sql)
            .bind::<Timestamptz, _>(start)
            .bind::<Timestamptz, _>(end)
            .load::<BucketCount>(&mut conn)
            .await?;
        Ok(rows)
    }

    /// All ten score buckets (1-10), zero-filled for scores with no
    /// archived items in range.
    pub async fn score_distribution(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> eyre::Result<Vec<(i32, i64)>> {
        let mut conn = self.pool.get().await?;
        let rows = diesel::sql_query(
            "SELECT max_rate_score AS score, COUNT(*) AS count \
             FROM archive_items \
             WHERE time_archived BETWEEN $1 AND $2 \
               AND max_rate_score BETWEEN 1 AND 10 \
             GROUP BY max_rate_score",
        )
        .bind::<Timestamptz, _>(start)
        .bind::<Timestamptz, _>(end)
        .load::<ScoreCount>(&mut conn)
        .await?;

        let mut distribution: Vec<(i32, i64)> = (1..=10).map(|score| (score, 0)).collect();
        for row in rows {
            if let Some(slot) = distribution.iter_mut().find(|(s, _)| *s == row.score) {
                slot.1 = row.count;
            }
        }
        Ok(distribution)
    }

    pub async fn top_informants(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> eyre::Result<Vec<(String, i64)>> {
        let mut conn = self.pool.get().await?;
        let rows = diesel::sql_query(
            "SELECT informant, COUNT(*) AS count \
             FROM archive_items \
             WHERE time_archived BETWEEN $1 AND $2 \
             GROUP BY informant ORDER BY count DESC LIMIT $3",
        )
        .bind::<Timestamptz, _>(start)
        .bind::<Timestamptz, _>(end)
        .bind::<BigInt, _>(limit)
        .load::<InformantCount>(&mut conn)
        .await?;

        Ok(rows.into_iter().map(|r| (r.informant, r.count)).collect())
    }

    pub async fn total_count(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> eyre::Result<i64> {
        use diesel::prelude::*;
        use crate::schema::archive_items;

        let mut conn = self.pool.get().await?;
        let count = archive_items::table
            .filter(archive_items::time_archived.between(start, end))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn granularity_trunc_fields_match_postgres_date_trunc_units() {
        assert_eq!(Granularity::Hour.trunc_field(), "hour");
        assert_eq!(Granularity::Week.trunc_field(), "week");
    }

    #[test]
    fn score_distribution_zero_fill_covers_all_ten_buckets() {
        let distribution: Vec<(i32, i64)> = (1..=10).map(|s| (s, 0)).collect();
        assert_eq!(distribution.len(), 10);
        assert_eq!(distribution[0], (1, 0));
        assert_eq!(distribution[9], (10, 0));
    }
}
