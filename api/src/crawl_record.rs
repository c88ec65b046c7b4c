//! Crawl Record (4.O): a per-URL durable status store with a small
//! insertion-ordered front cache, ported from `Tools/CrawlRecord.py`. The
//! original backed itself with SQLite and an `OrderedDict` evicted via
//! `popitem(last=False)` — plain FIFO, never reordered on read. This
//! keeps the same table shape in Postgres so it shares a pool with the
//! rest of the service.
//!
//! All public operations take the same lock for their whole duration —
//! the cache is consulted, then the database is read or written, under
//! one held guard — matching the upstream's single-lock design rather
//! than racing a separate cache layer against the database.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use indexmap::IndexMap;
use serde_json::Value as Json;
use tokio::sync::Mutex;

use crate::app::DbPool;
use crate::model::{CrawlRecordRow, NewCrawlRecordRow};
use crate::schema::crawl_records;

pub const NOT_EXIST: i32 = -1;
pub const UNKNOWN: i32 = 0;
pub const DB_ERROR: i32 = 1;
pub const ERROR: i32 = 10;
pub const SUCCESS: i32 = 100;
pub const IGNORED: i32 = 110;

#[derive(Debug, Clone, Copy)]
struct CachedRecord {
    status: i32,
    error_count: i32,
}

/// Inserts `key` at the back, evicting the front entry first if the map
/// is already at `capacity` and `key` is new — `OrderedDict.popitem(last=False)`.
fn cache_put(cache: &mut IndexMap<String, CachedRecord>, capacity: usize, key: String, value: CachedRecord) {
    if !cache.contains_key(&key) && cache.len() >= capacity {
        cache.shift_remove_index(0);
    }
    cache.insert(key, value);
}

pub struct CrawlRecord {
    pool: DbPool,
    capacity: usize,
    cache: Mutex<IndexMap<String, CachedRecord>>,
}

impl CrawlRecord {
    pub fn new(pool: DbPool, capacity: usize) -> Self {
        let capacity = if capacity == 0 { 1000 } else { capacity };
        CrawlRecord {
            pool,
            capacity,
            cache: Mutex::new(IndexMap::new()),
        }
    }

    /// Rejects system-reserved status codes (<10), matching the upstream
    /// validation. Returns `false` on rejection or a database failure.
    pub async fn record_status(&self, url: &str, status: i32, extra: Option<Json>) -> bool {
        if status < 10 {
            tracing::error!(status, "refusing to record reserved crawl status code");
            return false;
        }

        let mut cache = self.cache.lock().await;
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(%e, url, "crawl record db pool exhausted");
                return false;
            }
        };

        let now = Utc::now();
        let new_row = NewCrawlRecordRow {
            url: url.to_string(),
            status,
            error_count: 0,
            extra: extra.clone(),
            updated_time: now,
        };
        let result = diesel::insert_into(crawl_records::table)
            .values(&new_row)
            .on_conflict(crawl_records::url)
            .do_update()
            .set((
                crawl_records::status.eq(status),
                crawl_records::extra.eq(extra),
                crawl_records::updated_time.eq(now),
            ))
            .execute(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::error!(%e, url, "failed to record crawl status");
            return false;
        }

        let error_count = cache.get(url).map(|r| r.error_count).unwrap_or(0);
        cache_put(&mut cache, self.capacity, url.to_string(), CachedRecord { status, error_count });
        true
    }

    pub async fn increment_error_count(&self, url: &str) {
        let mut cache = self.cache.lock().await;
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(%e, url, "crawl record db pool exhausted");
                return;
            }
        };

        let now = Utc::now();
        let updated = diesel::update(crawl_records::table.filter(crawl_records::url.eq(url)))
            .set((
                crawl_records::error_count.eq(crawl_records::error_count + 1),
                crawl_records::status.eq(ERROR),
                crawl_records::updated_time.eq(now),
            ))
            .execute(&mut conn)
            .await;

        let error_count = match updated {
            Ok(0) => {
                let new_row = NewCrawlRecordRow {
                    url: url.to_string(),
                    status: ERROR,
                    error_count: 1,
                    extra: None,
                    updated_time: now,
                };
                if let Err(e) = diesel::insert_into(crawl_records::table)
                    .values(&new_row)
                    .execute(&mut conn)
                    .await
                {
                    tracing::error!(%e, url, "failed to create crawl record on error increment");
                    return;
                }
                1
            }
            Ok(_) => cache.get(url).map(|r| r.error_count + 1).unwrap_or(1),
            Err(e) => {
                tracing::error!(%e, url, "failed to increment crawl error count");
                return;
            }
        };

        cache_put(
            &mut cache,
            self.capacity,
            url.to_string(),
            CachedRecord {
                status: ERROR,
                error_count,
            },
        );
    }

    pub async fn clear_error_count(&self, url: &str) {
        let mut cache = self.cache.lock().await;
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(%e, url, "crawl record db pool exhausted");
                return;
            }
        };

        let now = Utc::now();
        let updated = diesel::update(crawl_records::table.filter(crawl_records::url.eq(url)))
            .set((
                crawl_records::error_count.eq(0),
                crawl_records::updated_time.eq(now),
            ))
            .execute(&mut conn)
            .await;

        let status = match updated {
            Ok(0) => {
                let new_row = NewCrawlRecordRow {
                    url: url.to_string(),
                    status: UNKNOWN,
                    error_count: 0,
                    extra: None,
                    updated_time: now,
                };
                if let Err(e) = diesel::insert_into(crawl_records::table)
                    .values(&new_row)
                    .execute(&mut conn)
                    .await
                {
                    tracing::error!(%e, url, "failed to create crawl record on error clear");
                    return;
                }
                UNKNOWN
            }
            Ok(_) => cache.get(url).map(|r| r.status).unwrap_or(UNKNOWN),
            Err(e) => {
                tracing::error!(%e, url, "failed to clear crawl error count");
                return;
            }
        };

        cache_put(
            &mut cache,
            self.capacity,
            url.to_string(),
            CachedRecord {
                status,
                error_count: 0,
            },
        );
    }

    pub async fn get_status(&self, url: &str, from_db: bool) -> i32 {
        let mut cache = self.cache.lock().await;
        if !from_db {
            if let Some(record) = cache.get(url) {
                return record.status;
            }
        }

        match self.load_row(url).await {
            Ok(Some(row)) => {
                cache_put(
                    &mut cache,
                    self.capacity,
                    url.to_string(),
                    CachedRecord {
                        status: row.status,
                        error_count: row.error_count,
                    },
                );
                row.status
            }
            Ok(None) => NOT_EXIST,
            Err(e) => {
                tracing::error!(%e, url, "crawl status lookup failed");
                DB_ERROR
            }
        }
    }

    pub async fn get_error_count(&self, url: &str, from_db: bool) -> i32 {
        let mut cache = self.cache.lock().await;
        if !from_db {
            if let Some(record) = cache.get(url) {
                return record.error_count;
            }
        }

        match self.load_row(url).await {
            Ok(Some(row)) => {
                cache_put(
                    &mut cache,
                    self.capacity,
                    url.to_string(),
                    CachedRecord {
                        status: row.status,
                        error_count: row.error_count,
                    },
                );
                row.error_count
            }
            _ => 0,
        }
    }

    async fn load_row(&self, url: &str) -> eyre::Result<Option<CrawlRecordRow>> {
        let mut conn = self.pool.get().await?;
        let row = crawl_records::table
            .filter(crawl_records::url.eq(url))
            .select(CrawlRecordRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_constants_match_upstream_reservation_scheme() {
        assert_eq!(NOT_EXIST, -1);
        assert_eq!(UNKNOWN, 0);
        assert_eq!(DB_ERROR, 1);
        assert_eq!(ERROR, 10);
        assert_eq!(SUCCESS, 100);
        assert_eq!(IGNORED, 110);
    }

    #[test]
    fn cache_put_evicts_oldest_insertion_not_least_recently_read() {
        let mut cache = IndexMap::new();
        cache_put(&mut cache, 2, "a".into(), CachedRecord { status: SUCCESS, error_count: 0 });
        cache_put(&mut cache, 2, "b".into(), CachedRecord { status: SUCCESS, error_count: 0 });

        // reading "a" must not promote it — FIFO, not LRU.
        let _ = cache.get("a");

        cache_put(&mut cache, 2, "c".into(), CachedRecord { status: SUCCESS, error_count: 0 });

        assert!(!cache.contains_key("a"));
        assert!(cache.contains_key("b"));
        assert!(cache.contains_key("c"));
    }

    #[test]
    fn cache_put_updating_an_existing_key_keeps_its_position() {
        let mut cache = IndexMap::new();
        cache_put(&mut cache, 2, "a".into(), CachedRecord { status: UNKNOWN, error_count: 0 });
        cache_put(&mut cache, 2, "b".into(), CachedRecord { status: UNKNOWN, error_count: 0 });
        cache_put(&mut cache, 2, "a".into(), CachedRecord { status: ERROR, error_count: 1 });
        cache_put(&mut cache, 2, "c".into(), CachedRecord { status: UNKNOWN, error_count: 0 });

        // "a" was updated, not re-inserted, so it was still the oldest and got evicted.
        assert!(!cache.contains_key("a"));
        assert!(cache.contains_key("b"));
        assert!(cache.contains_key("c"));
    }
}
