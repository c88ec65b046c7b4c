use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::archive_store::ArchiveStore;
use crate::cache_store::CacheStore;
use crate::config::Config;
use crate::crawl_record::CrawlRecord;
use crate::key_rotator::KeyRotator;
use crate::llm::LlmClient;
use crate::model::{CollectedItem, PendingArchival};
use crate::query_engine::QueryEngine;
use crate::queue::BoundedQueue;
use crate::recommendation::RecommendationManager;
use crate::result_cache::ResultCache;
use crate::rss::RssPublisher;
use crate::statistics::StatisticsEngine;
use crate::vector_index::VectorIndex;

pub type DbPool = Pool<AsyncPgConnection>;

pub fn build_pool(database_url: &str) -> DbPool {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Pool::builder(manager)
        .max_size(16)
        .build()
        .expect("failed to build database connection pool")
}

/// Counts accepted submissions this process session, split by terminal
/// outcome. Used to check the invariant that queue depths plus in-flight
/// count plus these counters equal total accepted submissions.
#[derive(Default)]
pub struct Counters {
    pub accepted: AtomicU64,
    pub archived: AtomicU64,
    pub dropped: AtomicU64,
    pub errored: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.accepted.load(Ordering::Relaxed),
            self.archived.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
            self.errored.load(Ordering::Relaxed),
        )
    }
}

/// The single context value cloned into every handler and worker task.
/// Mirrors the shape of the teacher's per-request state struct, extended
/// with the long-lived service values each pipeline stage needs.
#[derive(Clone)]
pub struct App {
    pub db: DbPool,
    pub http: reqwest::Client,
    pub config: Arc<Config>,

    /// `None` when the deployment has no LLM client configured at all —
    /// the Analysis Worker drops every item as "no analyzer" rather than
    /// treating it as a per-call transient/permanent failure.
    pub llm: Option<Arc<LlmClient>>,
    pub key_rotator: Arc<KeyRotator>,
    pub vector_index: Arc<VectorIndex>,

    pub cache_store: Arc<dyn CacheStore>,
    pub archive_store: Arc<ArchiveStore>,
    pub query_engine: Arc<QueryEngine>,
    pub statistics: Arc<StatisticsEngine>,

    pub ingestion_queue: Arc<BoundedQueue<CollectedItem>>,
    pub post_process_queue: Arc<BoundedQueue<PendingArchival>>,
    pub processing_table: Arc<scc::HashSet<uuid::Uuid>>,

    pub result_cache: Arc<ResultCache>,
    pub rss: Arc<RssPublisher>,
    pub recommendations: Arc<RecommendationManager>,
    pub crawl_record: Arc<CrawlRecord>,

    pub counters: Arc<Counters>,
    pub stopping: Arc<AtomicBool>,
}

impl App {
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }
}
