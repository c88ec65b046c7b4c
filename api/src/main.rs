//! Intelligence Integration Hub entry point: wires every component in
//! §4 together, replays unflagged cache rows into the Ingestion Queue on
//! startup, and brings up the HTTP surface alongside the pipeline's
//! long-lived background tasks.

mod analysis_worker;
mod app;
mod archival_worker;
mod archive_store;
mod auth;
mod cache_store;
mod config;
mod crawl_record;
mod error;
mod http;
mod json;
mod key_rotator;
mod llm;
mod model;
mod query_engine;
mod queue;
mod recommendation;
mod result_cache;
mod rss;
mod schema;
mod statistics;
mod validator;
mod vector_index;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use mimalloc::MiMalloc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use app::{App, Counters};
use archive_store::ArchiveStore;
use cache_store::{CacheStore, PgCacheStore};
use config::Config;
use crawl_record::CrawlRecord;
use key_rotator::KeyRotator;
use llm::LlmClient;
use model::CollectedItem;
use query_engine::QueryEngine;
use queue::BoundedQueue;
use recommendation::RecommendationManager;
use result_cache::ResultCache;
use rss::RssPublisher;
use statistics::StatisticsEngine;
use vector_index::VectorIndex;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());

    let pool = app::build_pool(&config.database_url);

    let llm = Arc::new(LlmClient::new(
        config.llm_base_url.clone(),
        config.llm_model.clone(),
        String::new(),
        config.llm_system_prompt.clone(),
        config.llm_max_tokens,
        Duration::from_secs(config.llm_call_timeout_secs),
        config.llm_max_retries,
    ));

    let key_rotator = Arc::new(KeyRotator::new(
        llm.clone(),
        config.key_record_path.clone(),
        config.key_balance_threshold,
        config.check_all_balances_on_start,
        config.key_balance_url.clone(),
    ));
    if let Err(e) = key_rotator.load_keys(&config.keys_file_path).await {
        tracing::error!(%e, "failed to load LLM key pool, starting with none");
    }

    let vector_index = match VectorIndex::new(&config).await {
        Ok(index) => Arc::new(index),
        Err(e) => {
            tracing::error!(%e, "failed to initialize vector index, exiting");
            std::process::exit(1);
        }
    };

    let cache_store: Arc<dyn CacheStore> = Arc::new(PgCacheStore::new(pool.clone()));
    let archive_store = Arc::new(ArchiveStore::new(pool.clone()));
    let query_engine = Arc::new(QueryEngine::new(pool.clone()));
    let statistics = Arc::new(StatisticsEngine::new(pool.clone()));

    let result_cache = Arc::new(ResultCache::new(
        config.archive_score_threshold,
        config.result_cache_count_limit,
        config.result_cache_period_limit_hours,
    ));
    if let Err(e) = result_cache.load_from_store(&archive_store, &query_engine).await {
        tracing::error!(%e, "failed to warm the result cache from the archive store");
    }

    let rss = Arc::new(RssPublisher::new(
        config.rss_host_prefix.clone(),
        "Intelligence Feed".to_string(),
        "/rssfeed.xml".to_string(),
        "Recently archived intelligence items".to_string(),
        config.rss_max_items,
    ));

    let recommendations = Arc::new(RecommendationManager::new(
        pool.clone(),
        query_engine.clone(),
        llm.clone(),
        config.recommendation_prompt.clone(),
        config.recommendation_default_period_hours,
        config.recommendation_limit,
    ));
    if let Err(e) = recommendations.load_initial().await {
        tracing::error!(%e, "failed to warm the recommendation cache from persisted history");
    }

    let crawl_record = Arc::new(CrawlRecord::new(pool.clone(), config.crawl_record_cache_capacity));

    let ingestion_queue = Arc::new(BoundedQueue::new(
        config.ingestion_queue_capacity,
        Duration::from_secs(config.queue_put_timeout_secs),
    ));
    let post_process_queue = Arc::new(BoundedQueue::new(
        config.post_process_queue_capacity,
        Duration::from_secs(config.queue_put_timeout_secs),
    ));

    let app = Arc::new(App {
        db: pool,
        http: reqwest::Client::new(),
        config: config.clone(),
        llm: config.llm_enabled.then(|| llm.clone()),
        key_rotator: key_rotator.clone(),
        vector_index,
        cache_store,
        archive_store,
        query_engine,
        statistics,
        ingestion_queue,
        post_process_queue,
        processing_table: Arc::new(scc::HashSet::new()),
        result_cache,
        rss,
        recommendations,
        crawl_record,
        counters: Arc::new(Counters::default()),
        stopping: Arc::new(AtomicBool::new(false)),
    });

    replay_unflagged(&app).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(key_rotator.run_forever(shutdown_rx));
    tokio::spawn(recommendation_scheduler(app.clone()));
    tokio::spawn(analysis_worker::run(app.clone()));
    tokio::spawn(archival_worker::run(app.clone()));

    let router = http::route()
        .with_state((*app).clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%e, addr = %config.bind_addr, "failed to bind HTTP listener, exiting");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %config.bind_addr, "intelligence hub listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("HTTP server exited unexpectedly");

    app.stopping.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = shutdown_tx.send(true);
    tracing::info!("shutdown signal received, server drained");
}

/// Rebuilds the Ingestion Queue from cache rows lacking a terminal
/// `archived_flag` — the crash-recovery replay required by invariant 1.
async fn replay_unflagged(app: &App) {
    let rows = match app.cache_store.scan_unflagged().await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(%e, "failed to scan unflagged cache rows at startup");
            return;
        }
    };
    let count = rows.len();
    for row in rows {
        let item: CollectedItem = row.into();
        if app.ingestion_queue.put(item).await.is_err() {
            tracing::error!("ingestion queue rejected a replayed item, capacity too small for backlog");
        }
    }
    if count > 0 {
        tracing::info!(count, "replayed unflagged cache rows onto the ingestion queue");
    }
}

async fn recommendation_scheduler(app: Arc<App>) {
    let mut interval = tokio::time::interval(Duration::from_secs(app.config.recommendation_check_interval_secs));
    loop {
        interval.tick().await;
        if app.is_stopping() {
            break;
        }
        match app.recommendations.generate(None, app.config.archive_score_threshold).await {
            Ok(Some(set)) => tracing::info!(count = set.recommendations.len(), "generated recommendation set"),
            Ok(None) => {}
            Err(e) => tracing::error!(%e, "recommendation generation failed"),
        }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
}
