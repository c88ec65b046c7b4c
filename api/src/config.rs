use std::collections::HashSet;
use std::path::PathBuf;

use crate::model::DEFAULT_MAX_RATE_EXCLUDE_CLASS;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Env {
    Dev,
    Staging,
    Production,
}

/// Every environment-sourced setting the pipeline's components need.
/// Loaded once at startup; never mutated afterwards except through the
/// components that are explicitly designed to hot-swap a value (the key
/// rotator swaps the LLM token on the live client, not on this struct).
pub struct Config {
    pub env: Env,
    pub bind_addr: String,

    pub database_url: String,

    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_system_prompt: String,
    pub llm_max_tokens: u32,
    pub llm_call_timeout_secs: u64,
    pub llm_max_retries: u32,
    /// Whether the Analysis Worker has an LLM client to call at all — a
    /// deployment without one still runs the rest of the pipeline, but
    /// every submission is dropped as "no analyzer" (§4.F step 3).
    pub llm_enabled: bool,
    pub recommendation_prompt: String,

    pub key_record_path: PathBuf,
    pub keys_file_path: PathBuf,
    pub key_balance_threshold: f64,
    pub check_all_balances_on_start: bool,
    pub key_balance_url: String,

    pub chroma_url: String,
    pub chroma_database: Option<String>,
    pub chroma_token: Option<String>,
    pub chroma_collection: String,
    pub fastembed_cache_dir: String,

    pub rpc_api_tokens: HashSet<String>,
    pub collector_tokens: HashSet<String>,
    pub processor_tokens: HashSet<String>,
    pub deny_on_empty_config: bool,

    pub rss_host_prefix: String,
    pub rss_max_items: usize,

    pub archive_score_threshold: i32,
    pub max_rate_exclude_class: String,

    pub conversation_log_dir: PathBuf,

    pub ingestion_queue_capacity: usize,
    pub post_process_queue_capacity: usize,
    pub queue_put_timeout_secs: u64,

    pub result_cache_count_limit: usize,
    pub result_cache_period_limit_hours: i64,

    pub crawl_record_cache_capacity: usize,

    pub recommendation_check_interval_secs: u64,
    pub recommendation_default_period_hours: i64,
    pub recommendation_limit: usize,
}

fn var(key: &str) -> Result<Option<String>, String> {
    match std::env::var(key) {
        Ok(env) => Ok(Some(env)),
        Err(e) => match e {
            std::env::VarError::NotPresent => Ok(None),
            std::env::VarError::NotUnicode(_) => Err(format!(
                "Could not get the environment variable `{key}` due to unicode error"
            )),
        },
    }
}

fn required_var(key: &str) -> String {
    match var(key) {
        Ok(Some(val)) => val,
        Ok(None) => {
            tracing::error!("Environment variable `{key}` is required");
            std::process::exit(1)
        }
        Err(e) => {
            tracing::error!(
                "Environment variable `{key}` is required, but could not retrieve: {e}"
            );
            std::process::exit(1)
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    match var(key) {
        Ok(Some(val)) => val,
        Ok(None) => default.to_string(),
        Err(e) => {
            tracing::warn!("Could not read `{key}`, using default: {e}");
            default.to_string()
        }
    }
}

fn var_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match var(key) {
        Ok(Some(val)) => val.parse().unwrap_or_else(|_| {
            tracing::warn!("Could not parse `{key}={val}`, using default");
            default
        }),
        _ => default,
    }
}

/// A comma-separated env var into a set of non-empty tokens. Used for the
/// three disjoint bearer-token sets.
fn token_set(key: &str) -> HashSet<String> {
    var_or(key, "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        let env = match var_or("ENVIRONMENT", "dev").as_str() {
            "staging" => Env::Staging,
            "production" => Env::Production,
            _ => Env::Dev,
        };

        Config {
            env,
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:3000"),

            database_url: required_var("DATABASE_URL"),

            llm_base_url: var_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_model: var_or("LLM_MODEL", "gpt-4o-mini"),
            llm_system_prompt: var_or(
                "LLM_SYSTEM_PROMPT",
                "You are an intelligence analyst. Extract structured event data from the \
                 submitted content and respond with a single JSON object only.",
            ),
            llm_max_tokens: var_parsed("LLM_MAX_TOKENS", 4096),
            llm_call_timeout_secs: var_parsed("LLM_CALL_TIMEOUT_SECS", 600),
            llm_max_retries: var_parsed("LLM_MAX_RETRIES", 3),
            llm_enabled: var_parsed("LLM_ENABLED", true),
            recommendation_prompt: var_or(
                "RECOMMENDATION_PROMPT",
                "You are selecting the most significant intelligence items from the \
                 candidate list below for a recommendation digest. Respond with a JSON \
                 array of the UUID strings you recommend, most significant first, and \
                 nothing else.",
            ),

            key_record_path: PathBuf::from(var_or("KEY_RECORD_PATH", "key_record.json")),
            keys_file_path: PathBuf::from(var_or("KEYS_FILE_PATH", "keys.txt")),
            key_balance_threshold: var_parsed("KEY_BALANCE_THRESHOLD", 1.0),
            check_all_balances_on_start: var_parsed("CHECK_ALL_BALANCES_ON_START", true),
            key_balance_url: var_or(
                "KEY_BALANCE_URL",
                "https://api.siliconflow.cn/v1/user/info",
            ),

            chroma_url: var_or("CHROMA_URL", "http://localhost:8000"),
            chroma_database: var("CHROMA_DATABASE").ok().flatten(),
            chroma_token: var("CHROMA_TOKEN").ok().flatten(),
            chroma_collection: var_or("CHROMA_COLLECTION", "intelligence_items"),
            fastembed_cache_dir: var_or("FASTEMBED_CACHE_DIR", ".fastembed_cache"),

            rpc_api_tokens: token_set("RPC_API_TOKENS"),
            collector_tokens: token_set("COLLECTOR_TOKENS"),
            processor_tokens: token_set("PROCESSOR_TOKENS"),
            deny_on_empty_config: var_parsed("DENY_ON_EMPTY_CONFIG", true),

            rss_host_prefix: var_or("RSS_HOST_PREFIX", "http://localhost:3000"),
            rss_max_items: var_parsed("RSS_MAX_ITEMS", 100),

            archive_score_threshold: var_parsed("ARCHIVE_SCORE_THRESHOLD", 6),
            max_rate_exclude_class: var_or(
                "MAX_RATE_EXCLUDE_CLASS",
                DEFAULT_MAX_RATE_EXCLUDE_CLASS,
            ),

            conversation_log_dir: PathBuf::from(var_or("CONVERSATION_LOG_DIR", "conversation")),

            ingestion_queue_capacity: var_parsed("INGESTION_QUEUE_CAPACITY", 256),
            post_process_queue_capacity: var_parsed("POST_PROCESS_QUEUE_CAPACITY", 64),
            queue_put_timeout_secs: var_parsed("QUEUE_PUT_TIMEOUT_SECS", 5),

            result_cache_count_limit: var_parsed("RESULT_CACHE_COUNT_LIMIT", 200),
            result_cache_period_limit_hours: var_parsed("RESULT_CACHE_PERIOD_LIMIT_HOURS", 72),

            crawl_record_cache_capacity: var_parsed("CRAWL_RECORD_CACHE_CAPACITY", 1000),

            recommendation_check_interval_secs: var_parsed(
                "RECOMMENDATION_CHECK_INTERVAL_SECS",
                3600,
            ),
            recommendation_default_period_hours: var_parsed(
                "RECOMMENDATION_DEFAULT_PERIOD_HOURS",
                24,
            ),
            recommendation_limit: var_parsed("RECOMMENDATION_LIMIT", 10),
        }
    }
}
