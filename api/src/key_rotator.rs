//! Key Rotator (4.I): owns a pool of LLM API keys, checks their provider
//! balance on a schedule, disables keys below threshold and rotates the
//! active client token, ported from `SiliconFlowServiceRotator` in the
//! upstream Python service.
//!
//! Unlike the Python original's `threading.Lock`-guarded dict, the whole
//! key table lives behind a single `tokio::sync::Mutex` since every access
//! here is already on the async runtime.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::llm::LlmClient;
use crate::model::{KeyRecord, KeyStatus};

struct RateTracker {
    previous_balance: f64,
    last_check_time: std::time::Instant,
}

pub struct KeyRotator {
    llm: Arc<LlmClient>,
    key_record_path: PathBuf,
    threshold: f64,
    check_all_balances_on_start: bool,
    keys: tokio::sync::Mutex<HashMap<String, KeyRecord>>,
    current_key: tokio::sync::Mutex<Option<String>>,
    rate_tracker: tokio::sync::Mutex<Option<RateTracker>>,
    http: reqwest::Client,
    balance_url: String,
    running: AtomicBool,
}

impl KeyRotator {
    pub fn new(
        llm: Arc<LlmClient>,
        key_record_path: PathBuf,
        threshold: f64,
        check_all_balances_on_start: bool,
        balance_url: String,
    ) -> Self {
        KeyRotator {
            llm,
            key_record_path,
            threshold,
            check_all_balances_on_start,
            keys: tokio::sync::Mutex::new(HashMap::new()),
            current_key: tokio::sync::Mutex::new(None),
            rate_tracker: tokio::sync::Mutex::new(None),
            http: reqwest::Client::new(),
            balance_url,
            running: AtomicBool::new(false),
        }
    }

    /// Loads `key_record_path` (if present) and merges in any keys from
    /// `keys_file` not already on record, matching `_load_keys`.
    pub async fn load_keys(&self, keys_file: &std::path::Path) -> eyre::Result<()> {
        let mut keys = self.keys.lock().await;

        if self.key_record_path.exists() {
            match tokio::fs::read_to_string(&self.key_record_path).await {
                Ok(contents) => match serde_json::from_str::<HashMap<String, KeyRecord>>(&contents)
                {
                    Ok(loaded) => {
                        tracing::info!(count = loaded.len(), "loaded keys from key record");
                        *keys = loaded;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to parse key record, starting fresh");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read key record, starting fresh");
                }
            }
        }

        let mut has_update = false;
        if keys_file.exists() {
            let contents = tokio::fs::read_to_string(keys_file).await?;
            for line in contents.lines() {
                let key = line.trim();
                if key.is_empty() || keys.contains_key(key) {
                    continue;
                }
                keys.insert(
                    key.to_string(),
                    KeyRecord {
                        key: key.to_string(),
                        balance: -1.0,
                        last_used: None,
                        status: KeyStatus::Unknown,
                    },
                );
                has_update = true;
            }
        }

        drop(keys);
        if has_update {
            self.save_key_records().await;
        }
        Ok(())
    }

    async fn save_key_records(&self) {
        let keys = self.keys.lock().await;
        let contents = match serde_json::to_string_pretty(&*keys) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize key records");
                return;
            }
        };
        drop(keys);

        let tmp_path = self.key_record_path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::write(&tmp_path, contents).await {
            tracing::error!(error = %e, "failed to write key record temp file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.key_record_path).await {
            tracing::error!(error = %e, "failed to replace key record file");
        }
    }

    fn key_prefix(key: &str) -> String {
        key.chars().take(8).collect::<String>() + "..."
    }

    async fn fetch_balance(&self, key: &str) -> Option<f64> {
        let resp = self
            .http
            .get(&self.balance_url)
            .bearer_auth(key)
            .send()
            .await
            .ok()?;
        let json: serde_json::Value = resp.json().await.ok()?;
        json.get("data")
            .and_then(|d| d.get("total_balance_usd"))
            .and_then(|v| v.as_f64())
    }

    async fn fetch_balance_with_retry(&self, key: &str, max_retries: u32) -> Option<f64> {
        for attempt in 0..max_retries {
            if let Some(balance) = self.fetch_balance(key).await {
                return Some(balance);
            }
            if attempt + 1 < max_retries {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }
        None
    }

    async fn usable_keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .await
            .iter()
            .filter(|(_, r)| r.status != KeyStatus::Disabled)
            .map(|(k, _)| k.clone())
            .collect()
    }

    async fn change_api_key(&self, key: &str) {
        self.llm.set_api_token(key.to_string());
        let previous_balance = self
            .keys
            .lock()
            .await
            .get(key)
            .map(|r| r.balance)
            .unwrap_or(-1.0);
        *self.rate_tracker.lock().await = Some(RateTracker {
            previous_balance,
            last_check_time: std::time::Instant::now(),
        });
        *self.current_key.lock().await = Some(key.to_string());
        tracing::info!(key = %Self::key_prefix(key), "active LLM key changed");
    }

    async fn rotate_to_next_key(&self) -> bool {
        let usable = self.usable_keys().await;
        match usable.into_iter().next() {
            Some(next) => {
                self.change_api_key(&next).await;
                tracing::warn!(key = %Self::key_prefix(&next), "rotated to new key");
                true
            }
            None => {
                tracing::error!("rotation failed: no usable keys remain");
                *self.current_key.lock().await = None;
                self.llm.set_api_token(String::new());
                false
            }
        }
    }

    async fn select_initial_key(&self) {
        tracing::info!("selecting initial key");
        let candidates: Vec<String> = self
            .keys
            .lock()
            .await
            .iter()
            .filter(|(_, r)| r.status != KeyStatus::Disabled)
            .map(|(k, _)| k.clone())
            .collect();

        let mut found = false;
        for key in candidates {
            let balance = self.fetch_balance_with_retry(&key, 3).await;
            match balance {
                Some(balance) => {
                    let mut keys = self.keys.lock().await;
                    let record = keys.get_mut(&key).expect("key present");
                    record.balance = balance;
                    if balance < self.threshold {
                        record.status = KeyStatus::Disabled;
                        drop(keys);
                        tracing::warn!(key = %Self::key_prefix(&key), balance, "key below threshold, disabling");
                    } else {
                        record.status = KeyStatus::Valid;
                        drop(keys);
                        self.change_api_key(&key).await;
                        found = true;
                        break;
                    }
                }
                None => {
                    let mut keys = self.keys.lock().await;
                    keys.get_mut(&key).expect("key present").status = KeyStatus::Error;
                }
            }
        }

        self.save_key_records().await;
        if !found {
            tracing::error!("no usable API keys found after initial check");
        }
    }

    pub async fn check_all_balances(&self) {
        tracing::info!("performing full balance check for all usable keys");
        let current = self.current_key.lock().await.clone();
        let candidates: Vec<String> = self.usable_keys().await;

        for key in candidates {
            if Some(&key) == current.as_ref() {
                let keys = self.keys.lock().await;
                if keys.get(&key).map(|r| r.status) == Some(KeyStatus::Valid) {
                    continue;
                }
            }
            let balance = self.fetch_balance_with_retry(&key, 3).await;
            let mut keys = self.keys.lock().await;
            let record = keys.get_mut(&key).expect("key present");
            match balance {
                Some(balance) => {
                    record.balance = balance;
                    record.status = if balance < self.threshold {
                        KeyStatus::Disabled
                    } else {
                        KeyStatus::Valid
                    };
                }
                None => record.status = KeyStatus::Error,
            }
        }

        self.save_key_records().await;
    }

    /// One scheduling tick: checks the current key's balance, rotates away
    /// from it if exhausted, returns the interval to wait before the next
    /// tick.
    pub async fn tick(&self) -> Duration {
        let current = self.current_key.lock().await.clone();
        let Some(current) = current else {
            self.rotate_to_next_key().await;
            return Duration::from_secs(30);
        };

        match self.fetch_balance_with_retry(&current, 3).await {
            None => {
                tracing::error!(key = %Self::key_prefix(&current), "failed to refresh balance, rotating");
                self.keys.lock().await.get_mut(&current).expect("key present").status =
                    KeyStatus::Error;
                self.save_key_records().await;
                self.rotate_to_next_key().await;
                Duration::from_secs(30)
            }
            Some(balance) => {
                tracing::info!(key = %Self::key_prefix(&current), balance, "current key balance");
                let mut keys = self.keys.lock().await;
                let record = keys.get_mut(&current).expect("key present");
                record.balance = balance;
                record.last_used = Some(Utc::now());

                if balance < self.threshold {
                    record.status = KeyStatus::Disabled;
                    drop(keys);
                    self.save_key_records().await;
                    self.rotate_to_next_key().await;
                    Duration::from_secs(30)
                } else {
                    record.status = KeyStatus::Valid;
                    drop(keys);
                    self.save_key_records().await;
                    self.calculate_check_interval(balance).await
                }
            }
        }
    }

    /// Scales the next check interval to 20% of the estimated time until
    /// the current key crosses `threshold`, clamped to [30s, 1800s].
    async fn calculate_check_interval(&self, current_balance: f64) -> Duration {
        let mut tracker = self.rate_tracker.lock().await;
        let now = std::time::Instant::now();
        let (previous_balance, elapsed) = match tracker.as_ref() {
            Some(t) => (t.previous_balance, now.duration_since(t.last_check_time)),
            None => (current_balance, Duration::ZERO),
        };
        *tracker = Some(RateTracker {
            previous_balance: current_balance,
            last_check_time: now,
        });
        drop(tracker);

        let consumed = previous_balance - current_balance;
        if consumed <= 0.0 || elapsed.as_secs_f64() < 1.0 {
            return Duration::from_secs(if current_balance < self.threshold * 5.0 {
                30
            } else if current_balance < self.threshold * 10.0 {
                60
            } else {
                600
            });
        }

        let rate = consumed / elapsed.as_secs_f64();
        let remaining = current_balance - self.threshold;
        if remaining <= 0.0 {
            return Duration::from_secs(15);
        }

        let time_to_threshold = remaining / rate;
        let interval = (time_to_threshold * 0.2) as u64;
        Duration::from_secs(interval.clamp(30, 1800))
    }

    /// Runs the startup selection and full sweep, then loops `tick` until
    /// cancelled.
    pub async fn run_forever(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        self.running.store(true, Ordering::Relaxed);

        self.select_initial_key().await;
        if self.check_all_balances_on_start {
            self.check_all_balances().await;
        }

        loop {
            if *shutdown.borrow() {
                self.running.store(false, Ordering::Relaxed);
                return;
            }
            let interval = self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.running.store(false, Ordering::Relaxed);
                        return;
                    }
                }
            }
        }
    }

    pub async fn get_status(&self) -> serde_json::Value {
        let keys = self.keys.lock().await;
        let current = self.current_key.lock().await.clone();
        let usable = keys.values().filter(|r| r.status != KeyStatus::Disabled).count();
        let current_balance = current
            .as_ref()
            .and_then(|k| keys.get(k))
            .map(|r| r.balance);

        serde_json::json!({
            "running": self.running.load(Ordering::Relaxed),
            "current_key": current.as_deref().map(Self::key_prefix),
            "current_balance": current_balance,
            "usable_keys": usable,
            "total_keys": keys.len(),
            "threshold": self.threshold,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rotator() -> KeyRotator {
        KeyRotator::new(
            Arc::new(LlmClient::new(
                "http://localhost".into(),
                "model".into(),
                "seed".into(),
                "prompt".into(),
                1024,
                Duration::from_secs(10),
                1,
            )),
            PathBuf::from("/tmp/does-not-exist-key-record.json"),
            1.0,
            false,
            "http://localhost/balance".into(),
        )
    }

    #[test]
    fn key_prefix_truncates_and_suffixes() {
        assert_eq!(KeyRotator::key_prefix("sk-abcdefghijklmno"), "sk-abcdef...");
    }

    #[test]
    fn key_prefix_handles_short_keys() {
        assert_eq!(KeyRotator::key_prefix("ab"), "ab...");
    }

    #[tokio::test]
    async fn calculate_interval_falls_back_to_static_tiers_on_first_call() {
        let r = rotator();
        let interval = r.calculate_check_interval(0.5).await;
        assert_eq!(interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn calculate_interval_is_clamped_to_bounds() {
        let r = rotator();
        // Seed the tracker with a huge consumption rate, forcing the
        // unclamped interval far below the 30s floor.
        *r.rate_tracker.lock().await = Some(RateTracker {
            previous_balance: 1000.0,
            last_check_time: std::time::Instant::now() - Duration::from_secs(10),
        });
        let interval = r.calculate_check_interval(1.5).await;
        assert!(interval >= Duration::from_secs(30) && interval <= Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn status_reports_running_flag_and_is_false_before_run_forever() {
        let r = rotator();
        let status = r.get_status().await;
        assert_eq!(status["running"], false);
        assert_eq!(status["total_keys"], 0);
    }
}
