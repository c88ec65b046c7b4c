//! The LLM client contract the Analysis Worker (4.F) depends on, plus the
//! response-extraction and conversation-transcript auditing the upstream
//! Python implementation carried (`IntelligenceAnalyzerProxy.py`).
//!
//! The Key Rotator swaps the active token on this client in place: per
//! DESIGN NOTES §9, an internal `arc_swap::ArcSwap<String>` protects the
//! token and every outgoing call reads it fresh rather than capturing it
//! at construction.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rig::completion::Prompt;
use rig::providers::openai;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("transient error: {0}")]
    Transient(String),
    #[error("permanent error: {0}")]
    Permanent(String),
}

pub struct LlmClient {
    base_url: String,
    model: String,
    token: ArcSwap<String>,
    system_prompt: String,
    max_tokens: u32,
    call_timeout: Duration,
    max_retries: u32,
}

impl LlmClient {
    pub fn new(
        base_url: String,
        model: String,
        initial_token: String,
        system_prompt: String,
        max_tokens: u32,
        call_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        LlmClient {
            base_url,
            model,
            token: ArcSwap::from_pointee(initial_token),
            system_prompt,
            max_tokens,
            call_timeout,
            max_retries,
        }
    }

    /// Called by the Key Rotator when it selects a new active key.
    pub fn set_api_token(&self, token: String) {
        self.token.store(Arc::new(token));
    }

    pub fn current_token_prefix(&self) -> String {
        let token = self.token.load();
        let prefix: String = token.chars().take(8).collect();
        format!("{prefix}...")
    }

    /// temperature=0, bounded max_tokens, per §4.F step 4.
    async fn call_once(&self, preamble: &str, user_message: &str) -> Result<String, LlmError> {
        let token = self.token.load_full();
        let openai_client = openai::Client::from_url((*token).as_str(), &self.base_url);
        let completion_model = openai::CompletionModel::new(openai_client, &self.model);
        let agent = completion_model
            .into_agent_builder()
            .preamble(preamble)
            .additional_params(serde_json::json!({
                "temperature": 0.0,
                "max_tokens": self.max_tokens,
            }))
            .build();

        match tokio::time::timeout(self.call_timeout, agent.prompt(user_message)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(classify_rig_error(&e.to_string())),
            Err(_) => Err(LlmError::Transient("LLM call timed out".into())),
        }
    }

    /// Exponential-backoff retry per §7: `2^attempt` seconds between
    /// attempts, bounded by `max_retries`. Permanent errors are not
    /// retried.
    pub async fn complete_with_retry(&self, user_message: &str) -> Result<String, LlmError> {
        self.complete_with_system_and_retry(&self.system_prompt, user_message)
            .await
    }

    /// Same retry behavior as `complete_with_retry`, but with a caller-
    /// supplied preamble instead of the analysis system prompt — used by
    /// the Recommendation Manager, which prompts the same model for a
    /// different task.
    pub async fn complete_with_system_and_retry(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.call_once(system_prompt, user_message).await {
                Ok(reply) => return Ok(reply),
                Err(LlmError::Permanent(e)) => return Err(LlmError::Permanent(e)),
                Err(LlmError::Transient(e)) => {
                    if attempt >= self.max_retries {
                        return Err(LlmError::Transient(e));
                    }
                    let backoff = Duration::from_secs(2u64.pow(attempt));
                    tracing::warn!(attempt, %e, "LLM call failed, retrying after backoff");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn classify_rig_error(message: &str) -> LlmError {
    let lower = message.to_lowercase();
    let is_transient = lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("429")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504");
    if is_transient {
        LlmError::Transient(message.to_string())
    } else {
        LlmError::Permanent(message.to_string())
    }
}

/// Strips a `<think>...</think>` reasoning block and any stray
/// `<answer>`/`</answer>` tags, then a surrounding ```json fence, matching
/// `extract_pure_response`/`extract_pure_json_text` in the upstream
/// analyzer proxy.
pub fn extract_pure_json_text(reply: &str) -> String {
    let mut text = reply.to_string();

    if let Some(start) = text.find("<think>") {
        if let Some(end) = text[start..].find("</think>") {
            let end = start + end + "</think>".len();
            text.replace_range(start..end, "");
        }
    }

    text = text.replace("<answer>", "").replace("</answer>", "");

    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);

    trimmed.trim().to_string()
}

/// Writes one conversation artifact per LLM call under
/// `conversation/<kind>/conversation_<ts>.txt`, carrying system, user and
/// reply blocks, for auditing.
pub async fn record_conversation(
    log_dir: &std::path::Path,
    kind: &str,
    system: &str,
    user: &str,
    reply: &str,
) -> std::io::Result<()> {
    let dir = log_dir.join(kind);
    tokio::fs::create_dir_all(&dir).await?;
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let path = dir.join(format!("conversation_{ts}.txt"));
    let contents = format!("[system]\n{system}\n\n[user]\n{user}\n\n[reply]\n{reply}\n");
    tokio::fs::write(path, contents).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strips_think_block() {
        let raw = "<think>reasoning here</think>{\"UUID\":\"u1\"}";
        assert_eq!(extract_pure_json_text(raw), r#"{"UUID":"u1"}"#);
    }

    #[test]
    fn strips_answer_tags() {
        let raw = "<answer>{\"UUID\":\"u1\"}</answer>";
        assert_eq!(extract_pure_json_text(raw), r#"{"UUID":"u1"}"#);
    }

    #[test]
    fn strips_code_fence() {
        let raw = "```json\n{\"UUID\":\"u1\"}\n```";
        assert_eq!(extract_pure_json_text(raw), r#"{"UUID":"u1"}"#);
    }

    #[test]
    fn strips_think_then_fence_together() {
        let raw = "<think>...</think>\n```json\n{\"a\":1}\n```";
        assert_eq!(extract_pure_json_text(raw), r#"{"a":1}"#);
    }

    #[test]
    fn classify_error_detects_rate_limit_as_transient() {
        assert!(matches!(
            classify_rig_error("HTTP 429 Too Many Requests"),
            LlmError::Transient(_)
        ));
    }

    #[test]
    fn classify_error_detects_auth_failure_as_permanent() {
        assert!(matches!(
            classify_rig_error("HTTP 401 Unauthorized"),
            LlmError::Permanent(_)
        ));
    }
}
