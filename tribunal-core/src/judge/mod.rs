//! Remote LLM judge: scores the three candidate translations.
//!
//! One `evaluate` call makes up to [`MAX_ATTEMPTS`] chat-completion requests.
//! Each attempt races the network call against a fixed timeout; transient
//! failures back off exponentially (2s, 4s) before the next attempt, anything
//! else fails the evaluation immediately. A malformed verdict is a parsing
//! error, not a network problem, and is never retried.

mod parse;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, TribunalError};
use crate::prompt::TargetLanguage;

pub use parse::{normalize_winner, parse_judgement};

const MAX_ATTEMPTS: u32 = 3;
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);
/// Low temperature keeps verdicts close to deterministic across runs.
const JUDGE_TEMPERATURE: f32 = 0.3;
/// Stands in for a backend that produced nothing, so the judge still sees
/// three labeled candidates.
const EMPTY_CANDIDATE: &str = "[no translation produced]";

/// Message patterns that indicate a transient service problem.
const TRANSIENT_PATTERNS: [&str; 10] = [
    "timeout",
    "network",
    "connection",
    "internet",
    "offline",
    "unreachable",
    "reset",
    "502",
    "503",
    "504",
];

/// One message of a chat-completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Seam to the chat-completion service the judge runs on.
#[async_trait]
pub trait ChatCompletionApi: Send + Sync + 'static {
    /// Whether a usable credential is present. Checked before any request.
    fn is_configured(&self) -> bool;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
    ) -> Result<String>;
}

/// Verdict over the three candidates. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Judgement {
    pub overall_score: i64,
    pub afm_score: i64,
    pub mlx_score: i64,
    pub apple_translation_score: i64,
    pub winner: Winner,
    pub explanation: String,
    pub key_differences: String,
    /// Unmodified judge output, kept for display and debugging.
    pub raw_response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Winner {
    Afm,
    Mlx,
    AppleTranslation,
    Tie,
}

/// Candidate texts handed to the judge, one per backend.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub afm: String,
    pub mlx: String,
    pub apple_translation: String,
}

/// Client for the remote judge model.
pub struct JudgeClient {
    api: Arc<dyn ChatCompletionApi>,
    model: String,
    on_retry: Option<Box<dyn Fn(u32, u32) + Send + Sync>>,
}

impl JudgeClient {
    pub fn new(api: Arc<dyn ChatCompletionApi>, model: impl Into<String>) -> Self {
        Self {
            api,
            model: model.into(),
            on_retry: None,
        }
    }

    /// Observer invoked as `(next_attempt, max_attempts)` before each retry,
    /// so a host can surface a "retrying" indicator.
    pub fn with_retry_observer(mut self, observer: impl Fn(u32, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(observer));
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api.is_configured()
    }

    /// Score the three candidates against the source text.
    ///
    /// # Errors
    /// [`TribunalError::MissingCredential`] without any request when no
    /// credential is configured; [`TribunalError::MaxRetriesExceeded`] when
    /// every attempt failed transiently; otherwise the first non-transient
    /// failure.
    pub async fn evaluate(
        &self,
        source_text: &str,
        candidates: &Candidates,
        target_language: TargetLanguage,
    ) -> Result<Judgement> {
        if !self.is_configured() {
            return Err(TribunalError::MissingCredential);
        }

        let messages = [
            ChatMessage {
                role: "system",
                content: system_instruction(),
            },
            ChatMessage {
                role: "user",
                content: comparison_request(source_text, candidates, target_language),
            },
        ];

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, model = %self.model, "sending judge request");

            let outcome = tokio::select! {
                result = self.api.complete(&messages, &self.model, JUDGE_TEMPERATURE) => result,
                _ = tokio::time::sleep(ATTEMPT_TIMEOUT) => Err(TribunalError::Timeout),
            };

            let error = match outcome {
                Ok(raw) => {
                    let judgement = parse::parse_judgement(&raw)?;
                    info!(
                        winner = ?judgement.winner,
                        overall = judgement.overall_score,
                        "judge verdict received"
                    );
                    return Ok(judgement);
                }
                Err(error) => error,
            };

            if !is_retryable(&error) {
                warn!(attempt, %error, "judge request failed; not retryable");
                return Err(error);
            }
            if attempt >= MAX_ATTEMPTS {
                warn!(attempt, %error, "judge retries exhausted");
                return Err(TribunalError::MaxRetriesExceeded {
                    attempts: MAX_ATTEMPTS,
                    last: error.to_string(),
                });
            }

            let delay = retry_delay(attempt);
            warn!(
                attempt,
                delay_secs = delay.as_secs(),
                %error,
                "judge request failed; retrying"
            );
            if let Some(observer) = &self.on_retry {
                observer(attempt + 1, MAX_ATTEMPTS);
            }
            tokio::time::sleep(delay).await;
        }
    }
}

/// Exponential backoff with a 2s base: 2s before attempt 2, 4s before 3.
fn retry_delay(completed_attempt: u32) -> Duration {
    Duration::from_secs(2 * 2u64.pow(completed_attempt.saturating_sub(1)))
}

/// Timeouts and network-shaped failures retry; parsing never does.
fn is_retryable(error: &TribunalError) -> bool {
    match error {
        TribunalError::Timeout | TribunalError::Network(_) => true,
        TribunalError::Parsing(_) => false,
        other => {
            let message = other.to_string().to_lowercase();
            TRANSIENT_PATTERNS
                .iter()
                .any(|pattern| message.contains(pattern))
        }
    }
}

fn system_instruction() -> String {
    "You are an expert translation quality judge. You compare three candidate \
     translations of the same English source text and score each on accuracy, \
     fluency, and naturalness.\n\n\
     Scoring rubric (1-10 per candidate):\n\
     - 9-10: excellent — accurate, fluent, natural phrasing\n\
     - 7-8: good — minor issues that do not change meaning\n\
     - 5-6: acceptable — noticeable errors or awkward phrasing\n\
     - 3-4: poor — meaning partially lost or distorted\n\
     - 1-2: very poor — meaning lost, ungrammatical, or unrelated\n\n\
     Respond with exactly this JSON object and nothing else:\n\
     {\n\
       \"afm_score\": <int>,\n\
       \"mlx_score\": <int>,\n\
       \"apple_translation_score\": <int>,\n\
       \"overall_score\": <int>,\n\
       \"winner\": \"AFM\" | \"MLX\" | \"APPLE_TRANSLATION\" | \"TIE\",\n\
       \"explanation\": \"<one short paragraph>\",\n\
       \"key_differences\": \"<one short paragraph>\"\n\
     }"
        .to_string()
}

fn comparison_request(
    source_text: &str,
    candidates: &Candidates,
    target_language: TargetLanguage,
) -> String {
    let present = |text: &str| {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            EMPTY_CANDIDATE.to_string()
        } else {
            trimmed.to_string()
        }
    };
    format!(
        "Source text (English):\n{source}\n\n\
         Target language: {language}\n\n\
         Translation A (AFM):\n{afm}\n\n\
         Translation B (MLX):\n{mlx}\n\n\
         Translation C (Apple Translation):\n{apple}",
        source = source_text,
        language = target_language.display_name(),
        afm = present(&candidates.afm),
        mlx = present(&candidates.mlx),
        apple = present(&candidates.apple_translation),
    )
}

/// Chat-completion client for any OpenAI-compatible endpoint.
pub struct OpenAiChatApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiChatApi {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ChatCompletionApi for OpenAiChatApi {
    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
    ) -> Result<String> {
        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TribunalError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TribunalError::Network(format!(
                "judge service returned {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| TribunalError::Network(e.to_string()))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                TribunalError::InvalidResponse("chat completion without message content".into())
            })
    }
}
