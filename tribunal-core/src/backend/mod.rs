//! Translation backend abstractions.
//!
//! The two traits decouple the orchestrator from any concrete model runtime:
//! [`LocalModelBackend`] for streaming token generation against locally
//! loaded weights, [`SingleShotBackend`] for services that return one final
//! string per call (foundation-model API, system translation service).

pub mod scripted;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// One event from a streaming generation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// Incremental text delta.
    Chunk(String),
    /// Throughput update from the decoder.
    Stats { tokens_per_second: f32 },
    /// Tool-call request emitted by the model. Ignored for translation.
    ToolCall(String),
}

/// Decoder parameters for one generation pass.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl GenerationParams {
    /// Fixed parameters for translation use.
    pub fn translation() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.3,
        }
    }
}

/// A prompt after backend-side preprocessing (tokenization, templating).
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub text: String,
}

/// Finite, non-restartable sequence of generation events.
///
/// The producer closes the channel at end of stream. Dropping the stream
/// mid-generation disconnects the producer, which stops on its next send.
pub struct GenerationStream {
    rx: mpsc::Receiver<Result<GenerationEvent>>,
}

impl GenerationStream {
    pub fn new(rx: mpsc::Receiver<Result<GenerationEvent>>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` at end of stream.
    pub async fn next(&mut self) -> Option<Result<GenerationEvent>> {
        self.rx.recv().await
    }
}

/// Contract for locally loaded streaming generation runtimes.
pub trait LocalModelBackend: Send + Sync + 'static {
    /// Backend-side prompt preprocessing. Cheap; runs on the caller's task.
    fn prepare(&self, prompt: &str) -> Result<PreparedPrompt>;

    /// Start one generation pass. The returned stream is produced lazily and
    /// must be fully drained or dropped, never restarted.
    fn generate(&self, prompt: PreparedPrompt, params: GenerationParams) -> Result<GenerationStream>;
}

/// Contract for one-call translation services.
#[async_trait]
pub trait SingleShotBackend: Send + Sync + 'static {
    /// Human-readable backend name, used in logs and judge prompts.
    fn name(&self) -> &str;

    /// Translate `text` from `source_lang` to `target_lang` in one call.
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}
