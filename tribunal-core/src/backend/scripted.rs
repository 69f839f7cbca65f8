//! Scripted backends that replay a fixed event sequence without real inference.
//!
//! Used by the host binary when no model runtime is bundled, and by tests to
//! exercise the full orchestration pipeline end-to-end with deterministic
//! output.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::debug;

use crate::backend::{
    GenerationEvent, GenerationParams, GenerationStream, LocalModelBackend, PreparedPrompt,
    SingleShotBackend,
};
use crate::error::{Result, TribunalError};

/// One step of a scripted generation.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Chunk(String),
    Stats(f32),
    ToolCall(String),
    Pause(Duration),
    Fail(String),
}

/// Streaming backend that emits a canned script.
///
/// A small time-seeded jitter is added between chunks so repeated runs in the
/// same process do not produce suspiciously identical timings. Seeding is
/// reproducible within one run only.
pub struct ScriptedLocalBackend {
    script: Vec<ScriptStep>,
    chunk_delay: Duration,
}

impl ScriptedLocalBackend {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            chunk_delay: Duration::ZERO,
        }
    }

    /// Add a fixed inter-chunk delay (plus jitter) to simulate decode latency.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Script that streams `text` word by word and reports a throughput stat.
    pub fn streaming_text(text: &str, tokens_per_second: f32) -> Self {
        let mut script = Vec::new();
        for word in text.split_inclusive(' ') {
            script.push(ScriptStep::Chunk(word.to_string()));
        }
        script.push(ScriptStep::Stats(tokens_per_second));
        Self::new(script)
    }
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl LocalModelBackend for ScriptedLocalBackend {
    fn prepare(&self, prompt: &str) -> Result<PreparedPrompt> {
        debug!(prompt_len = prompt.len(), "scripted backend prepared prompt");
        Ok(PreparedPrompt {
            text: prompt.to_string(),
        })
    }

    fn generate(&self, _prompt: PreparedPrompt, _params: GenerationParams) -> Result<GenerationStream> {
        let (tx, rx) = mpsc::channel(16);
        let script = self.script.clone();
        let chunk_delay = self.chunk_delay;

        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(time_seed());
            for step in script {
                match step {
                    ScriptStep::Chunk(text) => {
                        if tx.send(Ok(GenerationEvent::Chunk(text))).await.is_err() {
                            return; // consumer dropped the stream
                        }
                    }
                    ScriptStep::Stats(tokens_per_second) => {
                        if tx
                            .send(Ok(GenerationEvent::Stats { tokens_per_second }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    ScriptStep::ToolCall(name) => {
                        if tx.send(Ok(GenerationEvent::ToolCall(name))).await.is_err() {
                            return;
                        }
                    }
                    ScriptStep::Pause(duration) => {
                        tokio::time::sleep(duration).await;
                    }
                    ScriptStep::Fail(message) => {
                        let _ = tx.send(Err(TribunalError::Backend(message))).await;
                        return;
                    }
                }
                if !chunk_delay.is_zero() {
                    let jitter_us = rng.gen_range(0..500);
                    tokio::time::sleep(chunk_delay + Duration::from_micros(jitter_us)).await;
                }
            }
            // tx drops here, closing the stream.
        });

        Ok(GenerationStream::new(rx))
    }
}

/// Single-shot backend that returns a canned result after an optional delay.
pub struct ScriptedSingleShot {
    name: String,
    result: std::result::Result<String, String>,
    delay: Duration,
}

impl ScriptedSingleShot {
    pub fn ok(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: Ok(text.into()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: Err(message.into()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SingleShotBackend for ScriptedSingleShot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate(&self, _text: &str, _source_lang: &str, _target_lang: &str) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result
            .clone()
            .map_err(TribunalError::Backend)
    }
}
