//! One streaming generation pass over a local model backend.
//!
//! `LocalModelSession` owns the timing contract: time to first token is the
//! wall-clock duration from generation start to the first chunk, total time
//! runs from start to stream exhaustion. Cancellation is cooperative; the
//! flag is checked once per event before the event is processed, so a
//! cancelled session stops draining without waiting for end of stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::{GenerationEvent, GenerationParams, LocalModelBackend};
use crate::error::Result;

/// How often a stalled stream re-checks the cancellation flag.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Incremental observations forwarded to the orchestrator while draining.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    FirstToken(Duration),
    Chunk(String),
    Stats(f32),
}

/// Timing and text produced by a fully drained generation.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub text: String,
    pub time_to_first_token: Option<Duration>,
    pub total_time: Duration,
    pub tokens_per_second: Option<f32>,
}

/// Terminal outcome of one session.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed(SessionSummary),
    Cancelled { partial_text: String },
}

/// Drives exactly one generation against a [`LocalModelBackend`].
pub struct LocalModelSession {
    backend: Arc<dyn LocalModelBackend>,
    params: GenerationParams,
}

impl LocalModelSession {
    pub fn new(backend: Arc<dyn LocalModelBackend>, params: GenerationParams) -> Self {
        Self { backend, params }
    }

    /// Run the generation to completion, cancellation, or error.
    ///
    /// `on_event` is invoked for every chunk, first-token latency, and stats
    /// update, in stream order. The returned summary's text is the raw
    /// accumulated output; boilerplate cleanup is the caller's concern.
    pub async fn generate(
        &self,
        prompt: &str,
        cancel: &AtomicBool,
        mut on_event: impl FnMut(SessionEvent),
    ) -> Result<SessionOutcome> {
        let started = Instant::now();
        let prepared = self.backend.prepare(prompt)?;
        let mut stream = self.backend.generate(prepared, self.params.clone())?;

        let mut text = String::new();
        let mut time_to_first_token = None;
        let mut tokens_per_second = None;

        loop {
            if cancel.load(Ordering::SeqCst) {
                debug!(partial_len = text.len(), "generation cancelled mid-stream");
                return Ok(SessionOutcome::Cancelled { partial_text: text });
            }

            let event = match tokio::time::timeout(CANCEL_CHECK_INTERVAL, stream.next()).await {
                Err(_) => continue, // stream quiet; re-check cancellation
                Ok(None) => break,
                Ok(Some(event)) => event?,
            };

            match event {
                GenerationEvent::Chunk(delta) => {
                    if time_to_first_token.is_none() {
                        let latency = started.elapsed();
                        time_to_first_token = Some(latency);
                        on_event(SessionEvent::FirstToken(latency));
                    }
                    text.push_str(&delta);
                    on_event(SessionEvent::Chunk(delta));
                }
                GenerationEvent::Stats { tokens_per_second: tps } => {
                    tokens_per_second = Some(tps);
                    on_event(SessionEvent::Stats(tps));
                }
                GenerationEvent::ToolCall(name) => {
                    debug!(tool = %name, "ignoring tool call from translation model");
                }
            }
        }

        Ok(SessionOutcome::Completed(SessionSummary {
            text,
            time_to_first_token,
            total_time: started.elapsed(),
            tokens_per_second,
        }))
    }
}
