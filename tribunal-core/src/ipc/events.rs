//! Event types emitted to UI observers.
//!
//! ## Channel names
//!
//! | Event | Channel |
//! |-------|---------|
//! | `TranslationEvent` | `"tribunal://translation"` |
//!
//! One broadcast channel per orchestrator; events for the three backends are
//! distinguished by the `backend` field. Within one orchestrator the order is
//! strict: `started`, then any number of `chunk` / `timeToFirstToken` /
//! `statsUpdated`, then exactly one of `completed` / `failed` / `cancelled`.

use serde::{Deserialize, Serialize};

/// Identifies which translation backend produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendId {
    /// Local streaming model (MLX-style runtime).
    Mlx,
    /// On-device foundation-model API.
    Afm,
    /// Built-in system translation service.
    AppleTranslation,
}

impl BackendId {
    /// Label used when presenting this backend's candidate to the judge.
    pub fn judge_label(&self) -> &'static str {
        match self {
            Self::Mlx => "MLX",
            Self::Afm => "AFM",
            Self::AppleTranslation => "Apple Translation",
        }
    }
}

/// Final observable result of one successful orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationSnapshot {
    /// Cleaned translation text.
    pub text: String,
    /// Latency from generation start to the first chunk. Streaming only.
    pub time_to_first_token_ms: Option<u64>,
    /// Wall-clock duration of the whole run.
    pub total_time_ms: Option<u64>,
    /// Decoder throughput, if the backend reported one.
    pub tokens_per_second: Option<f32>,
}

/// Emitted on channel `"tribunal://translation"` for every lifecycle step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationEvent {
    pub backend: BackendId,
    /// Monotonically increasing per-orchestrator sequence number.
    pub seq: u64,
    #[serde(flatten)]
    pub payload: TranslationPayload,
}

/// Lifecycle payload of a [`TranslationEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TranslationPayload {
    Started,
    Chunk {
        delta: String,
    },
    TimeToFirstToken {
        millis: u64,
    },
    #[serde(rename_all = "camelCase")]
    StatsUpdated {
        tokens_per_second: f32,
    },
    Completed {
        result: TranslationSnapshot,
    },
    Failed {
        message: String,
    },
    Cancelled,
}

impl TranslationPayload {
    /// Whether this payload terminates a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}
