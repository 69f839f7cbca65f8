//! # tribunal-core
//!
//! Reusable multi-backend translation arena SDK.
//!
//! ## Architecture
//!
//! ```text
//! TranslationRequest ──► TranslationOrchestrator (one per backend)
//!                              │
//!              ┌───────────────┼────────────────────┐
//!        LocalModelSession  SingleShotBackend  SingleShotBackend
//!        (streaming chunks)  (foundation)      (system translation)
//!                              │
//!                    broadcast::Sender<TranslationEvent>
//!                              │
//!            ≥2 non-empty results ──► JudgeClient ──► Judgement
//! ```
//!
//! Each orchestrator runs at most one generation at a time; starting a new
//! translation cancels the previous run and waits for its terminal event.
//! Model weights are tracked by a process-wide [`ModelRegistry`] that
//! deduplicates concurrent loads of the same model id.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod ipc;
pub mod judge;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod session;

// Convenience re-exports for downstream crates
pub use backend::{GenerationEvent, GenerationParams, LocalModelBackend, SingleShotBackend};
pub use error::TribunalError;
pub use ipc::events::{BackendId, TranslationEvent, TranslationPayload, TranslationSnapshot};
pub use judge::{Candidates, JudgeClient, Judgement, Winner};
pub use orchestrator::{TranslationBackend, TranslationOrchestrator, TranslationRequest};
pub use prompt::{PromptBuilder, TargetLanguage};
pub use registry::{ModelDescriptor, ModelRegistry};
