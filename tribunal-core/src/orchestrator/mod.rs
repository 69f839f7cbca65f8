//! Per-backend translation lifecycle coordination.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──translate()──► Starting ──► Streaming ──► Completed ─┐
//!                                        │        ──► Failed   ├──► Idle
//!                                        │        ──► Cancelled┘
//! ```
//!
//! One orchestrator instance exists per backend. Starting a new run cancels
//! the active one and awaits its terminal event before the new run emits
//! `started`, so observers always see exactly one terminal event per run.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{GenerationParams, LocalModelBackend, SingleShotBackend};
use crate::error::{Result, TribunalError};
use crate::ipc::events::{BackendId, TranslationEvent, TranslationPayload, TranslationSnapshot};
use crate::prompt::{PromptBuilder, TargetLanguage};
use crate::session::{LocalModelSession, SessionEvent, SessionOutcome};

/// Broadcast capacity: enough to buffer a full streaming run for slow observers.
const BROADCAST_CAP: usize = 256;

/// One immutable translation request.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub source_text: String,
    pub target_language: TargetLanguage,
}

impl TranslationRequest {
    /// # Errors
    /// `TribunalError::EmptySource` if `source_text` trims to nothing.
    pub fn new(source_text: impl Into<String>, target_language: TargetLanguage) -> Result<Self> {
        let source_text = source_text.into();
        if source_text.trim().is_empty() {
            return Err(TribunalError::EmptySource);
        }
        Ok(Self {
            source_text,
            target_language,
        })
    }
}

/// Which execution path a run takes.
#[derive(Clone)]
pub enum TranslationBackend {
    /// Chunked streaming generation through [`LocalModelSession`].
    Streaming(Arc<dyn LocalModelBackend>),
    /// One call, one result; no time-to-first-token.
    SingleShot(Arc<dyn SingleShotBackend>),
}

/// Observable lifecycle state, mainly for host status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Streaming,
}

struct ActiveRun {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Coordinates translations for one backend.
///
/// `TranslationOrchestrator` is `Send + Sync`; wrap in `Arc` to share with
/// event-forwarding tasks.
pub struct TranslationOrchestrator {
    backend_id: BackendId,
    events_tx: broadcast::Sender<TranslationEvent>,
    seq: Arc<AtomicU64>,
    active: tokio::sync::Mutex<Option<ActiveRun>>,
    state: Arc<Mutex<LifecycleState>>,
    last_result: Arc<RwLock<Option<TranslationSnapshot>>>,
}

impl TranslationOrchestrator {
    pub fn new(backend_id: BackendId) -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            backend_id,
            events_tx,
            seq: Arc::new(AtomicU64::new(0)),
            active: tokio::sync::Mutex::new(None),
            state: Arc::new(Mutex::new(LifecycleState::Idle)),
            last_result: Arc::new(RwLock::new(None)),
        }
    }

    pub fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    /// Subscribe to lifecycle events for this backend.
    pub fn subscribe(&self) -> broadcast::Receiver<TranslationEvent> {
        self.events_tx.subscribe()
    }

    /// Snapshot of the most recent completed run, if any.
    pub fn last_result(&self) -> Option<TranslationSnapshot> {
        self.last_result.read().clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Start a new run, cancelling and awaiting any active one first.
    ///
    /// Returns once the run is launched; progress and the terminal outcome
    /// are delivered through [`subscribe`](Self::subscribe).
    pub async fn translate(
        &self,
        request: TranslationRequest,
        backend: TranslationBackend,
    ) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(prev) = active.take() {
            debug!(backend = ?self.backend_id, "cancelling previous generation");
            prev.cancel.store(true, Ordering::SeqCst);
            let _ = prev.handle.await;
        }

        *self.state.lock() = LifecycleState::Starting;
        *self.last_result.write() = None;

        let cancel = Arc::new(AtomicBool::new(false));
        let sink = EventSink {
            backend: self.backend_id,
            seq: Arc::clone(&self.seq),
            tx: self.events_tx.clone(),
        };
        let state = Arc::clone(&self.state);
        let last_result = Arc::clone(&self.last_result);
        let run_cancel = Arc::clone(&cancel);

        let handle = tokio::spawn(async move {
            match backend {
                TranslationBackend::Streaming(local) => {
                    run_streaming(sink, request, local, run_cancel, state, last_result).await;
                }
                TranslationBackend::SingleShot(single) => {
                    run_single_shot(sink, request, single, run_cancel, state, last_result).await;
                }
            }
        });

        *active = Some(ActiveRun { cancel, handle });
        Ok(())
    }

    /// Signal the active generation (if any) to stop. Idempotent; safe when idle.
    pub async fn cancel(&self) {
        if let Some(run) = self.active.lock().await.as_ref() {
            run.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Wait for the active run to reach its terminal event.
    pub async fn wait_idle(&self) {
        let mut active = self.active.lock().await;
        if let Some(run) = active.take() {
            let _ = run.handle.await;
        }
    }
}

struct EventSink {
    backend: BackendId,
    seq: Arc<AtomicU64>,
    tx: broadcast::Sender<TranslationEvent>,
}

impl EventSink {
    fn emit(&self, payload: TranslationPayload) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(TranslationEvent {
            backend: self.backend,
            seq,
            payload,
        });
    }
}

async fn run_streaming(
    sink: EventSink,
    request: TranslationRequest,
    backend: Arc<dyn LocalModelBackend>,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<LifecycleState>>,
    last_result: Arc<RwLock<Option<TranslationSnapshot>>>,
) {
    sink.emit(TranslationPayload::Started);
    let builder = PromptBuilder::new(request.source_text.clone(), request.target_language);
    let session = LocalModelSession::new(backend, GenerationParams::translation());
    *state.lock() = LifecycleState::Streaming;

    let outcome = session
        .generate(&builder.full_prompt(), &cancel, |event| match event {
            SessionEvent::FirstToken(latency) => sink.emit(TranslationPayload::TimeToFirstToken {
                millis: latency.as_millis() as u64,
            }),
            SessionEvent::Chunk(delta) => sink.emit(TranslationPayload::Chunk { delta }),
            SessionEvent::Stats(tokens_per_second) => {
                sink.emit(TranslationPayload::StatsUpdated { tokens_per_second })
            }
        })
        .await;

    match outcome {
        Ok(SessionOutcome::Completed(summary)) => {
            let snapshot = TranslationSnapshot {
                text: builder.clean_output(&summary.text),
                time_to_first_token_ms: summary
                    .time_to_first_token
                    .map(|d| d.as_millis() as u64),
                total_time_ms: Some(summary.total_time.as_millis() as u64),
                tokens_per_second: summary.tokens_per_second,
            };
            info!(
                backend = ?sink.backend,
                chars = snapshot.text.len(),
                total_ms = snapshot.total_time_ms,
                "streaming translation completed"
            );
            *last_result.write() = Some(snapshot.clone());
            sink.emit(TranslationPayload::Completed { result: snapshot });
        }
        Ok(SessionOutcome::Cancelled { partial_text }) => {
            info!(
                backend = ?sink.backend,
                partial_chars = partial_text.len(),
                "streaming translation cancelled"
            );
            sink.emit(TranslationPayload::Cancelled);
        }
        Err(error) => {
            warn!(backend = ?sink.backend, %error, "streaming translation failed");
            sink.emit(TranslationPayload::Failed {
                message: error.to_string(),
            });
        }
    }

    *state.lock() = LifecycleState::Idle;
}

async fn run_single_shot(
    sink: EventSink,
    request: TranslationRequest,
    backend: Arc<dyn SingleShotBackend>,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<LifecycleState>>,
    last_result: Arc<RwLock<Option<TranslationSnapshot>>>,
) {
    sink.emit(TranslationPayload::Started);
    *state.lock() = LifecycleState::Streaming;
    let builder = PromptBuilder::new(request.source_text.clone(), request.target_language);
    let started = Instant::now();

    let result = backend
        .translate(&request.source_text, "en", request.target_language.code())
        .await;

    if cancel.load(Ordering::SeqCst) {
        info!(backend = ?sink.backend, "single-shot translation cancelled");
        sink.emit(TranslationPayload::Cancelled);
        *state.lock() = LifecycleState::Idle;
        return;
    }

    match result {
        Ok(text) => {
            let snapshot = TranslationSnapshot {
                text: builder.clean_output(&text),
                time_to_first_token_ms: None,
                total_time_ms: Some(started.elapsed().as_millis() as u64),
                tokens_per_second: None,
            };
            info!(
                backend = ?sink.backend,
                chars = snapshot.text.len(),
                total_ms = snapshot.total_time_ms,
                "single-shot translation completed"
            );
            *last_result.write() = Some(snapshot.clone());
            sink.emit(TranslationPayload::Completed { result: snapshot });
        }
        Err(error) => {
            warn!(backend = ?sink.backend, %error, "single-shot translation failed");
            sink.emit(TranslationPayload::Failed {
                message: error.to_string(),
            });
        }
    }

    *state.lock() = LifecycleState::Idle;
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::backend::scripted::{ScriptStep, ScriptedLocalBackend, ScriptedSingleShot};

    async fn collect_until_terminal(
        rx: &mut broadcast::Receiver<TranslationEvent>,
    ) -> Vec<TranslationEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for lifecycle event")
                .expect("event channel closed");
            let terminal = event.payload.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    fn request() -> TranslationRequest {
        TranslationRequest::new("Hello, how are you?", TargetLanguage::French).unwrap()
    }

    #[tokio::test]
    async fn streaming_run_emits_ordered_lifecycle_events() {
        let orchestrator = TranslationOrchestrator::new(BackendId::Mlx);
        let mut rx = orchestrator.subscribe();

        let backend: Arc<dyn LocalModelBackend> = Arc::new(ScriptedLocalBackend::new(vec![
            ScriptStep::Chunk("Bonjour".into()),
            ScriptStep::Chunk(", comment allez-vous?".into()),
            ScriptStep::Stats(12.0),
        ]));
        orchestrator
            .translate(request(), TranslationBackend::Streaming(backend))
            .await
            .unwrap();

        let events = collect_until_terminal(&mut rx).await;
        assert!(matches!(events[0].payload, TranslationPayload::Started));
        assert!(matches!(
            events[1].payload,
            TranslationPayload::TimeToFirstToken { .. }
        ));
        assert!(matches!(
            events[2].payload,
            TranslationPayload::Chunk { ref delta } if delta == "Bonjour"
        ));
        match &events.last().unwrap().payload {
            TranslationPayload::Completed { result } => {
                assert_eq!(result.text, "Bonjour, comment allez-vous?");
                assert!(result.time_to_first_token_ms.is_some());
                assert_eq!(result.tokens_per_second, Some(12.0));
            }
            other => panic!("expected completed, got {other:?}"),
        }

        // Sequence numbers are strictly increasing.
        for pair in events.windows(2) {
            assert!(pair[1].seq > pair[0].seq);
        }
        assert_eq!(
            orchestrator.last_result().unwrap().text,
            "Bonjour, comment allez-vous?"
        );
    }

    #[tokio::test]
    async fn exactly_one_terminal_event_per_started() {
        let orchestrator = TranslationOrchestrator::new(BackendId::Mlx);
        let mut rx = orchestrator.subscribe();

        let backend: Arc<dyn LocalModelBackend> = Arc::new(ScriptedLocalBackend::new(vec![
            ScriptStep::Chunk("partial".into()),
            ScriptStep::Fail("decoder exploded".into()),
        ]));
        orchestrator
            .translate(request(), TranslationBackend::Streaming(backend))
            .await
            .unwrap();

        let events = collect_until_terminal(&mut rx).await;
        let starts = events
            .iter()
            .filter(|e| matches!(e.payload, TranslationPayload::Started))
            .count();
        let terminals = events.iter().filter(|e| e.payload.is_terminal()).count();
        assert_eq!(starts, 1);
        assert_eq!(terminals, 1);
        assert!(matches!(
            events.last().unwrap().payload,
            TranslationPayload::Failed { .. }
        ));
        assert!(orchestrator.last_result().is_none());
    }

    #[tokio::test]
    async fn new_translate_cancels_the_active_run() {
        let orchestrator = TranslationOrchestrator::new(BackendId::Mlx);
        let mut rx = orchestrator.subscribe();

        let slow: Arc<dyn LocalModelBackend> = Arc::new(ScriptedLocalBackend::new(vec![
            ScriptStep::Chunk("Bon".into()),
            ScriptStep::Pause(Duration::from_secs(60)),
            ScriptStep::Chunk("jour".into()),
        ]));
        orchestrator
            .translate(request(), TranslationBackend::Streaming(slow))
            .await
            .unwrap();

        // Give the first run time to emit its first chunk.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let fast: Arc<dyn LocalModelBackend> =
            Arc::new(ScriptedLocalBackend::new(vec![ScriptStep::Chunk("Salut".into())]));
        orchestrator
            .translate(request(), TranslationBackend::Streaming(fast))
            .await
            .unwrap();

        let first_run = collect_until_terminal(&mut rx).await;
        assert!(matches!(
            first_run.last().unwrap().payload,
            TranslationPayload::Cancelled
        ));

        let second_run = collect_until_terminal(&mut rx).await;
        assert!(matches!(second_run[0].payload, TranslationPayload::Started));
        match &second_run.last().unwrap().payload {
            TranslationPayload::Completed { result } => assert_eq!(result.text, "Salut"),
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_safe_when_idle() {
        let orchestrator = TranslationOrchestrator::new(BackendId::Afm);
        orchestrator.cancel().await;
        orchestrator.cancel().await;
        assert_eq!(orchestrator.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn single_shot_run_has_no_first_token_latency() {
        let orchestrator = TranslationOrchestrator::new(BackendId::AppleTranslation);
        let mut rx = orchestrator.subscribe();

        let backend: Arc<dyn SingleShotBackend> =
            Arc::new(ScriptedSingleShot::ok("Apple Translation", "Translation: Bonjour"));
        orchestrator
            .translate(request(), TranslationBackend::SingleShot(backend))
            .await
            .unwrap();

        let events = collect_until_terminal(&mut rx).await;
        assert!(matches!(events[0].payload, TranslationPayload::Started));
        assert!(!events
            .iter()
            .any(|e| matches!(e.payload, TranslationPayload::TimeToFirstToken { .. })));
        match &events.last().unwrap().payload {
            TranslationPayload::Completed { result } => {
                // Boilerplate prefix cleanup applies to single-shot output too.
                assert_eq!(result.text, "Bonjour");
                assert!(result.time_to_first_token_ms.is_none());
                assert!(result.total_time_ms.is_some());
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_shot_failure_emits_failed() {
        let orchestrator = TranslationOrchestrator::new(BackendId::Afm);
        let mut rx = orchestrator.subscribe();

        let backend: Arc<dyn SingleShotBackend> =
            Arc::new(ScriptedSingleShot::failing("AFM", "service unavailable"));
        orchestrator
            .translate(request(), TranslationBackend::SingleShot(backend))
            .await
            .unwrap();

        let events = collect_until_terminal(&mut rx).await;
        match &events.last().unwrap().payload {
            TranslationPayload::Failed { message } => {
                assert!(message.contains("service unavailable"));
            }
            other => panic!("expected failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_source_text_is_rejected_up_front() {
        let err = TranslationRequest::new("   ", TargetLanguage::Chinese).unwrap_err();
        assert!(matches!(err, TribunalError::EmptySource));
    }
}
