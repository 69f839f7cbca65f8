use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use tribunal_core::backend::scripted::{ScriptStep, ScriptedLocalBackend, ScriptedSingleShot};
use tribunal_core::judge::{Candidates, ChatCompletionApi, ChatMessage};
use tribunal_core::orchestrator::{TranslationBackend, TranslationRequest};
use tribunal_core::registry::{DownloadBackend, ModelLoader, ModelRegistry, DEFAULT_MODEL_ID};
use tribunal_core::{
    BackendId, JudgeClient, LocalModelBackend, SingleShotBackend, TargetLanguage,
    TranslationEvent, TranslationOrchestrator, TranslationPayload, Winner,
};

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

fn completed_text(events: &[TranslationEvent]) -> String {
    match &events.last().expect("no events").payload {
        TranslationPayload::Completed { result } => result.text.clone(),
        other => panic!("run did not complete: {other:?}"),
    }
}

#[tokio::test]
async fn streaming_translation_end_to_end() {
    let orchestrator = TranslationOrchestrator::new(BackendId::Mlx);
    let mut rx = orchestrator.subscribe();

    let backend: Arc<dyn LocalModelBackend> = Arc::new(
        ScriptedLocalBackend::new(vec![
            ScriptStep::Chunk("Bonjour".into()),
            ScriptStep::Chunk(", comment allez-vous?".into()),
            ScriptStep::Stats(12.0),
        ])
        .with_chunk_delay(Duration::from_millis(2)),
    );
    let request = TranslationRequest::new("Hello, how are you?", TargetLanguage::French).unwrap();
    orchestrator
        .translate(request, TranslationBackend::Streaming(backend))
        .await
        .unwrap();

    let events = collect_until_terminal(&mut rx).await;

    assert!(matches!(events[0].payload, TranslationPayload::Started));
    let chunks: Vec<&str> = events
        .iter()
        .filter_map(|e| match &e.payload {
            TranslationPayload::Chunk { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["Bonjour", ", comment allez-vous?"]);
    assert!(events
        .iter()
        .any(|e| matches!(e.payload, TranslationPayload::TimeToFirstToken { .. })));
    assert!(events.iter().any(
        |e| matches!(e.payload, TranslationPayload::StatsUpdated { tokens_per_second } if tokens_per_second == 12.0)
    ));
    assert_eq!(completed_text(&events), "Bonjour, comment allez-vous?");
}

#[tokio::test]
async fn three_backends_feed_the_judge() {
    let local = TranslationOrchestrator::new(BackendId::Mlx);
    let foundation = TranslationOrchestrator::new(BackendId::Afm);
    let system = TranslationOrchestrator::new(BackendId::AppleTranslation);
    let mut local_rx = local.subscribe();
    let mut foundation_rx = foundation.subscribe();
    let mut system_rx = system.subscribe();

    let request = TranslationRequest::new("Hello, how are you?", TargetLanguage::French).unwrap();
    local
        .translate(
            request.clone(),
            TranslationBackend::Streaming(Arc::new(ScriptedLocalBackend::streaming_text(
                "Bonjour, comment allez-vous?",
                11.0,
            ))),
        )
        .await
        .unwrap();
    foundation
        .translate(
            request.clone(),
            TranslationBackend::SingleShot(Arc::new(ScriptedSingleShot::ok(
                "AFM",
                "Bonjour, comment vas-tu?",
            )) as Arc<dyn SingleShotBackend>),
        )
        .await
        .unwrap();
    system
        .translate(
            request,
            TranslationBackend::SingleShot(Arc::new(ScriptedSingleShot::ok(
                "Apple Translation",
                "Translation: Salut, comment ça va?",
            )) as Arc<dyn SingleShotBackend>),
        )
        .await
        .unwrap();

    let mlx_text = completed_text(&collect_until_terminal(&mut local_rx).await);
    let afm_text = completed_text(&collect_until_terminal(&mut foundation_rx).await);
    let apple_text = completed_text(&collect_until_terminal(&mut system_rx).await);

    // Boilerplate prefixes are stripped before judging.
    assert_eq!(apple_text, "Salut, comment ça va?");

    let api = Arc::new(FencedVerdictApi::default());
    let judge = JudgeClient::new(Arc::clone(&api) as Arc<dyn ChatCompletionApi>, "gpt-4o");
    let judgement = judge
        .evaluate(
            "Hello, how are you?",
            &Candidates {
                afm: afm_text.clone(),
                mlx: mlx_text.clone(),
                apple_translation: apple_text.clone(),
            },
            TargetLanguage::French,
        )
        .await
        .unwrap();

    assert_eq!(judgement.winner, Winner::Afm);
    assert_eq!(judgement.afm_score, 8);
    assert_eq!(judgement.mlx_score, 6);
    assert_eq!(judgement.apple_translation_score, 7);
    assert_eq!(judgement.overall_score, 7);

    let prompt = api.last_user_message.lock().clone().unwrap();
    assert!(prompt.contains(&mlx_text));
    assert!(prompt.contains(&afm_text));
    assert!(prompt.contains(&apple_text));
}

/// Always answers with a markdown-fenced verdict, the way judge models
/// typically do.
#[derive(Default)]
struct FencedVerdictApi {
    last_user_message: Mutex<Option<String>>,
}

#[async_trait]
impl ChatCompletionApi for FencedVerdictApi {
    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _temperature: f32,
    ) -> Result<String, tribunal_core::TribunalError> {
        *self.last_user_message.lock() = messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone());
        Ok("```json\n{\"afm_score\":8,\"mlx_score\":6,\"apple_translation_score\":7,\
            \"overall_score\":7,\"winner\":\"AFM\",\"explanation\":\"ok\",\
            \"key_differences\":\"minor\"}\n```"
            .to_string())
    }
}

struct SlowCountingLoader {
    loads: AtomicU32,
}

#[async_trait]
impl ModelLoader for SlowCountingLoader {
    async fn load(
        &self,
        _id: &str,
        _dir: &std::path::Path,
    ) -> Result<Arc<dyn LocalModelBackend>, tribunal_core::TribunalError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        Ok(Arc::new(ScriptedLocalBackend::streaming_text("Bonjour", 10.0)))
    }
}

struct NoopDownload;

#[async_trait]
impl DownloadBackend for NoopDownload {
    async fn fetch(
        &self,
        _id: &str,
        _dest: &std::path::Path,
        _cancel: &std::sync::atomic::AtomicBool,
        _progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<(), tribunal_core::TribunalError> {
        Ok(())
    }
}

#[tokio::test]
async fn registry_hands_concurrent_loads_one_shared_backend() {
    let loader = Arc::new(SlowCountingLoader {
        loads: AtomicU32::new(0),
    });
    let registry = Arc::new(ModelRegistry::new(
        std::env::temp_dir().join(format!("tribunal-flow-{}", std::process::id())),
        Arc::clone(&loader) as Arc<dyn ModelLoader>,
        Arc::new(NoopDownload),
    ));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.load(DEFAULT_MODEL_ID).await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    for pair in handles.windows(2) {
        assert!(Arc::ptr_eq(&pair[0], &pair[1]));
    }

    // The shared handle must actually run a generation.
    let orchestrator = TranslationOrchestrator::new(BackendId::Mlx);
    let mut rx = orchestrator.subscribe();
    orchestrator
        .translate(
            TranslationRequest::new("Hello", TargetLanguage::French).unwrap(),
            TranslationBackend::Streaming(Arc::clone(&handles[0])),
        )
        .await
        .unwrap();
    assert_eq!(
        completed_text(&collect_until_terminal(&mut rx).await),
        "Bonjour"
    );
}
