//! Tribunal command-line entry point.
//!
//! Runs one source text through the three-backend translation arena, streams
//! the local model's output to the terminal, and asks the judge for a verdict
//! once enough candidates completed.
//!
//! No MLX runtime or platform translation service is bundled in this build;
//! the backends are wired to scripted stand-ins, the same seam a real runtime
//! plugs into.

mod credentials;
mod settings;
mod state;

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use tribunal_core::backend::scripted::{ScriptedLocalBackend, ScriptedSingleShot};
use tribunal_core::error::Result as CoreResult;
use tribunal_core::judge::OpenAiChatApi;
use tribunal_core::orchestrator::{TranslationBackend, TranslationRequest};
use tribunal_core::registry::{HttpDownloadBackend, ModelLoader};
use tribunal_core::{
    BackendId, JudgeClient, LocalModelBackend, ModelRegistry, SingleShotBackend, TargetLanguage,
    TranslationEvent, TranslationOrchestrator, TranslationPayload,
};

use settings::{
    apply_runtime_env_from_settings, default_models_dir, default_settings_path, load_settings,
};
use state::AppState;

const DEFAULT_SOURCE_TEXT: &str = "Hello, how are you?";

/// Stand-in for the MLX loader: hands back a scripted streaming backend with
/// realistic chunk pacing.
struct DemoModelLoader {
    language: TargetLanguage,
}

#[async_trait]
impl ModelLoader for DemoModelLoader {
    async fn load(
        &self,
        id: &str,
        _dir: &std::path::Path,
    ) -> CoreResult<Arc<dyn LocalModelBackend>> {
        info!(model = id, "using scripted local backend");
        Ok(Arc::new(
            ScriptedLocalBackend::streaming_text(demo_local_text(self.language), 14.2)
                .with_chunk_delay(Duration::from_millis(30)),
        ))
    }
}

fn demo_local_text(language: TargetLanguage) -> &'static str {
    match language {
        TargetLanguage::Russian => "Привет, как дела?",
        TargetLanguage::Chinese => "你好，你好吗？",
        TargetLanguage::Vietnamese => "Xin chào, bạn khỏe không?",
        TargetLanguage::French => "Bonjour, comment allez-vous?",
    }
}

fn demo_foundation_text(language: TargetLanguage) -> &'static str {
    match language {
        TargetLanguage::Russian => "Здравствуйте, как вы поживаете?",
        TargetLanguage::Chinese => "您好，您最近怎么样？",
        TargetLanguage::Vietnamese => "Chào bạn, dạo này bạn thế nào?",
        TargetLanguage::French => "Bonjour, comment vas-tu?",
    }
}

fn demo_system_text(language: TargetLanguage) -> &'static str {
    // Deliberately carries a boilerplate prefix; the pipeline strips it.
    match language {
        TargetLanguage::Russian => "Translation: Привет, как ты?",
        TargetLanguage::Chinese => "Translation: 你好，最近怎么样？",
        TargetLanguage::Vietnamese => "Translation: Chào, bạn có khỏe không?",
        TargetLanguage::French => "Translation: Salut, comment ça va?",
    }
}

/// Drain one orchestrator's events until the terminal one, optionally echoing
/// streamed chunks to stdout.
async fn watch_run(
    label: &'static str,
    mut rx: broadcast::Receiver<TranslationEvent>,
    echo_stream: bool,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(backend = label, skipped, "event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        match event.payload {
            TranslationPayload::Started => info!(backend = label, "translation started"),
            TranslationPayload::Chunk { delta } => {
                if echo_stream {
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                }
            }
            TranslationPayload::TimeToFirstToken { millis } => {
                info!(backend = label, millis, "first token");
            }
            TranslationPayload::StatsUpdated { .. } => {}
            TranslationPayload::Completed { result } => {
                if echo_stream {
                    println!();
                }
                info!(
                    backend = label,
                    total_ms = result.total_time_ms,
                    "translation completed"
                );
                return;
            }
            TranslationPayload::Failed { message } => {
                warn!(backend = label, %message, "translation failed");
                return;
            }
            TranslationPayload::Cancelled => {
                info!(backend = label, "translation cancelled");
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tribunal=info".parse().expect("static filter")),
        )
        .init();

    info!("Tribunal starting");

    let settings_path = default_settings_path();
    let cipher = credentials::KeyCipher::new(&settings_path);
    let app_settings = load_settings(&settings_path);
    apply_runtime_env_from_settings(&app_settings, &cipher);
    info!(
        settings_path = ?settings_path,
        target_language = %app_settings.target_language,
        judge_model = %app_settings.judge_model,
        "runtime settings loaded"
    );

    let language: TargetLanguage = std::env::var("TRIBUNAL_TARGET_LANGUAGE")
        .unwrap_or_else(|_| app_settings.target_language.clone())
        .parse()
        .map_err(anyhow::Error::msg)?;

    let source_text = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            DEFAULT_SOURCE_TEXT.to_string()
        } else {
            args.join(" ")
        }
    };

    // ── Registry ──────────────────────────────────────────────────────────
    let models_dir = app_settings
        .models_dir
        .clone()
        .unwrap_or_else(default_models_dir);
    let registry = Arc::new(ModelRegistry::new(
        models_dir,
        Arc::new(DemoModelLoader { language }),
        Arc::new(HttpDownloadBackend::default()),
    ));
    registry.refresh_download_state().await;
    let model_id = registry
        .select_default()
        .unwrap_or_else(|| app_settings.default_model_id.clone());
    info!(model = %model_id, "local model selected");

    // ── Judge ─────────────────────────────────────────────────────────────
    let judge_base_url = std::env::var("TRIBUNAL_JUDGE_BASE_URL")
        .unwrap_or_else(|_| app_settings.judge_base_url.clone());
    let judge_model = std::env::var("TRIBUNAL_JUDGE_MODEL")
        .unwrap_or_else(|_| app_settings.judge_model.clone());
    let judge_api_key = std::env::var("TRIBUNAL_JUDGE_API_KEY").unwrap_or_default();
    let judge = Arc::new(
        JudgeClient::new(
            Arc::new(OpenAiChatApi::new(judge_base_url, judge_api_key)),
            judge_model,
        )
        .with_retry_observer(|attempt, max| {
            println!("judge unavailable, retrying (attempt {attempt}/{max})...");
        }),
    );

    let state = AppState {
        registry: Arc::clone(&registry),
        local: Arc::new(TranslationOrchestrator::new(BackendId::Mlx)),
        foundation: Arc::new(TranslationOrchestrator::new(BackendId::Afm)),
        system: Arc::new(TranslationOrchestrator::new(BackendId::AppleTranslation)),
        judge,
        settings: Arc::new(Mutex::new(app_settings)),
        settings_path,
    };

    // ── Arena ─────────────────────────────────────────────────────────────
    println!("Source ({}): {source_text}", language.display_name());

    let local_backend = state.registry.load(&model_id).await?;
    let foundation_backend: Arc<dyn SingleShotBackend> = Arc::new(
        ScriptedSingleShot::ok("AFM", demo_foundation_text(language))
            .with_delay(Duration::from_millis(120)),
    );
    let system_backend: Arc<dyn SingleShotBackend> = Arc::new(
        ScriptedSingleShot::ok("Apple Translation", demo_system_text(language))
            .with_delay(Duration::from_millis(80)),
    );

    let local_rx = state.local.subscribe();
    let foundation_rx = state.foundation.subscribe();
    let system_rx = state.system.subscribe();

    let request = TranslationRequest::new(source_text.clone(), language)?;
    state
        .local
        .translate(request.clone(), TranslationBackend::Streaming(local_backend))
        .await?;
    state
        .foundation
        .translate(
            request.clone(),
            TranslationBackend::SingleShot(foundation_backend),
        )
        .await?;
    state
        .system
        .translate(request, TranslationBackend::SingleShot(system_backend))
        .await?;

    tokio::join!(
        watch_run("mlx", local_rx, true),
        watch_run("afm", foundation_rx, false),
        watch_run("appleTranslation", system_rx, false),
    );

    println!();
    for backend in [BackendId::Mlx, BackendId::Afm, BackendId::AppleTranslation] {
        match state.orchestrator(backend).last_result() {
            Some(result) => println!("{}: {}", backend.judge_label(), result.text),
            None => println!("{}: (no result)", backend.judge_label()),
        }
    }

    // ── Verdict ───────────────────────────────────────────────────────────
    let (candidates, non_empty) = state.collect_candidates();
    if non_empty < 2 {
        info!(non_empty, "not enough candidates for a verdict");
        return Ok(());
    }
    if !state.judge.is_configured() {
        info!("no judge API key configured (TRIBUNAL_JUDGE_API_KEY); skipping verdict");
        return Ok(());
    }

    let judgement = state
        .judge
        .evaluate(&source_text, &candidates, language)
        .await?;
    let winner = match judgement.winner {
        tribunal_core::Winner::Afm => "AFM",
        tribunal_core::Winner::Mlx => "MLX",
        tribunal_core::Winner::AppleTranslation => "Apple Translation",
        tribunal_core::Winner::Tie => "Tie",
    };
    println!();
    println!("Verdict: {winner}");
    println!(
        "Scores — AFM: {}, MLX: {}, Apple Translation: {}, overall: {}",
        judgement.afm_score,
        judgement.mlx_score,
        judgement.apple_translation_score,
        judgement.overall_score
    );
    println!("Explanation: {}", judgement.explanation);
    println!("Key differences: {}", judgement.key_differences);

    Ok(())
}
