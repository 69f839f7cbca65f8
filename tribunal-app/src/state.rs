//! Shared application state wired up once at startup.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tribunal_core::judge::Candidates;
use tribunal_core::{BackendId, JudgeClient, ModelRegistry, TranslationOrchestrator};

use crate::settings::AppSettings;

pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    /// Streaming local-model arena entry.
    pub local: Arc<TranslationOrchestrator>,
    /// Foundation-model arena entry.
    pub foundation: Arc<TranslationOrchestrator>,
    /// System translation-service arena entry.
    pub system: Arc<TranslationOrchestrator>,
    pub judge: Arc<JudgeClient>,
    pub settings: Arc<Mutex<AppSettings>>,
    pub settings_path: PathBuf,
}

impl AppState {
    pub fn orchestrator(&self, backend: BackendId) -> &Arc<TranslationOrchestrator> {
        match backend {
            BackendId::Mlx => &self.local,
            BackendId::Afm => &self.foundation,
            BackendId::AppleTranslation => &self.system,
        }
    }

    /// Gather the latest completed texts for judging.
    ///
    /// Returns the candidate set and how many of them are non-empty; the
    /// judge is only worth calling with at least two.
    pub fn collect_candidates(&self) -> (Candidates, usize) {
        let text = |orchestrator: &TranslationOrchestrator| {
            orchestrator
                .last_result()
                .map(|r| r.text)
                .unwrap_or_default()
        };
        let candidates = Candidates {
            mlx: text(&self.local),
            afm: text(&self.foundation),
            apple_translation: text(&self.system),
        };
        let non_empty = [
            &candidates.mlx,
            &candidates.afm,
            &candidates.apple_translation,
        ]
        .iter()
        .filter(|t| !t.trim().is_empty())
        .count();
        (candidates, non_empty)
    }
}
