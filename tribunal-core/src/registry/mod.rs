//! Model catalog, download/load/delete lifecycle, and the loaded-handle cache.
//!
//! The registry is an explicit, injected collaborator: the host constructs one
//! and hands `Arc<ModelRegistry>` to whoever needs it. All mutable state lives
//! behind one lock; waiters for an in-flight load are woken through a
//! [`Notify`] rather than polling.
//!
//! Lifecycle failures are recorded in an observable `last_error` field in
//! addition to the returned `Err`, because refresh and download are often
//! driven by background tasks with no caller looking at the result.

mod scan;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::backend::LocalModelBackend;
use crate::error::{Result, TribunalError};

pub use scan::{is_model_complete, model_dir};

/// Preferred model when nothing else is selected.
pub const DEFAULT_MODEL_ID: &str = "mlx-community/Llama-3.2-1B-Instruct-4bit";

/// Reported download progress saturates here until the final success
/// transition sets 1.0, so a stalled last byte never shows a finished bar.
const DOWNLOAD_PROGRESS_CAP: f32 = 0.95;

/// One entry of the model catalog, with its observable download state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub size_estimate: String,
    pub downloaded: bool,
    pub downloading: bool,
    pub progress: f32,
}

impl ModelDescriptor {
    fn catalog_entry(id: &str, display_name: &str, size_estimate: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            size_estimate: size_estimate.to_string(),
            downloaded: false,
            downloading: false,
            progress: 0.0,
        }
    }
}

fn catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::catalog_entry(DEFAULT_MODEL_ID, "Llama 3.2 1B (4-bit)", "0.7 GB"),
        ModelDescriptor::catalog_entry(
            "mlx-community/Llama-3.2-3B-Instruct-4bit",
            "Llama 3.2 3B (4-bit)",
            "1.8 GB",
        ),
        ModelDescriptor::catalog_entry(
            "mlx-community/Qwen2.5-1.5B-Instruct-4bit",
            "Qwen 2.5 1.5B (4-bit)",
            "0.9 GB",
        ),
    ]
}

/// Turns on-disk model artifacts into a runnable backend.
#[async_trait]
pub trait ModelLoader: Send + Sync + 'static {
    async fn load(&self, id: &str, dir: &Path) -> Result<Arc<dyn LocalModelBackend>>;
}

/// Fetches model artifacts into a destination directory.
///
/// Implementations must call `progress` with fractions in `[0, 1]` as data
/// arrives and check `cancel` between transfers, returning
/// [`TribunalError::Cancelled`] once it is set.
#[async_trait]
pub trait DownloadBackend: Send + Sync + 'static {
    async fn fetch(
        &self,
        id: &str,
        dest: &Path,
        cancel: &AtomicBool,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<()>;
}

struct RegistryState {
    descriptors: Vec<ModelDescriptor>,
    handles: HashMap<String, Arc<dyn LocalModelBackend>>,
    loading: HashSet<String>,
    refreshing: bool,
    selected: Option<String>,
    last_error: Option<String>,
    downloads: HashMap<String, Arc<AtomicBool>>,
}

/// Owns the model catalog and the process-wide handle cache.
pub struct ModelRegistry {
    cache_root: PathBuf,
    loader: Arc<dyn ModelLoader>,
    downloader: Arc<dyn DownloadBackend>,
    state: Mutex<RegistryState>,
    load_done: Notify,
}

impl ModelRegistry {
    pub fn new(
        cache_root: impl Into<PathBuf>,
        loader: Arc<dyn ModelLoader>,
        downloader: Arc<dyn DownloadBackend>,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            loader,
            downloader,
            state: Mutex::new(RegistryState {
                descriptors: catalog(),
                handles: HashMap::new(),
                loading: HashSet::new(),
                refreshing: false,
                selected: None,
                last_error: None,
                downloads: HashMap::new(),
            }),
            load_done: Notify::new(),
        }
    }

    /// Catalog snapshot in fixed order.
    pub fn list_models(&self) -> Vec<ModelDescriptor> {
        self.state.lock().descriptors.clone()
    }

    pub fn descriptor(&self, id: &str) -> Option<ModelDescriptor> {
        self.state
            .lock()
            .descriptors
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub fn selected(&self) -> Option<String> {
        self.state.lock().selected.clone()
    }

    /// Most recent lifecycle failure, if any. Cleared when a new download or
    /// load starts.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.state.lock().handles.contains_key(id)
    }

    /// Re-check on-disk state for every catalog entry.
    ///
    /// A second call while a refresh is running is a no-op. The filesystem
    /// walk runs on the blocking pool.
    pub async fn refresh_download_state(&self) {
        {
            let mut state = self.state.lock();
            if state.refreshing {
                return;
            }
            state.refreshing = true;
        }

        let cache_root = self.cache_root.clone();
        let ids: Vec<String> = {
            let state = self.state.lock();
            state.descriptors.iter().map(|d| d.id.clone()).collect()
        };

        let found = tokio::task::spawn_blocking(move || {
            ids.into_iter()
                .map(|id| {
                    let complete = is_model_complete(&model_dir(&cache_root, &id));
                    (id, complete)
                })
                .collect::<HashMap<String, bool>>()
        })
        .await;

        let mut state = self.state.lock();
        state.refreshing = false;
        match found {
            Ok(found) => {
                for descriptor in &mut state.descriptors {
                    let complete = found.get(&descriptor.id).copied().unwrap_or(false);
                    descriptor.downloaded = complete;
                    if complete && !descriptor.downloading {
                        descriptor.progress = 1.0;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "download state refresh task failed");
                state.last_error = Some(format!("refresh failed: {e}"));
            }
        }
    }

    /// Pick the model to use: the default if downloaded, else the first
    /// downloaded catalog entry. Records and returns the choice.
    pub fn select_default(&self) -> Option<String> {
        let mut state = self.state.lock();
        let choice = state
            .descriptors
            .iter()
            .find(|d| d.id == DEFAULT_MODEL_ID && d.downloaded)
            .or_else(|| state.descriptors.iter().find(|d| d.downloaded))
            .map(|d| d.id.clone());
        state.selected = choice.clone();
        choice
    }

    /// Return the cached handle for `id`, loading it first if needed.
    ///
    /// At most one load per id runs at a time; concurrent callers wait for
    /// the in-flight load and share its handle. A failed load never leaves
    /// the id stuck in the loading state.
    pub async fn load(&self, id: &str) -> Result<Arc<dyn LocalModelBackend>> {
        loop {
            // Arm the waiter before inspecting state, so a notify between the
            // check and the await is not lost.
            let notified = self.load_done.notified();
            {
                let mut state = self.state.lock();
                if let Some(handle) = state.handles.get(id) {
                    return Ok(Arc::clone(handle));
                }
                if !state.descriptors.iter().any(|d| d.id == id) {
                    return Err(TribunalError::UnknownModel(id.to_string()));
                }
                if !state.loading.contains(id) {
                    state.loading.insert(id.to_string());
                    state.last_error = None;
                    break;
                }
                debug!(model = id, "joining in-flight load");
            }
            notified.await;
        }

        let dir = model_dir(&self.cache_root, id);
        let result = self.loader.load(id, &dir).await;

        let mut state = self.state.lock();
        state.loading.remove(id);
        self.load_done.notify_waiters();
        match result {
            Ok(handle) => {
                info!(model = id, "model loaded");
                state.handles.insert(id.to_string(), Arc::clone(&handle));
                Ok(handle)
            }
            Err(e) => {
                warn!(model = id, error = %e, "model load failed");
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Download the artifacts for `id`, superseding any in-flight download of
    /// the same model.
    pub async fn download(&self, id: &str) -> Result<()> {
        if self.descriptor(id).is_none() {
            return Err(TribunalError::UnknownModel(id.to_string()));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.state.lock();
            if let Some(prev) = state.downloads.insert(id.to_string(), Arc::clone(&cancel)) {
                debug!(model = id, "superseding in-flight download");
                prev.store(true, Ordering::SeqCst);
            }
            state.last_error = None;
            set_descriptor(&mut state, id, |d| {
                d.downloading = true;
                d.downloaded = false;
                d.progress = 0.0;
            });
        }

        let dest = model_dir(&self.cache_root, id);
        let report = |fraction: f32| {
            let capped = fraction.clamp(0.0, DOWNLOAD_PROGRESS_CAP);
            let mut state = self.state.lock();
            set_descriptor(&mut state, id, |d| d.progress = capped);
        };

        let result = self.downloader.fetch(id, &dest, &cancel, &report).await;

        let mut state = self.state.lock();
        let still_current = state
            .downloads
            .get(id)
            .is_some_and(|flag| Arc::ptr_eq(flag, &cancel));
        if still_current {
            state.downloads.remove(id);
        }
        match result {
            Ok(()) => {
                info!(model = id, "model download completed");
                set_descriptor(&mut state, id, |d| {
                    d.downloading = false;
                    d.downloaded = true;
                    d.progress = 1.0;
                });
                Ok(())
            }
            Err(e) => {
                // A superseded run must not clobber the state its successor
                // just initialized.
                if still_current {
                    warn!(model = id, error = %e, "model download failed");
                    set_descriptor(&mut state, id, |d| {
                        d.downloading = false;
                        d.progress = 0.0;
                    });
                    state.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Remove on-disk artifacts and any cached handle for `id`.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.descriptor(id).is_none() {
            return Err(TribunalError::UnknownModel(id.to_string()));
        }

        let dir = model_dir(&self.cache_root, id);
        let removed = tokio::task::spawn_blocking(move || match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        })
        .await
        .map_err(|e| TribunalError::Delete(e.to_string()))?;

        let mut state = self.state.lock();
        if let Err(e) = removed {
            state.last_error = Some(e.to_string());
            return Err(TribunalError::Delete(e.to_string()));
        }

        state.handles.remove(id);
        if state.selected.as_deref() == Some(id) {
            state.selected = None;
        }
        set_descriptor(&mut state, id, |d| {
            d.downloaded = false;
            d.downloading = false;
            d.progress = 0.0;
        });
        info!(model = id, "model deleted");
        Ok(())
    }
}

fn set_descriptor(state: &mut RegistryState, id: &str, apply: impl FnOnce(&mut ModelDescriptor)) {
    if let Some(descriptor) = state.descriptors.iter_mut().find(|d| d.id == id) {
        apply(descriptor);
    }
}

/// Downloads hub-hosted model files over HTTPS.
pub struct HttpDownloadBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDownloadBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for HttpDownloadBackend {
    fn default() -> Self {
        Self::new("https://huggingface.co")
    }
}

#[async_trait]
impl DownloadBackend for HttpDownloadBackend {
    async fn fetch(
        &self,
        id: &str,
        dest: &Path,
        cancel: &AtomicBool,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<()> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| TribunalError::Download(e.to_string()))?;

        // config.json is tiny; the weight file carries the progress signal.
        let files = ["config.json", "model.safetensors"];
        for (index, file) in files.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                return Err(TribunalError::Cancelled);
            }

            let url = format!("{}/{}/resolve/main/{}", self.base_url, id, file);
            debug!(model = id, %url, "fetching model artifact");
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| TribunalError::Network(e.to_string()))?;
            if !response.status().is_success() {
                return Err(TribunalError::Download(format!(
                    "{file}: server returned {}",
                    response.status()
                )));
            }

            let total = response.content_length();
            let mut received: u64 = 0;
            let mut out = tokio::fs::File::create(dest.join(file))
                .await
                .map_err(|e| TribunalError::Download(e.to_string()))?;

            let mut response = response;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| TribunalError::Network(e.to_string()))?
            {
                if cancel.load(Ordering::SeqCst) {
                    return Err(TribunalError::Cancelled);
                }
                received += chunk.len() as u64;
                out.write_all(&chunk)
                    .await
                    .map_err(|e| TribunalError::Download(e.to_string()))?;
                // Only the last file reports byte-level progress.
                if index == files.len() - 1 {
                    if let Some(total) = total.filter(|t| *t > 0) {
                        progress(received as f32 / total as f32);
                    }
                }
            }
            out.flush()
                .await
                .map_err(|e| TribunalError::Download(e.to_string()))?;
        }

        progress(1.0);
        Ok(())
    }
}
