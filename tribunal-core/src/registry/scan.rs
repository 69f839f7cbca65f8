//! On-disk model artifact layout and completeness checks.
//!
//! Models live under `<cache_root>/models/<id with '/' replaced by "--">`.
//! Hub-style caches nest the actual files one level deeper, under
//! `snapshots/<revision>/`; both layouts are accepted, and the first snapshot
//! that passes the completeness check wins.

use std::fs;
use std::path::{Path, PathBuf};

/// Directory a model id maps to under the cache root.
pub fn model_dir(cache_root: &Path, id: &str) -> PathBuf {
    cache_root.join("models").join(id.replace('/', "--"))
}

/// A model counts as downloaded when a config and at least one weight file
/// are present, either directly or inside one of its snapshot directories.
pub fn is_model_complete(dir: &Path) -> bool {
    if has_artifacts(dir) {
        return true;
    }
    let snapshots = dir.join("snapshots");
    let Ok(entries) = fs::read_dir(&snapshots) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && has_artifacts(&path) {
            return true;
        }
    }
    false
}

fn has_artifacts(dir: &Path) -> bool {
    if !dir.join("config.json").is_file() {
        return false;
    }
    if dir.join("model.safetensors.index.json").is_file() {
        return true;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        path.is_file()
            && matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("safetensors") | Some("bin")
            )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU64, Ordering};

    static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn scratch_dir(label: &str) -> PathBuf {
        let n = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "tribunal-scan-{label}-{}-{n}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn model_dir_flattens_slashes() {
        let dir = model_dir(Path::new("/cache"), "mlx-community/Llama-3.2-1B-Instruct-4bit");
        assert_eq!(
            dir,
            Path::new("/cache/models/mlx-community--Llama-3.2-1B-Instruct-4bit")
        );
    }

    #[test]
    fn flat_layout_with_config_and_weights_is_complete() {
        let dir = scratch_dir("flat");
        touch(&dir.join("config.json"));
        touch(&dir.join("model.safetensors"));
        assert!(is_model_complete(&dir));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn config_without_weights_is_incomplete() {
        let dir = scratch_dir("noweights");
        touch(&dir.join("config.json"));
        assert!(!is_model_complete(&dir));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn weights_without_config_are_incomplete() {
        let dir = scratch_dir("noconfig");
        touch(&dir.join("model.safetensors"));
        assert!(!is_model_complete(&dir));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn sharded_index_counts_as_weights() {
        let dir = scratch_dir("sharded");
        touch(&dir.join("config.json"));
        touch(&dir.join("model.safetensors.index.json"));
        assert!(is_model_complete(&dir));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn snapshot_layout_is_accepted() {
        let dir = scratch_dir("snapshot");
        let snap = dir.join("snapshots").join("abc123");
        touch(&snap.join("config.json"));
        touch(&snap.join("model.bin"));
        assert!(is_model_complete(&dir));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_snapshot_dirs_are_skipped() {
        let dir = scratch_dir("emptysnap");
        fs::create_dir_all(dir.join("snapshots").join("abc123")).unwrap();
        let good = dir.join("snapshots").join("def456");
        touch(&good.join("config.json"));
        touch(&good.join("model.safetensors"));
        assert!(is_model_complete(&dir));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_is_incomplete() {
        assert!(!is_model_complete(Path::new("/nonexistent/tribunal-model")));
    }
}
