//! Filesystem scanning: discovery, reconciliation, enrichment, supervision

pub mod enrich;
pub mod reconcile;
pub mod supervisor;

use crate::config::{RegistryConfig, RootType};
use crate::domain::path_rules::{name_and_tags_from_path, relative_filename};
use crate::operations::bulk::FileSpec;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

/// A file found on disk, still tied to the base directory it was found under.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub abs_path: PathBuf,
    pub base: PathBuf,
    pub root: RootType,
    /// Model category for files under a models base dir.
    pub category: Option<String>,
}

/// Extract mtime in nanoseconds from filesystem metadata.
pub fn mtime_ns(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Recursively list files under `base`. Symlinked directories are not
/// followed; unreadable entries are skipped.
async fn walk_files(base: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut queue = VecDeque::from([base.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read {}: {e}", dir.display());
                continue;
            }
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    let Ok(file_type) = entry.file_type().await else {
                        continue;
                    };
                    if file_type.is_dir() {
                        queue.push_back(path);
                    } else if file_type.is_file() {
                        out.push(path);
                    }
                    // Symlinks are left alone: following them could walk out
                    // of the configured base.
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to enumerate {}: {e}", dir.display());
                    break;
                }
            }
        }
    }
    out
}

/// Every file under the requested roots, tied to its base directory.
pub async fn collect_files_for_roots(
    config: &RegistryConfig,
    roots: &[RootType],
) -> Vec<DiscoveredFile> {
    let mut out = Vec::new();
    for root in roots {
        match root {
            RootType::Models => {
                for (category, base) in config.model_category_dirs() {
                    for abs_path in walk_files(&base).await {
                        out.push(DiscoveredFile {
                            abs_path,
                            base: base.clone(),
                            root: *root,
                            category: Some(category.clone()),
                        });
                    }
                }
            }
            RootType::Input | RootType::Output => {
                for base in config.prefixes_for_root(*root) {
                    for abs_path in walk_files(&base).await {
                        out.push(DiscoveredFile {
                            abs_path,
                            base: base.clone(),
                            root: *root,
                            category: None,
                        });
                    }
                }
            }
        }
    }
    out
}

/// Turn discovered files into ingest specs, skipping paths the reconciler
/// already vouched for. Returns `(specs, skipped_existing)`.
pub async fn build_file_specs(
    files: Vec<DiscoveredFile>,
    survivors: &HashSet<PathBuf>,
) -> (Vec<FileSpec>, u64) {
    let mut specs = Vec::new();
    let mut skipped = 0u64;

    for file in files {
        if survivors.contains(&file.abs_path) {
            skipped += 1;
            continue;
        }
        let metadata = match tokio::fs::symlink_metadata(&file.abs_path).await {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.len() == 0 {
            continue;
        }
        let (name, tags) = name_and_tags_from_path(
            &file.abs_path,
            &file.base,
            &file.root.to_string(),
            file.category.as_deref(),
        );
        let relative = relative_filename(&file.abs_path, std::slice::from_ref(&file.base));
        specs.push(FileSpec {
            abs_path: file.abs_path,
            size_bytes: metadata.len() as i64,
            mtime_ns: mtime_ns(&metadata),
            name,
            tags,
            relative_filename: relative,
            user_metadata: None,
            hash: None,
        });
    }

    (specs, skipped)
}
