//! Filesystem ingest.
//!
//! Walks a repository checkout, applies the configured include/exclude
//! globs, and replaces the repository's source snapshot in the store. The
//! snapshot is what the pipeline's fetch stage reads; ingest runs out of
//! band (`archlens ingest`), so analysis never touches the filesystem.

use std::path::Path;

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::models::SourceFile;
use crate::store::StoreAdapter;

pub async fn run_ingest(
    store: &dyn StoreAdapter,
    config: &IngestConfig,
    repository_id: &str,
    root: &Path,
) -> Result<usize> {
    if !root.exists() {
        bail!("ingest root does not exist: {}", root.display());
    }

    let files = scan_repository(config, root)?;
    if files.is_empty() {
        bail!(
            "no files matched the ingest globs under {}",
            root.display()
        );
    }

    let count = files.len();
    store
        .put_sources(repository_id, &files)
        .await
        .map_err(|e| anyhow::anyhow!("failed to store snapshot: {}", e))?;

    println!("ingest {}", repository_id);
    println!("  root: {}", root.display());
    println!("  files stored: {}", count);
    println!("ok");

    Ok(count)
}

/// Collect matching source files under `root`, sorted by path.
pub fn scan_repository(config: &IngestConfig, root: &Path) -> Result<Vec<SourceFile>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let metadata = std::fs::metadata(path)?;
        if metadata.len() > config.max_file_bytes {
            continue;
        }

        // Binary and non-UTF8 content is skipped, not errored.
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => continue,
        };

        files.push(SourceFile {
            path: rel_str,
            content,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
