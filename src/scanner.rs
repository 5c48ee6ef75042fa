//! Filesystem scanner for markdown sources.
//!
//! Walks a source root with `walkdir`, applies include/exclude globs and
//! returns every matching file's text, keyed by its `/`-separated path
//! relative to the root. The relative path becomes the document path used
//! for chunk filenames.
//!
//! Files that match but cannot be read as UTF-8 are reported separately so
//! the sync leaves their stored records alone instead of treating them as
//! deleted.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::SourceConfig;

/// One document read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedDocument {
    pub path: String,
    pub text: String,
}

/// Result of walking one source root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceScan {
    pub documents: Vec<ScannedDocument>,
    /// Matching paths that exist but could not be read.
    pub unreadable: Vec<String>,
}

pub fn scan_source(name: &str, source: &SourceConfig) -> Result<SourceScan> {
    let root = &source.root;
    if !root.is_dir() {
        bail!(
            "Source '{}' root does not exist or is not a directory: {}",
            name,
            root.display()
        );
    }

    let include_set = build_globset(&source.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(source.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut scan = SourceScan::default();

    let walker = WalkDir::new(root).follow_links(source.follow_symlinks);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(text) => scan.documents.push(ScannedDocument {
                path: rel_str,
                text,
            }),
            Err(e) => {
                warn!(source = name, path = %rel_str, error = %e, "unreadable file, keeping stored records");
                scan.unreadable.push(rel_str);
            }
        }
    }

    // Sort for deterministic ordering
    scan.documents.sort_by(|a, b| a.path.cmp(&b.path));
    scan.unreadable.sort();

    Ok(scan)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
