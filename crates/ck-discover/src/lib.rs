#![forbid(unsafe_code)]

use std::fs;
use std::path::{Component, Path, PathBuf};

use ck_index::{CatMetadata, FixtureIndex, IndexEntry, METADATA_FILE, read_metadata};
use thiserror::Error;
use tracing::{debug, warn};

/// The fixed filename the test harness writes next to each exercised
/// fixture.
pub const RESULTS_FILE: &str = ".aider.results.json";

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("input directory {0} does not exist")]
    MissingRoot(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Whether a directory name is a run directory:
/// `YYYY-MM-DD-HH-MM-SS--<suffix>` with a literal double dash and any
/// (possibly empty) suffix.
#[must_use]
pub fn is_run_dir_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 21 {
        return false;
    }
    for (position, byte) in bytes[..19].iter().enumerate() {
        let dash_slot = matches!(position, 4 | 7 | 10 | 13 | 16);
        if dash_slot != (*byte == b'-') {
            return false;
        }
        if !dash_slot && !byte.is_ascii_digit() {
            return false;
        }
    }
    bytes[19] == b'-' && bytes[20] == b'-'
}

/// Walk the ancestors of `path` (excluding `path` itself) until one is
/// named like a run directory. A result outside any run directory is
/// unaddressable and gets no bucket key.
#[must_use]
pub fn find_run_dir(path: &Path) -> Option<PathBuf> {
    path.ancestors().skip(1).find_map(|ancestor| {
        let name = ancestor.file_name()?.to_str()?;
        is_run_dir_name(name).then(|| ancestor.to_path_buf())
    })
}

/// Find every file with exactly `file_name` under `root`, sorted so the
/// downstream processing order is reproducible run to run.
pub fn find_files_named(root: &Path, file_name: &str) -> Result<Vec<PathBuf>, DiscoverError> {
    if !root.is_dir() {
        return Err(DiscoverError::MissingRoot(root.to_path_buf()));
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if entry.file_name() == file_name {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

pub fn discover_raw_results(root: &Path) -> Result<Vec<PathBuf>, DiscoverError> {
    find_files_named(root, RESULTS_FILE)
}

/// How one raw result maps onto the fixture corpus. Produced only by
/// [`resolve_identity`]; downstream code branches on the variant and
/// never re-derives the resolution order.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    /// Metadata found alongside the result. Authoritative: it is
    /// attached directly to the content that was measured.
    Embedded(CatMetadata),
    /// Resolved through the index from the legacy `(language, name)`
    /// path addressing.
    Legacy(IndexEntry),
    Unresolved,
}

impl Identity {
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        let uuid = match self {
            Self::Embedded(meta) => meta.uuid.as_deref(),
            Self::Legacy(entry) => entry.uuid.as_deref(),
            Self::Unresolved => None,
        };
        uuid.filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        let hash = match self {
            Self::Embedded(meta) => meta.hash.as_deref(),
            Self::Legacy(entry) => entry.hash.as_deref(),
            Self::Unresolved => None,
        };
        hash.filter(|value| !value.is_empty())
    }
}

/// Resolve one raw result to a fixture identity.
///
/// A sibling metadata file wins outright when present; if it is present
/// but unreadable the result stays unresolved rather than silently
/// switching to a different addressing scheme. Only when no metadata
/// file exists at all does path inference run: the result directory's
/// path relative to its run directory supplies `(language, name)` for an
/// index lookup.
#[must_use]
pub fn resolve_identity(result_path: &Path, run_dir: &Path, index: &FixtureIndex) -> Identity {
    let test_dir = match result_path.parent() {
        Some(parent) => parent,
        None => return Identity::Unresolved,
    };

    let metadata_path = test_dir.join(METADATA_FILE);
    if metadata_path.exists() {
        return match read_metadata(&metadata_path) {
            Ok(meta) => Identity::Embedded(meta),
            Err(error) => {
                warn!(path = %metadata_path.display(), %error, "failed to read fixture metadata");
                Identity::Unresolved
            }
        };
    }

    let relative = match test_dir.strip_prefix(run_dir) {
        Ok(relative) => relative,
        Err(_) => return Identity::Unresolved,
    };
    let segments: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if segments.len() < 2 {
        debug!(path = %test_dir.display(), "too few path segments for legacy inference");
        return Identity::Unresolved;
    }

    let language = &segments[0];
    let name = &segments[segments.len() - 1];
    match index.by_language_and_name(language, name) {
        Some(entry) => Identity::Legacy(entry.clone()),
        None => {
            debug!(%language, %name, "legacy fixture not found in index");
            Identity::Unresolved
        }
    }
}

/// The result directory's path relative to its run directory, rendered
/// with `/` separators for artifact portability. Falls back to the full
/// path when the result somehow sits outside the run directory.
#[must_use]
pub fn run_relative_path(test_dir: &Path, run_dir: &Path) -> String {
    match test_dir.strip_prefix(run_dir) {
        Ok(relative) => {
            let parts: Vec<String> = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect();
            parts.join("/")
        }
        Err(_) => test_dir.display().to_string(),
    }
}
