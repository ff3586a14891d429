#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use ck_types::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// The per-fixture metadata filename. Everything matching the broader
/// `cat*.yaml` family is excluded from content hashing, but only this
/// exact name is ever read or written.
pub const METADATA_FILE: &str = "cat.yaml";

/// Well-known index columns, in the order they lead the persisted table.
/// Any further keys observed across the corpus follow alphabetically.
pub const PRIORITY_FIELDS: [&str; 7] =
    ["name", "uuid", "hash", "language", "sets", "source", "path"];

const SETS_DELIMITER: char = ';';

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Hash(#[from] ck_hash::HashError),
}

/// One `cat.yaml` record. Unknown fields ride along in `extra` so newer
/// metadata never breaks older readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// An empty or whitespace-only file is the all-default record, not a
/// parse failure.
pub fn parse_metadata(body: &str) -> Result<CatMetadata, IndexError> {
    if body.trim().is_empty() {
        return Ok(CatMetadata::default());
    }
    Ok(serde_yaml::from_str(body)?)
}

pub fn read_metadata(path: &Path) -> Result<CatMetadata, IndexError> {
    parse_metadata(&fs::read_to_string(path)?)
}

/// One row of the persisted index table. Empty cells load as `None`;
/// columns outside the well-known set land in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexEntry {
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub hash: Option<String>,
    pub language: Option<String>,
    pub source: Option<String>,
    pub path: Option<String>,
    pub sets: Vec<String>,
    pub extra: BTreeMap<String, String>,
}

/// In-memory projection of the persisted index, queryable by uuid and by
/// the legacy `(language, name)` key. Immutable once built.
#[derive(Debug, Default)]
pub struct FixtureIndex {
    entries: Vec<IndexEntry>,
    by_uuid: HashMap<String, usize>,
    by_legacy: HashMap<(String, String), usize>,
}

impl FixtureIndex {
    #[must_use]
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let mut by_uuid = HashMap::new();
        let mut by_legacy = HashMap::new();
        for (position, entry) in entries.iter().enumerate() {
            if let Some(uuid) = entry.uuid.as_deref().filter(|u| !u.is_empty()) {
                by_uuid.insert(uuid.to_owned(), position);
            }
            if let (Some(language), Some(name)) = (&entry.language, &entry.name) {
                by_legacy.insert((language.clone(), name.clone()), position);
            }
        }
        Self {
            entries,
            by_uuid,
            by_legacy,
        }
    }

    /// Load the persisted table. A missing file is an empty index; an
    /// unreadable or malformed one is logged and also yields an empty
    /// index, so legacy resolution degrades to always-miss instead of
    /// failing the pipeline.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "index file not found, using empty index");
            return Self::default();
        }
        match read_entries(path) {
            Ok(entries) => {
                debug!(path = %path.display(), rows = entries.len(), "loaded fixture index");
                Self::from_entries(entries)
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to load index, using empty index");
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn by_uuid(&self, uuid: &str) -> Option<&IndexEntry> {
        self.by_uuid.get(uuid).map(|position| &self.entries[*position])
    }

    #[must_use]
    pub fn by_language_and_name(&self, language: &str, name: &str) -> Option<&IndexEntry> {
        self.by_legacy
            .get(&(language.to_owned(), name.to_owned()))
            .map(|position| &self.entries[*position])
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_entries(path: &Path) -> Result<Vec<IndexEntry>, IndexError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut entry = IndexEntry::default();
        for (column, cell) in headers.iter().zip(record.iter()) {
            let value = (!cell.is_empty()).then(|| cell.to_owned());
            match column {
                "name" => entry.name = value,
                "uuid" => entry.uuid = value,
                "hash" => entry.hash = value,
                "language" => entry.language = value,
                "source" => entry.source = value,
                "path" => entry.path = value,
                "sets" => entry.sets = split_sets(cell),
                other => {
                    entry.extra.insert(other.to_owned(), cell.to_owned());
                }
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

#[must_use]
pub fn split_sets(cell: &str) -> Vec<String> {
    cell.split(SETS_DELIMITER)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

#[must_use]
pub fn join_sets(sets: &[String]) -> String {
    sets.join(&SETS_DELIMITER.to_string())
}

/// A raw metadata record as scanned from disk: the file's own keys plus
/// the containing directory under `path`.
pub type ScanRecord = BTreeMap<String, Value>;

/// Scan-mode index construction: find every `cat.yaml` under `root` and
/// keep its fields plus location. Per-file parse failures are logged and
/// skipped; the scan itself keeps going.
pub fn scan_metadata(root: &Path) -> Result<Vec<ScanRecord>, IndexError> {
    let mut records = Vec::new();
    for file in find_metadata_files(root)? {
        let body = match fs::read_to_string(&file) {
            Ok(body) => body,
            Err(error) => {
                warn!(path = %file.display(), %error, "failed to read metadata file");
                continue;
            }
        };
        let mut record: ScanRecord = if body.trim().is_empty() {
            ScanRecord::new()
        } else {
            match serde_yaml::from_str(&body) {
                Ok(record) => record,
                Err(error) => {
                    warn!(path = %file.display(), %error, "failed to parse metadata file");
                    continue;
                }
            }
        };
        let fixture_dir = file.parent().unwrap_or(root);
        record.insert("path".to_owned(), Value::Utf8(fixture_dir.display().to_string()));
        records.push(record);
    }
    Ok(records)
}

fn find_metadata_files(root: &Path) -> Result<Vec<PathBuf>, IndexError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if entry.file_name() == METADATA_FILE {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Serialize scanned records into the persisted-table format: one column
/// per key observed anywhere in the corpus, well-known columns first,
/// the rest alphabetical, list values `;`-joined.
pub fn write_index(records: &[ScanRecord], out_file: &Path) -> Result<usize, IndexError> {
    let mut observed = BTreeSet::new();
    for record in records {
        observed.extend(record.keys().cloned());
    }

    let mut columns: Vec<String> = PRIORITY_FIELDS
        .iter()
        .filter(|field| observed.contains(**field))
        .map(|field| (*field).to_owned())
        .collect();
    columns.extend(
        observed
            .iter()
            .filter(|key| !PRIORITY_FIELDS.contains(&key.as_str()))
            .cloned(),
    );

    if let Some(parent) = out_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().from_path(out_file)?;
    writer.write_record(&columns)?;
    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| record.get(column).map_or_else(String::new, render_index_cell))
            .collect();
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(records.len())
}

fn render_index_cell(value: &Value) -> String {
    match value {
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(Value::render_cell).collect();
            parts.join(&SETS_DELIMITER.to_string())
        }
        other => other.render_cell(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RehashReport {
    pub checked: usize,
    pub updated: usize,
}

/// Recompute every fixture's content hash and rewrite the `hash` field
/// where drift is detected, leaving all other metadata (and its key
/// order) alone. Hash-time I/O errors are fatal; a malformed metadata
/// file is logged and left untouched.
pub fn rehash_corpus(root: &Path) -> Result<RehashReport, IndexError> {
    let mut report = RehashReport::default();
    for file in find_metadata_files(root)? {
        let fixture_dir = match file.parent() {
            Some(parent) => parent,
            None => continue,
        };
        report.checked += 1;

        let current_hash = ck_hash::hash_directory(fixture_dir)?;

        let body = fs::read_to_string(&file)?;
        let mut document: serde_yaml::Mapping = if body.trim().is_empty() {
            serde_yaml::Mapping::new()
        } else {
            match serde_yaml::from_str(&body) {
                Ok(document) => document,
                Err(error) => {
                    warn!(path = %file.display(), %error, "skipping malformed metadata file");
                    continue;
                }
            }
        };

        let hash_key = serde_yaml::Value::String("hash".to_owned());
        let stored = document.get(&hash_key).and_then(serde_yaml::Value::as_str);
        if stored == Some(current_hash.as_str()) {
            debug!(fixture = %fixture_dir.display(), "hash unchanged");
            continue;
        }

        info!(
            fixture = %fixture_dir.display(),
            old = stored.unwrap_or("<none>"),
            new = %current_hash,
            "updating fixture hash"
        );
        document.insert(hash_key, serde_yaml::Value::String(current_hash));
        fs::write(&file, serde_yaml::to_string(&document)?)?;
        report.updated += 1;
    }
    Ok(report)
}
