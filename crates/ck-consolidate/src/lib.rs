#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use ck_aggregate::AggregatedArtifact;
use ck_discover::{DiscoverError, find_files_named};
use ck_index::FixtureIndex;
use ck_types::{RawResult, Value};
use thiserror::Error;
use tracing::{info, warn};

const ARTIFACT_FILE: &str = "results.json";

/// Fields never copied verbatim into the table: the outcome list gets
/// its own rendering, identity fields get dedicated columns, and the
/// rest are noise for analysis.
const EXCLUDED_FIELDS: [&str; 5] = [
    "tests_outcomes",
    "chat_hashes",
    "cat_uuid",
    "cat_hash",
    "source",
];

/// Leading column order; everything else follows alphabetically, with
/// tag indicator columns last.
const PRIORITY_COLUMNS: [&str; 11] = [
    "run",
    "model",
    "language",
    "testcase",
    "uuid",
    "hash",
    "tests_outcomes",
    "cost",
    "duration",
    "sets",
    "notes",
];

const INDICATOR_PREFIX: &str = "set_";

#[derive(Debug, Error)]
pub enum ConsolidateError {
    #[error(transparent)]
    Discover(#[from] DiscoverError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// How fixture tags join onto rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagJoinStrategy {
    /// One `set_<tag>` column per distinct tag observed corpus-wide,
    /// `1`/`0`, zero-filled so the table stays rectangular.
    #[default]
    IndicatorColumns,
    /// Only the comma-joined `sets` cell; no indicator explosion.
    JoinedOnly,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolidateOptions {
    pub tag_join: TagJoinStrategy,
}

pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Default)]
pub struct ConsolidatedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Distinct tags observed across the whole corpus, whatever the
    /// join strategy.
    pub tags: BTreeSet<String>,
    /// Aggregated artifacts that could not be read or parsed.
    pub skipped_artifacts: u64,
}

/// Flatten every aggregated artifact under `results_root` into one
/// rectangular table, cross-validating identity against `index`.
pub fn consolidate(
    results_root: &Path,
    index: &FixtureIndex,
    options: ConsolidateOptions,
) -> Result<ConsolidatedTable, ConsolidateError> {
    let files = find_files_named(results_root, ARTIFACT_FILE)?;
    info!(count = files.len(), root = %results_root.display(), "found aggregated artifacts");

    let mut table = ConsolidatedTable::default();
    for file in files {
        let artifact: AggregatedArtifact = match fs::read_to_string(&file)
            .map_err(|error| error.to_string())
            .and_then(|body| serde_json::from_str(&body).map_err(|error| error.to_string()))
        {
            Ok(artifact) => artifact,
            Err(error) => {
                warn!(path = %file.display(), error, "failed to read aggregated artifact");
                table.skipped_artifacts += 1;
                continue;
            }
        };

        let run_name = file
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        for result in &artifact.results {
            let row = build_row(result, &run_name, index, options, &mut table.tags);
            table.rows.push(row);
        }
    }

    table.columns = finalize_columns(&mut table.rows, &table.tags, options);
    info!(
        rows = table.rows.len(),
        columns = table.columns.len(),
        tags = table.tags.len(),
        "consolidation complete"
    );
    Ok(table)
}

fn build_row(
    result: &RawResult,
    run_name: &str,
    index: &FixtureIndex,
    options: ConsolidateOptions,
    all_tags: &mut BTreeSet<String>,
) -> Row {
    let mut row = Row::new();
    row.insert("run".to_owned(), Value::Utf8(run_name.to_owned()));

    for (key, value) in result.iter() {
        if EXCLUDED_FIELDS.contains(&key.as_str()) || !value.is_scalar() {
            continue;
        }
        row.insert(key.clone(), value.clone());
    }

    row.insert(
        "tests_outcomes".to_owned(),
        Value::Utf8(result.render_outcomes()),
    );

    let uuid = result
        .get("cat_uuid")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty());
    let result_hash = result
        .get("cat_hash")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty());
    row.insert(
        "uuid".to_owned(),
        uuid.map_or(Value::Null, |value| Value::Utf8(value.to_owned())),
    );
    row.insert(
        "hash".to_owned(),
        result_hash.map_or(Value::Null, |value| Value::Utf8(value.to_owned())),
    );

    let mut notes = Vec::new();
    let mut fixture_tags: Vec<String> = Vec::new();

    match uuid {
        Some(uuid) => match index.by_uuid(uuid) {
            Some(entry) => {
                let index_hash = entry.hash.as_deref().filter(|value| !value.is_empty());
                if let (Some(index_hash), Some(result_hash)) = (index_hash, result_hash) {
                    if index_hash != result_hash {
                        let shown: String = index_hash.chars().take(8).collect();
                        notes.push(format!("Hash mismatch (index: {shown}...)"));
                    }
                }

                let language_missing = match row.get("language") {
                    None => true,
                    Some(Value::Utf8(language)) => language == "unknown",
                    Some(_) => false,
                };
                if language_missing {
                    row.insert(
                        "language".to_owned(),
                        Value::Utf8(
                            entry
                                .language
                                .clone()
                                .unwrap_or_else(|| "unknown".to_owned()),
                        ),
                    );
                }

                fixture_tags = entry.sets.clone();
            }
            None => notes.push("UUID not found in index".to_owned()),
        },
        None => notes.push("No UUID in result".to_owned()),
    }

    row.insert("sets".to_owned(), Value::Utf8(fixture_tags.join(",")));
    for tag in &fixture_tags {
        all_tags.insert(tag.clone());
        if options.tag_join == TagJoinStrategy::IndicatorColumns {
            row.insert(format!("{INDICATOR_PREFIX}{tag}"), Value::Int(1));
        }
    }

    row.insert("notes".to_owned(), Value::Utf8(notes.join("; ")));
    row
}

/// Union the key set over all rows, zero-fill indicator columns so no
/// cell is ever absent, and fix the column order: priority columns
/// first, remaining non-indicator columns alphabetically, indicator
/// columns alphabetically by tag.
fn finalize_columns(
    rows: &mut [Row],
    all_tags: &BTreeSet<String>,
    options: ConsolidateOptions,
) -> Vec<String> {
    let mut observed = BTreeSet::new();
    for row in rows.iter() {
        observed.extend(row.keys().cloned());
    }

    let indicator_columns: Vec<String> = match options.tag_join {
        TagJoinStrategy::IndicatorColumns => all_tags
            .iter()
            .map(|tag| format!("{INDICATOR_PREFIX}{tag}"))
            .collect(),
        TagJoinStrategy::JoinedOnly => Vec::new(),
    };
    for column in &indicator_columns {
        observed.insert(column.clone());
        for row in rows.iter_mut() {
            row.entry(column.clone()).or_insert(Value::Int(0));
        }
    }

    let mut columns: Vec<String> = PRIORITY_COLUMNS
        .iter()
        .filter(|column| observed.contains(**column))
        .map(|column| (*column).to_owned())
        .collect();
    columns.extend(
        observed
            .iter()
            .filter(|column| {
                !PRIORITY_COLUMNS.contains(&column.as_str())
                    && !column.starts_with(INDICATOR_PREFIX)
            })
            .cloned(),
    );
    columns.extend(indicator_columns);
    columns
}

/// Write the table, fully replacing whatever was at `out_file` before.
pub fn write_csv(table: &ConsolidatedTable, out_file: &Path) -> Result<(), ConsolidateError> {
    if let Some(parent) = out_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().from_path(out_file)?;
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        let record: Vec<String> = table
            .columns
            .iter()
            .map(|column| row.get(column).map_or_else(String::new, Value::render_cell))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
