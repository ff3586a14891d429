#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use ck_aggregate::{AggregatedArtifact, BucketRow};
use ck_discover::{DiscoverError, discover_raw_results, find_files_named, find_run_dir};
use ck_index::FixtureIndex;
use ck_types::RawResult;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Discover(#[from] DiscoverError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("input file {0} does not exist")]
    MissingInput(PathBuf),
}

/// Verbosity as wired from `-q`/`-v`/`-vv`. Threaded explicitly into
/// logging setup; nothing reads it ambiently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verbosity {
    pub quiet: bool,
    pub verbose: u8,
}

impl Verbosity {
    #[must_use]
    pub fn level(self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::WARN,
                1 => tracing::Level::INFO,
                _ => tracing::Level::DEBUG,
            }
        }
    }
}

/// Install the process-wide log subscriber. Safe to call once per
/// binary; library crates only ever emit events.
pub fn init_logging(verbosity: Verbosity) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(verbosity.level())
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}

/// Paths the results pipeline operates on.
#[derive(Debug, Clone)]
pub struct ResultsConfig {
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    pub index_file: PathBuf,
    pub cats_dir: PathBuf,
    pub out_file: PathBuf,
}

impl ResultsConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            in_dir: PathBuf::from(".."),
            out_dir: PathBuf::from("results"),
            index_file: PathBuf::from("cat/index.csv"),
            cats_dir: PathBuf::from("cat"),
            out_file: PathBuf::from("results.csv"),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

/// Paths the corpus maintenance commands operate on.
#[derive(Debug, Clone)]
pub struct CorpusConfig {
    pub corpus_dir: PathBuf,
    pub index_file: PathBuf,
}

impl CorpusConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            corpus_dir: PathBuf::from("cat"),
            index_file: PathBuf::from("cat/index.csv"),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

fn truncate_cell(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let kept: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        text.to_owned()
    }
}

/// The per-bucket summary table shown after aggregation.
#[must_use]
pub fn render_bucket_table(rows: &[BucketRow]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<40} {:<40} {:>8} {:>8} {:>8}\n",
        "Run", "Model", "Count", "Pass", "Reject"
    ));
    out.push_str(&"-".repeat(108));
    out.push('\n');
    for row in rows {
        out.push_str(&format!(
            "{:<40} {:<40} {:>8} {:>8} {:>8}\n",
            truncate_cell(&row.run, 40),
            truncate_cell(&row.model, 40),
            row.count,
            row.pass,
            row.rejected,
        ));
    }
    out
}

/// Per-language fixture counts from the persisted index.
#[derive(Debug, Default)]
pub struct CorpusSummary {
    pub by_language: BTreeMap<String, Vec<SummaryFixture>>,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SummaryFixture {
    pub name: String,
    pub path: String,
}

pub fn summarize_index(index_file: &Path) -> Result<CorpusSummary, CliError> {
    if !index_file.exists() {
        return Err(CliError::MissingInput(index_file.to_path_buf()));
    }
    let index = FixtureIndex::load(index_file);

    let mut summary = CorpusSummary::default();
    for entry in index.entries() {
        let language = entry
            .language
            .clone()
            .unwrap_or_else(|| "unknown".to_owned());
        summary
            .by_language
            .entry(language)
            .or_default()
            .push(SummaryFixture {
                name: entry.name.clone().unwrap_or_else(|| "unnamed".to_owned()),
                path: entry.path.clone().unwrap_or_default(),
            });
        summary.total += 1;
    }
    for fixtures in summary.by_language.values_mut() {
        fixtures.sort_by(|a, b| a.name.cmp(&b.name));
    }
    Ok(summary)
}

/// Runs and aggregated buckets that produced nothing usable, as
/// candidates for removal. Detection only; deletion stays with the
/// caller.
#[derive(Debug, Default)]
pub struct CleanReport {
    pub candidates: Vec<PathBuf>,
}

/// A source run is broken when every raw result in it is unreadable or
/// missing required keys. An aggregated bucket is broken when its
/// summary shows rejections and no surviving results.
pub fn find_broken_runs(in_dir: &Path, out_dir: &Path) -> Result<CleanReport, CliError> {
    let mut report = CleanReport::default();

    let mut run_files: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    for file in discover_raw_results(in_dir)? {
        if let Some(run_dir) = find_run_dir(&file) {
            run_files.entry(run_dir).or_default().push(file);
        }
    }

    let mut broken_runs: Vec<PathBuf> = run_files
        .into_iter()
        .filter(|(_, files)| {
            !files.is_empty() && files.iter().all(|file| !raw_result_is_usable(file))
        })
        .map(|(run_dir, _)| run_dir)
        .collect();
    broken_runs.sort();
    report.candidates.extend(broken_runs);

    let mut search_dirs = vec![out_dir.to_path_buf()];
    let same_tree = in_dir
        .canonicalize()
        .ok()
        .zip(out_dir.canonicalize().ok())
        .is_some_and(|(a, b)| a == b);
    if !same_tree {
        search_dirs.push(in_dir.to_path_buf());
    }

    let mut seen = HashSet::new();
    let mut broken_buckets = Vec::new();
    for dir in search_dirs {
        if !dir.is_dir() {
            continue;
        }
        for file in find_files_named(&dir, "results.json")? {
            let resolved = file.canonicalize().unwrap_or_else(|_| file.clone());
            if !seen.insert(resolved) {
                continue;
            }
            let artifact: AggregatedArtifact = match fs::read_to_string(&file)
                .map_err(|error| error.to_string())
                .and_then(|body| serde_json::from_str(&body).map_err(|error| error.to_string()))
            {
                Ok(artifact) => artifact,
                Err(error) => {
                    debug!(path = %file.display(), error, "failed to read aggregated artifact");
                    continue;
                }
            };
            if artifact.summary.rejected > 0 && artifact.summary.count == 0 {
                if let Some(parent) = file.parent() {
                    broken_buckets.push(parent.to_path_buf());
                }
            }
        }
    }
    broken_buckets.sort();
    report.candidates.extend(broken_buckets);

    Ok(report)
}

fn raw_result_is_usable(file: &Path) -> bool {
    let body = match fs::read_to_string(file) {
        Ok(body) => body,
        Err(_) => return false,
    };
    match serde_json::from_str::<RawResult>(&body) {
        Ok(result) => result.is_valid(),
        Err(_) => false,
    }
}

/// Delete the candidate directories. Only the `--yolo` path calls this.
pub fn remove_candidates(report: &CleanReport) {
    for path in &report.candidates {
        if path.exists() {
            if let Err(error) = fs::remove_dir_all(path) {
                warn!(path = %path.display(), %error, "failed to remove directory");
            }
        }
    }
}
