#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ck_discover::{DiscoverError, discover_raw_results, find_run_dir, resolve_identity,
    run_relative_path};
use ck_index::FixtureIndex;
use ck_types::{RawResult, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Discover(#[from] DiscoverError),
}

/// The aggregation unit: one run of the harness crossed with one model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BucketKey {
    pub run: String,
    pub model: String,
}

/// Validated results for one bucket plus the count of same-bucket
/// records that failed required-field validation. Bucketing happens
/// before validation, so rejections are attributed to the bucket they
/// would have joined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    pub results: Vec<RawResult>,
    pub rejected: u64,
}

impl Bucket {
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.results.iter().filter(|result| result.passed()).count()
    }

    /// Raw results observed for this bucket before validation.
    #[must_use]
    pub fn observed(&self) -> u64 {
        self.results.len() as u64 + self.rejected
    }
}

#[derive(Debug, Default)]
pub struct Aggregation {
    pub buckets: BTreeMap<BucketKey, Bucket>,
    /// Results appended to some bucket.
    pub processed: u64,
    /// Results that never reached a bucket: no enclosing run directory,
    /// or an unreadable/unparseable body.
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub count: usize,
    pub pass: usize,
    pub rejected: u64,
}

/// The on-disk artifact written per bucket. Both fields default so a
/// reader tolerates artifacts from older writers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedArtifact {
    #[serde(default)]
    pub summary: BucketSummary,
    #[serde(default)]
    pub results: Vec<RawResult>,
}

/// Scan `in_dir` for raw results and bucket them by (run, model).
///
/// Per-file problems are never fatal: a result outside any run
/// directory or with an unreadable body is skipped (counted, logged),
/// and a well-formed record missing required keys is rejected against
/// its bucket. Valid records are enriched with `cat_uuid`/`cat_hash`
/// (when an identity resolves) and `run_relative_path` before being
/// appended.
pub fn aggregate(in_dir: &Path, index: &FixtureIndex) -> Result<Aggregation, AggregateError> {
    let files = discover_raw_results(in_dir)?;
    info!(count = files.len(), root = %in_dir.display(), "found raw result files");

    let mut aggregation = Aggregation::default();
    for file in files {
        let run_dir = match find_run_dir(&file) {
            Some(run_dir) => run_dir,
            None => {
                debug!(path = %file.display(), "not inside a recognizable run directory");
                aggregation.skipped += 1;
                continue;
            }
        };
        let run_name = match run_dir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => {
                aggregation.skipped += 1;
                continue;
            }
        };

        let mut result: RawResult = match fs::read_to_string(&file)
            .map_err(|error| error.to_string())
            .and_then(|body| serde_json::from_str(&body).map_err(|error| error.to_string()))
        {
            Ok(result) => result,
            Err(error) => {
                warn!(path = %file.display(), error, "failed to read raw result");
                aggregation.skipped += 1;
                continue;
            }
        };

        let key = BucketKey {
            run: run_name,
            model: result.model_name(),
        };
        let bucket = aggregation.buckets.entry(key).or_default();

        let missing = result.missing_required_keys();
        if !missing.is_empty() {
            debug!(path = %file.display(), ?missing, "rejecting result with missing keys");
            bucket.rejected += 1;
            continue;
        }

        let identity = resolve_identity(&file, &run_dir, index);
        if let Some(uuid) = identity.uuid() {
            result.insert("cat_uuid", Value::Utf8(uuid.to_owned()));
        }
        if let Some(hash) = identity.hash() {
            result.insert("cat_hash", Value::Utf8(hash.to_owned()));
        }
        let test_dir = file.parent().unwrap_or(&run_dir);
        result.insert(
            "run_relative_path",
            Value::Utf8(run_relative_path(test_dir, &run_dir)),
        );

        bucket.results.push(result);
        aggregation.processed += 1;
    }

    info!(
        processed = aggregation.processed,
        skipped = aggregation.skipped,
        buckets = aggregation.buckets.len(),
        "aggregation scan complete"
    );
    Ok(aggregation)
}

/// One line of the per-bucket summary, in bucket-key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRow {
    pub run: String,
    pub model: String,
    pub count: usize,
    pub pass: usize,
    pub rejected: u64,
}

/// Write one artifact per bucket at `<out_dir>/<model>/<run>/results.json`,
/// overwriting whatever a previous invocation left there. An artifact is
/// written even for buckets whose every record was rejected, so a
/// downstream reader can see the rejection count. A write failure for
/// one bucket is logged and does not stop the others.
#[must_use]
pub fn write_artifacts(aggregation: &Aggregation, out_dir: &Path) -> Vec<BucketRow> {
    let mut rows = Vec::with_capacity(aggregation.buckets.len());
    for (key, bucket) in &aggregation.buckets {
        let artifact = AggregatedArtifact {
            summary: BucketSummary {
                count: bucket.results.len(),
                pass: bucket.pass_count(),
                rejected: bucket.rejected,
            },
            results: bucket.results.clone(),
        };

        let target = artifact_path(out_dir, &key.model, &key.run);
        if let Err(error) = write_artifact(&target, &artifact) {
            error!(run = %key.run, model = %key.model, %error, "failed to write bucket artifact");
        } else {
            debug!(path = %target.display(), "saved bucket artifact");
        }

        rows.push(BucketRow {
            run: key.run.clone(),
            model: key.model.clone(),
            count: artifact.summary.count,
            pass: artifact.summary.pass,
            rejected: artifact.summary.rejected,
        });
    }
    rows
}

#[must_use]
pub fn artifact_path(out_dir: &Path, model: &str, run: &str) -> PathBuf {
    out_dir
        .join(sanitize_segment(model))
        .join(sanitize_segment(run))
        .join("results.json")
}

// Model identifiers may carry characters that are awkward on a
// filesystem. Colons and friends pass through untouched; only path
// separators are rewritten since those would change the layout depth.
fn sanitize_segment(segment: &str) -> String {
    if segment.is_empty() {
        return "_".to_owned();
    }
    segment.replace(['/', '\\'], "_")
}

fn write_artifact(target: &Path, artifact: &AggregatedArtifact) -> Result<(), std::io::Error> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(artifact).map_err(std::io::Error::from)?;
    fs::write(target, body)
}
