//! Paginated Fetch Accumulator
//! ===========================
//! Drives a loop of query -> extract page -> accumulate -> advance cursor ->
//! maybe checkpoint against a `skip`/`first` style remote collection, until the
//! source returns an empty page, an iteration limit is hit, or the transport
//! fails. Accumulated records are periodically flushed to local JSON datasets
//! so a long collection run never loses more than one checkpoint interval of
//! work.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mockall::automock;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10;
pub const DEFAULT_DATA_DIR: &str = "data";

/// One fetched item. Schema-less by design, remote collections differ wildly.
pub type Record = serde_json::Map<String, Value>;

/// Pagination variables for a single page query.
#[derive(Debug, Clone)]
pub struct PageVars {
    pub first: usize,
    pub skip: usize,
    /// Extra named variables merged into every invocation. On key collision
    /// these win over anything the transport would set itself.
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("page request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed page response: {0}")]
    MalformedResponse(String),
}

/// A source of pages. The accumulator only ever holds one outstanding page
/// request, cursor correctness depends on strictly sequential advancement.
#[automock]
#[async_trait]
pub trait PageTransport {
    /// Issue one page query, returning the response envelope the page field
    /// is read from.
    async fn fetch_page(&self, query: &str, vars: &PageVars) -> Result<Value, TransportError>;
}

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Bare filename, resolved under `data_dir`.
    pub target: String,
    /// Flush every N iterations.
    pub interval: u64,
    /// Write sequence-numbered partial artifacts and reset the accumulator
    /// after each successful flush, instead of overwriting one cumulative
    /// file.
    pub clear_on_save: bool,
    /// First sequence number used in clear-on-save mode.
    pub start_seq: u64,
    pub data_dir: PathBuf,
}

impl CheckpointConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            interval: DEFAULT_CHECKPOINT_INTERVAL,
            clear_on_save: false,
            start_seq: 1,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub page_size: usize,
    /// Starting offset. When omitted, derived from the seed record count.
    pub initial_skip: Option<usize>,
    /// Records from a previous, interrupted run. The fetch resumes after
    /// them and the result contains seed and fresh records concatenated.
    pub seed_records: Vec<Record>,
    /// Maximum number of page queries before a forced stop.
    pub iteration_limit: Option<u64>,
    pub log_progress: bool,
    pub extra_vars: BTreeMap<String, Value>,
    pub checkpoint: Option<CheckpointConfig>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            initial_skip: None,
            seed_records: Vec::new(),
            iteration_limit: None,
            log_progress: true,
            extra_vars: BTreeMap::new(),
            checkpoint: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("page size must be at least 1")]
    ZeroPageSize,
    #[error("checkpoint interval must be at least 1")]
    ZeroCheckpointInterval,
    #[error("checkpoint target {0:?} must be a bare filename")]
    TargetNotAFilename(String),
    #[error("query template is missing the {0} token")]
    TemplateMissingToken(&'static str),
}

impl FetchOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if let Some(checkpoint) = &self.checkpoint {
            if checkpoint.interval == 0 {
                return Err(ConfigError::ZeroCheckpointInterval);
            }
            let target = Path::new(&checkpoint.target);
            if target.file_name() != Some(checkpoint.target.as_ref()) {
                return Err(ConfigError::TargetNotAFilename(checkpoint.target.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to write checkpoint {path:?}: {source}")]
    Checkpoint {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// How a fetch run ended. Partial data is returned in every case, callers
/// that need a complete dataset must check for [`FetchStatus::Exhausted`].
#[derive(Debug)]
pub enum FetchStatus {
    /// The source returned an empty page, the collection is fully fetched.
    Exhausted,
    /// The iteration limit stopped the run before exhaustion.
    LimitReached,
    /// The transport or a checkpoint write failed. Records gathered before
    /// the failure were flushed where checkpointing is enabled.
    Failed(FetchError),
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub records: Vec<Record>,
    pub status: FetchStatus,
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, FetchStatus::Exhausted)
    }
}

struct CheckpointWriter {
    config: CheckpointConfig,
    seq: u64,
}

impl CheckpointWriter {
    fn new(config: CheckpointConfig) -> Self {
        let seq = config.start_seq;
        Self { config, seq }
    }

    fn interval(&self) -> u64 {
        self.config.interval
    }

    fn artifact_path(&self) -> PathBuf {
        let filename = if self.config.clear_on_save {
            match self.config.target.strip_suffix(".json") {
                Some(stem) => format!("{stem}_{:05}.json", self.seq),
                None => format!("{}_{:05}", self.config.target, self.seq),
            }
        } else {
            self.config.target.clone()
        };
        self.config.data_dir.join(filename)
    }

    /// Writes the current accumulator contents. In clear-on-save mode the
    /// accumulator is reset only after the write succeeded.
    fn flush(&mut self, records: &mut Vec<Record>) -> Result<(), FetchError> {
        let path = self.artifact_path();
        let result: std::io::Result<()> = (|| {
            std::fs::create_dir_all(&self.config.data_dir)?;
            let file = File::create(&path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &*records)?;
            writer.flush()?;
            Ok(())
        })();
        result.map_err(|source| FetchError::Checkpoint {
            path: path.clone(),
            source,
        })?;

        if self.config.clear_on_save {
            self.seq += 1;
            records.clear();
            debug!(path = %path.display(), "checkpoint saved, accumulator cleared");
        } else {
            debug!(path = %path.display(), "checkpoint saved");
        }
        Ok(())
    }
}

fn extract_page(envelope: &Value, field: &str) -> Result<Option<Vec<Record>>, TransportError> {
    let value = match envelope.get(field) {
        None => {
            warn!(field, "page field missing from response envelope, treating as exhausted");
            return Ok(None);
        }
        Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };
    let records: Vec<Record> = serde_json::from_value(value.clone()).map_err(|e| {
        TransportError::MalformedResponse(format!("page field {field} is not a record array: {e}"))
    })?;
    Ok(Some(records))
}

/// Fetch every record of a paginated remote collection.
///
/// Issues `query` through `transport` with advancing `{first, skip}`
/// variables and accumulates the pages found under `field` in each response
/// envelope. Stops on the first empty page, on the configured iteration
/// limit, or on the first transport failure.
///
/// Fetch-time failures are never raised: the outcome carries the partial
/// records together with a status saying how the run ended, and when
/// checkpointing is configured the partial records are flushed to disk before
/// returning. Only invalid options fail eagerly, before any fetching starts.
pub async fn fetch_all(
    transport: &dyn PageTransport,
    query: &str,
    field: &str,
    options: FetchOptions,
) -> Result<FetchOutcome, ConfigError> {
    options.validate()?;
    let FetchOptions {
        page_size,
        initial_skip,
        seed_records,
        iteration_limit,
        log_progress,
        extra_vars,
        checkpoint,
    } = options;

    let mut records = seed_records;
    let mut skip = initial_skip.unwrap_or(records.len());
    let mut writer = checkpoint.map(CheckpointWriter::new);
    let mut iteration: u64 = 0;

    let mut status = loop {
        if let Some(limit) = iteration_limit {
            if iteration >= limit {
                info!(limit, "iteration limit reached");
                break FetchStatus::LimitReached;
            }
        }
        iteration += 1;

        let vars = PageVars {
            first: page_size,
            skip,
            extra: extra_vars.clone(),
        };
        let envelope = match transport.fetch_page(query, &vars).await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(iteration, error = %err, "transport failed, stopping early");
                break FetchStatus::Failed(err.into());
            }
        };

        let page = match extract_page(&envelope, field) {
            Ok(Some(page)) => page,
            Ok(None) => {
                info!(iteration, total = records.len(), "done fetching");
                break FetchStatus::Exhausted;
            }
            Err(err) => {
                warn!(iteration, error = %err, "transport failed, stopping early");
                break FetchStatus::Failed(err.into());
            }
        };
        if page.is_empty() {
            info!(iteration, total = records.len(), "done fetching");
            break FetchStatus::Exhausted;
        }

        records.extend(page);
        skip += page_size;
        if log_progress {
            info!(iteration, total = records.len(), "fetched page");
        }

        if let Some(writer) = writer.as_mut() {
            if iteration % writer.interval() == 0 {
                if let Err(err) = writer.flush(&mut records) {
                    break FetchStatus::Failed(err);
                }
            }
        }
    };

    // One more flush unless the last iteration already sat on a flush
    // boundary. The error path always salvages what was gathered, except
    // when the checkpoint write itself is what failed.
    if let Some(writer) = writer.as_mut() {
        let flush_needed = match &status {
            FetchStatus::Failed(FetchError::Checkpoint { .. }) => false,
            FetchStatus::Failed(_) => true,
            _ => iteration % writer.interval() != 0,
        };
        let already_failed = matches!(status, FetchStatus::Failed(_));
        if flush_needed {
            if let Err(err) = writer.flush(&mut records) {
                if already_failed {
                    warn!(error = %err, "salvage checkpoint failed, partial records only in memory");
                } else {
                    status = FetchStatus::Failed(err);
                }
            }
        }
    }

    Ok(FetchOutcome { records, status })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    fn record(id: usize) -> Record {
        json!({ "id": id }).as_object().unwrap().clone()
    }

    /// Mock transport over a fixed remote collection of `total` records,
    /// serving pages by `skip`/`first` and an empty page past the end.
    fn source_of(total: usize, field: &'static str, calls: Arc<AtomicU64>) -> MockPageTransport {
        let mut transport = MockPageTransport::new();
        transport.expect_fetch_page().returning(move |_, vars| {
            calls.fetch_add(1, Ordering::SeqCst);
            let end = (vars.skip + vars.first).min(total);
            let page: Vec<Record> = (vars.skip.min(total)..end).map(record).collect();
            Ok(json!({ field: page }))
        });
        transport
    }

    #[tokio::test]
    async fn fetches_until_trailing_empty_page() {
        // Record count is an exact multiple of the page size, so only the
        // trailing empty page stops the loop.
        let calls = Arc::new(AtomicU64::new(0));
        let transport = source_of(6, "votes", calls.clone());

        let options = FetchOptions {
            page_size: 2,
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.records.len(), 6);
        assert_eq!(outcome.records[5], record(5));
        // Three full pages plus one empty page to confirm exhaustion.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn partial_last_page_is_not_termination() {
        let calls = Arc::new(AtomicU64::new(0));
        let transport = source_of(5, "votes", calls.clone());

        let options = FetchOptions {
            page_size: 2,
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.records.len(), 5);
        // Pages [0,1], [2,3], [4], then the confirming empty page.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn seed_records_derive_the_initial_skip() {
        let calls = Arc::new(AtomicU64::new(0));
        let transport = source_of(7, "votes", calls.clone());

        let options = FetchOptions {
            page_size: 2,
            seed_records: (0..3).map(record).collect(),
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        assert!(outcome.is_complete());
        // Seed plus records 3..7, same as a from-scratch fetch.
        let expected: Vec<Record> = (0..7).map(record).collect();
        assert_eq!(outcome.records, expected);
    }

    #[tokio::test]
    async fn explicit_initial_skip_overrides_seed_length() {
        let transport = source_of(4, "votes", Arc::new(AtomicU64::new(0)));

        let options = FetchOptions {
            page_size: 2,
            seed_records: vec![record(99)],
            initial_skip: Some(0),
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        // Seed is kept, fetching restarted from offset zero.
        assert_eq!(outcome.records.len(), 5);
        assert_eq!(outcome.records[0], record(99));
        assert_eq!(outcome.records[1], record(0));
    }

    #[tokio::test]
    async fn iteration_limit_stops_an_endless_source() {
        let calls = Arc::new(AtomicU64::new(0));
        let transport = source_of(usize::MAX, "votes", calls.clone());

        let options = FetchOptions {
            page_size: 3,
            iteration_limit: Some(4),
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        assert!(matches!(outcome.status, FetchStatus::LimitReached));
        assert_eq!(outcome.records.len(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn missing_page_field_terminates_like_exhaustion() {
        let mut transport = MockPageTransport::new();
        transport
            .expect_fetch_page()
            .returning(|_, _| Ok(json!({ "unrelated": 1 })));

        let outcome = fetch_all(&transport, "query", "votes", FetchOptions::default())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn non_array_page_field_fails() {
        let mut transport = MockPageTransport::new();
        transport
            .expect_fetch_page()
            .returning(|_, _| Ok(json!({ "votes": "not a page" })));

        let outcome = fetch_all(&transport, "query", "votes", FetchOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            outcome.status,
            FetchStatus::Failed(FetchError::Transport(TransportError::MalformedResponse(_)))
        ));
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn extra_vars_are_passed_each_iteration() {
        let mut transport = MockPageTransport::new();
        transport
            .expect_fetch_page()
            .withf(|_, vars| vars.extra.get("space") == Some(&json!("uniswap")))
            .returning(|_, _| Ok(json!({ "votes": [] })));

        let options = FetchOptions {
            extra_vars: BTreeMap::from([("space".to_string(), json!("uniswap"))]),
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected_eagerly() {
        let transport = MockPageTransport::new();
        let options = FetchOptions {
            page_size: 0,
            ..FetchOptions::default()
        };
        let err = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroPageSize);
    }

    #[tokio::test]
    async fn checkpoint_target_with_path_separator_is_rejected() {
        let transport = MockPageTransport::new();
        let options = FetchOptions {
            checkpoint: Some(CheckpointConfig::new("../escape.json")),
            ..FetchOptions::default()
        };
        let err = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::TargetNotAFilename(_)));
    }

    fn read_artifact(path: &Path) -> Vec<Record> {
        let contents = std::fs::read_to_string(path).unwrap();
        serde_json::from_str(&contents).unwrap()
    }

    #[tokio::test]
    async fn checkpoint_cadence_and_final_flush() {
        let dir = tempfile::tempdir().unwrap();
        // 4 data pages plus the confirming empty page, interval 3: one flush
        // after iteration 3, and a final flush because the run ends on
        // iteration 5, off the boundary.
        let transport = source_of(8, "votes", Arc::new(AtomicU64::new(0)));

        let options = FetchOptions {
            page_size: 2,
            checkpoint: Some(CheckpointConfig {
                interval: 3,
                data_dir: dir.path().to_path_buf(),
                ..CheckpointConfig::new("votes.json")
            }),
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.records.len(), 8);
        // Single-file mode: one artifact, overwritten, full contents.
        let artifact = read_artifact(&dir.path().join("votes.json"));
        assert_eq!(artifact, outcome.records);
    }

    #[tokio::test]
    async fn clear_on_save_writes_sequence_numbered_partials() {
        let dir = tempfile::tempdir().unwrap();
        // Data on iterations 1-4, empty page on 5. Interval 2 flushes the
        // accumulator after iterations 2 and 4; the final flush on the
        // off-boundary iteration 5 finds it already empty.
        let transport = source_of(8, "votes", Arc::new(AtomicU64::new(0)));

        let options = FetchOptions {
            page_size: 2,
            checkpoint: Some(CheckpointConfig {
                interval: 2,
                clear_on_save: true,
                data_dir: dir.path().to_path_buf(),
                ..CheckpointConfig::new("votes.json")
            }),
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        assert!(outcome.is_complete());
        // Everything went to disk, the accumulator was cleared on each save.
        assert!(outcome.records.is_empty());

        let first = read_artifact(&dir.path().join("votes_00001.json"));
        let second = read_artifact(&dir.path().join("votes_00002.json"));
        let third = read_artifact(&dir.path().join("votes_00003.json"));
        assert_eq!(first, (0..4).map(record).collect::<Vec<_>>());
        assert_eq!(second, (4..8).map(record).collect::<Vec<_>>());
        assert_eq!(third, Vec::<Record>::new());
        assert!(!dir.path().join("votes_00004.json").exists());
    }

    #[tokio::test]
    async fn clear_on_save_respects_start_seq() {
        let dir = tempfile::tempdir().unwrap();
        let transport = source_of(2, "votes", Arc::new(AtomicU64::new(0)));

        let options = FetchOptions {
            page_size: 2,
            checkpoint: Some(CheckpointConfig {
                clear_on_save: true,
                start_seq: 7,
                data_dir: dir.path().to_path_buf(),
                ..CheckpointConfig::new("votes.json")
            }),
            ..FetchOptions::default()
        };
        fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        assert!(dir.path().join("votes_00007.json").exists());
        assert!(!dir.path().join("votes_00001.json").exists());
    }

    #[tokio::test]
    async fn transport_failure_salvages_to_disk_and_returns_partial() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockPageTransport::new();
        transport.expect_fetch_page().returning(|_, vars| {
            if vars.skip >= 4 {
                Err(TransportError::MalformedResponse("boom".to_string()))
            } else {
                let page: Vec<Record> = (vars.skip..vars.skip + vars.first).map(record).collect();
                Ok(json!({ "votes": page }))
            }
        });

        let options = FetchOptions {
            page_size: 2,
            checkpoint: Some(CheckpointConfig {
                data_dir: dir.path().to_path_buf(),
                ..CheckpointConfig::new("votes.json")
            }),
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        assert!(matches!(outcome.status, FetchStatus::Failed(_)));
        // Two successful pages survived, in memory and on disk.
        assert_eq!(outcome.records.len(), 4);
        let artifact = read_artifact(&dir.path().join("votes.json"));
        assert_eq!(artifact, outcome.records);
    }

    #[tokio::test]
    async fn no_final_flush_when_run_ends_on_boundary() {
        // Exhaustion on the empty-page iteration counts toward the cadence:
        // interval 3 with exhaustion at iteration 3 means the data from
        // iterations 1 and 2 was never flushed mid-loop, and the boundary
        // suppresses the final flush. Records are still returned in memory.
        let dir = tempfile::tempdir().unwrap();
        let transport = source_of(4, "votes", Arc::new(AtomicU64::new(0)));

        let options = FetchOptions {
            page_size: 2,
            checkpoint: Some(CheckpointConfig {
                interval: 3,
                data_dir: dir.path().to_path_buf(),
                ..CheckpointConfig::new("votes.json")
            }),
            ..FetchOptions::default()
        };
        let outcome = fetch_all(&transport, "query", "votes", options)
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.records.len(), 4);
        assert!(!dir.path().join("votes.json").exists());
    }
}
