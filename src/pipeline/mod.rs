// Batch orchestration
//   Units of work (one tile, or one tile x property) run in parallel and never
//   abort each other. Each ends as a UnitOutcome; the RunReport collects them.

use crate::cog::CloudTiffError;
use crate::config::{Config, ConfigError, ExecutionConfig};
use crate::derive::DeriveError;
use crate::encode::EncodeError;
use crate::grid::{GridError, TileId};
use crate::raster::mosaic::MosaicError;
use crate::raster::resample::ReprojectError;
use crate::raster::RasterError;
use crate::table::{JoinError, TableError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

pub mod derived;
pub mod tiling;

pub const REPORT_FILE: &str = "run-report.json";

/// Setup failures that stop a run before any unit starts.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("region {id}: {source}")]
    Region { id: String, source: CloudTiffError },
    #[error("cannot scan {path:?} for key rasters: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("cannot write report: {0}")]
    Report(#[from] std::io::Error),
    #[error("cannot write report: {0}")]
    ReportFormat(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Projection,
    Write,
    MissingKey,
    AggregationPolicy,
    Io,
    Data,
    Cancelled,
}

/// Why a unit did not produce its output.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct UnitError {
    pub kind: ErrorKind,
    pub message: String,
}

impl UnitError {
    pub fn new(kind: ErrorKind, message: impl Display) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }

    /// Only IO failures are retried.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Io
    }
}

impl From<CloudTiffError> for UnitError {
    fn from(e: CloudTiffError) -> Self {
        let kind = match &e {
            CloudTiffError::ReadError(_) => ErrorKind::Io,
            CloudTiffError::ProjectionError(_) | CloudTiffError::NoCrs => ErrorKind::Projection,
            _ => ErrorKind::Data,
        };
        Self::new(kind, e)
    }
}

impl From<EncodeError> for UnitError {
    fn from(e: EncodeError) -> Self {
        let kind = match &e {
            EncodeError::UnsupportedProjection(_) => ErrorKind::Projection,
            _ => ErrorKind::Write,
        };
        Self::new(kind, e)
    }
}

impl From<ReprojectError> for UnitError {
    fn from(e: ReprojectError) -> Self {
        let kind = match &e {
            ReprojectError::Projection(_) => ErrorKind::Projection,
            ReprojectError::CategoricalInterpolation(..) | ReprojectError::Raster(_) => {
                ErrorKind::Data
            }
        };
        Self::new(kind, e)
    }
}

impl From<crate::projection::ProjectionError> for UnitError {
    fn from(e: crate::projection::ProjectionError) -> Self {
        Self::new(ErrorKind::Projection, e)
    }
}

impl From<MosaicError> for UnitError {
    fn from(e: MosaicError) -> Self {
        Self::new(ErrorKind::Data, e)
    }
}

impl From<RasterError> for UnitError {
    fn from(e: RasterError) -> Self {
        Self::new(ErrorKind::Data, e)
    }
}

impl From<JoinError> for UnitError {
    fn from(e: JoinError) -> Self {
        let kind = match &e {
            JoinError::ConflictingValues { .. } => ErrorKind::AggregationPolicy,
            _ => ErrorKind::Data,
        };
        Self::new(kind, e)
    }
}

impl From<DeriveError> for UnitError {
    fn from(e: DeriveError) -> Self {
        Self::new(ErrorKind::Data, e)
    }
}

impl From<std::io::Error> for UnitError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Written,
    Skipped,
    Failed,
    Cancelled,
}

/// Final state of one unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub tile_id: TileId,
    /// `mukey` for tiling units, the property name for derived units.
    pub layer: String,
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UnitError>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_keys: Vec<i64>,
}

impl UnitOutcome {
    pub fn written(tile_id: TileId, layer: &str, path: PathBuf, attempts: u32) -> Self {
        Self {
            status: UnitStatus::Written,
            path: Some(path),
            attempts,
            ..Self::blank(tile_id, layer)
        }
    }

    pub fn skipped(tile_id: TileId, layer: &str, reason: &str, attempts: u32) -> Self {
        Self {
            status: UnitStatus::Skipped,
            reason: Some(reason.to_string()),
            attempts,
            ..Self::blank(tile_id, layer)
        }
    }

    pub fn failed(tile_id: TileId, layer: &str, error: UnitError, attempts: u32) -> Self {
        Self {
            status: UnitStatus::Failed,
            error: Some(error),
            attempts,
            ..Self::blank(tile_id, layer)
        }
    }

    pub fn cancelled(tile_id: TileId, layer: &str) -> Self {
        Self {
            status: UnitStatus::Cancelled,
            error: Some(UnitError::new(ErrorKind::Cancelled, "run cancelled before start")),
            ..Self::blank(tile_id, layer)
        }
    }

    pub fn with_missing_keys(mut self, missing_keys: Vec<i64>) -> Self {
        self.missing_keys = missing_keys;
        self
    }

    fn blank(tile_id: TileId, layer: &str) -> Self {
        Self {
            tile_id,
            layer: layer.to_string(),
            status: UnitStatus::Skipped,
            path: None,
            reason: None,
            error: None,
            attempts: 0,
            missing_keys: vec![],
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, UnitStatus::Failed | UnitStatus::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn from_outcomes<'a, I: IntoIterator<Item = &'a UnitOutcome>>(outcomes: I) -> Self {
        let (total, bad) = outcomes
            .into_iter()
            .fold((0, 0), |(t, b), o| (t + 1, b + o.is_failure() as usize));
        if total == 0 || bad == total {
            Self::Failed
        } else if bad == 0 {
            Self::Complete
        } else {
            Self::Partial
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Partial => 2,
            Self::Failed => 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StageSummary {
    fn of(outcomes: &[UnitOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.status {
                UnitStatus::Written => summary.written += 1,
                UnitStatus::Skipped => summary.skipped += 1,
                UnitStatus::Failed => summary.failed += 1,
                UnitStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

impl Display for StageSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} written, {} skipped, {} failed, {} cancelled",
            self.written, self.skipped, self.failed, self.cancelled
        )
    }
}

/// Everything a run did, written as `run-report.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub tiling: StageSummary,
    pub derived: StageSummary,
    /// Keys absent from the table, per tile.
    pub missing_keys: BTreeMap<TileId, Vec<i64>>,
    pub units: Vec<UnitOutcome>,
}

impl RunReport {
    pub fn new(tiling: Vec<UnitOutcome>, derived: Vec<UnitOutcome>) -> Self {
        let mut missing_keys: BTreeMap<TileId, Vec<i64>> = BTreeMap::new();
        for outcome in derived.iter().filter(|o| !o.missing_keys.is_empty()) {
            let keys = missing_keys.entry(outcome.tile_id.clone()).or_default();
            keys.extend(outcome.missing_keys.iter().copied());
            keys.sort_unstable();
            keys.dedup();
        }
        let units: Vec<UnitOutcome> = tiling.iter().chain(derived.iter()).cloned().collect();
        Self {
            status: RunStatus::from_outcomes(units.iter()),
            tiling: StageSummary::of(&tiling),
            derived: StageSummary::of(&derived),
            missing_keys,
            units,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Write `run-report.json` into `dir`, replacing any previous report whole.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, PipelineError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE);
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.persist(&path).map_err(|e| PipelineError::Report(e.error))?;
        Ok(path)
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}: tiling {}; derived {}; {} tiles with missing keys",
            self.status,
            self.tiling,
            self.derived,
            self.missing_keys.len()
        )
    }
}

/// Shared stop flag. Units check it before they start.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl From<&ExecutionConfig> for RetryPolicy {
    fn from(execution: &ExecutionConfig) -> Self {
        Self {
            max_retries: execution.max_retries,
            backoff: Duration::from_millis(execution.retry_backoff_ms),
        }
    }
}

/// Run `op` until it succeeds, fails for good, or runs out of retries.
/// Returns the result and the number of attempts made.
pub fn with_retry<T, F>(policy: RetryPolicy, what: &str, mut op: F) -> (Result<T, UnitError>, u32)
where
    F: FnMut() -> Result<T, UnitError>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                warn!("{what}: attempt {attempt} failed ({e}), retrying");
                thread::sleep(policy.backoff * attempt);
                attempt += 1;
            }
            result => return (result, attempt),
        }
    }
}

/// Run `f` on a pool of `threads` workers, or on the global pool.
pub fn in_pool<T: Send, F: FnOnce() -> T + Send>(
    threads: Option<usize>,
    f: F,
) -> Result<T, PipelineError> {
    match threads {
        Some(n) => Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()?
            .install(f)),
        None => Ok(f()),
    }
}

/// Tiling followed by derived rasters of every tile that tiling produced.
pub fn run(config: &Config, token: &CancellationToken) -> Result<RunReport, PipelineError> {
    let derived_config = config.derived()?;
    let tiling_outcomes = tiling::run(config, token)?;
    let inputs = derived::DerivedInputs::Tiling(tiling_outcomes.clone());
    let derived_outcomes = derived::run(config, derived_config, inputs, token)?;
    let report = RunReport::new(tiling_outcomes, derived_outcomes);
    info!("{report}");
    Ok(report)
}
