//! Time-Series Store: the single source of truth for samples, predictions, optimal targets,
//! and anomalies, persisted as a checksummed append-only journal.
//!
//! Single writer, many readers: all mutation goes through one `RwLock`-guarded write path;
//! reads take a read lock and return owned clones so callers never hold the store lock across
//! an `.await`. On corrupt-on-open the store logs the integrity violation and re-initializes
//! empty rather than refusing to start, via `IntegrityViolation` handling.

mod journal;

use crate::error::{ControllerError, Result};
use crate::types::{AnomalyRecord, OptimalTargetRecord, PredictionRecord, Sample, WorkloadId};
use journal::Journal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{error, warn};

const RETENTION_SECONDS: i64 = 30 * 24 * 60 * 60;
const COMPACTION_WATERMARK: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Row {
    Sample(Sample),
    Prediction(PredictionRecord),
    OptimalTarget(OptimalTargetRecord),
    Anomaly(AnomalyRecord),
}

#[derive(Default)]
struct WorkloadTables {
    samples: Vec<Sample>,
    predictions: Vec<PredictionRecord>,
    optimal_targets: Vec<OptimalTargetRecord>,
    anomalies: Vec<AnomalyRecord>,
    /// (tick timestamp) already appended, for `append_sample` idempotence.
    sample_ticks: std::collections::HashSet<i64>,
}

struct Inner {
    tables: HashMap<WorkloadId, WorkloadTables>,
    journal: Journal,
    journal_path: PathBuf,
    rows_since_compaction: usize,
}

pub struct TimeSeriesStore {
    inner: RwLock<Inner>,
}

impl TimeSeriesStore {
    /// Opens the store at `path`, replaying its journal. A corrupt journal that cannot even be
    /// opened re-initializes as an empty store rather than failing startup.
    pub fn open(path: &Path) -> Self {
        let (tables, rows) = match Self::load(path) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, path = %path.display(), "time-series store journal corrupt, reinitializing empty");
                (HashMap::new(), 0)
            }
        };

        let journal = Journal::open(path).unwrap_or_else(|e| {
            panic!("failed to open time-series store journal at {}: {e}", path.display())
        });

        Self {
            inner: RwLock::new(Inner {
                tables,
                journal,
                journal_path: path.to_path_buf(),
                rows_since_compaction: rows,
            }),
        }
    }

    fn load(path: &Path) -> Result<(HashMap<WorkloadId, WorkloadTables>, usize)> {
        let frames = Journal::replay(path)?;
        let mut tables: HashMap<WorkloadId, WorkloadTables> = HashMap::new();
        let mut count = 0;
        for frame in &frames {
            let row: Row = serde_json::from_slice(frame)
                .map_err(|e| ControllerError::IntegrityViolation(format!("undecodable journal row: {e}")))?;
            count += 1;
            match row {
                Row::Sample(s) => {
                    let t = tables.entry(s.workload.clone()).or_default();
                    t.sample_ticks.insert(s.timestamp);
                    t.samples.push(s);
                }
                Row::Prediction(p) => tables.entry(p.workload.clone()).or_default().predictions.push(p),
                Row::OptimalTarget(o) => tables.entry(o.workload.clone()).or_default().optimal_targets.push(o),
                Row::Anomaly(a) => tables.entry(a.workload.clone()).or_default().anomalies.push(a),
            }
        }
        Ok((tables, count))
    }

    fn append_row(inner: &mut Inner, row: &Row) -> Result<()> {
        let encoded = serde_json::to_vec(row).map_err(|e| ControllerError::IntegrityViolation(format!("failed to encode row: {e}")))?;
        inner.journal.append(&encoded)?;
        inner.rows_since_compaction += 1;
        Ok(())
    }

    /// Idempotent per `(workload, timestamp)`: re-appending a sample for a tick already
    /// recorded is a no-op; append_sample is idempotent per tick.
    pub fn append_sample(&self, sample: Sample) -> Result<()> {
        let mut inner = self.inner.write().expect("tss lock poisoned");
        let already_present = inner
            .tables
            .get(&sample.workload)
            .map(|t| t.sample_ticks.contains(&sample.timestamp))
            .unwrap_or(false);
        if already_present {
            return Ok(());
        }

        Self::append_row(&mut inner, &Row::Sample(sample.clone()))?;
        let table = inner.tables.entry(sample.workload.clone()).or_default();
        table.sample_ticks.insert(sample.timestamp);
        table.samples.push(sample);

        if inner.rows_since_compaction >= COMPACTION_WATERMARK {
            self.compact_locked(&mut inner)?;
        }
        Ok(())
    }

    pub fn append_prediction(&self, record: PredictionRecord) -> Result<()> {
        let mut inner = self.inner.write().expect("tss lock poisoned");
        Self::append_row(&mut inner, &Row::Prediction(record.clone()))?;
        inner.tables.entry(record.workload.clone()).or_default().predictions.push(record);
        Ok(())
    }

    /// Updates an existing prediction's `realized_value`/`accurate` in place (validator
    /// closure) and appends the updated row to the journal.
    pub fn update_prediction(&self, workload: &WorkloadId, issue_time: i64, horizon: crate::types::Horizon, actual: f64) -> Result<()> {
        let mut inner = self.inner.write().expect("tss lock poisoned");
        let table = inner
            .tables
            .get_mut(workload)
            .ok_or_else(|| ControllerError::NotFound { resource: "workload".into(), id: workload.to_string() })?;
        let record = table
            .predictions
            .iter_mut()
            .find(|p| p.issue_time == issue_time && p.horizon == horizon)
            .ok_or_else(|| ControllerError::NotFound { resource: "prediction".into(), id: format!("{workload}@{issue_time}") })?;
        record.mark_realized(actual);
        let updated = record.clone();
        Self::append_row(&mut inner, &Row::Prediction(updated))?;
        Ok(())
    }

    pub fn upsert_optimal_target(&self, record: OptimalTargetRecord) -> Result<()> {
        let mut inner = self.inner.write().expect("tss lock poisoned");
        Self::append_row(&mut inner, &Row::OptimalTarget(record.clone()))?;
        let table = inner.tables.entry(record.workload.clone()).or_default();
        if let Some(existing) = table
            .optimal_targets
            .iter_mut()
            .find(|o| o.hour_of_day == record.hour_of_day)
        {
            *existing = record;
        } else {
            table.optimal_targets.push(record);
        }
        Ok(())
    }

    pub fn append_anomaly(&self, record: AnomalyRecord) -> Result<()> {
        let mut inner = self.inner.write().expect("tss lock poisoned");
        Self::append_row(&mut inner, &Row::Anomaly(record.clone()))?;
        inner.tables.entry(record.workload.clone()).or_default().anomalies.push(record);
        Ok(())
    }

    /// Bounded, lazy read over a workload's samples within `[start, end]` inclusive.
    pub fn read_samples(&self, workload: &WorkloadId, start: i64, end: i64) -> Vec<Sample> {
        let inner = self.inner.read().expect("tss lock poisoned");
        inner
            .tables
            .get(workload)
            .map(|t| t.samples.iter().filter(|s| s.timestamp >= start && s.timestamp <= end).cloned().collect())
            .unwrap_or_default()
    }

    pub fn read_open_predictions(&self, workload: &WorkloadId, now: i64) -> Vec<PredictionRecord> {
        let inner = self.inner.read().expect("tss lock poisoned");
        inner
            .tables
            .get(workload)
            .map(|t| t.predictions.iter().filter(|p| p.realized_value.is_none() && p.due_at() <= now).cloned().collect())
            .unwrap_or_default()
    }

    pub fn read_recent_predictions(&self, workload: &WorkloadId, limit: usize) -> Vec<PredictionRecord> {
        let inner = self.inner.read().expect("tss lock poisoned");
        inner
            .tables
            .get(workload)
            .map(|t| {
                let mut closed: Vec<PredictionRecord> = t.predictions.iter().filter(|p| p.realized_value.is_some()).cloned().collect();
                closed.sort_by_key(|p| std::cmp::Reverse(p.issue_time));
                closed.truncate(limit);
                closed
            })
            .unwrap_or_default()
    }

    pub fn read_optimal_targets(&self, workload: &WorkloadId) -> Vec<OptimalTargetRecord> {
        let inner = self.inner.read().expect("tss lock poisoned");
        inner.tables.get(workload).map(|t| t.optimal_targets.clone()).unwrap_or_default()
    }

    pub fn sample_count(&self, workload: &WorkloadId) -> usize {
        let inner = self.inner.read().expect("tss lock poisoned");
        inner.tables.get(workload).map(|t| t.samples.len()).unwrap_or(0)
    }

    /// Drops rows older than the 30-day retention window and, if the in-memory row count
    /// crossed the watermark, rewrites the journal to match. Intended to be called from a
    /// daily background task as well as opportunistically from `append_sample`.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write().expect("tss lock poisoned");
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut Inner) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let cutoff = now - RETENTION_SECONDS;

        let mut rows = Vec::new();
        for table in inner.tables.values_mut() {
            table.samples.retain(|s| s.timestamp >= cutoff);
            table.sample_ticks.retain(|ts| *ts >= cutoff);
            table.predictions.retain(|p| p.issue_time >= cutoff);
            table.anomalies.retain(|a| a.detected_at >= cutoff);
        }
        for (workload, table) in &inner.tables {
            for s in &table.samples {
                rows.push(serde_json::to_vec(&Row::Sample(s.clone())).expect("sample encodes"));
            }
            for p in &table.predictions {
                rows.push(serde_json::to_vec(&Row::Prediction(p.clone())).expect("prediction encodes"));
            }
            for o in &table.optimal_targets {
                rows.push(serde_json::to_vec(&Row::OptimalTarget(o.clone())).expect("optimal target encodes"));
            }
            for a in &table.anomalies {
                rows.push(serde_json::to_vec(&Row::Anomaly(a.clone())).expect("anomaly encodes"));
            }
            let _ = workload;
        }

        Journal::compact(&inner.journal_path, &rows)?;
        inner.journal.reopen()?;
        inner.rows_since_compaction = rows.len();
        if rows.len() >= COMPACTION_WATERMARK {
            warn!(rows = rows.len(), "time-series store still above compaction watermark after retention sweep");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Horizon;

    fn sample(workload: &WorkloadId, ts: i64) -> Sample {
        Sample {
            workload: workload.clone(),
            timestamp: ts,
            cpu_millicores: 100.0,
            memory_mib: 200.0,
            replica_count: 2,
            hpa_target_percent: 70,
            node_cpu_utilization_percent: 50.0,
            cpu_request_millicores: 250,
            memory_request_mib: 320,
        }
    }

    #[test]
    fn append_sample_is_idempotent_per_tick() {
        let dir = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(&dir.path().join("tss.bin"));
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");

        store.append_sample(sample(&workload, 1000)).unwrap();
        store.append_sample(sample(&workload, 1000)).unwrap();
        store.append_sample(sample(&workload, 1060)).unwrap();

        assert_eq!(store.sample_count(&workload), 2);
    }

    #[test]
    fn reopening_replays_prior_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tss.bin");
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        {
            let store = TimeSeriesStore::open(&path);
            store.append_sample(sample(&workload, 1000)).unwrap();
            store.append_sample(sample(&workload, 1060)).unwrap();
        }
        let reopened = TimeSeriesStore::open(&path);
        assert_eq!(reopened.sample_count(&workload), 2);
    }

    #[test]
    fn open_predictions_filter_by_due_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(&dir.path().join("tss.bin"));
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        store
            .append_prediction(PredictionRecord {
                workload: workload.clone(),
                issue_time: 0,
                horizon: Horizon::FifteenMin,
                predicted_value: 10.0,
                lower_bound: 9.0,
                upper_bound: 11.0,
                model_tag: "mean".into(),
                confidence: 0.5,
                realized_value: None,
                accurate: None,
            })
            .unwrap();

        assert!(store.read_open_predictions(&workload, 100).is_empty());
        assert_eq!(store.read_open_predictions(&workload, 15 * 60).len(), 1);
    }

    #[test]
    fn update_prediction_marks_accuracy_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tss.bin");
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        let store = TimeSeriesStore::open(&path);
        store
            .append_prediction(PredictionRecord {
                workload: workload.clone(),
                issue_time: 0,
                horizon: Horizon::FifteenMin,
                predicted_value: 100.0,
                lower_bound: 90.0,
                upper_bound: 110.0,
                model_tag: "mean".into(),
                confidence: 0.5,
                realized_value: None,
                accurate: None,
            })
            .unwrap();

        store.update_prediction(&workload, 0, Horizon::FifteenMin, 103.0).unwrap();
        let recent = store.read_recent_predictions(&workload, 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].accurate, Some(true));
    }

    #[test]
    fn corrupt_journal_reinitializes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tss.bin");
        std::fs::write(&path, b"not a valid journal frame stream at all, much too short header mismatch").unwrap();
        let store = TimeSeriesStore::open(&path);
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        assert_eq!(store.sample_count(&workload), 0);
        store.append_sample(sample(&workload, 1)).unwrap();
        assert_eq!(store.sample_count(&workload), 1);
    }
}
