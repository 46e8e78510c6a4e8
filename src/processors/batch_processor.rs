use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ProcessingError, Result};
use crate::models::ObservationTime;
use crate::processors::feature_composer::FeatureComposer;
use crate::processors::time_series::TimeSeriesAssembler;
use crate::utils::constants::OBSERVATION_EXTENSION;
use crate::utils::filename::{feature_table_path, snapshot_path};
use crate::utils::progress::ProgressReporter;
use crate::writers::{CsvWriter, TableWriter};

/// A timestamp the batch gave up on, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub time: String,
    pub reason: String,
}

/// Outcome of one batch pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded.extend(other.succeeded);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    fn sort(&mut self) {
        self.succeeded.sort();
        self.skipped.sort();
        self.failed.sort_by(|a, b| a.time.cmp(&b.time));
    }

    pub fn summary(&self) -> String {
        format!(
            "{} timestamps: {} written, {} skipped, {} failed",
            self.total(),
            self.succeeded.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }
}

enum Outcome {
    Written,
    Skipped,
}

/// Runs composition and lag assembly over many timestamps on a rayon pool.
///
/// Each timestamp is independent; a recoverable failure is recorded and the batch moves
/// on. Anything else (bad configuration, unwritable output) stops the batch.
pub struct BatchProcessor {
    max_workers: usize,
    overwrite: bool,
    silent: bool,
}

impl BatchProcessor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            overwrite: false,
            silent: false,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// No progress bar.
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Synoptic-hour observation files in `dir`, oldest first.
    pub fn discover_times(dir: &Path) -> Result<Vec<ObservationTime>> {
        let mut times = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(OBSERVATION_EXTENSION) {
                continue;
            }
            match ObservationTime::parse(&path.to_string_lossy()) {
                Ok(time) if time.is_synoptic() => times.push(time),
                Ok(_) => {}
                Err(e) => debug!("ignoring {}: {}", path.display(), e),
            }
        }
        times.sort();
        times.dedup();
        Ok(times)
    }

    /// Compose and write the T-0 snapshot of every timestamp into `snapshot_dir`.
    pub fn compose_all(
        &self,
        composer: &FeatureComposer,
        times: &[ObservationTime],
        snapshot_dir: &Path,
    ) -> Result<BatchReport> {
        let writer = CsvWriter::new();
        self.run(times, "Composing snapshots", |time| {
            let path = snapshot_path(snapshot_dir, time);
            if !self.overwrite && path.is_file() {
                debug!("{} exists, skipping", path.display());
                return Ok(Outcome::Skipped);
            }
            let snapshot = composer.compose(time)?;
            writer.write(&snapshot, &path)?;
            Ok(Outcome::Written)
        })
    }

    /// Assemble and write the `T-{gap}` table of every timestamp under `output_dir`.
    pub fn assemble_all(
        &self,
        assembler: &TimeSeriesAssembler,
        writer: &TableWriter,
        times: &[ObservationTime],
        gap: u32,
        output_dir: &Path,
    ) -> Result<BatchReport> {
        let message = format!("Assembling T-{} tables", gap);
        self.run(times, &message, |time| {
            let path: PathBuf = feature_table_path(output_dir, time, gap, writer.format().extension());
            if !self.overwrite && path.is_file() {
                return Ok(Outcome::Skipped);
            }
            let table = assembler.assemble(time, gap)?;
            writer.write(&table, &path)?;
            Ok(Outcome::Written)
        })
    }

    fn run<F>(&self, times: &[ObservationTime], message: &str, task: F) -> Result<BatchReport>
    where
        F: Fn(&ObservationTime) -> Result<Outcome> + Sync,
    {
        let progress = ProgressReporter::new(times.len() as u64, message, self.silent);
        let processed = AtomicUsize::new(0);
        let report = Mutex::new(BatchReport::default());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        let fatal: Result<()> = pool.install(|| {
            times.par_iter().try_for_each(|time| {
                let outcome = task(time);
                processed.fetch_add(1, Ordering::Relaxed);
                progress.increment(1);

                let mut report = match report.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match outcome {
                    Ok(Outcome::Written) => report.succeeded.push(time.identifier()),
                    Ok(Outcome::Skipped) => report.skipped.push(time.identifier()),
                    Err(e) if e.is_recoverable() => {
                        warn!("{}: {}", time, e);
                        report.failed.push(BatchFailure {
                            time: time.identifier(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
                Ok(())
            })
        });
        fatal?;

        let mut report = match report.into_inner() {
            Ok(report) => report,
            Err(poisoned) => poisoned.into_inner(),
        };
        report.sort();

        progress.finish_with_message(&format!("{}: {}", message, report.summary()));
        info!(
            "{}: {} of {} processed, {}",
            message,
            processed.load(Ordering::Relaxed),
            times.len(),
            report.summary()
        );
        Ok(report)
    }
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeatureSchema, ForecastSystem, Station, StationSet};
    use crate::readers::MemoryGridStore;
    use crate::writers::OutputFormat;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn stations() -> Arc<StationSet> {
        Arc::new(StationSet::new(vec![Station::new("58238", 118.9, 31.93, 35.0)]).unwrap())
    }

    #[test]
    fn test_discover_synoptic_observation_files() -> Result<()> {
        let dir = TempDir::new()?;
        for name in ["2018080420.txt", "2018080419.txt", "2018080402.txt", "notes.txt", "2018080420.csv"] {
            fs::write(dir.path().join(name), "")?;
        }

        let times = BatchProcessor::discover_times(dir.path())?;
        let ids: Vec<String> = times.iter().map(|t| t.identifier()).collect();
        assert_eq!(ids, vec!["2018080402", "2018080420"]);
        Ok(())
    }

    #[test]
    fn test_compose_failures_do_not_abort_batch() -> Result<()> {
        let dir = TempDir::new()?;
        let snapshot_dir = dir.path().join("T0");
        let composer = FeatureComposer::new(
            stations(),
            Arc::new(FeatureSchema::default()),
            dir.path().join("obs"),
            Arc::new(MemoryGridStore::new(ForecastSystem::Ec)),
            Arc::new(MemoryGridStore::new(ForecastSystem::Sms)),
        );

        let times = vec![
            ObservationTime::parse("2018080420")?,
            ObservationTime::parse("2018080423")?,
        ];
        let report = BatchProcessor::new(2)
            .with_silent(true)
            .compose_all(&composer, &times, &snapshot_dir)?;

        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].reason.contains("observation"));
        assert!(report.succeeded.is_empty());
        assert!(!snapshot_dir.join("2018080420.csv").exists());
        Ok(())
    }

    #[test]
    fn test_existing_outputs_skipped_unless_overwrite() -> Result<()> {
        let dir = TempDir::new()?;
        let snapshot_dir = dir.path().join("T0");
        let output_dir = dir.path().join("out");
        let time = ObservationTime::parse("2018080420")?;
        for lag in [0, 3] {
            let path = snapshot_path(&snapshot_dir, &time.minus_hours(lag));
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(
                path,
                format!("station_num,lon,lat,height,0_T-0_ECthin_TP-r3\n58238,118.9,31.93,35,{}\n", lag),
            )?;
        }

        let assembler = TimeSeriesAssembler::new(stations(), Arc::new(FeatureSchema::default()), &snapshot_dir);
        let writer = TableWriter::new(OutputFormat::Csv);
        let processor = BatchProcessor::new(1).with_silent(true);

        let report = processor.assemble_all(&assembler, &writer, &[time], 3, &output_dir)?;
        assert_eq!(report.succeeded, vec!["2018080420"]);
        assert!(output_dir.join("T-3/T-3-2018080420.csv").is_file());

        let report = processor.assemble_all(&assembler, &writer, &[time], 3, &output_dir)?;
        assert_eq!(report.skipped, vec!["2018080420"]);

        let report = processor
            .with_overwrite(true)
            .assemble_all(&assembler, &writer, &[time], 3, &output_dir)?;
        assert_eq!(report.succeeded.len(), 1);

        let report = BatchProcessor::new(1)
            .with_silent(true)
            .assemble_all(&assembler, &writer, &[time], 6, &output_dir)?;
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].reason.contains("T-6"));
        Ok(())
    }

    #[test]
    fn test_corrupt_snapshot_fails_only_its_timestamps() -> Result<()> {
        let dir = TempDir::new()?;
        let snapshot_dir = dir.path().join("T0");
        let output_dir = dir.path().join("out");
        fs::create_dir_all(&snapshot_dir)?;

        let header = "station_num,lon,lat,height,0_T-0_ECthin_TP-r3\n";
        for id in ["2018080420", "2018080423", "2018080502"] {
            fs::write(
                snapshot_dir.join(format!("{}.csv", id)),
                format!("{}58238,118.9,31.93,35,1.5\n", header),
            )?;
        }
        // ragged row
        fs::write(
            snapshot_dir.join("2018080417.csv"),
            format!("{}58238,118.9,31.93\n", header),
        )?;

        let assembler = TimeSeriesAssembler::new(stations(), Arc::new(FeatureSchema::default()), &snapshot_dir);
        let writer = TableWriter::new(OutputFormat::Csv);
        let times = vec![
            ObservationTime::parse("2018080420")?,
            ObservationTime::parse("2018080502")?,
        ];

        let report = BatchProcessor::new(2)
            .with_silent(true)
            .assemble_all(&assembler, &writer, &times, 3, &output_dir)?;

        assert_eq!(report.succeeded, vec!["2018080502"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].time, "2018080420");
        assert!(report.failed[0].reason.contains("2018080417.csv"));
        assert!(output_dir.join("T-3/T-3-2018080502.csv").is_file());
        assert!(!output_dir.join("T-3/T-3-2018080420.csv").exists());
        Ok(())
    }
}
