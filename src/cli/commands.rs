use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, Level};

use crate::cli::args::{Cli, Commands};
use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{FeatureSchema, ObservationTime, StationSet};
use crate::processors::{BatchProcessor, BatchReport, FeatureComposer, TimeSeriesAssembler};
use crate::readers::{MicapsGridStore, MicapsReader, NetcdfGridStore, NetcdfReader, StationReader};
use crate::utils::constants::DEFAULT_GAPS;
use crate::utils::filename::forecast_identifier;
use crate::writers::{OutputFormat, ParquetWriter, TableWriter};

pub async fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }
    let quiet = cli.quiet;

    match cli.command {
        Commands::Align {
            time,
            ec_basis,
            json,
        } => {
            if let Some(basis) = ec_basis {
                config.ec_time_basis = basis;
            }
            align(&config, &time, json)?;
        }

        Commands::Compose {
            times,
            method,
            no_outlier,
            overwrite,
        } => {
            if let Some(method) = method {
                config.interpolation.method = method;
            }
            if no_outlier {
                config.outlier.enabled = false;
            }
            config.overwrite |= overwrite;

            let report = tokio::task::spawn_blocking(move || compose(&config, &times, quiet)).await??;
            print_report("compose", &report)?;
        }

        Commands::Assemble {
            gap,
            times,
            format,
            compression,
            overwrite,
        } => {
            if let Some(format) = format {
                config.output_format = format;
            }
            if let Some(compression) = compression {
                config.compression = compression;
            }
            config.overwrite |= overwrite;
            config.check()?;

            let report =
                tokio::task::spawn_blocking(move || assemble(&config, &times, &[gap], quiet)).await??;
            print_report(&format!("assemble T-{}", gap), &report)?;
        }

        Commands::Run {
            times,
            format,
            overwrite,
        } => {
            if let Some(format) = format {
                config.output_format = format;
            }
            config.overwrite |= overwrite;

            let (composed, assembled) = tokio::task::spawn_blocking(move || -> Result<_> {
                let composed = compose(&config, &times, quiet)?;
                let assembled = assemble(&config, &times, &DEFAULT_GAPS, quiet)?;
                Ok((composed, assembled))
            })
            .await??;
            print_report("compose", &composed)?;
            print_report("assemble", &assembled)?;
        }

        Commands::Info { file } => {
            let info = ParquetWriter::new().get_file_info(&file)?;
            println!("{}", file.display());
            println!("{}", info.summary());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt().with_max_level(level).with_target(false);

    let installed = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| ProcessingError::Config(format!("cannot initialise logging: {}", e)))
}

fn align(config: &PipelineConfig, time: &str, json: bool) -> Result<()> {
    let time = ObservationTime::parse(time)?;
    let alignment = config.aligner().align(&time)?;

    if json {
        let value = serde_json::json!({
            "time": time.identifier(),
            "ec_basis": config.ec_time_basis,
            "ec": {
                "cycle": alignment.ec.cycle,
                "lead_hours": alignment.ec.lead_hours,
                "file": forecast_identifier(&alignment.ec),
            },
            "sms": {
                "cycle": alignment.sms.cycle,
                "lead_hours": alignment.sms.lead_hours,
                "file": forecast_identifier(&alignment.sms),
            },
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Observation: {} ({})", time, time.identifier());
        println!("EC  ({} basis): {} -> {}", config.ec_time_basis, alignment.ec, forecast_identifier(&alignment.ec));
        println!("SMS: {} -> {}", alignment.sms, forecast_identifier(&alignment.sms));
    }
    Ok(())
}

fn load_stations(config: &PipelineConfig) -> Result<Arc<StationSet>> {
    let stations = StationReader::new()
        .with_region(Some(config.region))
        .read_stations(&config.paths.stations_file)?;
    info!(
        "{} master stations from {}",
        stations.len(),
        config.paths.stations_file.display()
    );
    Ok(Arc::new(stations))
}

fn build_composer(config: &PipelineConfig, stations: Arc<StationSet>, schema: Arc<FeatureSchema>) -> Result<FeatureComposer> {
    let ec_store = MicapsGridStore::new(&config.paths.ec_root)
        .with_reader(MicapsReader::new().with_mmap(config.use_mmap))
        .with_region(Some(config.region));
    let sms_reader = NetcdfReader::new(&schema.sms.lon_variable, &schema.sms.lat_variable);
    let sms_store = NetcdfGridStore::new(&config.paths.sms_dir, sms_reader).with_region(Some(config.region));

    Ok(FeatureComposer::new(
        stations,
        schema,
        &config.paths.observation_dir,
        Arc::new(ec_store),
        Arc::new(sms_store),
    )
    .with_aligner(config.aligner())
    .with_interpolator(config.interpolator())
    .with_outlier(config.outlier_corrector()?)
    .with_strict_stations(config.strict_stations))
}

/// Explicit identifiers, or every synoptic observation file when none are given.
fn resolve_times(config: &PipelineConfig, times: &[String]) -> Result<Vec<ObservationTime>> {
    if times.is_empty() {
        let found = BatchProcessor::discover_times(&config.paths.observation_dir)?;
        info!(
            "{} synoptic observation files in {}",
            found.len(),
            config.paths.observation_dir.display()
        );
        return Ok(found);
    }
    times.iter().map(|t| ObservationTime::parse(t)).collect()
}

fn batch_processor(config: &PipelineConfig, quiet: bool) -> BatchProcessor {
    BatchProcessor::new(config.workers)
        .with_overwrite(config.overwrite)
        .with_silent(quiet)
}

fn compose(config: &PipelineConfig, times: &[String], quiet: bool) -> Result<BatchReport> {
    let stations = load_stations(config)?;
    let schema = Arc::new(config.schema.clone());
    let composer = build_composer(config, stations, schema)?;
    let times = resolve_times(config, times)?;

    batch_processor(config, quiet).compose_all(&composer, &times, &config.paths.snapshot_dir)
}

fn assemble(config: &PipelineConfig, times: &[String], gaps: &[u32], quiet: bool) -> Result<BatchReport> {
    let stations = load_stations(config)?;
    let schema = Arc::new(config.schema.clone());
    let assembler = TimeSeriesAssembler::new(stations, schema, &config.paths.snapshot_dir);
    let writer = table_writer(config)?;
    let times = resolve_times(config, times)?;
    let processor = batch_processor(config, quiet);

    let mut report = BatchReport::default();
    for &gap in gaps {
        report.merge(processor.assemble_all(&assembler, &writer, &times, gap, &config.paths.output_dir)?);
    }
    Ok(report)
}

fn table_writer(config: &PipelineConfig) -> Result<TableWriter> {
    let writer = TableWriter::new(config.output_format);
    match config.output_format {
        OutputFormat::Parquet => Ok(writer.with_parquet(ParquetWriter::new().with_compression(&config.compression)?)),
        OutputFormat::Csv => Ok(writer),
    }
}

fn print_report(stage: &str, report: &BatchReport) -> Result<()> {
    debug!("{} report: {}", stage, serde_json::to_string(report)?);
    println!("{}: {}", stage, report.summary());
    for failure in &report.failed {
        println!("  {} failed: {}", failure.time, failure.reason);
    }
    Ok(())
}
