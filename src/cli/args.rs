use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::processors::{EcTimeBasis, InterpolationMethod};
use crate::writers::OutputFormat;

#[derive(Parser)]
#[command(name = "precip-fusion")]
#[command(about = "Fuse station observations with EC and SMS forecasts into lagged feature tables")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Configuration file (TOML, JSON or YAML)")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Hide progress bars")]
    pub quiet: bool,

    #[arg(long, global = true, help = "Worker threads [default: from config]")]
    pub workers: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the EC and SMS files an observation time maps to
    Align {
        #[arg(short, long, help = "Observation time, YYMMDDHH or YYYYMMDDHH (local)")]
        time: String,

        #[arg(long, value_enum, help = "EC file clock [default: from config]")]
        ec_basis: Option<EcTimeBasis>,

        #[arg(long, help = "Print JSON")]
        json: bool,
    },

    /// Compose T-0 snapshots
    Compose {
        #[arg(
            short,
            long,
            num_args = 1..,
            help = "Observation times [default: every synoptic file in the observation directory]"
        )]
        times: Vec<String>,

        #[arg(long, value_enum, help = "Interpolation method [default: from config]")]
        method: Option<InterpolationMethod>,

        #[arg(long, help = "Skip precipitation outlier correction")]
        no_outlier: bool,

        #[arg(long, help = "Replace existing snapshots")]
        overwrite: bool,
    },

    /// Assemble lag-window tables from existing snapshots
    Assemble {
        #[arg(short, long, default_value = "3", help = "Window length in hours (3, 6, 9 or 12)")]
        gap: u32,

        #[arg(short, long, num_args = 1.., help = "Base times [default: every synoptic file]")]
        times: Vec<String>,

        #[arg(short, long, value_enum, help = "Output format [default: from config]")]
        format: Option<OutputFormat>,

        #[arg(long, help = "Parquet compression [default: from config]")]
        compression: Option<String>,

        #[arg(long, help = "Replace existing tables")]
        overwrite: bool,
    },

    /// Compose snapshots, then assemble every lag window
    Run {
        #[arg(short, long, num_args = 1.., help = "Base times [default: every synoptic file]")]
        times: Vec<String>,

        #[arg(short, long, value_enum, help = "Output format [default: from config]")]
        format: Option<OutputFormat>,

        #[arg(long, help = "Replace existing outputs")]
        overwrite: bool,
    },

    /// Display information about a Parquet feature table
    Info {
        #[arg(short, long)]
        file: PathBuf,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Align { .. } => "align",
            Commands::Compose { .. } => "compose",
            Commands::Assemble { .. } => "assemble",
            Commands::Run { .. } => "run",
            Commands::Info { .. } => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assemble() {
        let cli = Cli::try_parse_from([
            "precip-fusion",
            "--quiet",
            "assemble",
            "--gap",
            "12",
            "-t",
            "2018080420",
            "2018080423",
            "--format",
            "parquet",
        ])
        .unwrap();

        assert!(cli.quiet);
        match cli.command {
            Commands::Assemble {
                gap, times, format, ..
            } => {
                assert_eq!(gap, 12);
                assert_eq!(times, vec!["2018080420", "2018080423"]);
                assert_eq!(format, Some(OutputFormat::Parquet));
            }
            _ => panic!("expected assemble"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "precip-fusion",
            "align",
            "-t",
            "18080323",
            "--ec-basis",
            "utc",
            "-v",
            "--config",
            "fusion.toml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("fusion.toml")));
        assert_eq!(cli.command.name(), "align");
    }
}
