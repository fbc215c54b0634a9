use std::fs::read_to_string;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cluster_oplog::config::{Configuration, DEFAULT_CONFIG_FILE};
use cluster_oplog::{ClusterError, OpLog, Operation};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and append to a local operation log", long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = DEFAULT_CONFIG_FILE.to_string())]
    config: String,
    /// Overrides oplog_dir from the configuration file.
    #[arg(long)]
    oplog_dir: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print path, sequence range and size.
    Info,
    /// Print operations as JSON lines.
    Dump {
        #[arg(long, default_value_t = 1)]
        start: u64,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Append a JSON array of operations starting at the given sequence.
    Append {
        #[arg(long)]
        start: u64,
        #[arg(long)]
        file: String,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Configuration::parse_config_file(&args.config)
        .with_context(|| format!("failed to load configuration {}", args.config))?;
    if let Some(dir) = args.oplog_dir {
        config.oplog_dir = dir;
    }

    init_logging(&config.log_level);
    info!("using operation log at {}", config.oplog_dir);

    let oplog = OpLog::open_with_options(config.oplog_path(), &config.oplog_options())
        .inspect_err(|e| error!("failed to open operation log, err: {e}"))?;

    let res = run(&oplog, &config, args.command);
    oplog.close()?;
    res
}

fn run(oplog: &OpLog, config: &Configuration, command: Command) -> Result<()> {
    let mut out = io::stdout().lock();

    match command {
        Command::Info => {
            writeln!(out, "path: {}", oplog.path().display())?;
            writeln!(out, "min sequence: {}", oplog.min_seq())?;
            writeln!(out, "max sequence: {}", oplog.max_seq())?;
            writeln!(out, "size: {} bytes", oplog.size())?;
        }
        Command::Dump { start, limit } => {
            let limit = limit.unwrap_or(config.retrieve_limit);
            let operations = oplog.retrieve(start, limit).with_context(|| {
                format!("retrieve operations from sequence {start} failed")
            })?;

            for (idx, operation) in operations.iter().enumerate() {
                let raw = serde_json::to_string(operation)?;
                writeln!(out, "{}\t{raw}", start + idx as u64)?;
            }
        }
        Command::Append { start, file } => {
            let raw = read_to_string(&file).with_context(|| format!("failed to read {file}"))?;
            let operations: Vec<Operation> =
                serde_json::from_str(&raw).with_context(|| format!("failed to parse {file}"))?;

            let res = oplog.append(start, &operations);
            let kind = ClusterError::of(&res);
            if let Err(e) = res {
                error!("append failed ({kind}), err: {e}");
                if kind.is_sequence_error() {
                    bail!("{e}; retry at sequence {}", oplog.max_seq() + 1);
                }
                bail!("{e}");
            }

            writeln!(
                out,
                "appended {} operations, max sequence: {}",
                operations.len(),
                oplog.max_seq()
            )?;
        }
    }

    Ok(())
}
