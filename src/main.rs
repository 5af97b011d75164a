//! RaidIO command line
//!
//! Moves whole files in and out of a striped layout described by a YAML file.
//! `put` and `truncate` record the resulting logical size in the layout file
//! so that `get` returns exactly the stored bytes.
//!
//! ```text
//! raidio put    layout.yaml ./input.bin
//! raidio get    layout.yaml ./output.bin
//! raidio truncate layout.yaml --size 4096
//! raidio verify layout.yaml --json
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use raidio::{IoStatsSnapshot, LayoutConfig, RaidFile};

/// Chunk size used when streaming between local files and the stripe set
const COPY_CHUNK: usize = 4 * 1024 * 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// RaidIO - Reed-Solomon striped file I/O
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    /// Print I/O statistics in Prometheus text format when done
    #[arg(long, global = true, env = "RAIDIO_STATS")]
    stats: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream a local file into the stripe set
    Put {
        /// Layout description (YAML)
        layout: PathBuf,
        /// Local file to store
        input: PathBuf,
    },

    /// Read the logical file back out
    Get {
        /// Layout description (YAML)
        layout: PathBuf,
        /// Local file to create
        output: PathBuf,
    },

    /// Set the logical file size
    Truncate {
        /// Layout description (YAML)
        layout: PathBuf,
        /// New size in bytes
        #[arg(long)]
        size: u64,
    },

    /// Scrub every stored group and report damage
    Verify {
        /// Layout description (YAML)
        layout: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let stats = match &args.command {
        Command::Put { layout, input } => put(layout, input).await?,
        Command::Get { layout, output } => get(layout, output).await?,
        Command::Truncate { layout, size } => truncate(layout, *size).await?,
        Command::Verify { layout, json } => verify(layout, *json).await?,
    };

    if args.stats {
        print!("{}", stats.to_prometheus()?);
    }
    Ok(())
}

fn load(layout: &Path) -> anyhow::Result<LayoutConfig> {
    LayoutConfig::from_yaml_file(layout)
        .with_context(|| format!("loading layout {}", layout.display()))
}

async fn open(layout: &Path, config: &LayoutConfig) -> anyhow::Result<RaidFile> {
    let file = RaidFile::open_layout(config)
        .await
        .with_context(|| format!("opening stripes of {}", layout.display()))?;
    Ok(file)
}

fn record_size(layout: &Path, config: LayoutConfig, size: u64) -> anyhow::Result<()> {
    config
        .with_logical_size(size)
        .save_yaml_file(layout)
        .with_context(|| format!("saving layout {}", layout.display()))
}

// =============================================================================
// Commands
// =============================================================================

async fn put(layout: &Path, input: &Path) -> anyhow::Result<IoStatsSnapshot> {
    let mut source = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let config = load(layout)?;
    let mut file = open(layout, &config).await?;
    file.truncate(0).await?;

    let mut chunk = vec![0u8; COPY_CHUNK];
    let mut offset = 0u64;
    loop {
        let n = source.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        file.write(offset, &chunk[..n]).await?;
        offset += n as u64;
    }
    file.close().await?;
    record_size(layout, config, offset)?;

    info!("Stored {} bytes from {}", offset, input.display());
    Ok(file.stats().snapshot())
}

async fn get(layout: &Path, output: &Path) -> anyhow::Result<IoStatsSnapshot> {
    let config = load(layout)?;
    if config.logical_size.is_none() {
        warn!("Layout has no logical_size, output is padded to whole groups");
    }
    let mut file = open(layout, &config).await?;
    let mut sink = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;

    let size = file.size();
    let mut offset = 0u64;
    while offset < size {
        let len = COPY_CHUNK.min((size - offset) as usize);
        let data = file.read(offset, len).await?;
        sink.write_all(&data).await?;
        offset += data.len() as u64;
    }
    sink.flush().await?;
    file.close().await?;

    if !file.degraded_groups().is_empty() {
        warn!("Read through degraded groups {:?}", file.degraded_groups());
    }
    info!("Wrote {} bytes to {}", offset, output.display());
    Ok(file.stats().snapshot())
}

async fn truncate(layout: &Path, size: u64) -> anyhow::Result<IoStatsSnapshot> {
    let config = load(layout)?;
    let mut file = open(layout, &config).await?;
    file.truncate(size).await?;
    file.close().await?;
    record_size(layout, config, size)?;

    info!("Truncated to {} bytes", size);
    Ok(file.stats().snapshot())
}

async fn verify(layout: &Path, json: bool) -> anyhow::Result<IoStatsSnapshot> {
    let config = load(layout)?;
    let mut file = open(layout, &config).await?;
    let report = file.verify().await?;
    file.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("groups checked:    {}", report.groups_checked);
        println!("degraded groups:   {:?}", report.degraded_groups);
        println!("parity mismatches: {:?}", report.parity_mismatches);
        println!("repaired:          {:?}", report.repaired);
        println!("unrecoverable:     {:?}", report.unrecoverable);
    }

    if !report.unrecoverable.is_empty() {
        anyhow::bail!("{} groups cannot be recovered", report.unrecoverable.len());
    }
    Ok(file.stats().snapshot())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
