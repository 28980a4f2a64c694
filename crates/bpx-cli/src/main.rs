//! 🚀 bpx-cli — the front door, the bouncer, the maitre d' of bpx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 A thin operator CLI: load config, set up logging, then poke the engine.
//! Replay a bulk file through it, look at the counters, sweep by hand, reset
//! the cycle, or pull the kill switch. Like a manager. 🦆

mod progress;
mod replay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bpx::notify::TracingNotifier;
use bpx::stats::{InMemoryKeyValueStore, Stats, StatsConfig};
use bpx::{AppConfig, BatchingEngine, JobFlag, Reconciler, SweepOutcome};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// 🪣 Bulk payload batching, from the outside.
#[derive(Debug, Parser)]
#[command(name = "bpx", version, about)]
struct Cli {
    /// 🔧 TOML config file. Missing file means env vars (BPX_*) only.
    #[arg(short, long, default_value = "bpx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 📼 Chunk a bulk NDJSON file into requests and push them through the engine.
    Replay {
        /// 📄 The NDJSON bulk file.
        file: PathBuf,
        /// 📦 Documents per simulated request.
        #[arg(long, default_value_t = 40)]
        docs_per_request: usize,
        /// 🏷️ Target index. Omit to hit `/_bulk` and let the action lines decide.
        #[arg(long)]
        index: Option<String>,
    },
    /// 📊 Print the counters.
    Stats,
    /// 🧹 Flush whatever is left in the buffer, right now.
    Sweep,
    /// 🌱 Zero the counters for a new indexing cycle. The buffer and where it goes stay.
    Reset,
    /// 🛑 Turn batching off (everything is forwarded) or back on.
    ForceStop {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

/// 🚀 main() — where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;

    // 💀 the part where we find out what went wrong, printed for 3am eyes
    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like Elasticsearch isn't reachable. \
                Double-check that the cluster is actually running and that \
                [elasticsearch].url points at it. If you're using Docker, try \
                `docker ps` to see what's up. Even servers need a nudge sometimes. ☕"
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // 🔒 validate the config file exists before we get too emotionally attached
    let the_config_file = cli.config.as_path();
    let the_config_file = match the_config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. Maybe it's a pwd/cwd thing; \
             use an absolute path to be absolutely certain. Was checking here: '{}'",
            the_config_file.display()
        )
    })? {
        true => Some(the_config_file),
        false => None,
    };
    let the_config = bpx::load_config(the_config_file)
        .context("💀 In bpx-cli, we couldn't load the config. Take a look at the file and the BPX_* env vars.")?;

    let the_engine = Arc::new(engine_for(&the_config).await?);

    match cli.command {
        Command::Replay {
            file,
            docs_per_request,
            index,
        } => replay::run(&the_config, the_engine, &file, docs_per_request, index).await,
        Command::Stats => {
            let the_stats = the_engine.stats().await?;
            let the_buffered = the_engine.buffer_size().await?;
            println!("{}", stats_table(&the_stats, the_buffered));
            Ok(())
        }
        Command::Sweep => sweep(&the_config, the_engine).await,
        Command::Reset => {
            the_engine.begin_cycle().await?;
            println!("🌱 counters reset");
            Ok(())
        }
        Command::ForceStop { state } => {
            let the_force_stop = matches!(state, Toggle::On);
            the_engine.set_force_stop(the_force_stop).await?;
            println!("🛑 force_stop = {the_force_stop}");
            Ok(())
        }
    }
}

async fn engine_for(config: &AppConfig) -> Result<BatchingEngine> {
    if matches!(config.stats, StatsConfig::Options(_)) {
        // -- 🗄️ there is no host option table out here, just this process
        warn!("⚠️ [stats.Options] has no host store in the CLI; counters live in memory for this run only");
    }
    bpx::build_engine(config, Arc::new(InMemoryKeyValueStore::default())).await
}

/// 🧹 One residual sweep, with nobody indexing. Because we said so.
pub(crate) fn reconciler_for(
    config: &AppConfig,
    engine: Arc<BatchingEngine>,
    job: Arc<JobFlag>,
) -> Result<Reconciler> {
    let the_transport = bpx::build_transport(config)?;
    Ok(Reconciler::new(
        engine,
        Arc::new(the_transport),
        job,
        Arc::new(TracingNotifier),
        &config.reconciler,
    ))
}

async fn sweep(config: &AppConfig, engine: Arc<BatchingEngine>) -> Result<()> {
    let the_reconciler = reconciler_for(config, engine, Arc::new(JobFlag::new(false)))?;
    match the_reconciler.sweep().await {
        SweepOutcome::Flushed { bytes } => println!("✅ flushed {bytes} leftover bytes"),
        SweepOutcome::Empty => println!("💤 nothing buffered"),
        SweepOutcome::Deferred => println!("🏃 an indexing job is active, sweep deferred"),
        SweepOutcome::Failed(err) => {
            return Err(err).context("💀 the sweep could not complete; the buffer was left in place");
        }
    }
    Ok(())
}

/// 🍽️ The counters, in a table so comfy it has lumbar support.
pub(crate) fn stats_table(stats: &Stats, buffered_bytes: u64) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let the_rows: Vec<(&str, String)> = vec![
        ("buffered bytes", buffered_bytes.to_string()),
        ("handled", stats.total_handled().to_string()),
        ("bulk_body_size", stats.bulk_body_size.to_string()),
        ("mocked", stats.total_mock_requests.to_string()),
        ("stored", stats.total_stored_requests.to_string()),
        ("flushed", stats.total_real_requests.to_string()),
        ("forwarded (buffer full / force_stop)", stats.total_normal_requests.to_string()),
        ("forwarded (oversized)", stats.total_large_requests.to_string()),
        ("cleanup loops", stats.cleanup_loops.to_string()),
        ("force_stop", stats.force_stop.to_string()),
        ("last_url", stats.last_url.clone().unwrap_or_else(|| "-".to_string())),
        (
            "cleanup_error",
            stats.cleanup_error.clone().unwrap_or_else(|| "-".to_string()),
        ),
    ];
    for (label, value) in the_rows {
        table.add_row(vec![
            Cell::new(label).set_alignment(CellAlignment::Right),
            Cell::new(value),
        ]);
    }
    for message in &stats.messages {
        table.add_row(vec![
            Cell::new("message").set_alignment(CellAlignment::Right),
            Cell::new(message),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_subcommands_parse() {
        let the_cli = Cli::try_parse_from([
            "bpx",
            "--config",
            "/etc/bpx.toml",
            "replay",
            "posts.ndjson",
            "--docs-per-request",
            "7",
        ])
        .expect("💀 replay should parse");
        assert_eq!(the_cli.config, PathBuf::from("/etc/bpx.toml"));
        match the_cli.command {
            Command::Replay {
                docs_per_request,
                index,
                ..
            } => {
                assert_eq!(docs_per_request, 7);
                assert!(index.is_none());
            }
            other => panic!("💀 expected replay, got {other:?}"),
        }

        let the_cli = Cli::try_parse_from(["bpx", "force-stop", "on"])
            .expect("💀 force-stop should parse");
        assert!(matches!(
            the_cli.command,
            Command::ForceStop { state: Toggle::On }
        ));
        assert!(Cli::try_parse_from(["bpx", "force-stop", "maybe"]).is_err());
    }

    #[test]
    fn the_one_where_the_table_shows_the_messages() {
        let mut the_stats = Stats::default();
        the_stats.total_mock_requests = 12;
        the_stats.total_large_requests = 30;
        the_stats.messages.push("💀 the disk is full".to_string());
        let the_rendered = stats_table(&the_stats, 4096).to_string();
        assert!(the_rendered.contains("12"));
        assert!(the_rendered.contains("42"), "handled = mocked + oversized");
        assert!(the_rendered.contains("4096"));
        assert!(the_rendered.contains("the disk is full"));
    }
}
