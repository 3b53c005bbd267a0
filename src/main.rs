use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use llama_relay::client::{recover_status, RelayClient};
use llama_relay::coordinator;
use llama_relay::logger::{parse_level, setup_logging, LogTarget};
use llama_relay_db::config::DEFAULT_LISTEN_ADDR;
use llama_relay_db::Database;
use llama_relay_types::{encode_line, StatusRecord};

const DEFAULT_DB_PATH: &str = "assets/llama_relay.db";

#[derive(Parser)]
#[command(name = "llama_relay", version, about = "Keep one inference resource loaded and relay jobs to it")]
struct Cli {
    /// SQLite database holding status and configuration
    #[arg(long, global = true, default_value = DEFAULT_DB_PATH)]
    db_path: String,

    /// Coordinator address (defaults to the configured listen address)
    #[arg(long, global = true)]
    addr: Option<String>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator
    Serve {
        /// Resource to load on request
        #[arg(long)]
        resource: Option<String>,
        /// Characters that end an output chunk (empty restores the defaults)
        #[arg(long)]
        boundary_chars: Option<String>,
        /// Reject a job that has not finished after this many seconds (0 disables)
        #[arg(long)]
        job_timeout_secs: Option<u64>,
    },
    /// Run as the resource host (spawned by the coordinator)
    #[command(hide = true)]
    Worker,
    /// Print the last persisted status without contacting the coordinator
    Status,
    /// Check that the coordinator answers
    Ping,
    /// Load the resource and wait until it is ready
    Load,
    /// Run one job and print its output
    Ask { input: String },
    /// Print broadcast events as they arrive
    Watch,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = parse_level(&cli.log_level);

    // The resource host runs its own threads and must not start a runtime;
    // its stdout is reserved for IPC.
    if let Commands::Worker = cli.command {
        if let Err(e) = setup_logging(LogTarget::StderrOnly, level) {
            eprintln!("Failed to set up logging: {e}");
        }
        llama_relay_worker::run_worker(&cli.db_path);
        return Ok(());
    }

    if let Err(e) = setup_logging(LogTarget::ConsoleAndFile, level) {
        eprintln!("Failed to set up logging: {e}");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve {
            resource,
            boundary_chars,
            job_timeout_secs,
        } => {
            if let Some(parent) = Path::new(&cli.db_path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let db = Arc::new(Database::new(&cli.db_path).map_err(|e| anyhow!(e))?);

            let mut config = db.load_config();
            if let Some(resource) = resource {
                config.resource_locator = resource;
            }
            if let Some(chars) = boundary_chars {
                config.boundary_chars = Some(chars).filter(|c| !c.is_empty());
            }
            if let Some(secs) = job_timeout_secs {
                config.job_timeout_secs = Some(secs).filter(|s| *s > 0);
            }
            if let Some(addr) = cli.addr {
                config.listen_addr = addr;
            }
            // The resource host reads the same row for its boundary set.
            db.save_config(&config).map_err(|e| anyhow!(e))?;

            coordinator::run(db, &cli.db_path, config)
                .await
                .map_err(|e| anyhow!(e))
        }
        Commands::Worker => Err(anyhow!("worker mode cannot run inside the coordinator runtime")),
        Commands::Status => {
            let record = recover_status(&cli.db_path).map_err(|e| anyhow!(e))?;
            println!("{}", describe(&record));
            Ok(())
        }
        Commands::Ping => {
            let mut client = connect(&cli).await?;
            client.ping().await?;
            println!("ok");
            Ok(())
        }
        Commands::Load => {
            let mut client = connect(&cli).await?;
            let record = client.load(|r| eprintln!("{}", describe(r))).await?;
            println!("{}", describe(&record));
            Ok(())
        }
        Commands::Ask { ref input } => {
            let mut client = connect(&cli).await?;
            let output = client
                .submit(input, |chunk| {
                    eprint!("{chunk}");
                    let _ = std::io::stderr().flush();
                })
                .await?;
            eprintln!();
            println!("{output}");
            Ok(())
        }
        Commands::Watch => {
            let mut client = connect(&cli).await?;
            loop {
                let event = client.next_event().await?;
                println!("{}", encode_line(&event)?);
            }
        }
    }
}

/// The coordinator address: `--addr`, else the configured one, else the default.
fn coordinator_addr(cli: &Cli) -> String {
    if let Some(addr) = &cli.addr {
        return addr.clone();
    }
    match Database::open_read_only(&cli.db_path) {
        Ok(db) => db.load_config().listen_addr,
        Err(_) => DEFAULT_LISTEN_ADDR.to_string(),
    }
}

async fn connect(cli: &Cli) -> anyhow::Result<RelayClient> {
    let addr = coordinator_addr(cli);
    RelayClient::connect(&addr)
        .await
        .with_context(|| format!("Cannot reach coordinator at {addr}"))
}

fn describe(record: &StatusRecord) -> String {
    let mut line = record.status.to_string();
    if let Some(percent) = record.progress_percent {
        line.push_str(&format!(" ({percent}%)"));
    }
    if let Some(detail) = &record.detail_message {
        line.push_str(&format!(": {detail}"));
    }
    line
}
