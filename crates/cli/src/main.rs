mod config;
mod error;
mod input;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::thread;

use chrono::Utc;
use clap::{Parser, Subcommand};
use server::{EventServer, Shutdown};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, ConfigError};
use error::Result;

const CONFIG_FILE: &str = "eventd.toml";
const STDOUT_LISTENER: &str = "stdout";
const STDIN_THREAD: &str = "stdin-reader";
const LINE_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "eventd")]
#[command(about = "Persist and fan out device events", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read JSON-lines events from stdin, store and broadcast them
    Run {
        /// Do not echo dispatched events to stdout
        #[arg(short, long)]
        quiet: bool,
    },
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { quiet }) => cmd_run(&cli.config, quiet).await,
        None => cmd_run(&cli.config, false).await,
        Some(Commands::Config) => cmd_config(&cli.config),
    }
}

async fn cmd_run(config_path: &Path, quiet: bool) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    init_logging(&config.log.filter)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        store = %config.event_db.store_type,
        path = %config.event_db.store_path.display(),
        "eventd starting"
    );

    let mut server: EventServer<String> = EventServer::builder(config.event_db.clone())
        .rotation(config.rotation)
        .idle_backoff(config.persistence.idle_backoff())
        .pending_limit(config.persistence.pending_limit)
        .build();

    if !quiet {
        server.register_listener(STDOUT_LISTENER.to_string(), |_, event| {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, event_id = %event.event_id, "failed to encode event"),
            }
        });
    }
    server.start()?;

    // A blocked stdin read cannot be cancelled, so it lives on a plain
    // thread that the runtime never waits for.
    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut line_no = 0u64;

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    // EOF
                    break;
                };
                line_no += 1;
                submit_line(&server, &line?, line_no, Utc::now().timestamp());
            }
            _ = &mut ctrl_c => {
                info!("interrupted, draining queued events");
                break;
            }
        }
    }

    let stats = tokio::task::spawn_blocking(move || -> Result<_> {
        server.shutdown(Shutdown::Drain)?;
        Ok(server.stats())
    })
    .await??;

    eprintln!("{stats}");
    Ok(())
}

/// Forward lines from `reader` until EOF, a read error, or the receiver
/// going away.
fn spawn_line_reader<R>(reader: R) -> Result<mpsc::Receiver<std::io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    thread::Builder::new()
        .name(STDIN_THREAD.to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
            debug!("input reader stopped");
        })?;
    Ok(rx)
}

/// Parse one input line and submit it. Blank and malformed lines are
/// skipped.
fn submit_line(server: &EventServer<String>, line: &str, line_no: u64, now: i64) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    match input::parse_event(line, now) {
        Ok(event) => server.submit(event),
        Err(e) => {
            warn!(line = line_no, error = %e, "skipping malformed event");
            false
        }
    }
}

fn cmd_config(config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

fn init_logging(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| ConfigError::LogFilter(e.to_string()))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
