//! autoft: automatic FT8 caller for WSJT-X, plus its console and tools.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::net::UdpSocket;
use tracing::{error, info};

use autoft_core::config::{self, Config};
use autoft_core::repo::Repository;
use autoft_core::selector::build_selector;
use autoft_core::sequencer::Sequencer;
use autoft_core::status::SessionStatus;
use autoft_core::types::{timestamp, Result};

mod console;
mod db;
mod decoder;
mod logging;
mod monitor;
mod scheduler;

use db::SqliteRepository;

#[derive(Parser)]
#[command(name = "autoft", version, about = "Automatic FT8 caller for WSJT-X")]
struct Cli {
    /// Config file (default ~/.autoft/config.yaml)
    #[arg(long, global = true, env = "AUTOFT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the config
    #[arg(long, global = true, env = "AUTOFT_DB")]
    db_path: Option<String>,

    /// Bind address for both UDP ports, overrides the config
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: WSJT-X listener, transmit scheduler, console monitor
    Run,

    /// Interactive console for a running daemon
    Ctl,

    /// List recently heard stations
    Calls {
        /// Look back this many seconds
        #[arg(long, default_value = "900")]
        since: i64,

        /// Only stations calling CQ
        #[arg(long)]
        cq: bool,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// List stations we have called
    Attempts {
        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Delete unlogged attempts older than the cooldown
    Purge {
        /// Cooldown in seconds, overrides the config
        #[arg(long)]
        cooldown: Option<i64>,

        /// Compact the database afterwards
        #[arg(long)]
        vacuum: bool,
    },

    /// Show database statistics
    Stats,

    /// Show the effective configuration
    Config {
        /// Write the defaults to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let result = match load(&cli) {
        Ok(cfg) => match cli.command {
            Commands::Run => cmd_run(cfg).await,
            Commands::Ctl => cmd_ctl(cfg).await,
            Commands::Calls { since, cq, json } => cmd_calls(&cfg, since, cq, json),
            Commands::Attempts { json } => cmd_attempts(&cfg, json),
            Commands::Purge { cooldown, vacuum } => cmd_purge(&cfg, cooldown, vacuum),
            Commands::Stats => cmd_stats(&cfg),
            Commands::Config { init } => cmd_config(&cfg, cli.config.as_deref(), init),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Config file plus command-line overrides, validated.
fn load(cli: &Cli) -> Result<Config> {
    let mut cfg = config::load_config(cli.config.as_deref())?;
    if let Some(path) = &cli.db_path {
        cfg.database.path = path.clone();
    }
    if let Some(bind) = &cli.bind {
        cfg.network.bind = bind.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn open_repo(cfg: &Config) -> Result<Arc<SqliteRepository>> {
    Ok(Arc::new(SqliteRepository::open(&cfg.database.path)?))
}

async fn cmd_run(cfg: Config) -> Result<()> {
    let repo = open_repo(&cfg)?;
    let status = Arc::new(SessionStatus::new(repo.clone(), cfg.sequencer.max_tries));
    let my_call = cfg.my_call()?;

    let sequencer = Sequencer::new(build_selector(&cfg.selector)?, &my_call)
        .with_window(cfg.sequencer.window)
        .with_cooldown(cfg.sequencer.cooldown);
    let decoder = decoder::Decoder::new(
        status.clone(),
        &my_call,
        Some(cfg.home()?),
        cfg.sequencer.cq_directives.clone(),
    );
    let scheduler =
        scheduler::Scheduler::new(status.clone(), sequencer, cfg.sequencer.offsets.clone());
    let monitor = monitor::Monitor::new(status.clone());

    let wsjtx_addr = cfg.wsjtx_addr()?;
    let wsjtx_sock = UdpSocket::bind(wsjtx_addr).await?;
    let tx_sock = UdpSocket::bind(SocketAddr::new(wsjtx_addr.ip(), 0)).await?;
    let console_sock = UdpSocket::bind(cfg.console_addr()?).await?;

    info!(
        call = %my_call,
        grid = %cfg.station.grid,
        selector = %cfg.selector.name,
        wsjtx = %wsjtx_addr,
        console = %console_sock.local_addr()?,
        db = %cfg.database.path,
        "autoft starting"
    );

    let decoder_task = tokio::spawn(decoder::run(wsjtx_sock, decoder));
    let scheduler_task = tokio::spawn(scheduler::run(tx_sock, scheduler));
    let monitor_task = tokio::spawn(monitor::run(console_sock, monitor));

    let signal_status = status.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt, shutting down");
            signal_status.request_shutdown();
        }
    });

    let (d, s, m) = tokio::join!(decoder_task, scheduler_task, monitor_task);
    for (name, joined) in [("decoder", d), ("scheduler", s), ("monitor", m)] {
        if let Err(e) = joined {
            error!(task = name, error = %e, "task failed");
        }
    }
    info!(status = %status, "autoft stopped");
    Ok(())
}

async fn cmd_ctl(cfg: Config) -> Result<()> {
    let repo = open_repo(&cfg)?;
    let server = cfg.console_addr()?;
    let socket = UdpSocket::bind(SocketAddr::new(server.ip(), 0)).await?;
    println!("** Connected to {server}, type help for commands");
    console::run(console::Console::new(
        socket,
        server,
        repo,
        cfg.sequencer.cooldown,
    ))
    .await
}

fn cmd_calls(cfg: &Config, since: i64, cq_only: bool, json: bool) -> Result<()> {
    let repo = open_repo(cfg)?;
    let calls: Vec<_> = repo
        .recent_calls(timestamp() - since)?
        .into_iter()
        .filter(|c| !cq_only || c.is_cq())
        .collect();

    if json {
        println!("{}", to_json(&calls)?);
        return Ok(());
    }

    println!();
    println!("Heard in the last {since}s: {}", calls.len());
    if calls.is_empty() {
        return Ok(());
    }
    println!();

    let mut table = Table::new();
    table.set_header(vec![
        "Call", "To", "Kind", "Grid", "Dist (km)", "Az", "SNR", "DF", "Coef", "Message",
    ]);
    for c in &calls {
        table.add_row(vec![
            Cell::new(&c.call),
            Cell::new(&c.to),
            Cell::new(c.kind),
            Cell::new(c.grid.as_deref().unwrap_or("-")),
            Cell::new(c.distance.map_or("-".into(), |d| format!("{d:.0}"))),
            Cell::new(c.direction.map_or("-".into(), |d| format!("{d:.0}"))),
            Cell::new(c.snr),
            Cell::new(c.delta_frequency),
            Cell::new(format!("{:.0}", c.coefficient())),
            Cell::new(&c.message),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn cmd_attempts(cfg: &Config, json: bool) -> Result<()> {
    let repo = open_repo(cfg)?;
    let attempts = repo.attempts()?;

    if json {
        println!("{}", to_json(&attempts)?);
        return Ok(());
    }

    println!();
    println!("Attempts: {}", attempts.len());
    if attempts.is_empty() {
        return Ok(());
    }
    println!();

    let mut table = Table::new();
    table.set_header(vec!["Call", "Time (UTC)", "Logged"]);
    for a in &attempts {
        let when = chrono::DateTime::from_timestamp(a.time, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| a.time.to_string());
        table.add_row(vec![
            Cell::new(&a.call),
            Cell::new(when),
            Cell::new(if a.logged { "yes" } else { "no" }),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn cmd_purge(cfg: &Config, cooldown: Option<i64>, vacuum: bool) -> Result<()> {
    let repo = open_repo(cfg)?;
    let cooldown = cooldown.unwrap_or(cfg.sequencer.cooldown);
    let n = repo.purge_attempts(timestamp() - cooldown)?;
    println!("Purged {n} unlogged attempts older than {cooldown}s");
    if vacuum {
        repo.vacuum()?;
        println!("Database compacted");
    }
    Ok(())
}

fn cmd_stats(cfg: &Config) -> Result<()> {
    let repo = open_repo(cfg)?;
    let stats = repo.stats()?;
    let last = stats
        .last_heard
        .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".into());

    println!();
    println!("Database: {}", cfg.database.path);
    println!();
    println!("  Calls:      {}", stats.calls);
    println!("  CQ calls:   {}", stats.cq_calls);
    println!("  Attempts:   {}", stats.attempts);
    println!("  Logged:     {}", stats.logged);
    println!("  Last heard: {last}");
    println!();
    Ok(())
}

fn cmd_config(cfg: &Config, path: Option<&std::path::Path>, init: bool) -> Result<()> {
    if init {
        let written = config::save_config(&Config::default(), path)?;
        println!("Wrote defaults to {}", written.display());
        return Ok(());
    }
    print!("{}", config::serialize_config(cfg));
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| autoft_core::types::AutoftError::Repository(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
