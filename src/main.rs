//! spe_ed server binary.
//!
//! Wires the token gate, pseudonym service, bot registry, matchmaker and
//! HTTP surface together and serves until killed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use spe_ed_server::bot::BotRegistry;
use spe_ed_server::game::engine::MatchConfig;
use spe_ed_server::network::auth::TokenGate;
use spe_ed_server::network::matchmaker::Matchmaker;
use spe_ed_server::network::server::{router, AppState};
use spe_ed_server::pseudonym::Pseudonyms;
use spe_ed_server::PLAYERS_PER_GAME;

#[derive(Debug, Parser)]
#[command(about = "Server for the game spe_ed")]
struct Args {
    /// Address of the server.
    #[arg(long, default_value = "localhost:10101")]
    address: String,

    /// Waiting time for new games before bots fill the lobby. 0s starts
    /// games instantly (useful for debugging).
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    wait: Duration,

    /// Disables logging of games.
    #[arg(long)]
    disable_logging: bool,

    /// Disables the time endpoint.
    #[arg(long)]
    disable_time: bool,

    /// Enables stats on /spe_ed_stats.
    #[arg(long)]
    stats: bool,

    /// Path to the API key file.
    #[arg(long, default_value = "./keys")]
    keyfile: PathBuf,

    /// Path to the pseudonym file. Will be created if non-existing.
    #[arg(long, default_value = "./pseudonyms")]
    pseudonymfile: PathBuf,

    /// Comma separated list of bots for the lobby pool. Must name at least
    /// PLAYERS_PER_GAME entries (repetitions allowed).
    #[arg(long)]
    ais: Option<String>,

    /// Lists all bot names and exits.
    #[arg(long)]
    listais: bool,

    /// If set, logging goes to this file instead of stdout.
    #[arg(long)]
    logfile: Option<PathBuf>,
}

const LOG_DIR: &str = "./log";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match &args.logfile {
        None => tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init(),
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .expect("opening log file");
            tracing_subscriber::fmt()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
    }

    let registry = Arc::new(BotRegistry::with_builtins());

    if args.listais {
        for name in registry.names() {
            println!("{name}");
        }
        return;
    }

    if let Some(ais) = &args.ais {
        let names: Vec<String> = ais.split(',').map(|s| s.trim().to_string()).collect();
        registry
            .update_pool(&names)
            .expect("invalid --ais bot pool");
    }

    let pseudonyms = Arc::new(
        Pseudonyms::load_or_create(&args.pseudonymfile).expect("loading pseudonym file"),
    );
    pseudonyms.spawn_worker();

    let gate = Arc::new(TokenGate::from_file(&args.keyfile).expect("loading key file"));

    if !args.disable_logging {
        std::fs::create_dir_all(LOG_DIR).expect("creating log directory");
    }

    let stats = args.stats.then(|| spe_ed_server::stats::spawn(args.wait));

    let match_config = MatchConfig {
        log_dir: PathBuf::from(LOG_DIR),
        disable_logging: args.disable_logging,
        ..Default::default()
    };
    let matchmaker = Arc::new(Matchmaker::new(
        registry.clone(),
        pseudonyms.clone(),
        stats.clone(),
        match_config,
        args.wait,
    ));
    matchmaker.spawn_wait_ticker();

    let app = AppState {
        gate,
        matchmaker,
        pseudonyms,
        stats,
    };

    info!(
        address = %args.address,
        wait = ?args.wait,
        pool = registry.pool_len(),
        max_players = PLAYERS_PER_GAME,
        "spe_ed server starting"
    );

    let listener = tokio::net::TcpListener::bind(&args.address)
        .await
        .expect("binding server address");
    axum::serve(listener, router(app, args.disable_time, args.stats))
        .await
        .expect("serving");
}
