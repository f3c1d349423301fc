//! lwstack - command-line interface for a LoRaWAN network stack.
//!
//! Manages applications, gateways, end devices and their integrations across
//! the Identity, Network, Application and Join Servers, and decodes,
//! encodes and simulates LoRaWAN traffic.

mod cli;
mod commands;
mod context;
mod error;
mod output;
mod signals;
mod tree;
mod version_check;

use clap::ArgMatches;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::Commands;
use context::Context;
use error::{exit_codes, CliError};

#[tokio::main]
async fn main() {
    let matches = cli::command().get_matches();
    let cancel = CancellationToken::new();

    let ctx = match cli::global_args(&matches).and_then(|global| Context::load(&global, cancel.clone())) {
        Ok(ctx) => ctx,
        Err(e) => {
            init_logging("info");
            eprintln!("{}", e.render());
            std::process::exit(exit_codes::GENERAL_ERROR);
        }
    };
    init_logging(&ctx.config.log_level);

    let signals = signals::spawn(cancel);
    let version_check = version_check::spawn(&ctx.config);

    let result = run(&ctx, &matches).await;
    version_check::finish(version_check).await;

    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            eprintln!("{}", e.render());
            std::process::exit(e.exit_code(signals.received()));
        }
    }
}

/// Log to stderr. RUST_LOG takes precedence over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(ctx: &Context, matches: &ArgMatches) -> Result<(), CliError> {
    if let Some((name, sub)) = matches.subcommand() {
        if tree::handles(name) {
            return tree::run(ctx, name, sub).await;
        }
    }
    match cli::fixed_command(matches)? {
        Commands::Login(args) => commands::run_login(ctx, args).await,
        Commands::Logout(args) => commands::run_logout(ctx, args).await,
        Commands::Use(args) => commands::run_use(ctx, args).await,
        Commands::AuthInfo => commands::run_auth_info(ctx).await,
        Commands::Lorawan(command) => commands::run_lorawan(ctx, command).await,
        Commands::Simulate(command) => commands::run_simulate(ctx, command).await,
        Commands::Events(args) => commands::run_events(ctx, args).await,
        Commands::PacketBroker(command) => commands::run_packet_broker(ctx, command).await,
        Commands::Version => commands::run_version(ctx),
    }
}
