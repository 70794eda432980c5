mod api;
mod auth;
mod backup;
mod broadcaster;
mod cli;
mod compose;
mod config;
mod core;
mod db;
mod deploy;
mod error;
mod metrics;
mod output;
mod provision;
mod proxy;
mod reconcile;
mod secrets;
mod ssh;
mod webhooks;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .without_time()
        .init();

    match cli.command {
        Command::Init => cli::init::run().await?,
        Command::Serve => cli::serve::run().await?,
        Command::Server { action } => cli::server::run(action).await?,
        Command::App { action } => cli::app::run(action).await?,
        Command::Env { action } => cli::env::run(action).await?,
        Command::Db { action } => cli::db::run(action).await?,
        Command::Proxy { action } => cli::proxy::run(action).await?,
        Command::Key { action } => cli::key::run(action).await?,
        Command::Webhook { action } => cli::webhook::run(action).await?,
        Command::Ci { action } => cli::ci::run(action).await?,
        Command::Monitor { server, interval } => cli::monitor::run(server, interval).await?,
    }

    Ok(())
}
