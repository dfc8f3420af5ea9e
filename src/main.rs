use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gitrunner::cli::{self, Cli};
use gitrunner::core::config::Config;

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug() {
        "gitrunner=debug"
    } else {
        "gitrunner=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    match cli::execute(cli.command, config) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    }
}
