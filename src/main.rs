mod cli;
mod config;
mod model;
mod providers;
mod sync;
mod util;

use anyhow::Result;
use clap::{CommandFactory, Parser};

use cli::Cli;
use config::ConfigError;
use providers::rally::RallyProvider;
use providers::trello::TrelloProvider;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    // Load config and let the command line override it
    let mut config = config::load_config(cli.config.as_deref())?;
    config.apply_overrides(&cli);

    let settings = match config.validate() {
        Ok(settings) => settings,
        Err(ConfigError::Missing(missing)) => {
            for message in &missing {
                eprintln!("{message}");
            }
            eprintln!();
            eprintln!("{}", Cli::command().render_help());
            std::process::exit(1);
        }
    };

    let rally = RallyProvider::connect(&settings.rally).await?;
    let trello = TrelloProvider::new(&settings.trello);

    let report = sync::run(&rally, &trello, &settings).await?;
    println!(
        "Imported {} card(s), skipped {} existing",
        report.created.len(),
        report.skipped.len()
    );

    Ok(())
}
