use clap::Parser;
use std::path::PathBuf;

/// Import the stories and defects of a Rally iteration as Trello cards.
#[derive(Parser, Debug)]
#[command(
    name = "rally-trello",
    version,
    about = "Import Rally iteration stories and defects into a Trello list",
    long_about = "Import Rally iteration stories and defects into a Trello list.\n\n\
                  Cards that already exist on the board (matched by name) are skipped,\n\
                  so the import can be re-run safely."
)]
pub struct Cli {
    /// Config file (defaults to ./rally-trello.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Rally workspace name
    #[arg(short = 'w', long)]
    pub rally_workspace: Option<String>,

    /// Rally project name
    #[arg(short = 'p', long)]
    pub rally_project: Option<String>,

    /// Rally iteration name (required)
    #[arg(short = 'i', long)]
    pub rally_iteration: Option<String>,

    /// Import defects (off by default)
    #[arg(short = 'd', long)]
    pub rally_defects: bool,

    /// Target Trello board (created if necessary)
    #[arg(short = 'b', long)]
    pub trello_board: Option<String>,

    /// Trello list name (created if necessary, default is "To Do")
    #[arg(short = 'l', long)]
    pub trello_list: Option<String>,

    #[arg(long, env = "RALLY_API_KEY", hide_env_values = true)]
    pub rally_api_key: Option<String>,

    #[arg(long, env = "TRELLO_API_KEY", hide_env_values = true)]
    pub trello_api_key: Option<String>,

    #[arg(long, env = "TRELLO_TOKEN", hide_env_values = true)]
    pub trello_token: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
