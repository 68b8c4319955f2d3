pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "permsync")]
#[command(about = "permsync - Inspect and follow a user's live permission set")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Check whether the user holds the given permission codenames")]
    Check {
        #[arg(long, env = "PERMSYNC_TOKEN", help = "Session token")]
        token: String,

        #[arg(required = true, help = "Permission codenames to check")]
        codenames: Vec<String>,

        #[arg(long, help = "Treat the user as a superuser (every check passes)")]
        superuser: bool,
    },

    #[command(about = "Follow permission changes over the event socket")]
    Watch {
        #[arg(long, env = "PERMSYNC_TOKEN", help = "Session token")]
        token: String,

        #[arg(long, help = "Stop after this many seconds (default: until Ctrl-C)")]
        duration: Option<u64>,
    },

    #[command(about = "List the user's groups, or one group's permissions")]
    Groups {
        #[arg(long, env = "PERMSYNC_TOKEN", help = "Session token")]
        token: String,

        #[arg(help = "Group id")]
        group_id: Option<i64>,
    },

    #[command(about = "Show the effective configuration")]
    Config,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Check { token, codenames, superuser } => {
            commands::check::handle(&token, &codenames, superuser, output_format).await
        }
        Commands::Watch { token, duration } => commands::watch::handle(&token, duration, output_format).await,
        Commands::Groups { token, group_id } => commands::groups::handle(&token, group_id, output_format).await,
        Commands::Config => commands::config::handle(output_format),
    }
}
