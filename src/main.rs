use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};
use tracing::Level;

use frogbot::commands;
use frogbot::logging::{LogFormat, init_tracing};

#[derive(Parser)]
#[command(name = "frogbot")]
#[command(version, about = "Scans pull requests and repositories with JFrog Xray")]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let matches = Cli::command()
        .subcommands(commands::clap_subcommands())
        .get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.log_format, level);

    let name = matches
        .subcommand_name()
        .context("No command given")?;
    let registration =
        commands::lookup(name).with_context(|| format!("Unknown command '{}'", name))?;

    let command = (registration.build)();
    frogbot::exec(command.as_ref(), registration.name).await?;
    Ok(())
}
