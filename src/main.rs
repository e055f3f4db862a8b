//! thuis CLI - download VRT MAX episodes and whole seasons

mod cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use thuis::batch::RunOptions;
use thuis::config::Settings;

#[derive(Parser, Debug)]
#[allow(clippy::struct_excessive_bools)]
#[command(name = "thuis")]
#[command(about = "Download VRT MAX episodes, trailers and whole seasons")]
#[command(version)]
struct Cli {
    /// Episode, trailer or season URL
    url: Option<String>,

    /// Output file (.mp4, single episode) or directory
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Skip episodes numbered below EPISODE
    #[arg(short, long, value_name = "EPISODE")]
    start: Option<u32>,

    /// Download again even if the file exists
    #[arg(short, long)]
    force: bool,

    /// Run the browser with a visible window
    #[arg(long, visible_alias = "no-headless")]
    show_browser: bool,

    /// Override the stored username
    #[arg(short, long, value_name = "EMAIL")]
    username: Option<String>,

    /// Override the stored password
    #[arg(short, long, value_name = "PASSWORD")]
    password: Option<String>,

    /// Store credentials interactively and exit
    #[arg(long)]
    setup: bool,

    /// Alternate config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "thuis=debug" } else { "thuis=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run(cli: Cli) -> Result<bool> {
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    if cli.setup {
        cmd::cmd_setup(&settings)?;
        return Ok(true);
    }

    let Some(url) = cli.url else {
        anyhow::bail!("No URL given. Usage: thuis [OPTIONS] <URL>, or thuis --setup");
    };

    let args = cmd::DownloadArgs {
        options: RunOptions {
            start_episode: cli.start,
            force: cli.force,
            output: cli.output,
        },
        username: cli.username,
        password: cli.password,
        show_browser: cli.show_browser,
    };
    cmd::cmd_download(&url, args, settings).await
}
