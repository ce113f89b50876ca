//! The binary entrypoint for `zax`, the incremental check runner.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::util::SubscriberInitExt;

// Since this is a binary crate, we need to ensure these modules aren't pub
// so that they can correctly warn about dead code:
// https://github.com/rust-lang/rust/issues/74970
//
// Relatedly, in this file specifically nothing should be `pub`.
mod cmd;
mod log;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "zax",
    about = "Run tests and lints, reporting only what regressed since the last run",
    version,
    disable_version_flag = true
)]
struct TopLevelFlags {
    #[command(subcommand)]
    command: Command,

    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version, global = true)]
    version: Option<bool>,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Run the checks for the current workspace
    Check(cmd::check::Options),

    /// Run the engine daemon for a workspace cache directory
    ///
    /// This is an internal command used by `check` to start the daemon, and
    /// end users generally shouldn't need to run it.
    #[clap(hide(true))]
    Engine(cmd::engine::Options),
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = color_eyre::install() {
        eprintln!("Error: {err:#}");
        return ExitCode::FAILURE;
    }
    let top = TopLevelFlags::parse();

    let result = match top.command {
        Command::Check(opts) => {
            log::make_logger(std::io::stderr, true).init();
            cmd::check::exec(opts).await
        }
        Command::Engine(opts) => {
            // Note that in engine mode we do not initialize the stderr
            // logger: the daemon logs to a file inside the cache directory,
            // set up inside the command once the directory is known.
            cmd::engine::exec(opts).await.map(|()| 0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
