//! The hidden `engine` subcommand: the daemon process itself.

use std::path::PathBuf;

use clap::Args;
use color_eyre::{Result, eyre::Context};
use tracing::warn;
use tracing_subscriber::util::SubscriberInitExt as _;

use zax::{cache::CacheDir, daemon, path::AbsDirPath};

use crate::log;

#[derive(Clone, Args, Debug)]
pub struct Options {
    /// The per-workspace cache directory to serve.
    #[arg(long)]
    cache_dir: PathBuf,
}

pub async fn exec(options: Options) -> Result<()> {
    let root = AbsDirPath::try_from(options.cache_dir).context("parse cache directory")?;
    let cache = CacheDir::at(root);

    // Redirect logging into the cache's log file before any daemon work.
    // The invoking terminal may exit at any time, which closes our inherited
    // stdio; writing there afterwards would take down the daemon with a
    // SIGPIPE.
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(cache.log_file().as_std_path())
        .with_context(|| format!("open engine log {}", cache.log_file()))?;
    log::make_logger(log_file, false).init();

    // Terminal exits also deliver SIGHUP; the daemon outlives its terminal.
    #[cfg(unix)]
    unsafe {
        signal_hook::low_level::register(signal_hook::consts::SIGHUP, || {
            // Logging from a signal handler is unsafe; ignoring is enough.
        })
        .context("register SIGHUP handler")?;
    }

    if let Err(err) = daemon::serve(cache).await {
        warn!(?err, "engine exited with error");
        return Err(err);
    }
    Ok(())
}
