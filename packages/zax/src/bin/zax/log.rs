use tracing_error::ErrorLayer;
use tracing_subscriber::{Layer as _, fmt::MakeWriter, layer::SubscriberExt as _};

/// Build the subscriber used by both the CLI (stderr) and the engine daemon
/// (the append-only `engine.log`). Filtering is controlled by `ZAX_LOG`.
pub fn make_logger<W>(writer: W, ansi: bool) -> impl tracing::Subscriber
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(true)
                .with_writer(writer)
                .with_ansi(ansi)
                .with_filter(
                    tracing_subscriber::EnvFilter::builder()
                        .with_env_var("ZAX_LOG")
                        .from_env_lossy(),
                ),
        )
}
