//! Log output for the `rebuild` binary.
//!
//! Everything is written to stderr: stdout carries the branch and matrix
//! JSON that workflow steps capture.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `level` applies unless `RUST_LOG` is set. With `json` every event is one
/// JSON object per line, which keeps the `job`/`repo`/`attempt` fields
/// machine-readable in CI logs. Later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
