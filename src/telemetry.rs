//! Tracing subscriber setup.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset. Kept at `warn` so log lines do
/// not tear through the progress bars.
const DEFAULT_FILTER: &str = "onboard=warn,onboard_common=warn";
const VERBOSE_FILTER: &str = "onboard=debug,onboard_common=debug";

/// Install the global subscriber, writing to stderr. `RUST_LOG` always wins
/// over `verbose`.
pub fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
