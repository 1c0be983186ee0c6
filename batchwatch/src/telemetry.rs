//! Tracing initialisation.
//!
//! Log output goes to stderr through the fmt layer, filtered by `RUST_LOG` (default `info`),
//! so rendered progress on stdout is never interleaved with log lines.
//!
//! ```bash
//! RUST_LOG=batchwatch=debug batchwatch watch 5f1c...
//! ```

use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing with an env-filtered fmt layer.
///
/// Parameters:
/// - `ansi`: whether to emit ANSI colour codes (disable when stderr is not a terminal)
pub fn init_telemetry(ansi: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(false),
        )
        .try_init()?;

    debug!("Telemetry initialized");

    Ok(())
}
