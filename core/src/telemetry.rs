//! Tracing setup shared by the binaries
//!
//! Logs go to stderr so stdout stays clean for JSON output and the MCP
//! protocol. `RUST_LOG` refines the filter; `LOG_FORMAT=json` switches to
//! structured output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise the global subscriber with `<crate_name>=info` (or `debug`
/// when `verbose`) plus the same level for the engine itself.
pub fn init_tracing(crate_name: &str, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("{}={}", crate_name, level).parse()?)
        .add_directive(format!("macspoof_core={}", level).parse()?);

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}
