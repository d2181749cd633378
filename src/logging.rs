use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::fmt;

/// The HTTP and TLS stack warn about every unverified certificate.
const QUIET_TARGETS: [&str; 5] = ["reqwest", "hyper", "hyper_util", "native_tls", "rustls"];

/// Builds the filter: `RUST_LOG` when set, else `info` or `debug`, always
/// with the HTTP/TLS stack silenced.
pub fn filter(debug: bool) -> Result<EnvFilter, ParseError> {
    let base = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| if debug { "debug" } else { "info" }.to_string());

    QUIET_TARGETS
        .iter()
        .try_fold(EnvFilter::try_new(base)?, |filter, target| {
            Ok(filter.add_directive(format!("{}=off", target).parse()?))
        })
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(debug: bool) {
    let filter = filter(debug).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .try_init();
}
