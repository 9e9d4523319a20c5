use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,tokio_tungstenite=warn,tungstenite=warn,reqwest=warn";

/// Install the global subscriber for the binary.
///
/// `RUST_LOG` overrides the filter; `LIVE_LOG_FORMAT=json` switches to one
/// JSON object per line for log shippers.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("LIVE_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }
}
