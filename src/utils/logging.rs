use std::{path::Path, sync::LazyLock};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log file prefix of short-lived commands.
pub const CLI_PREFIX: &str = "cli";
/// Log file prefix of `serve`, so daemon history isn't interleaved with one-off commands.
pub const DAEMON_PREFIX: &str = "daemon";

const DEFAULT_LEVEL: LevelFilter = LevelFilter::INFO;
const KEPT_LOG_FILES: usize = 5;

/// Installs the global subscriber. Everything goes to a daily file under `log_dir`; `show_std`
/// additionally prints human readable output to the console.
pub fn enable_logging(
    prefix: &str,
    log_dir: &Path,
    log_level: Option<LevelFilter>,
    show_std: bool,
) -> Result<()> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(KEPT_LOG_FILES)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(log_dir)?;

    let filter = EnvFilter::try_new(filter_directive(
        log_level,
        std::env::var("RUST_LOG").ok(),
    ))?;
    let file = fmt::layer()
        .with_writer(appender)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);
    let console = show_std.then(|| fmt::layer().pretty().with_writer(std::io::stdout));

    tracing_subscriber::registry()
        .with(filter)
        .with(file)
        .with(console)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger {e}"))?;
    Ok(())
}

/// An explicit level wins and applies to this crate only. `RUST_LOG` may be a bare level, also
/// scoped to this crate, or a full directive list that is used as is.
fn filter_directive(log_level: Option<LevelFilter>, rust_log: Option<String>) -> String {
    let crate_name = env!("CARGO_PKG_NAME").replace('-', "_");
    match (log_level, rust_log) {
        (Some(level), _) => format!("{crate_name}={level}"),
        (None, Some(env)) if env.contains('=') => env,
        (None, Some(env)) if !env.trim().is_empty() => format!("{crate_name}={}", env.trim()),
        _ => format!("{crate_name}={DEFAULT_LEVEL}"),
    }
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .try_init();
});
