//! Tracing setup: console output plus an optional JSON-lines log file.

use std::path::Path;

use chem_config::Logging;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::cli::FILE_GUARD;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter precedence: `RUST_LOG`, then `--log-level`, then `logging.level`, then info.
fn filter(cli_level: Option<&str>, cfg: Option<&Logging>) -> EnvFilter {
    if let Ok(f) = EnvFilter::try_from_default_env() {
        return f;
    }
    let level = cli_level
        .or_else(|| cfg.and_then(|l| l.level.as_deref()))
        .unwrap_or("info");
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn file_layer(logging: &Logging) -> Option<BoxedLayer> {
    let path = Path::new(logging.file.as_deref()?);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path.file_name()?;
    let appender = match logging.rotation.as_deref() {
        Some("daily") => tracing_appender::rolling::daily(dir, name),
        Some("hourly") => tracing_appender::rolling::hourly(dir, name),
        _ => tracing_appender::rolling::never(dir, name),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);
    // Keep the worker alive for the whole process so buffered lines flush.
    let _ = FILE_GUARD.set(guard);
    Some(fmt::layer().json().with_ansi(false).with_writer(writer).boxed())
}

/// Install the global subscriber. Console logs go to stderr so stdout stays
/// clean for command output. Safe to call more than once; later calls are ignored.
pub fn init(cli_level: Option<&str>, json: bool, cfg: Option<&Logging>) {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }
    if let Some(layer) = cfg.and_then(file_layer) {
        layers.push(layer);
    }
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter(cli_level, cfg))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_beats_config_level() {
        // RUST_LOG may be set by the harness; only check when it is not.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let cfg = Logging {
            level: Some("warn".into()),
            ..Logging::default()
        };
        assert_eq!(filter(Some("debug"), Some(&cfg)).to_string(), "debug");
        assert_eq!(filter(None, Some(&cfg)).to_string(), "warn");
        assert_eq!(filter(None, None).to_string(), "info");
    }
}
