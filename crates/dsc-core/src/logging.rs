use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing/logging system.
///
/// Sets up a console layer (ANSI or JSON) and an optional daily rolling file layer.
pub fn init_logging(log_level: &str, log_file: Option<&Path>, structured: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let file_appender = log_file.map(|log_path| {
        let dir = log_path.parent().unwrap_or(Path::new("."));
        let filename = log_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "discovery.log".to_string());
        rolling::daily(dir, filename)
    });

    if structured {
        // JSON structured logging to stderr
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        let file_layer = file_appender.map(|appender| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(appender)
                .with_target(true)
                .with_ansi(false)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .init();
    } else {
        // Human-readable console logging
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(true);
        let file_layer = file_appender.map(|appender| {
            tracing_subscriber::fmt::layer()
                .with_writer(appender)
                .with_target(true)
                .with_ansi(false)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .init();
    }
}

#[cfg(test)]
mod tests {
    // The subscriber is global state and can only be installed once per
    // process, so only the signature is checked here.
    use super::*;

    #[test]
    fn init_logging_compiles() {
        let _ = init_logging as fn(&str, Option<&Path>, bool);
    }
}
