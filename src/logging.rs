//! Tracing subscriber setup.
//!
//! `PLANSHARE_LOG` takes precedence over the configured level; both accept
//! `EnvFilter` directives such as `planshare::rewrite=debug,info`.

use crate::config::{LogFormat, LoggingConfig};
use std::env;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `config`.
///
/// Returns false when a global subscriber was already set (for example by a
/// test harness or an earlier call); the existing one is kept.
pub fn init(config: &LoggingConfig) -> bool {
    let level = env::var("PLANSHARE_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.level.clone());

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|e| {
        eprintln!("WARNING: invalid log filter '{level}' ({e}), falling back to 'info'");
        EnvFilter::new("info")
    });

    let base = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = match config.format {
        LogFormat::Json => Box::new(base.json().finish()),
        LogFormat::Text => Box::new(base.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig {
            level: "not a [valid filter".to_string(),
            format: LogFormat::Json,
        };
        init(&config);
        assert!(!init(&LoggingConfig::default()));
    }
}
