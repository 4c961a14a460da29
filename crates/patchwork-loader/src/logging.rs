use std::{
    panic,
    path::{Path, PathBuf},
};

use color_eyre::config::PanicHook;
use eyre::Result;
use strip_ansi_escapes::Writer;
use tracing::{error, level_filters::LevelFilter};
use tracing_appender::rolling::RollingFileAppender;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::config::Config;

/// Name of the log file written next to the dll
pub const LOG_FILE: &str = "patchwork.log";

const ENV_VAR: &str = "PATCHWORK_LOG";

/// File writer that drops ansi escapes, since color-eyre panic reports carry them
struct StripAnsiWriter {
    dir: PathBuf,
    filename: String,
}

impl StripAnsiWriter {
    fn new(dir: &Path, filename: &str) -> Self {
        Self {
            dir: dir.to_owned(),
            filename: filename.to_owned(),
        }
    }
}

impl<'a> MakeWriter<'a> for StripAnsiWriter {
    type Writer = Writer<RollingFileAppender>;

    fn make_writer(&'a self) -> Self::Writer {
        Writer::new(tracing_appender::rolling::never(&self.dir, &self.filename))
    }
}

/// Directives from [`ENV_VAR`] win over the configured level
fn env_filter(config: &Config) -> Result<EnvFilter> {
    let env = std::env::var(ENV_VAR).ok();
    build_filter(&config.log.level, env.as_deref())
}

fn build_filter(level: &str, env: Option<&str>) -> Result<EnvFilter> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_regex(false)
        .parse(env.unwrap_or(level))?;

    Ok(filter)
}

/// Setup logging for the loader
///
/// Debug builds only log to stdout (the console). Release builds also log to
/// [`LOG_FILE`] inside `dir`.
pub fn setup_logging(dir: &Path, config: &Config) -> Result<()> {
    let env_filter = env_filter(config)?;

    let stdout_layer = tracing_subscriber::fmt::Layer::default()
        .without_time()
        .with_ansi(true)
        .with_target(config.log.targets);

    if cfg!(debug_assertions) {
        Registry::default()
            .with(stdout_layer)
            .with(ErrorLayer::default())
            .with(env_filter)
            .try_init()?;
    } else {
        let log_layer = tracing_subscriber::fmt::Layer::default()
            .with_writer(StripAnsiWriter::new(dir, LOG_FILE))
            .with_ansi(false)
            .with_target(config.log.targets);

        Registry::default()
            .with(stdout_layer)
            .with(log_layer)
            .with(ErrorLayer::default())
            .with(env_filter)
            .try_init()?;
    }

    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default()
        .add_issue_metadata("version", env!("CARGO_PKG_VERSION"))
        .add_issue_metadata("catalog", crate::catalog::CATALOG_VERSION)
        .into_hooks();

    eyre_hook.install()?;
    set_panic_hook(panic_hook);

    Ok(())
}

fn set_panic_hook(hook: PanicHook) {
    // route the eyre panic report through every tracing layer
    panic::set_hook(Box::new(move |info| {
        let panic = hook.panic_report(info);
        error!("{panic}");
    }))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_filter_accepts_config_levels() {
        let filter = build_filter(&Config::default().log.level, None).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));

        assert!(build_filter("patchwork=trace,patchwork_loader=debug", None).is_ok());
    }

    #[test]
    fn test_filter_rejects_garbage() {
        assert!(build_filter("patchwork=notalevel", None).is_err());
    }

    #[test]
    fn test_env_var_overrides_config_level() {
        let filter = build_filter("warn", Some("trace")).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        std::env::set_var(ENV_VAR, "trace");
        let mut config = Config::default();
        config.log.level = "warn".to_owned();
        let filter = env_filter(&config);
        std::env::remove_var(ENV_VAR);

        assert_eq!(filter.unwrap().max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn test_log_file_strips_ansi() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StripAnsiWriter::new(dir.path(), LOG_FILE);

        {
            let mut w = writer.make_writer();
            w.write_all(b"\x1b[31mred\x1b[0m plain\n").unwrap();
            w.flush().unwrap();
        }

        let logged = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        assert_eq!(logged, "red plain\n");
    }
}
