use anyhow::{Context, Result};
use log::{Level, LevelFilter, Record};
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Config, Logger, Root},
    encode::{pattern::PatternEncoder, Encode, Write},
    filter::threshold::ThresholdFilter,
};
use std::backtrace::Backtrace;
use std::env;
use std::path::Path;

const LOGGING_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l:<5})} {t} - {m}\n";

/// Pattern encoder for the benchmark's own appenders. `error` records, which
/// mark an aborted workload, get the backtrace of the logging call appended
/// when backtraces were requested through the environment.
#[derive(Debug)]
struct WorkloadEncoder {
    pattern: PatternEncoder,
    error_traces: bool,
}

impl WorkloadEncoder {
    fn new(pattern: &str) -> Self {
        Self::with_traces(pattern, backtraces_requested(|key| env::var(key).ok()))
    }

    fn with_traces(pattern: &str, error_traces: bool) -> Self {
        Self {
            pattern: PatternEncoder::new(pattern),
            error_traces,
        }
    }
}

/// `RUST_LIB_BACKTRACE` takes precedence over `RUST_BACKTRACE`; `0` disables.
fn backtraces_requested(lookup: impl Fn(&str) -> Option<String>) -> bool {
    lookup("RUST_LIB_BACKTRACE")
        .or_else(|| lookup("RUST_BACKTRACE"))
        .is_some_and(|v| v.trim() != "0")
}

impl Encode for WorkloadEncoder {
    fn encode(&self, w: &mut dyn Write, record: &Record<'_>) -> anyhow::Result<()> {
        if !self.error_traces || record.level() != Level::Error {
            return self.pattern.encode(w, record);
        }
        let trace = Backtrace::force_capture();
        self.pattern.encode(
            w,
            &record
                .to_builder()
                .args(format_args!("{}\nbacktrace:\n{trace}", record.args()))
                .build(),
        )
    }
}

/// Install the global logger: stderr at `log_level`, plus everything down to
/// `debug` in `file_path` when one is given.
///
/// Database drivers are capped at `warn`; their per-statement chatter would
/// otherwise drown the benchmark output.
pub fn initialize_logger(log_level: LevelFilter, file_path: Option<&Path>) -> Result<()> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(WorkloadEncoder::new(LOGGING_PATTERN)))
        .build();

    let mut config_builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(log_level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");
    let mut root_level = log_level;

    if let Some(path) = file_path {
        let logfile = FileAppender::builder()
            .encoder(Box::new(WorkloadEncoder::new(LOGGING_PATTERN)))
            .build(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        config_builder =
            config_builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
        root_level = root_level.max(LevelFilter::Debug);
    }

    let config = config_builder
        .logger(Logger::builder().build("mongodb", LevelFilter::Warn))
        .logger(Logger::builder().build("postgres", LevelFilter::Warn))
        .logger(Logger::builder().build("tokio_postgres", LevelFilter::Warn))
        .build(root.build(root_level))
        .context("build logging configuration")?;

    log4rs::init_config(config).context("install logger")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log4rs::encode::writer::simple::SimpleWriter;

    fn render(encoder: &WorkloadEncoder, level: Level, message: &str) -> String {
        let mut out = SimpleWriter(Vec::new());
        encoder
            .encode(
                &mut out,
                &Record::builder()
                    .level(level)
                    .target("bench")
                    .args(format_args!("{message}"))
                    .build(),
            )
            .unwrap();
        String::from_utf8(out.0).unwrap()
    }

    #[test]
    fn errors_carry_a_backtrace_when_requested() {
        let encoder = WorkloadEncoder::with_traces("{l} {m}", true);
        let out = render(&encoder, Level::Error, "crud failed");
        assert!(out.starts_with("ERROR crud failed\nbacktrace:\n"), "{out}");
        assert_eq!(render(&encoder, Level::Warn, "slow"), "WARN slow");
    }

    #[test]
    fn errors_stay_plain_without_traces() {
        let encoder = WorkloadEncoder::with_traces("{l} {m}", false);
        assert_eq!(render(&encoder, Level::Error, "crud failed"), "ERROR crud failed");
    }

    fn vars(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn backtrace_request_follows_environment_conventions() {
        assert!(!backtraces_requested(vars(&[])));
        assert!(backtraces_requested(vars(&[("RUST_BACKTRACE", "1")])));
        assert!(backtraces_requested(vars(&[("RUST_BACKTRACE", "full")])));
        assert!(!backtraces_requested(vars(&[("RUST_BACKTRACE", "0")])));
        assert!(!backtraces_requested(vars(&[
            ("RUST_BACKTRACE", "1"),
            ("RUST_LIB_BACKTRACE", "0")
        ])));
    }
}
