use clap::ValueEnum;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "kebab_case")]
pub enum DiagnosticFormat {
    Pretty,
    Full,
    Compact,
    Json,
}

pub struct LoggingConfig<'a> {
    pub log_dir: Option<PathBuf>,
    pub filter_env_var: &'a str,
    pub default_filter: &'a str,
    pub diag_format: DiagnosticFormat,
}

impl<'a> LoggingConfig<'a> {
    /// Install the global subscriber.
    ///
    /// stdout carries the filter protocol, so diagnostics go to stderr
    /// unless a log directory was given. The returned guard must be
    /// held until exit so that buffered file output is flushed.
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let (log_writer, guard) = if let Some(log_dir) = &self.log_dir {
            let file_appender = tracing_appender::rolling::hourly(log_dir, "log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        } else {
            (BoxMakeWriter::new(std::io::stderr), None)
        };

        let layer = fmt::layer()
            .with_ansi(self.log_dir.is_none())
            .with_writer(log_writer);
        let layer = match self.diag_format {
            DiagnosticFormat::Pretty => layer.pretty().boxed(),
            DiagnosticFormat::Full => layer.boxed(),
            DiagnosticFormat::Compact => layer.compact().boxed(),
            DiagnosticFormat::Json => layer.json().boxed(),
        };

        let env_filter = EnvFilter::try_new(
            std::env::var(self.filter_env_var)
                .as_deref()
                .unwrap_or(self.default_filter),
        )?;

        tracing_subscriber::registry()
            .with(layer.with_filter(env_filter))
            .try_init()?;

        Ok(guard)
    }
}
