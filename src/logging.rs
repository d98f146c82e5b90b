//! Logging setup: console output plus the migration journal.
//!
//! The console layer is plain text or JSON. When a journal is given, every
//! event is also written to it as `YYYY-MM-DD HH:MM:SS - LEVEL - message`.

use crate::config::{GeneralConfig, LogFormat};
use crate::journal::{level_name, Journal, TIMESTAMP_FORMAT};
use anyhow::Result;
use chrono::Local;
use std::io;
use std::sync::Arc;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Journal line layout for diagnostic events
pub struct JournalFormat;

impl<S, N> FormatEvent<S, N> for JournalFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        write!(
            writer,
            "{} - {} - ",
            Local::now().format(TIMESTAMP_FORMAT),
            level_name(*event.metadata().level())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter directive for the run: `verbose` wins over the configured level
pub fn level_directive(general: &GeneralConfig, verbose: bool) -> &str {
    if verbose {
        "debug"
    } else {
        general.log_level.as_str()
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(general: &GeneralConfig, verbose: bool, journal: Option<Arc<Journal>>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level_directive(general, verbose)))?;

    let console = match general.log_format {
        LogFormat::Text => fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(io::stderr).boxed(),
    };

    let journal_layer = journal.map(|journal| {
        fmt::layer()
            .with_ansi(false)
            .event_format(JournalFormat)
            .with_writer(journal)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(journal_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalMode;
    use tempfile::TempDir;

    #[test]
    fn test_level_directive() {
        let mut general = GeneralConfig::default();
        assert_eq!(level_directive(&general, false), "info");
        assert_eq!(level_directive(&general, true), "debug");
        general.log_level = "warn".into();
        assert_eq!(level_directive(&general, false), "warn");
    }

    #[test]
    fn test_journal_receives_events() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::open(dir.path().join("j.log"), JournalMode::Truncate).unwrap());

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_ansi(false)
                .event_format(JournalFormat)
                .with_writer(journal.clone()),
        );
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("disk almost full");
        });

        let text = std::fs::read_to_string(journal.path()).unwrap();
        assert!(text.trim_end().ends_with(" - WARNING - disk almost full"));
    }
}
