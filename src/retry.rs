//! # Retry Coordinator
//!
//! Rielabora i file segnati FAILED nel journal di una run precedente.
//!
//! ## Flusso:
//! 1. `RetryPlan::prepare`: legge fallimenti e radici sorgente/destinazione,
//!    senza toccare il journal. Se il journal corrente non ha righe per file
//!    (retry interrotto prima di iniziare) legge `<nome>.prev`
//! 2. `RetryPlan::open_journal`: ruota il journal letto in `<nome>.prev` e ne
//!    apre uno nuovo per questa run
//! 3. `RetryCoordinator::retry`: stessi worker della migrazione, senza il
//!    controllo di idempotenza

use crate::journal::{Journal, JournalMode, JournalRoots};
use crate::migration::{MigrationEngine, ProcessMode};
use crate::progress::MigrationStats;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// What a previous run left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPlan {
    /// Journal the failures were read from
    pub read_from: Option<PathBuf>,
    pub failures: Vec<PathBuf>,
    pub roots: JournalRoots,
}

impl RetryPlan {
    /// Read the failures and roots left at `journal_path`, without changing it
    pub fn prepare(journal_path: &Path) -> Result<Self> {
        let rotated = Journal::rotated_path(journal_path);
        let read_from = if Journal::has_file_lines(journal_path)? {
            journal_path.to_path_buf()
        } else if rotated.is_file() {
            info!(
                "{} has no file lines, reading {}",
                journal_path.display(),
                rotated.display()
            );
            rotated
        } else if journal_path.is_file() {
            journal_path.to_path_buf()
        } else {
            info!("No journal at {}, nothing to retry", journal_path.display());
            return Ok(Self::default());
        };

        let failures = Journal::read_failures(&read_from)
            .with_context(|| format!("Cannot read failures from {}", read_from.display()))?;
        let roots = Journal::read_roots(&read_from)?;
        info!("Found {} failed files in {}", failures.len(), read_from.display());

        Ok(Self {
            read_from: Some(read_from),
            failures,
            roots,
        })
    }

    /// Fresh journal for the retry run at `journal_path`.
    ///
    /// The journal the plan was read from is kept as `<journal>.prev`; an
    /// existing `.prev` is only replaced when the plan did not come from it.
    pub fn open_journal(&self, journal_path: &Path) -> Result<Journal> {
        if self.read_from.as_deref() == Some(journal_path) {
            if let Some(previous) = Journal::rotate(journal_path)? {
                info!("Previous journal kept at {}", previous.display());
            }
        }
        Journal::open(journal_path, JournalMode::Truncate)
            .with_context(|| format!("Cannot open journal {}", journal_path.display()))
    }
}

pub struct RetryCoordinator<'a> {
    engine: &'a MigrationEngine,
}

impl<'a> RetryCoordinator<'a> {
    pub fn new(engine: &'a MigrationEngine) -> Self {
        Self { engine }
    }

    /// Re-run exactly `paths` through the migration workers
    pub fn retry(&self, paths: &[PathBuf]) -> Result<MigrationStats> {
        self.engine
            .journal()
            .record_roots(self.engine.source_root(), self.engine.destination_root())
            .context("Cannot write migration journal")?;

        let files = paths
            .iter()
            .map(|path| self.engine.media_file(path.clone()))
            .collect();
        Ok(self.engine.process_files(files, ProcessMode::Retry))
    }
}
