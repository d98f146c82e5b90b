//! # Migration Journal
//!
//! File di log della migrazione, una riga per evento.
//!
//! ## Responsabilità:
//! - Una riga `File Processing: <path> - SUCCESS|FAILED` per ogni file processato
//! - Righe `SOURCE_FOLDER:` / `TARGET_FOLDER:` all'inizio di ogni run
//! - Scrittura serializzata da più worker (mutex interno, flush per riga)
//! - Parsing delle righe FAILED per il retry
//! - Rotazione del journal precedente (`<nome>.prev`)
//!
//! ## Formato riga:
//! ```text
//! 2024-05-01 12:00:03 - ERROR - File Processing: /photos/a.jpg - FAILED
//! ```
//!
//! Il journal implementa `io::Write` su `&Journal`, quindi può essere usato
//! direttamente come writer di `tracing-subscriber`.

use crate::error::MigrateError;
use chrono::Local;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::Level;

/// Timestamp layout at the start of every line
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Prefix of per-file completion messages
pub const FILE_MARKER: &str = "File Processing: ";
pub const SUCCESS_SUFFIX: &str = " - SUCCESS";
pub const FAILED_SUFFIX: &str = " - FAILED";

pub const SOURCE_PREFIX: &str = "SOURCE_FOLDER: ";
pub const TARGET_PREFIX: &str = "TARGET_FOLDER: ";

/// Extension appended to a rotated journal
const ROTATED_SUFFIX: &str = "prev";

/// How an existing journal file is treated on open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Truncate,
    Append,
}

/// Name used for a level inside journal lines
pub fn level_name(level: Level) -> &'static str {
    match level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

/// Roots recorded by a previous run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalRoots {
    pub source: Option<PathBuf>,
    pub target: Option<PathBuf>,
}

/// Owned, thread-safe handle to the journal file
pub struct Journal {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

impl Journal {
    pub fn open(path: impl Into<PathBuf>, mode: JournalMode) -> Result<Self, MigrateError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        match mode {
            JournalMode::Truncate => options.write(true).create(true).truncate(true),
            JournalMode::Append => options.append(true).create(true),
        };
        let file = options
            .open(&path)
            .map_err(|e| MigrateError::Journal(format!("cannot open {}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, LineWriter<File>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one timestamped line
    pub fn write_line(&self, level: Level, message: &str) -> Result<(), MigrateError> {
        let line = format!(
            "{} - {} - {}\n",
            Local::now().format(TIMESTAMP_FORMAT),
            level_name(level),
            message
        );
        self.lock()
            .write_all(line.as_bytes())
            .map_err(|e| MigrateError::Journal(e.to_string()))
    }

    pub fn record_roots(&self, source: &Path, target: &Path) -> Result<(), MigrateError> {
        self.write_line(Level::INFO, &format!("{}{}", SOURCE_PREFIX, source.display()))?;
        self.write_line(Level::INFO, &format!("{}{}", TARGET_PREFIX, target.display()))
    }

    /// The completion line of one file
    pub fn record_file(&self, source: &Path, success: bool) -> Result<(), MigrateError> {
        if success {
            self.write_line(
                Level::INFO,
                &format!("{}{}{}", FILE_MARKER, source.display(), SUCCESS_SUFFIX),
            )
        } else {
            self.write_line(
                Level::ERROR,
                &format!("{}{}{}", FILE_MARKER, source.display(), FAILED_SUFFIX),
            )
        }
    }

    /// Source paths of every FAILED line, first occurrence order, no duplicates.
    ///
    /// Lines without the marker or the suffix are ignored.
    pub fn parse_failures<R: BufRead>(reader: R) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        reader
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| failed_path(&line).map(PathBuf::from))
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }

    pub fn read_failures(path: &Path) -> Result<Vec<PathBuf>, MigrateError> {
        let file = File::open(path)
            .map_err(|e| MigrateError::Journal(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(Self::parse_failures(BufReader::new(file)))
    }

    /// First recorded source and target roots
    pub fn parse_roots<R: BufRead>(reader: R) -> JournalRoots {
        let mut roots = JournalRoots::default();
        for line in reader.lines().map_while(Result::ok) {
            if roots.source.is_none() {
                roots.source = value_after(&line, SOURCE_PREFIX).map(PathBuf::from);
            }
            if roots.target.is_none() {
                roots.target = value_after(&line, TARGET_PREFIX).map(PathBuf::from);
            }
            if roots.source.is_some() && roots.target.is_some() {
                break;
            }
        }
        roots
    }

    pub fn read_roots(path: &Path) -> Result<JournalRoots, MigrateError> {
        let file = File::open(path)
            .map_err(|e| MigrateError::Journal(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(Self::parse_roots(BufReader::new(file)))
    }

    /// Whether the journal at `path` holds at least one per-file line.
    ///
    /// A missing journal has none.
    pub fn has_file_lines(path: &Path) -> Result<bool, MigrateError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(MigrateError::Journal(format!("cannot read {}: {}", path.display(), e))),
        };
        Ok(BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .any(|line| line.contains(FILE_MARKER)))
    }

    /// `<path>.prev`
    pub fn rotated_path(path: &Path) -> PathBuf {
        let mut rotated = path.as_os_str().to_owned();
        rotated.push(".");
        rotated.push(ROTATED_SUFFIX);
        PathBuf::from(rotated)
    }

    /// Move `path` to `<path>.prev`, replacing an older rotation.
    ///
    /// Returns the rotated path, or `None` when there was no journal.
    pub fn rotate(path: &Path) -> Result<Option<PathBuf>, MigrateError> {
        if !path.exists() {
            return Ok(None);
        }
        let rotated = Self::rotated_path(path);

        fs::rename(path, &rotated)
            .map_err(|e| MigrateError::Journal(format!("cannot rotate {}: {}", path.display(), e)))?;
        Ok(Some(rotated))
    }
}

impl io::Write for &Journal {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

fn failed_path(line: &str) -> Option<&str> {
    let start = line.find(FILE_MARKER)? + FILE_MARKER.len();
    let path = line[start..].trim_end().strip_suffix(FAILED_SUFFIX)?;
    (!path.is_empty()).then_some(path)
}

fn value_after<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let start = line.find(prefix)? + prefix.len();
    let value = line[start..].trim();
    (!value.is_empty()).then_some(value)
}
