//! # Organize By Date
//!
//! Sposta ogni file in `<destinazione>/<anno>/<nome>`, con l'anno preso
//! dalla data di ultima modifica (ora locale).
//!
//! ## Comportamento:
//! - `rename` quando possibile, copia + rimozione tra filesystem diversi
//! - Directory dell'anno create al bisogno
//! - Un file esistente non viene mai sovrascritto: `IMG.jpg` diventa `IMG_1.jpg`, `IMG_2.jpg`, ...
//! - Un file che fallisce viene contato e registrato, la scansione continua

use crate::error::MigrateError;
use crate::file_manager::FileManager;
use crate::journal::Journal;
use chrono::{DateTime, Datelike, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub struct OrganizeByDate<'a> {
    journal: Option<&'a Journal>,
}

impl<'a> OrganizeByDate<'a> {
    pub fn new(journal: Option<&'a Journal>) -> Self {
        Self { journal }
    }

    /// Move every file under `source` into year folders under `destination`.
    ///
    /// Returns `(processed, failed)`.
    pub fn run(&self, source: &Path, destination: &Path) -> Result<(usize, usize), MigrateError> {
        if !source.is_dir() {
            return Err(MigrateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("source directory not found: {}", source.display()),
            )));
        }
        fs::create_dir_all(destination)?;

        // Collected first so moved files are never walked twice.
        let mut files = Vec::new();
        for entry in WalkDir::new(source) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry: {}", e),
            }
        }

        let (mut processed, mut failed) = (0, 0);
        for path in files {
            processed += 1;
            let result = self.organize_file(&path, destination);
            if let Err(e) = &result {
                failed += 1;
                warn!("Could not organize {}: {}", path.display(), e);
            }
            if let Some(journal) = self.journal {
                if let Err(e) = journal.record_file(&path, result.is_ok()) {
                    warn!("Could not write journal line for {}: {}", path.display(), e);
                }
            }
        }

        info!("Organized {} files, {} failed", processed - failed, failed);
        Ok((processed, failed))
    }

    fn organize_file(&self, path: &Path, destination: &Path) -> Result<PathBuf, MigrateError> {
        let modified = fs::metadata(path)?.modified()?;
        let folder = year_folder(destination, modified);
        let name = path
            .file_name()
            .ok_or_else(|| MigrateError::UnsupportedFormat(format!("no file name: {}", path.display())))?;
        if folder.join(name) == path {
            return Ok(path.to_path_buf());
        }

        let target = free_target(&folder, Path::new(name));
        if target.file_name() != Some(name) {
            info!("{} already taken, using {}", folder.join(name).display(), target.display());
        }

        FileManager::ensure_parent_dirs(&target)?;
        if let Err(e) = fs::rename(path, &target) {
            debug!("rename failed ({}), copying {}", e, path.display());
            FileManager::copy_verbatim(path, &target)?;
            fs::remove_file(path)?;
        }
        Ok(target)
    }
}

/// `<root>/<year>` for a modification time, in local time
pub fn year_folder(root: &Path, modified: SystemTime) -> PathBuf {
    let local: DateTime<Local> = modified.into();
    root.join(local.year().to_string())
}

/// First of `name`, `stem_1.ext`, `stem_2.ext`, ... that does not exist in `folder`
fn free_target(folder: &Path, name: &Path) -> PathBuf {
    let candidate = folder.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = name.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let extension = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1u32..)
        .map(|n| folder.join(format!("{}_{}{}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(candidate)
}
