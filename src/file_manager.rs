//! # File Management Module
//!
//! Questo modulo raccoglie le operazioni sui file usate da tutto il resto.
//!
//! ## Responsabilità:
//! - Staging dei file di output in un file temporaneo nella directory finale
//! - Promozione atomica (rename) dello staging sul path definitivo
//! - Copia byte-per-byte per i file non multimediali
//! - Utilità per calcoli dimensioni e percentuali
//!
//! ## Sicurezza operazioni:
//! - Un file temporaneo non promosso viene rimosso automaticamente (`Drop`)
//! - Il path finale non contiene mai un output parziale
//!
//! ## Esempio:
//! ```rust,ignore
//! let staged = FileManager::stage_for(&destination)?;
//! transcoder.compress(&source, staged.path());
//! FileManager::promote(staged, &destination)?;
//! ```

use crate::error::MigrateError;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Stateless helpers for file operations
pub struct FileManager;

impl FileManager {
    /// Size of a file in bytes
    pub fn file_size(path: &Path) -> Result<u64, MigrateError> {
        Ok(fs::metadata(path)?.len())
    }

    /// Create every missing parent directory of `path`
    pub fn ensure_parent_dirs(path: &Path) -> Result<(), MigrateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Create an empty staging file next to `destination`.
    ///
    /// The staging name keeps the destination extension so muxers that pick
    /// the container from the file name still work.
    pub fn stage_for(destination: &Path) -> Result<NamedTempFile, MigrateError> {
        let dir = destination.parent().unwrap_or_else(|| Path::new("."));
        let suffix = destination
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let staged = tempfile::Builder::new()
            .prefix(".migrating-")
            .suffix(&suffix)
            .tempfile_in(dir)?;
        Ok(staged)
    }

    /// Move a finished staging file onto its final path
    pub fn promote(staged: NamedTempFile, destination: &Path) -> Result<PathBuf, MigrateError> {
        staged
            .persist(destination)
            .map_err(|e| MigrateError::Io(e.error))?;
        Ok(destination.to_path_buf())
    }

    /// Byte-for-byte copy, returns the number of bytes written
    pub fn copy_verbatim(source: &Path, destination: &Path) -> Result<u64, MigrateError> {
        Ok(fs::copy(source, destination)?)
    }

    /// Whether two files hold the same bytes
    pub fn same_contents(a: &Path, b: &Path) -> Result<bool, MigrateError> {
        if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
            return Ok(false);
        }

        let mut left = BufReader::new(File::open(a)?);
        let mut right = BufReader::new(File::open(b)?);
        loop {
            let chunk = left.fill_buf()?;
            if chunk.is_empty() {
                return Ok(right.fill_buf()?.is_empty());
            }
            let len = chunk.len();
            let mut other = vec![0u8; len];
            if right.read_exact(&mut other).is_err() || other[..] != chunk[..] {
                return Ok(false);
            }
            left.consume(len);
        }
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Calculate percentage reduction
    pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
        if original_size == 0 {
            0.0
        } else {
            ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
        }
    }
}
