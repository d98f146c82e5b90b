//! # Transcode Module
//!
//! Transcoder comuni a immagini e video.
//!
//! ## Contratto:
//! - `compress(input, output)` scrive `output` e restituisce un `TranscodeResult`
//! - Nessun transcoder termina il processo o propaga panic: ogni errore
//!   diventa un risultato `Error` con un messaggio non vuoto
//! - Il motore di migrazione è l'unico punto che trasforma un risultato
//!   in una riga di journal e in un contatore

pub mod exif;
pub mod image;
pub mod video;

pub use self::image::ImageTranscoder;
pub use self::video::VideoTranscoder;

use crate::error::MigrateError;
use crate::file_manager::FileManager;
use std::path::Path;

/// Outcome of a single `compress` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeResult {
    success: bool,
    message: String,
}

impl TranscodeResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    /// Failed result, an empty diagnostic is replaced with a generic one
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            message: if message.trim().is_empty() {
                "unknown error".to_string()
            } else {
                message
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.success
    }

    /// Diagnostic text, empty for successful results
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<Result<(), MigrateError>> for TranscodeResult {
    fn from(result: Result<(), MigrateError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// A file-to-file transcoder driven by the migration workers
pub trait Transcoder: Send + Sync {
    fn compress(&self, input: &Path, output: &Path) -> TranscodeResult;
}

/// Copies bytes unchanged, used for every non-media file
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyTranscoder;

impl Transcoder for CopyTranscoder {
    fn compress(&self, input: &Path, output: &Path) -> TranscodeResult {
        FileManager::copy_verbatim(input, output).map(|_| ()).into()
    }
}
