//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `MigrateError` per categorizzare gli errori di un singolo file
//! - Traduce i codici d'errore nativi (FFmpeg, libheif) in messaggi leggibili
//! - Integra con `thiserror` per le conversioni automatiche
//!
//! ## Categorie di errori:
//! - `Io`: Errori di I/O (file non trovati, permessi, etc.)
//! - `Image`: Errori di decodifica/codifica JPEG e PNG
//! - `Ffmpeg`: Errori della pipeline video, con il passo che li ha generati
//! - `Heif`: Errori di libheif (contesto, handle, encoder)
//! - `NoVideoStream` / `NoEncoder`: Video senza stream o senza encoder H.264
//! - `UnsupportedFormat`: Contenuto che non corrisponde all'estensione
//! - `PathTooLong`: Path di destinazione oltre il limite
//! - `Journal`: Errori del file di log della migrazione
//! - `Transcode`: Risultato negativo di un transcoder, con il suo messaggio
//!
//! Nessuno di questi errori è fatale per l'intera esecuzione: il motore
//! li converte in una riga FAILED e passa al file successivo.

use std::path::PathBuf;

/// Failure of a single file's migration step
#[derive(thiserror::Error, Debug)]
pub enum MigrateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("FFmpeg error while {context}: {source}")]
    Ffmpeg {
        context: &'static str,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("HEIF error: {0}")]
    Heif(String),

    #[error("No video stream found in {0}")]
    NoVideoStream(PathBuf),

    #[error("No usable H.264 encoder (tried: {0})")]
    NoEncoder(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Destination path too long ({len} bytes): {path}")]
    PathTooLong { path: PathBuf, len: usize },

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Transcode failed: {0}")]
    Transcode(String),
}

impl MigrateError {
    /// Wrap a native FFmpeg error with the pipeline step that produced it
    pub fn ffmpeg(context: &'static str) -> impl FnOnce(ffmpeg_next::Error) -> Self {
        move |source| Self::Ffmpeg { context, source }
    }
}

impl From<libheif_rs::HeifError> for MigrateError {
    fn from(err: libheif_rs::HeifError) -> Self {
        Self::Heif(err.message.clone())
    }
}
