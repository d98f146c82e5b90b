//! # Media Migrator Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per i test di integrazione
//!
//! ## Architettura dei moduli:
//! - `config`: Configurazione JSON, default e validazione
//! - `error`: Tipi di errore per il singolo file
//! - `sanitize`: Pulizia dei nomi di file e directory
//! - `classify`: Classificazione per estensione (immagine, video, altro)
//! - `transcode`: Transcoder immagini (JPEG/PNG/HEIC) e video (H.264)
//! - `migration`: Scansione, pool di worker, idempotenza
//! - `journal`: Log della migrazione con righe SUCCESS/FAILED
//! - `retry`: Rielaborazione dei file falliti
//! - `organize`: Spostamento dei file in cartelle per anno
//! - `file_manager`: Staging, promozione e copia dei file
//! - `logging`: Setup di `tracing`
//! - `progress`: Progress bar e riepilogo
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use media_migrator::{Config, Journal, JournalMode, MigrationEngine};
//!
//! let journal = Arc::new(Journal::open("migration.log", JournalMode::Truncate)?);
//! let engine = MigrationEngine::new(Config::default(), &src, &dst, journal)?;
//! let stats = engine.run()?;
//! println!("{}", stats.format_summary());
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod file_manager;
pub mod journal;
pub mod logging;
pub mod migration;
pub mod organize;
pub mod progress;
pub mod retry;
pub mod sanitize;
pub mod transcode;

pub use classify::{MediaClassifier, MediaFile, MediaKind};
pub use config::Config;
pub use error::MigrateError;
pub use journal::{Journal, JournalMode};
pub use migration::MigrationEngine;
pub use organize::OrganizeByDate;
pub use progress::MigrationStats;
pub use retry::{RetryCoordinator, RetryPlan};
pub use transcode::{TranscodeResult, Transcoder};
