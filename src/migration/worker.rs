//! # Migration Worker
//!
//! Elaborazione di un singolo file, condivisa da migrazione e retry.
//!
//! ## Flusso per file:
//! 1. Calcolo del path di destinazione (`PathResolver`)
//! 2. Controllo di idempotenza (saltato in modalità retry)
//! 3. Transcodifica in un file di staging nella directory di destinazione
//! 4. Promozione dello staging, oppure copia dell'originale se non più piccolo
//! 5. Una riga di journal SUCCESS/FAILED

use super::counters::FileOutcome;
use super::path_resolver::PathResolver;
use crate::classify::{MediaFile, MediaKind};
use crate::error::MigrateError;
use crate::file_manager::FileManager;
use crate::journal::Journal;
use crate::transcode::Transcoder;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Whether already-migrated destinations are left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Migrate,
    /// Always re-transcode, whatever is at the destination
    Retry,
}

/// The transcoders a worker dispatches to
pub struct TranscoderSet {
    pub image: Box<dyn Transcoder>,
    pub video: Box<dyn Transcoder>,
    pub copy: Box<dyn Transcoder>,
}

impl TranscoderSet {
    fn for_kind(&self, kind: MediaKind) -> &dyn Transcoder {
        match kind {
            MediaKind::Image => self.image.as_ref(),
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Other | MediaKind::Unknown => self.copy.as_ref(),
        }
    }
}

/// Per-file processing, borrowed by every pool thread
pub struct MigrationWorker<'a> {
    pub transcoders: &'a TranscoderSet,
    pub resolver: &'a PathResolver,
    pub journal: &'a Journal,
}

impl MigrationWorker<'_> {
    /// Process one file and write its journal line. Never fails the run.
    pub fn process(&self, file: &MediaFile, mode: ProcessMode) -> FileOutcome {
        let outcome = match self.process_inner(file, mode) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to migrate {}: {}", file.path.display(), e);
                FileOutcome::Failed
            }
        };

        let success = !matches!(outcome, FileOutcome::Failed);
        if let Err(e) = self.journal.record_file(&file.path, success) {
            warn!("Could not write journal line for {}: {}", file.path.display(), e);
        }
        outcome
    }

    fn process_inner(&self, file: &MediaFile, mode: ProcessMode) -> Result<FileOutcome, MigrateError> {
        let destination = self.resolver.destination_for(file)?;
        let source_size = FileManager::file_size(&file.path)?;

        if mode == ProcessMode::Migrate && already_migrated(file.kind, &file.path, source_size, &destination) {
            debug!("[SKIP] Already migrated: {} -> {}", file.path.display(), destination.display());
            return Ok(FileOutcome::Skipped);
        }

        FileManager::ensure_parent_dirs(&destination)?;
        let staged = FileManager::stage_for(&destination)?;
        let transcoder = self.transcoders.for_kind(file.kind);

        let result = panic::catch_unwind(AssertUnwindSafe(|| transcoder.compress(&file.path, staged.path())))
            .map_err(|_| MigrateError::Transcode("transcoder panicked".to_string()))?;
        if !result.is_ok() {
            // The staging file is removed when `staged` drops.
            return Err(MigrateError::Transcode(result.message().to_string()));
        }

        let staged_size = FileManager::file_size(staged.path())?;
        let bytes_out = if file.kind.is_media() && staged_size >= source_size {
            info!(
                "[KEEP] Compression did not help for {} ({} -> {}), copying original",
                file.path.display(),
                FileManager::format_size(source_size),
                FileManager::format_size(staged_size)
            );
            drop(staged);
            let verbatim = FileManager::stage_for(&destination)?;
            FileManager::copy_verbatim(&file.path, verbatim.path())?;
            FileManager::promote(verbatim, &destination)?;
            source_size
        } else {
            FileManager::promote(staged, &destination)?;
            debug!(
                "[OK] {} -> {} ({:.1}% smaller)",
                file.path.display(),
                destination.display(),
                FileManager::calculate_reduction(source_size, staged_size)
            );
            staged_size
        };

        Ok(FileOutcome::Migrated {
            bytes_in: source_size,
            bytes_out,
        })
    }
}

/// Idempotence rule.
///
/// Media counts as migrated when the destination exists and is strictly
/// smaller than the source, or is a byte-identical copy left by the
/// not-smaller fallback. Verbatim copies count when they have the same size.
pub fn already_migrated(kind: MediaKind, source: &Path, source_size: u64, destination: &Path) -> bool {
    let Ok(metadata) = destination.metadata() else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    match metadata.len() {
        len if len < source_size => kind.is_media(),
        len if len == source_size => {
            !kind.is_media() || FileManager::same_contents(source, destination).unwrap_or(false)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::MediaClassifier;
    use crate::journal::JournalMode;
    use crate::transcode::{CopyTranscoder, TranscodeResult};
    use std::fs;
    use tempfile::TempDir;

    /// Writes the first half of the input
    struct HalvingTranscoder;

    impl Transcoder for HalvingTranscoder {
        fn compress(&self, input: &Path, output: &Path) -> TranscodeResult {
            match fs::read(input) {
                Ok(data) => fs::write(output, &data[..data.len() / 2]).map_err(MigrateError::from).into(),
                Err(e) => TranscodeResult::error(e.to_string()),
            }
        }
    }

    /// Writes something larger than the input
    struct InflatingTranscoder;

    impl Transcoder for InflatingTranscoder {
        fn compress(&self, input: &Path, output: &Path) -> TranscodeResult {
            let mut data = fs::read(input).unwrap_or_default();
            data.extend_from_slice(&[0u8; 64]);
            fs::write(output, data).map_err(MigrateError::from).into()
        }
    }

    /// Writes garbage then reports failure
    struct BrokenTranscoder;

    impl Transcoder for BrokenTranscoder {
        fn compress(&self, _input: &Path, output: &Path) -> TranscodeResult {
            let _ = fs::write(output, b"partial");
            TranscodeResult::error("decoder exploded")
        }
    }

    struct PanickingTranscoder;

    impl Transcoder for PanickingTranscoder {
        fn compress(&self, _input: &Path, _output: &Path) -> TranscodeResult {
            panic!("bad input");
        }
    }

    struct Fixture {
        _dir: TempDir,
        src: std::path::PathBuf,
        resolver: PathResolver,
        journal: Journal,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        let journal = Journal::open(dir.path().join("migration.log"), JournalMode::Truncate).unwrap();
        Fixture {
            src,
            resolver: PathResolver::new(dst, false),
            journal,
            _dir: dir,
        }
    }

    fn set(image: Box<dyn Transcoder>) -> TranscoderSet {
        TranscoderSet {
            image,
            video: Box::new(HalvingTranscoder),
            copy: Box::new(CopyTranscoder),
        }
    }

    fn media(fx: &Fixture, name: &str, bytes: usize) -> MediaFile {
        let path = fx.src.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![7u8; bytes]).unwrap();
        MediaFile::new(path, &fx.src, &MediaClassifier::default())
    }

    fn only_file_in(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_migrates_and_skips_second_time() {
        let fx = fixture();
        let transcoders = set(Box::new(HalvingTranscoder));
        let worker = MigrationWorker {
            transcoders: &transcoders,
            resolver: &fx.resolver,
            journal: &fx.journal,
        };
        let file = media(&fx, "album/a.jpg", 1000);

        let first = worker.process(&file, ProcessMode::Migrate);
        assert_eq!(
            first,
            FileOutcome::Migrated {
                bytes_in: 1000,
                bytes_out: 500
            }
        );
        let dest = fx.resolver.destination_root().join("album/a.jpg");
        assert_eq!(fs::metadata(&dest).unwrap().len(), 500);

        assert_eq!(worker.process(&file, ProcessMode::Migrate), FileOutcome::Skipped);
        // retry ignores the existing destination
        assert!(matches!(
            worker.process(&file, ProcessMode::Retry),
            FileOutcome::Migrated { .. }
        ));
    }

    #[test]
    fn test_larger_output_falls_back_to_copy() {
        let fx = fixture();
        let transcoders = set(Box::new(InflatingTranscoder));
        let worker = MigrationWorker {
            transcoders: &transcoders,
            resolver: &fx.resolver,
            journal: &fx.journal,
        };
        let file = media(&fx, "b.png", 300);

        let outcome = worker.process(&file, ProcessMode::Migrate);
        assert_eq!(
            outcome,
            FileOutcome::Migrated {
                bytes_in: 300,
                bytes_out: 300
            }
        );
        let dest = fx.resolver.destination_root().join("b.png");
        assert_eq!(fs::read(&dest).unwrap(), fs::read(&file.path).unwrap());
        assert_eq!(only_file_in(fx.resolver.destination_root()), vec!["b.png".to_string()]);

        // the verbatim fallback is recognised on the next run
        assert_eq!(worker.process(&file, ProcessMode::Migrate), FileOutcome::Skipped);
    }

    #[test]
    fn test_equal_size_media_with_other_bytes_is_redone() {
        let fx = fixture();
        let transcoders = set(Box::new(HalvingTranscoder));
        let worker = MigrationWorker {
            transcoders: &transcoders,
            resolver: &fx.resolver,
            journal: &fx.journal,
        };
        let file = media(&fx, "f.jpg", 40);
        let dest = fx.resolver.destination_root().join("f.jpg");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, [1u8; 40]).unwrap();

        assert_eq!(
            worker.process(&file, ProcessMode::Migrate),
            FileOutcome::Migrated {
                bytes_in: 40,
                bytes_out: 20
            }
        );
    }

    #[test]
    fn test_failure_leaves_no_partial_file() {
        let fx = fixture();
        let transcoders = set(Box::new(BrokenTranscoder));
        let worker = MigrationWorker {
            transcoders: &transcoders,
            resolver: &fx.resolver,
            journal: &fx.journal,
        };
        let file = media(&fx, "c.jpg", 100);

        assert_eq!(worker.process(&file, ProcessMode::Migrate), FileOutcome::Failed);
        assert!(only_file_in(fx.resolver.destination_root()).is_empty());
        assert_eq!(Journal::read_failures(fx.journal.path()).unwrap(), vec![file.path.clone()]);
    }

    #[test]
    fn test_failure_keeps_previous_copy() {
        let fx = fixture();
        let file = media(&fx, "d.jpg", 100);
        let dest = fx.resolver.destination_root().join("d.jpg");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"good old copy").unwrap();

        let transcoders = set(Box::new(BrokenTranscoder));
        let worker = MigrationWorker {
            transcoders: &transcoders,
            resolver: &fx.resolver,
            journal: &fx.journal,
        };
        assert_eq!(worker.process(&file, ProcessMode::Retry), FileOutcome::Failed);
        assert_eq!(fs::read(&dest).unwrap(), b"good old copy");
    }

    #[test]
    fn test_panic_is_a_file_failure() {
        let fx = fixture();
        let transcoders = set(Box::new(PanickingTranscoder));
        let worker = MigrationWorker {
            transcoders: &transcoders,
            resolver: &fx.resolver,
            journal: &fx.journal,
        };
        let file = media(&fx, "e.jpeg", 10);
        assert_eq!(worker.process(&file, ProcessMode::Migrate), FileOutcome::Failed);
    }

    #[test]
    fn test_other_files_copied_verbatim() {
        let fx = fixture();
        let transcoders = set(Box::new(BrokenTranscoder));
        let worker = MigrationWorker {
            transcoders: &transcoders,
            resolver: &fx.resolver,
            journal: &fx.journal,
        };
        let file = media(&fx, "song.mp3", 256);
        assert_eq!(file.kind, MediaKind::Other);

        assert!(matches!(
            worker.process(&file, ProcessMode::Migrate),
            FileOutcome::Migrated { bytes_out: 256, .. }
        ));
        assert_eq!(worker.process(&file, ProcessMode::Migrate), FileOutcome::Skipped);
    }

    #[test]
    fn test_already_migrated_rule() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("x");
        fs::write(&src, [9u8; 10]).unwrap();
        assert!(!already_migrated(MediaKind::Image, &src, 10, &dest));

        fs::write(&dest, [0u8; 10]).unwrap();
        assert!(!already_migrated(MediaKind::Image, &src, 10, &dest));
        assert!(already_migrated(MediaKind::Image, &src, 11, &dest));
        assert!(already_migrated(MediaKind::Other, &src, 10, &dest));
        assert!(!already_migrated(MediaKind::Unknown, &src, 11, &dest));
        assert!(!already_migrated(MediaKind::Video, &src, 100, dir.path()));

        fs::write(&dest, [9u8; 10]).unwrap();
        assert!(already_migrated(MediaKind::Image, &src, 10, &dest));
    }
}
