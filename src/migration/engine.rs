//! # Migration Engine
//!
//! Orchestratore principale: scansione dell'albero sorgente e distribuzione
//! dei file a un pool di thread.
//!
//! ## Responsabilità:
//! - Scansione ricorsiva con `walkdir` (directory illeggibili segnalate e saltate)
//! - Pool di N worker su una `WorkQueue` condivisa
//! - Nessuna transcodifica avviene con il lock della coda acquisito
//! - Contatori aggregati (processati, falliti, saltati, byte)
//! - Attesa della terminazione di tutti i worker prima del riepilogo

use super::counters::{FileOutcome, MigrationCounters};
use super::path_resolver::PathResolver;
use super::queue::WorkQueue;
use super::worker::{MigrationWorker, ProcessMode, TranscoderSet};
use crate::classify::{MediaClassifier, MediaFile};
use crate::config::Config;
use crate::journal::Journal;
use crate::progress::{MigrationStats, ProgressManager};
use crate::transcode::{CopyTranscoder, ImageTranscoder, VideoTranscoder};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Name prefix of in-flight staging files
const STAGING_PREFIX: &str = ".migrating-";

pub struct MigrationEngine {
    config: Config,
    classifier: MediaClassifier,
    resolver: PathResolver,
    transcoders: TranscoderSet,
    journal: Arc<Journal>,
    source_root: PathBuf,
}

impl MigrationEngine {
    /// Open both roots. A missing source or an uncreatable destination is fatal.
    pub fn new(config: Config, source_root: &Path, destination_root: &Path, journal: Arc<Journal>) -> Result<Self> {
        let source_root = source_root
            .canonicalize()
            .with_context(|| format!("Cannot open source directory {}", source_root.display()))?;
        if !source_root.is_dir() {
            anyhow::bail!("Source is not a directory: {}", source_root.display());
        }

        fs::create_dir_all(destination_root)
            .with_context(|| format!("Cannot create destination directory {}", destination_root.display()))?;
        let destination_root = destination_root
            .canonicalize()
            .with_context(|| format!("Cannot open destination directory {}", destination_root.display()))?;

        let transcoders = TranscoderSet {
            image: Box::new(ImageTranscoder::new(config.image.clone())),
            video: Box::new(VideoTranscoder::new(config.video.clone())),
            copy: Box::new(CopyTranscoder),
        };

        Ok(Self {
            classifier: MediaClassifier::new(&config.extensions),
            resolver: PathResolver::new(destination_root, config.image.heic_to_jpeg),
            transcoders,
            journal,
            source_root,
            config,
        })
    }

    /// Replace the transcoders, mostly for tests
    pub fn with_transcoders(mut self, transcoders: TranscoderSet) -> Self {
        self.transcoders = transcoders;
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn destination_root(&self) -> &Path {
        self.resolver.destination_root()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Scan the source root and migrate everything found
    pub fn run(&self) -> Result<MigrationStats> {
        self.journal
            .record_roots(&self.source_root, self.destination_root())
            .context("Cannot write migration journal")?;

        let files = self.scan(&self.source_root);
        info!(
            "📁 Found {} files in {} -> {}",
            files.len(),
            self.source_root.display(),
            self.destination_root().display()
        );
        Ok(self.migrate(files))
    }

    /// Every regular file under `input_dir`, classified.
    ///
    /// Unreadable entries are reported and skipped; their siblings are still
    /// walked. Staging files and a destination nested in the source are ignored.
    pub fn scan(&self, input_dir: &Path) -> Vec<MediaFile> {
        let destination = self.destination_root().to_path_buf();
        let mut files = Vec::new();

        let walker = WalkDir::new(input_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || entry.path() != destination);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                debug!("Ignoring staging file {}", entry.path().display());
                continue;
            }
            files.push(MediaFile::new(entry.into_path(), input_dir, &self.classifier));
        }

        files
    }

    /// Classify a path recorded by a previous run
    pub fn media_file(&self, path: PathBuf) -> MediaFile {
        MediaFile::new(path, &self.source_root, &self.classifier)
    }

    /// Migrate `files` with the idempotence check enabled
    pub fn migrate(&self, files: Vec<MediaFile>) -> MigrationStats {
        self.process_files(files, ProcessMode::Migrate)
    }

    /// Run `files` through the worker pool and wait for every worker to exit
    pub(crate) fn process_files(&self, files: Vec<MediaFile>, mode: ProcessMode) -> MigrationStats {
        let total = files.len();
        let workers = self.config.worker_count().min(total.max(1));
        info!("🔧 Processing {} files with {} workers ({:?})", total, workers, mode);

        let queue = WorkQueue::new();
        queue.extend(files);
        queue.close();

        let counters = MigrationCounters::new();
        let progress = ProgressManager::new(total as u64, self.config.general.progress);
        let worker = MigrationWorker {
            transcoders: &self.transcoders,
            resolver: &self.resolver,
            journal: &self.journal,
        };

        thread::scope(|s| {
            for id in 0..workers {
                let (queue, counters, progress, worker) = (&queue, &counters, &progress, &worker);
                s.spawn(move || {
                    debug!("Worker {} started", id);
                    while let Some(file) = queue.pop() {
                        let outcome = worker.process(&file, mode);
                        if outcome == FileOutcome::Failed {
                            progress.println(&format!("❌ {}", file.relative.display()));
                        }
                        counters.record(outcome);
                        progress.update(&file.relative.to_string_lossy());
                    }
                    debug!("Worker {} finished", id);
                });
            }
        });

        let stats = counters.snapshot();
        info!(
            "✅ {} succeeded ({} already migrated), {} failed",
            stats.succeeded(),
            stats.skipped,
            stats.failed
        );
        progress.finish(&stats.format_summary());
        stats
    }
}
