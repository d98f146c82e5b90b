//! # Progress Tracking and Statistics Module
//!
//! Questo modulo gestisce il progress tracking e il riepilogo finale della migrazione.
//!
//! ## Responsabilità:
//! - Progress bar visual con `indicatif` per feedback real-time
//! - Riepilogo dei contatori (file processati, falliti, saltati)
//! - Byte letti e scritti con percentuale di riduzione
//! - Istruzioni per il retry quando ci sono fallimenti
//!
//! ## Componenti principali:
//! - `ProgressManager`: Gestisce la progress bar condivisa dai worker
//! - `MigrationStats`: Fotografia dei contatori a fine run
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [=========================>--------------] 150/230 (65%) photo.jpg
//! ```
//!
//! ## Esempio:
//! ```rust,ignore
//! let progress = ProgressManager::new(total_files, true);
//! progress.update("photo.jpg");
//! progress.finish(&stats.format_summary());
//! ```

use crate::file_manager::FileManager;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Manages progress reporting for a migration run
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager, drawing nothing when `visible` is false
    pub fn new(total_files: u64, visible: bool) -> Self {
        let bar = ProgressBar::new(total_files);

        if !visible {
            bar.set_draw_target(ProgressDrawTarget::hidden());
            return Self { bar };
        }

        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Count one finished file and show its name
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    /// Print a line above the bar without breaking it
    pub fn println(&self, message: &str) {
        if self.bar.is_hidden() {
            return;
        }
        self.bar.println(message);
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    #[cfg(test)]
    fn position(&self) -> u64 {
        self.bar.position()
    }
}

/// Final counters of a migrate or retry run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStats {
    pub processed: usize,
    pub failed: usize,
    /// Files left alone because the destination was already migrated
    pub skipped: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl MigrationStats {
    pub fn succeeded(&self) -> usize {
        self.processed - self.failed
    }

    pub fn overall_reduction_percent(&self) -> f64 {
        FileManager::calculate_reduction(self.bytes_in, self.bytes_out)
    }

    /// `Processed N files. Failed: M.`
    pub fn format_summary(&self) -> String {
        format!("Processed {} files. Failed: {}.", self.processed, self.failed)
    }

    pub fn format_sizes(&self) -> String {
        format!(
            "Read: {} | Written: {} | Reduction: {:.2}% | Skipped (already migrated): {}",
            FileManager::format_size(self.bytes_in),
            FileManager::format_size(self.bytes_out),
            self.overall_reduction_percent(),
            self.skipped
        )
    }

    /// Retry instruction, only when something failed
    pub fn retry_hint(&self, journal: &Path) -> Option<String> {
        (self.failed > 0).then(|| {
            format!(
                "Re-run with --retry to reprocess the failed files listed in {}",
                journal.display()
            )
        })
    }
}
