//! # Media Migrator - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Caricamento della configurazione (file + override da CLI)
//! - Apertura del journal e inizializzazione del logging con `tracing`
//! - Scelta della modalità: migrazione, retry o organizzazione per anno
//! - Riepilogo finale
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI
//! 2. Carica `config.json` (o quello indicato con `--config`) e applica gli override
//! 3. Risolve le directory sorgente/destinazione (CLI, config, journal, prompt)
//! 4. Apre il journal e configura il logging
//! 5. Avvia la modalità richiesta e stampa il riepilogo
//!
//! ## Esempio di utilizzo:
//! ```bash
//! media-migrator -i /mnt/old-photos -o /mnt/archive --threads 8
//! media-migrator --retry
//! media-migrator --organize -i /mnt/archive -o /mnt/by-year
//! ```

use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use media_migrator::config::LogFormat;
use media_migrator::{
    logging, Config, Journal, JournalMode, MigrationEngine, MigrationStats, OrganizeByDate, RetryCoordinator,
    RetryPlan,
};

#[derive(Parser)]
#[command(name = "media-migrator", version)]
#[command(about = "Migrate photo and video collections into a smaller copy of the same tree")]
struct Args {
    /// Source directory
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Destination directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Reprocess the files marked FAILED in the journal
    #[arg(short, long, conflicts_with = "organize")]
    retry: bool,

    /// Move files into <output>/<year>/ by modification date
    #[arg(long)]
    organize: bool,

    /// Config file (default: search for config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads (0 = available parallelism)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Video CRF for the software encoder (0-51)
    #[arg(long)]
    crf: Option<u8>,

    /// Software encoder preset
    #[arg(long)]
    preset: Option<String>,

    /// JPEG quality (1-100)
    #[arg(short = 'q', long)]
    jpeg_quality: Option<u8>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// JSON console logs
    #[arg(short, long)]
    json: bool,

    /// Journal file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(threads) = self.threads {
            config.general.threads = threads;
        }
        if let Some(crf) = self.crf {
            config.video.crf = crf;
        }
        if let Some(preset) = &self.preset {
            config.video.preset = preset.clone();
        }
        if let Some(quality) = self.jpeg_quality {
            config.image.jpeg_quality = quality;
        }
        if let Some(level) = &self.log_level {
            config.general.log_level = level.to_lowercase();
        }
        if self.json {
            config.general.log_format = LogFormat::Json;
        }
        if let Some(log_file) = &self.log_file {
            config.general.log_file = log_file.clone();
        }
        if self.no_progress {
            config.general.progress = false;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, config_path) = match &args.config {
        Some(path) => {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            (Config::from_file(path)?, Some(path.clone()))
        }
        None => Config::discover()?,
    };
    args.apply_overrides(&mut config);
    config.validate()?;

    if args.organize {
        run_organize(&args, config)
    } else if args.retry {
        run_retry(&args, config, config_path)
    } else {
        run_migrate(&args, config, config_path)
    }
}

fn run_migrate(args: &Args, config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let source = resolve_dir(args.input.clone(), config.general.input_dir.clone(), None, "source", true)?;
    let target = resolve_dir(args.output.clone(), config.general.output_dir.clone(), None, "destination", false)?;

    let journal_path = config.general.log_file.clone();
    let journal = Arc::new(Journal::open(&journal_path, JournalMode::Truncate)?);
    logging::init_logging(&config.general, args.verbose, Some(journal.clone()))?;
    log_config_source(config_path.as_deref());

    let engine = MigrationEngine::new(config, &source, &target, journal)?;
    let stats = engine.run()?;
    print_summary(&stats, &journal_path);
    Ok(())
}

fn run_retry(args: &Args, config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let journal_path = config.general.log_file.clone();
    let plan = RetryPlan::prepare(&journal_path)?;

    let source = resolve_dir(
        args.input.clone(),
        config.general.input_dir.clone(),
        plan.roots.source.clone(),
        "source",
        true,
    )?;
    let target = resolve_dir(
        args.output.clone(),
        config.general.output_dir.clone(),
        plan.roots.target.clone(),
        "destination",
        false,
    )?;

    let journal = Arc::new(plan.open_journal(&journal_path)?);
    logging::init_logging(&config.general, args.verbose, Some(journal.clone()))?;
    log_config_source(config_path.as_deref());
    if plan.failures.is_empty() {
        info!("No failed files to retry");
    }

    let engine = MigrationEngine::new(config, &source, &target, journal)?;
    let stats = RetryCoordinator::new(&engine).retry(&plan.failures)?;
    print_summary(&stats, &journal_path);
    Ok(())
}

fn run_organize(args: &Args, config: Config) -> Result<()> {
    let source = resolve_dir(args.input.clone(), config.general.input_dir.clone(), None, "source", true)?;
    let target = resolve_dir(args.output.clone(), config.general.output_dir.clone(), None, "destination", false)?;

    let journal = Arc::new(Journal::open(&config.general.log_file, JournalMode::Append)?);
    logging::init_logging(&config.general, args.verbose, Some(journal.clone()))?;

    let (processed, failed) = OrganizeByDate::new(Some(&journal)).run(&source, &target)?;
    println!("Organized {} files. Failed: {}.", processed, failed);
    Ok(())
}

fn log_config_source(path: Option<&Path>) {
    match path {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("Using default configuration"),
    }
}

fn print_summary(stats: &MigrationStats, journal: &Path) {
    println!("{}", stats.format_summary());
    println!("{}", stats.format_sizes());
    if let Some(hint) = stats.retry_hint(journal) {
        println!("{}", hint);
    }
}

/// First of CLI, config and journal; prompts on stdin when none is set
fn resolve_dir(
    cli: Option<PathBuf>,
    config: Option<PathBuf>,
    journal: Option<PathBuf>,
    label: &str,
    must_exist: bool,
) -> Result<PathBuf> {
    match cli.or(config).or(journal) {
        Some(path) => Ok(path),
        None => prompt_dir(label, must_exist),
    }
}

fn prompt_dir(label: &str, must_exist: bool) -> Result<PathBuf> {
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("Enter the {} directory: ", label);
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            anyhow::bail!("No {} directory given", label);
        }

        let answer = line.trim();
        if answer.is_empty() {
            continue;
        }
        let path = PathBuf::from(answer);
        if must_exist && !path.is_dir() {
            println!("Directory not found: {}", path.display());
            continue;
        }
        return Ok(path);
    }
}
