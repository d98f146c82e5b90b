//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` divisa in gruppi (`video`, `audio`, `image`,
//!   `extensions`, `general`)
//! - Fornisce validazione dei parametri prima dell'avvio dei worker
//! - Supporta caricamento/salvataggio da/verso file JSON
//! - Cerca `config.json` nelle posizioni standard
//!
//! ## Gruppi di configurazione:
//! - `video`: encoder software e hardware, preset, CRF, limiti di bitrate
//! - `audio`: codec e bitrate (riservati: l'audio viene sempre copiato)
//! - `image`: qualità JPEG/HEIC, dimensioni massime PNG, conversione HEIC→JPEG
//! - `extensions`: insiemi di estensioni per immagini, video e altri file
//! - `general`: directory, thread, livello e formato del log, file journal
//!
//! ## Regole di caricamento:
//! - File mancante → valori di default
//! - Chiave mancante → valore di default del gruppo
//! - Chiave presente con tipo sbagliato → errore immediato
//!
//! ## Esempio:
//! ```rust,ignore
//! let mut config = Config::from_file(Path::new("config.json"))?;
//! config.general.threads = 8;
//! config.validate()?;
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the configuration file searched on startup
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Top-level configuration, frozen once workers start
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub image: ImageConfig,
    pub extensions: ExtensionConfig,
    pub general: GeneralConfig,
}

/// Video encoder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Software encoder, tried after every hardware encoder
    pub codec: String,
    /// Hardware encoders in priority order
    pub hardware_encoders: Vec<String>,
    /// Software encoder preset
    pub preset: String,
    /// Software encoder CRF (0-51, lower = better quality)
    pub crf: u8,
    /// Constant-quality value handed to hardware encoders
    pub hw_quality: u8,
    /// Explicit max rate in bits/s, overrides the computed plan
    pub maxrate: Option<u64>,
    /// Explicit VBV buffer in bits, overrides the computed plan
    pub bufsize: Option<u64>,
    /// Lower clamp for the detected source bitrate
    pub min_bitrate: u64,
    /// Upper clamp for the detected source bitrate
    pub max_bitrate: u64,
    /// Target bitrate as a fraction of the source
    pub target_ratio: f64,
    /// Max bitrate as a fraction of the source
    pub max_ratio: f64,
    /// Frame rate used when the stream does not report one
    pub fallback_fps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            hardware_encoders: vec![
                "h264_nvenc".to_string(),
                "h264_amf".to_string(),
                "h264_qsv".to_string(),
            ],
            preset: "faster".to_string(),
            crf: 33,
            hw_quality: 36,
            maxrate: None,
            bufsize: None,
            min_bitrate: 200_000,
            max_bitrate: 8_000_000,
            target_ratio: 0.40,
            max_ratio: 0.50,
            fallback_fps: 30,
        }
    }
}

impl VideoConfig {
    /// Encoder names in the order they are tried
    pub fn encoder_priority(&self) -> Vec<&str> {
        self.hardware_encoders
            .iter()
            .chain(std::iter::once(&self.codec))
            .map(String::as_str)
            .collect()
    }
}

/// Audio settings. Audio streams are always stream-copied, these values are
/// kept so existing config files round-trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub codec: String,
    pub bitrate: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate: "192k".to_string(),
        }
    }
}

/// Image encoder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageConfig {
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// HEIC lossy quality (1-100)
    pub heic_quality: u8,
    /// PNG outputs are trimmed to at most this width
    pub max_width: u32,
    /// PNG outputs are trimmed to at most this height
    pub max_height: u32,
    /// Write HEIC inputs as JPEG files
    pub heic_to_jpeg: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            heic_quality: 80,
            max_width: 1920,
            max_height: 1080,
            heic_to_jpeg: false,
        }
    }
}

/// Extension sets used by the classifier (lowercase, no leading dot)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtensionConfig {
    pub image: Vec<String>,
    pub video: Vec<String>,
    pub other: Vec<String>,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            image: owned(&["jpg", "jpeg", "png", "heic", "heif"]),
            video: owned(&["mp4", "avi", "mov", "mkv"]),
            other: owned(&["mp3", "aac", "wav", "flac", "gif", "3gp", "bmp"]),
        }
    }
}

/// Console log formatter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Run-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Reserved: videos keep their source container
    pub container: String,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    /// Worker threads, 0 = available parallelism
    pub threads: usize,
    /// trace | debug | info | warn | error
    pub log_level: String,
    pub log_format: LogFormat,
    /// Journal file with one line per processed file
    pub log_file: PathBuf,
    /// Show a progress bar while migrating
    pub progress: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            container: "mp4".to_string(),
            input_dir: None,
            output_dir: None,
            threads: 0,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_file: PathBuf::from("migration.log"),
            progress: true,
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        let image = &self.image;
        if image.jpeg_quality == 0 || image.jpeg_quality > 100 {
            return Err(anyhow::anyhow!("JPEG quality must be between 1 and 100"));
        }

        if image.heic_quality == 0 || image.heic_quality > 100 {
            return Err(anyhow::anyhow!("HEIC quality must be between 1 and 100"));
        }

        if image.max_width == 0 || image.max_height == 0 {
            return Err(anyhow::anyhow!("Maximum image dimensions must be greater than 0"));
        }

        let video = &self.video;
        if video.crf > 51 {
            return Err(anyhow::anyhow!("Video CRF must be between 0 and 51"));
        }

        if video.hw_quality == 0 || video.hw_quality > 51 {
            return Err(anyhow::anyhow!("Hardware encoder quality must be between 1 and 51"));
        }

        if video.codec.trim().is_empty() {
            return Err(anyhow::anyhow!("Video codec must not be empty"));
        }

        if video.min_bitrate == 0 || video.min_bitrate > video.max_bitrate {
            return Err(anyhow::anyhow!(
                "Bitrate bounds are invalid: min {} / max {}",
                video.min_bitrate,
                video.max_bitrate
            ));
        }

        let valid_ratio = |r: f64| r > 0.0 && r <= 1.0;
        if !valid_ratio(video.target_ratio) || !valid_ratio(video.max_ratio) {
            return Err(anyhow::anyhow!("Bitrate ratios must be between 0.0 and 1.0"));
        }

        if video.target_ratio > video.max_ratio {
            return Err(anyhow::anyhow!("Target bitrate ratio must not exceed max ratio"));
        }

        if video.fallback_fps == 0 {
            return Err(anyhow::anyhow!("Fallback frame rate must be greater than 0"));
        }

        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(anyhow::anyhow!(
                "Unknown log level '{}' (expected one of {})",
                self.general.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        if self.general.log_file.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Log file path must not be empty"));
        }

        let mut seen = HashSet::new();
        let ext = &self.extensions;
        for name in ext.image.iter().chain(&ext.video).chain(&ext.other) {
            if !seen.insert(name.to_lowercase()) {
                return Err(anyhow::anyhow!("Extension '{}' appears in more than one set", name));
            }
        }

        Ok(())
    }

    /// Number of migration workers to start
    pub fn worker_count(&self) -> usize {
        if self.general.threads > 0 {
            return self.general.threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(1)
    }

    /// Load configuration from file, defaults when the file does not exist
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config file {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Locations searched for `config.json`, in priority order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            paths.push(exe_dir.join(CONFIG_FILE_NAME));
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(CONFIG_FILE_NAME));
            if let Some(parent) = cwd.parent() {
                paths.push(parent.join(CONFIG_FILE_NAME));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("media-migrator").join(CONFIG_FILE_NAME));
        }

        paths
    }

    /// Load the first config file found in [`Config::search_paths`]
    pub fn discover() -> Result<(Self, Option<PathBuf>)> {
        for candidate in Self::search_paths() {
            if candidate.is_file() {
                debug!("Using config file: {}", candidate.display());
                return Ok((Self::from_file(&candidate)?, Some(candidate)));
            }
        }
        debug!("No config file found, using defaults");
        Ok((Self::default(), None))
    }
}
