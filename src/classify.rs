//! # Media Classification
//!
//! Maps file extensions to a media category. Only the name is inspected here;
//! the format-specific decoders validate the content later.

use crate::config::ExtensionConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Category that decides which transcoder handles a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    /// Known non-media file (audio, gif, ...), copied verbatim
    Other,
    /// No extension or an extension outside every set, copied verbatim
    Unknown,
}

impl MediaKind {
    /// Whether files of this kind go through a transcoder
    pub fn is_media(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

/// A file discovered during scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Absolute or root-joined source path
    pub path: PathBuf,
    /// Path relative to the source root
    pub relative: PathBuf,
    pub kind: MediaKind,
    /// Lowercased extension without the dot
    pub extension: Option<String>,
}

impl MediaFile {
    pub fn new(path: PathBuf, root: &Path, classifier: &MediaClassifier) -> Self {
        let relative = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.file_name().map(PathBuf::from).unwrap_or_default());
        let extension = normalized_extension(&path);
        let kind = classifier.classify(&path);

        Self {
            path,
            relative,
            kind,
            extension,
        }
    }
}

/// Lowercased extension of a path, if any
pub fn normalized_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Case-insensitive extension lookup over three configurable sets
#[derive(Debug, Clone)]
pub struct MediaClassifier {
    image: HashSet<String>,
    video: HashSet<String>,
    other: HashSet<String>,
}

impl MediaClassifier {
    pub fn new(extensions: &ExtensionConfig) -> Self {
        let lower = |items: &[String]| {
            items
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect::<HashSet<_>>()
        };

        Self {
            image: lower(&extensions.image),
            video: lower(&extensions.video),
            other: lower(&extensions.other),
        }
    }

    pub fn classify(&self, path: &Path) -> MediaKind {
        let Some(ext) = normalized_extension(path) else {
            return MediaKind::Unknown;
        };

        if self.image.contains(&ext) {
            MediaKind::Image
        } else if self.video.contains(&ext) {
            MediaKind::Video
        } else if self.other.contains(&ext) {
            MediaKind::Other
        } else {
            MediaKind::Unknown
        }
    }
}

impl Default for MediaClassifier {
    fn default() -> Self {
        Self::new(&ExtensionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_ignores_case() {
        let classifier = MediaClassifier::default();
        let config = ExtensionConfig::default();

        let cases = [
            (&config.image, MediaKind::Image),
            (&config.video, MediaKind::Video),
            (&config.other, MediaKind::Other),
        ];

        for (set, expected) in cases {
            for ext in set {
                let upper = ext.to_uppercase();
                let mixed: String = ext
                    .chars()
                    .enumerate()
                    .map(|(i, c)| if i % 2 == 0 { c.to_ascii_uppercase() } else { c })
                    .collect();
                for variant in [ext.clone(), upper, mixed] {
                    let name = format!("file.{}", variant);
                    assert_eq!(classifier.classify(Path::new(&name)), expected, "{}", name);
                }
            }
        }
    }

    #[test]
    fn test_unknown_extensions() {
        let classifier = MediaClassifier::default();
        assert_eq!(classifier.classify(Path::new("README")), MediaKind::Unknown);
        assert_eq!(classifier.classify(Path::new("notes.txt")), MediaKind::Unknown);
        assert_eq!(classifier.classify(Path::new(".hidden")), MediaKind::Unknown);
        assert_eq!(classifier.classify(Path::new("archive.tar.GZ")), MediaKind::Unknown);
    }

    #[test]
    fn test_configured_sets() {
        let extensions = ExtensionConfig {
            image: vec![".WEBP".to_string()],
            video: vec!["webm".to_string()],
            other: vec![],
        };
        let classifier = MediaClassifier::new(&extensions);
        assert_eq!(classifier.classify(Path::new("a.webp")), MediaKind::Image);
        assert_eq!(classifier.classify(Path::new("a.WebM")), MediaKind::Video);
        assert_eq!(classifier.classify(Path::new("a.jpg")), MediaKind::Unknown);
    }

    #[test]
    fn test_media_file_relative_path() {
        let classifier = MediaClassifier::default();
        let root = Path::new("/src");
        let file = MediaFile::new(PathBuf::from("/src/2021/Trip/IMG_1.JPG"), root, &classifier);
        assert_eq!(file.relative, PathBuf::from("2021/Trip/IMG_1.JPG"));
        assert_eq!(file.kind, MediaKind::Image);
        assert_eq!(file.extension.as_deref(), Some("jpg"));
    }
}
