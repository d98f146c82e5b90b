//! # Path Resolution Module
//!
//! Centralizza tutta la logica di calcolo dei path di destinazione.
//! La struttura della sorgente viene replicata sotto la radice di destinazione,
//! con ogni componente ripulito da `PathSanitizer`.
//!
//! ## Collisioni:
//! - Fratelli che dopo la pulizia hanno lo stesso nome (`a b.jpg`, `ab.jpg`)
//!   ricevono un suffisso `_1`, `_2`, ... in ordine di nome sorgente
//! - L'assegnazione dipende solo dal contenuto della directory sorgente, quindi
//!   migrazione e retry calcolano sempre lo stesso path
//! - Collisioni residue tra directory diverse vengono segnalate con un warning

use crate::classify::{MediaFile, MediaKind};
use crate::error::MigrateError;
use crate::sanitize::PathSanitizer;
use std::collections::{HashMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Longest destination path accepted, in bytes
pub const MAX_PATH_BYTES: usize = 4096;

/// Cleaned name of one source entry: `(plain cleaned name, name after collision suffix)`
type NameMap = HashMap<OsString, (String, String)>;

/// Collision-free names of the entries of one source directory
#[derive(Debug, Default)]
struct DirectoryNames {
    files: NameMap,
    dirs: NameMap,
}

/// Utility per calcolare i path di output in modo centralizzato
#[derive(Debug)]
pub struct PathResolver {
    destination_root: PathBuf,
    heic_to_jpeg: bool,
    listings: Mutex<HashMap<PathBuf, Arc<DirectoryNames>>>,
    /// destination -> source, for every path resolved in this run
    claims: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl PathResolver {
    pub fn new(destination_root: impl Into<PathBuf>, heic_to_jpeg: bool) -> Self {
        Self {
            destination_root: destination_root.into(),
            heic_to_jpeg,
            listings: Mutex::new(HashMap::new()),
            claims: Mutex::new(HashMap::new()),
        }
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// Calcola il path di destinazione per un file scansionato
    pub fn destination_for(&self, file: &MediaFile) -> Result<PathBuf, MigrateError> {
        let mut destination = self.destination_root.clone();
        let mut source_dir = file
            .path
            .ancestors()
            .nth(file.relative.components().count())
            .map(Path::to_path_buf);

        if let Some(parent) = file.relative.parent() {
            for component in parent.components() {
                // Only normal components survive, `..` cannot escape the root.
                if let Component::Normal(name) = component {
                    let cleaned = PathSanitizer::clean(&name.to_string_lossy(), true);
                    if !cleaned.is_empty() {
                        let listing = source_dir.as_deref().map(|dir| self.names_in(dir));
                        destination.push(resolved(listing.as_deref().map(|l| &l.dirs), name, cleaned));
                    }
                    source_dir = source_dir.map(|dir| dir.join(name));
                }
            }
        }

        let file_name = self.file_name_for(file);
        let listing = source_dir.as_deref().map(|dir| self.names_in(dir));
        let original = file.relative.file_name().or_else(|| file.path.file_name());
        match original {
            Some(original) => destination.push(resolved(listing.as_deref().map(|l| &l.files), original, file_name)),
            None => destination.push(file_name),
        }

        let len = destination.as_os_str().len();
        if len > MAX_PATH_BYTES {
            return Err(MigrateError::PathTooLong {
                path: destination,
                len,
            });
        }

        self.claim(&destination, &file.path);
        debug!("Resolved output path: {} -> {}", file.path.display(), destination.display());
        Ok(destination)
    }

    /// Cleaned file name, with the extension switched for HEIC conversion
    fn file_name_for(&self, file: &MediaFile) -> String {
        let name = file
            .relative
            .file_name()
            .or_else(|| file.path.file_name())
            .map(Path::new)
            .unwrap_or_else(|| Path::new(""));
        let converts_heic = file.kind == MediaKind::Image && self.converts_heic(name);
        clean_file_name(name, converts_heic)
    }

    fn converts_heic(&self, name: &Path) -> bool {
        self.heic_to_jpeg
            && name
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("heic") || ext.eq_ignore_ascii_case("heif"))
                .unwrap_or(false)
    }

    fn lock_listings(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<DirectoryNames>>> {
        self.listings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Names of `dir`, listed once per run. An unreadable directory has no collisions.
    fn names_in(&self, dir: &Path) -> Arc<DirectoryNames> {
        if let Some(names) = self.lock_listings().get(dir) {
            return names.clone();
        }

        let names = Arc::new(self.list(dir));
        self.lock_listings()
            .entry(dir.to_path_buf())
            .or_insert(names)
            .clone()
    }

    fn list(&self, dir: &Path) -> DirectoryNames {
        let Ok(entries) = fs::read_dir(dir) else {
            return DirectoryNames::default();
        };

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let name = entry.file_name();
            if file_type.is_dir() {
                let cleaned = PathSanitizer::clean(&name.to_string_lossy(), true);
                if !cleaned.is_empty() {
                    dirs.push((name, cleaned));
                }
            } else if file_type.is_file() {
                let cleaned = clean_file_name(Path::new(&name), self.converts_heic(Path::new(&name)));
                files.push((name, cleaned));
            }
        }

        DirectoryNames {
            files: disambiguate(files, false),
            dirs: disambiguate(dirs, true),
        }
    }

    fn claim(&self, destination: &Path, source: &Path) {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        match claims.get(destination) {
            Some(owner) if owner != source => warn!(
                "{} and {} both map to {}",
                owner.display(),
                source.display(),
                destination.display()
            ),
            Some(_) => {}
            None => {
                claims.insert(destination.to_path_buf(), source.to_path_buf());
            }
        }
    }
}

fn clean_file_name(name: &Path, converts_heic: bool) -> String {
    let stem = name.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    if converts_heic {
        PathSanitizer::clean_file_name(&stem, Some("jpg"))
    } else {
        let extension = name.extension().map(|ext| ext.to_string_lossy());
        PathSanitizer::clean_file_name(&stem, extension.as_deref())
    }
}

/// Final name of `original`, or `cleaned` when the listing disagrees or has no entry
fn resolved(names: Option<&NameMap>, original: &OsStr, cleaned: String) -> String {
    match names.and_then(|names| names.get(original)) {
        Some((plain, unique)) if *plain == cleaned => unique.clone(),
        _ => cleaned,
    }
}

/// Give every entry a unique cleaned name, first in source-name order keeps the plain one
fn disambiguate(mut entries: Vec<(OsString, String)>, is_directory: bool) -> NameMap {
    entries.sort();
    let plain: HashSet<String> = entries.iter().map(|(_, cleaned)| cleaned.clone()).collect();
    let mut used = HashSet::new();
    let mut names = HashMap::with_capacity(entries.len());

    for (original, cleaned) in entries {
        let unique = if used.insert(cleaned.clone()) {
            cleaned.clone()
        } else {
            let unique = (1u32..)
                .map(|n| with_suffix(&cleaned, n, is_directory))
                .find(|candidate| !plain.contains(candidate) && !used.contains(candidate))
                .unwrap_or_else(|| cleaned.clone());
            used.insert(unique.clone());
            unique
        };
        names.insert(original, (cleaned, unique));
    }
    names
}

/// `photo.jpg` -> `photo_2.jpg`, `album` -> `album_2`
fn with_suffix(name: &str, n: u32, is_directory: bool) -> String {
    match name.rfind('.') {
        Some(dot) if !is_directory && dot > 0 => format!("{}_{}{}", &name[..dot], n, &name[dot..]),
        _ => format!("{}_{}", name, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::MediaClassifier;
    use tempfile::TempDir;

    fn media(relative: &str) -> MediaFile {
        let root = Path::new("/src");
        MediaFile::new(root.join(relative), root, &MediaClassifier::default())
    }

    #[test]
    fn test_mirrors_relative_structure() {
        let resolver = PathResolver::new("/dst", false);
        let dest = resolver.destination_for(&media("2019/holiday/a.jpg")).unwrap();
        assert_eq!(dest, PathBuf::from("/dst/2019/holiday/a.jpg"));
    }

    #[test]
    fn test_sanitizes_components() {
        let resolver = PathResolver::new("/dst", false);
        let dest = resolver
            .destination_for(&media("My Trip, 2020/día [1]/my photo.JPG"))
            .unwrap();
        assert_eq!(dest, PathBuf::from("/dst/My Trip 2020/día 1/myphoto.JPG"));
    }

    #[test]
    fn test_drops_empty_directories() {
        let resolver = PathResolver::new("/dst", false);
        let dest = resolver.destination_for(&media(".../clip.mp4")).unwrap();
        assert_eq!(dest, PathBuf::from("/dst/clip.mp4"));
    }

    #[test]
    fn test_heic_conversion_changes_extension() {
        let converting = PathResolver::new("/dst", true);
        let keeping = PathResolver::new("/dst", false);
        let file = media("phone/IMG_0001.HEIC");

        assert_eq!(
            converting.destination_for(&file).unwrap(),
            PathBuf::from("/dst/phone/IMG_0001.jpg")
        );
        assert_eq!(
            keeping.destination_for(&file).unwrap(),
            PathBuf::from("/dst/phone/IMG_0001.HEIC")
        );
    }

    #[test]
    fn test_rejects_overlong_paths() {
        let resolver = PathResolver::new("/dst", false);
        let deep = vec!["directory"; 500].join("/");
        let err = resolver
            .destination_for(&media(&format!("{}/a.jpg", deep)))
            .unwrap_err();
        assert!(matches!(err, MigrateError::PathTooLong { .. }));
    }

    fn touch(root: &Path, relative: &str) -> MediaFile {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"x").unwrap();
        MediaFile::new(path, root, &MediaClassifier::default())
    }

    #[test]
    fn test_colliding_siblings_get_suffixes() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let ab = touch(&src, "album/ab.jpg");
        let spaced = touch(&src, "album/a b.jpg");
        let bracketed = touch(&src, "album/[ab].jpg");
        let other = touch(&src, "album/c.jpg");

        let resolver = PathResolver::new("/dst", false);
        let names: Vec<PathBuf> = [&ab, &spaced, &bracketed, &other]
            .iter()
            .map(|f| resolver.destination_for(f).unwrap())
            .collect();

        // source-name order: "[ab].jpg" < "a b.jpg" < "ab.jpg"
        assert_eq!(names[2], PathBuf::from("/dst/album/ab.jpg"));
        assert_eq!(names[1], PathBuf::from("/dst/album/ab_1.jpg"));
        assert_eq!(names[0], PathBuf::from("/dst/album/ab_2.jpg"));
        assert_eq!(names[3], PathBuf::from("/dst/album/c.jpg"));
    }

    #[test]
    fn test_collision_names_are_stable_across_resolvers() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let spaced = touch(&src, "a b.jpg");
        let ab = touch(&src, "ab.jpg");
        // a natural name that looks like a suffixed one is never reused
        touch(&src, "ab_1.jpg");

        let migrate = PathResolver::new("/dst", false);
        let first = migrate.destination_for(&ab).unwrap();
        let second = migrate.destination_for(&spaced).unwrap();

        // a fresh resolver, as in a retry, sees them in the opposite order
        let retry = PathResolver::new("/dst", false);
        assert_eq!(retry.destination_for(&spaced).unwrap(), second);
        assert_eq!(retry.destination_for(&ab).unwrap(), first);

        assert_eq!(second, PathBuf::from("/dst/ab.jpg"));
        assert_eq!(first, PathBuf::from("/dst/ab_2.jpg"));
    }

    #[test]
    fn test_colliding_directories_get_suffixes() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dotted = touch(&src, "v.1/a.jpg");
        let plain = touch(&src, "v1/a.jpg");

        let resolver = PathResolver::new("/dst", false);
        assert_eq!(resolver.destination_for(&dotted).unwrap(), PathBuf::from("/dst/v1/a.jpg"));
        assert_eq!(resolver.destination_for(&plain).unwrap(), PathBuf::from("/dst/v1_1/a.jpg"));
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix("photo.jpg", 2, false), "photo_2.jpg");
        assert_eq!(with_suffix("archive.tar.gz", 1, false), "archive.tar_1.gz");
        assert_eq!(with_suffix("README", 1, false), "README_1");
        assert_eq!(with_suffix(".hidden", 1, false), ".hidden_1");
        assert_eq!(with_suffix("v1", 3, true), "v1_3");
    }
}
