//! # Path Sanitizer
//!
//! Strips reserved characters from single path components before they are
//! used to build destination paths.

/// Placeholder used when a file name is empty after cleaning
pub const EMPTY_FILENAME: &str = "Unnamed";

/// Characters removed from file name components
const FILE_DENYLIST: &[char] = &[
    ' ', '%', ':', '/', ',', '\\', '{', '}', '~', '[', ']', '<', '>', '*', '?',
    'č', 'ć', 'ž', 'đ', 'š', 'Č', 'Ć', 'Ž', 'Š', 'Đ',
];

/// Characters removed from directory components (no dots, spaces allowed)
const DIR_DENYLIST: &[char] = &[
    '%', ':', '/', ',', '.', '\\', '{', '}', '~', '[', ']', '<', '>', '*', '?',
    'č', 'ć', 'ž', 'đ', 'š', 'Č', 'Ć', 'Ž', 'Š', 'Đ',
];

/// Stateless component cleaner
pub struct PathSanitizer;

impl PathSanitizer {
    /// Remove denylisted characters from one path component.
    ///
    /// An empty result becomes [`EMPTY_FILENAME`] for files and stays empty for
    /// directories, so callers can drop that component from the mirrored path.
    pub fn clean(name: &str, is_directory: bool) -> String {
        let denylist = if is_directory { DIR_DENYLIST } else { FILE_DENYLIST };
        let cleaned: String = name.chars().filter(|c| !denylist.contains(c)).collect();

        if cleaned.is_empty() && !is_directory {
            EMPTY_FILENAME.to_string()
        } else {
            cleaned
        }
    }

    /// Clean a file name while keeping its extension intact.
    ///
    /// `"my photo [1].JPG"` becomes `"myphoto1.JPG"`; a stem that cleans to
    /// nothing becomes `"Unnamed.JPG"`.
    pub fn clean_file_name(stem: &str, extension: Option<&str>) -> String {
        let stem = Self::clean(stem, false);
        match extension {
            Some(ext) if !ext.is_empty() => {
                let ext = Self::clean(ext, false);
                if ext == EMPTY_FILENAME {
                    stem
                } else {
                    format!("{}.{}", stem, ext)
                }
            }
            _ => stem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_file_strips_denylist() {
        assert_eq!(PathSanitizer::clean("my photo [1]", false), "myphoto1");
        assert_eq!(PathSanitizer::clean("a:b*c?d", false), "abcd");
        assert_eq!(PathSanitizer::clean("čevapi", false), "evapi");
    }

    #[test]
    fn test_clean_file_keeps_dots() {
        assert_eq!(PathSanitizer::clean("v1.2 final", false), "v1.2final");
    }

    #[test]
    fn test_clean_directory_strips_dots_keeps_spaces() {
        assert_eq!(PathSanitizer::clean("Summer 2021.backup", true), "Summer 2021backup");
        assert_eq!(PathSanitizer::clean("a/b\\c", true), "abc");
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(PathSanitizer::clean("   ", false), EMPTY_FILENAME);
        assert_eq!(PathSanitizer::clean("...", true), "");
        assert_eq!(PathSanitizer::clean("", true), "");
        assert_eq!(PathSanitizer::clean("", false), EMPTY_FILENAME);
    }

    #[test]
    fn test_clean_file_name_keeps_extension() {
        assert_eq!(PathSanitizer::clean_file_name("my photo", Some("JPG")), "myphoto.JPG");
        assert_eq!(PathSanitizer::clean_file_name("[]", Some("png")), "Unnamed.png");
        assert_eq!(PathSanitizer::clean_file_name("README", None), "README");
    }
}
