//! Member path type with validation for secure path handling.

use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Maximum length for member paths (in bytes).
///
/// A malicious container can declare arbitrarily long names; 32KB is well
/// above any file system path limit.
const MAX_PATH_LENGTH: usize = 32768;

/// A validated, container-relative member path.
///
/// `MemberPath` normalizes a raw entry name and validates that:
/// - No NUL bytes are present
/// - The path is not absolute (no leading `/`, `\` or drive letter)
/// - No `..` segments exist, with either separator
/// - No empty segments exist (no `a//b`)
///
/// `.` segments (as in TAR names like `./docs/a.txt`) and a trailing `/` are
/// dropped during normalization.
///
/// # Examples
///
/// ```
/// use metastrip::MemberPath;
///
/// let path = MemberPath::new("./word/document.xml").unwrap();
/// assert_eq!(path.as_str(), "word/document.xml");
///
/// assert!(MemberPath::new("../secret").is_err());
/// assert!(MemberPath::new("/etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberPath(String);

impl MemberPath {
    /// Creates a new `MemberPath` from a raw entry name, validating it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathTraversal`] for absolute or escaping paths and
    /// [`Error::InvalidMemberPath`] for empty or otherwise malformed ones.
    pub fn new(raw: &str) -> Result<Self> {
        if raw.contains('\0') {
            return Err(Error::InvalidMemberPath("contains NUL byte".into()));
        }

        if raw.len() > MAX_PATH_LENGTH {
            return Err(Error::InvalidMemberPath(format!(
                "path exceeds maximum length of {} bytes",
                MAX_PATH_LENGTH
            )));
        }

        if is_absolute(raw) {
            return Err(Error::PathTraversal {
                path: raw.to_string(),
            });
        }

        // Backslashes are not separators in ZIP/TAR, but they are on the
        // machine that may later unpack the output.
        if raw.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(Error::PathTraversal {
                path: raw.to_string(),
            });
        }

        let trimmed = raw.strip_suffix('/').unwrap_or(raw);
        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            match segment {
                "." => continue,
                "" => {
                    return Err(Error::InvalidMemberPath(format!(
                        "empty segment in '{}'",
                        raw
                    )));
                }
                _ => segments.push(segment),
            }
        }

        if segments.is_empty() {
            return Err(Error::InvalidMemberPath(format!(
                "'{}' does not name a member",
                raw
            )));
        }

        Ok(Self(segments.join("/")))
    }

    /// Returns the path as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the file name (last segment) of this path.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns the file extension, if any.
    ///
    /// ```
    /// use metastrip::MemberPath;
    ///
    /// assert_eq!(MemberPath::new("OEBPS/content.opf").unwrap().extension(), Some("opf"));
    /// assert_eq!(MemberPath::new("_rels/.rels").unwrap().extension(), None);
    /// ```
    pub fn extension(&self) -> Option<&str> {
        let file_name = self.file_name();
        let dot_pos = file_name.rfind('.')?;
        if dot_pos == 0 {
            None
        } else {
            Some(&file_name[dot_pos + 1..])
        }
    }

    /// Returns the number of parent directories above this member.
    pub fn depth(&self) -> usize {
        self.0.matches('/').count()
    }

    /// Resolves this member under an extraction root.
    ///
    /// Validation guarantees the result stays inside `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, s| acc.join(s))
    }
}

fn is_absolute(raw: &str) -> bool {
    if raw.starts_with('/') || raw.starts_with('\\') {
        return true;
    }
    // Windows drive letters (C:\, D:/)
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

impl AsRef<str> for MemberPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for MemberPath {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_nested_path() {
        let path = MemberPath::new("word/media/image1.png").unwrap();
        assert_eq!(path.as_str(), "word/media/image1.png");
        assert_eq!(path.file_name(), "image1.png");
        assert_eq!(path.extension(), Some("png"));
        assert_eq!(path.depth(), 2);
    }

    #[test]
    fn test_current_dir_segments_are_dropped() {
        assert_eq!(MemberPath::new("./a/./b.txt").unwrap().as_str(), "a/b.txt");
    }

    #[test]
    fn test_trailing_slash_is_dropped() {
        assert_eq!(MemberPath::new("Thumbnails/").unwrap().as_str(), "Thumbnails");
    }

    #[test]
    fn test_content_types_name_is_valid() {
        let path = MemberPath::new("[Content_Types].xml").unwrap();
        assert_eq!(path.extension(), Some("xml"));
    }

    #[test]
    fn test_traversal_rejected() {
        for raw in [
            "../etc/passwd",
            "a/../../b",
            "./../../tmp/evil",
            "..",
            "a\\..\\b",
        ] {
            let err = MemberPath::new(raw).unwrap_err();
            assert!(
                matches!(err, Error::PathTraversal { .. }),
                "{} should be rejected as traversal, got {:?}",
                raw,
                err
            );
        }
    }

    #[test]
    fn test_absolute_rejected() {
        for raw in ["/etc/passwd", "\\windows", "C:\\boot.ini", "c:/x"] {
            assert!(matches!(
                MemberPath::new(raw),
                Err(Error::PathTraversal { .. })
            ));
        }
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(matches!(
            MemberPath::new(""),
            Err(Error::InvalidMemberPath(_))
        ));
        assert!(matches!(
            MemberPath::new("./"),
            Err(Error::InvalidMemberPath(_))
        ));
        assert!(matches!(
            MemberPath::new("a//b"),
            Err(Error::InvalidMemberPath(_))
        ));
        assert!(matches!(
            MemberPath::new("a\0b"),
            Err(Error::InvalidMemberPath(_))
        ));
    }

    #[test]
    fn test_dotfile_has_no_extension() {
        assert_eq!(MemberPath::new("_rels/.rels").unwrap().extension(), None);
    }

    #[test]
    fn test_under_stays_in_root() {
        let root = Path::new("/tmp/scratch");
        let path = MemberPath::new("a/b/c.xml").unwrap();
        assert_eq!(path.under(root), Path::new("/tmp/scratch/a/b/c.xml"));
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut paths = vec![
            MemberPath::new("word/document.xml").unwrap(),
            MemberPath::new("[Content_Types].xml").unwrap(),
            MemberPath::new("_rels/.rels").unwrap(),
        ];
        paths.sort();
        let names: Vec<_> = paths.iter().map(|p| p.as_str()).collect();
        assert_eq!(names, ["[Content_Types].xml", "_rels/.rels", "word/document.xml"]);
    }
}
