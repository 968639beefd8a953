//! The contract every format cleaner satisfies.
//!
//! A cleaner is bound to one input file at construction. Construction is the
//! only place a cleaner may reject a file as "not actually my format";
//! afterwards [`Cleaner::get_meta`] is read-only and [`Cleaner::remove_all`]
//! writes a sibling `<stem>.cleaned<ext>` file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::Result;

/// Value reported for metadata that could not be decoded.
pub const HARMFUL_CONTENT: &str = "harmful content";

/// Metadata found in a file, keyed by field (or member) name.
pub type Metadata = BTreeMap<String, MetaValue>;

/// One metadata value: either text or, for containers, a nested mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaValue {
    /// A plain value.
    Text(String),
    /// Metadata of a nested member.
    Nested(Metadata),
}

impl MetaValue {
    /// Returns the text value, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            MetaValue::Nested(_) => None,
        }
    }

    /// Returns the nested mapping, if this is one.
    pub fn as_nested(&self) -> Option<&Metadata> {
        match self {
            MetaValue::Nested(m) => Some(m),
            MetaValue::Text(_) => None,
        }
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<Metadata> for MetaValue {
    fn from(m: Metadata) -> Self {
        MetaValue::Nested(m)
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Text(s) => f.write_str(s),
            MetaValue::Nested(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A format-specific metadata cleaner bound to one file.
pub trait Cleaner: Send {
    /// The input file.
    fn path(&self) -> &Path;

    /// Where [`remove_all`](Cleaner::remove_all) writes its result.
    fn output_path(&self) -> &Path;

    /// Returns the metadata present in the input. Never modifies it.
    fn get_meta(&self) -> Result<Metadata>;

    /// Writes a metadata-free copy of the input to [`output_path`](Cleaner::output_path).
    ///
    /// On error no output file is left behind.
    fn remove_all(&mut self) -> Result<()>;

    /// A faster variant that may leave some metadata in place.
    ///
    /// Defaults to [`remove_all`](Cleaner::remove_all).
    fn remove_all_lightweight(&mut self) -> Result<()> {
        self.remove_all()
    }
}

/// Suffixes treated as a single extension when deriving output names.
const COMPOUND_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz"];

/// Derives the `<stem>.cleaned<ext>` output path for an input file.
///
/// ```rust
/// use metastrip::cleaner::cleaned_path;
/// use std::path::Path;
///
/// assert_eq!(cleaned_path(Path::new("/tmp/report.docx")), Path::new("/tmp/report.cleaned.docx"));
/// assert_eq!(cleaned_path(Path::new("backup.tar.gz")), Path::new("backup.cleaned.tar.gz"));
/// assert_eq!(cleaned_path(Path::new("README")), Path::new("README.cleaned"));
/// ```
pub fn cleaned_path(path: &Path) -> PathBuf {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return path.with_extension("cleaned");
    };

    let lower = name.to_ascii_lowercase();
    let split = COMPOUND_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext) && lower.len() > ext.len())
        .map(|ext| name.len() - ext.len())
        .or_else(|| name.rfind('.').filter(|&pos| pos > 0));

    let cleaned = match split {
        Some(pos) => format!("{}.cleaned{}", &name[..pos], &name[pos..]),
        None => format!("{}.cleaned", name),
    };
    path.with_file_name(cleaned)
}
