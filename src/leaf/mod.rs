//! Leaf format cleaners.
//!
//! Leaves are the formats a container's members usually bottom out in. Each
//! one parses its input at construction (rejecting files that are not really
//! of its format), reports what it found, and writes a cleaned copy.

pub mod flac;
pub mod harmless;
pub mod jpeg;
pub mod png;
pub mod torrent;
pub mod web;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::Result;
use crate::cleaner::{self, Metadata};

pub use flac::FlacCleaner;
pub use harmless::HarmlessCleaner;
pub use jpeg::JpegCleaner;
pub use png::PngCleaner;
pub use torrent::TorrentCleaner;
pub use web::{CssCleaner, HtmlCleaner};

/// Input and output locations of a leaf cleaner.
#[derive(Debug, Clone)]
pub(crate) struct LeafFile {
    path: PathBuf,
    output: PathBuf,
}

impl LeafFile {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            output: cleaner::cleaned_path(path),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn output(&self) -> &Path {
        &self.output
    }

    pub(crate) fn read(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Writes the output through a temporary sibling, so a failed write
    /// never leaves a partial file at the output path.
    pub(crate) fn write_output(&self, data: &[u8]) -> Result<()> {
        let dir = match self.output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.output).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Decodes a TIFF-structured EXIF block into `tag -> value` pairs.
///
/// Thumbnail fields are prefixed so they do not shadow the primary image's.
pub(crate) fn exif_metadata(tiff: Vec<u8>) -> std::result::Result<Metadata, exif::Error> {
    let exif = exif::Reader::new().read_raw(tiff)?;
    let mut meta = Metadata::new();
    for field in exif.fields() {
        let key = if field.ifd_num == exif::In::PRIMARY {
            field.tag.to_string()
        } else {
            format!("Thumbnail{}", field.tag)
        };
        let value = field.display_value().with_unit(&exif).to_string();
        meta.insert(key, value.into());
    }
    Ok(meta)
}

/// Implements the path accessors of [`Cleaner`](crate::Cleaner) for a type
/// with a `file: LeafFile` field.
macro_rules! leaf_paths {
    () => {
        fn path(&self) -> &std::path::Path {
            self.file.path()
        }

        fn output_path(&self) -> &std::path::Path {
            self.file.output()
        }
    };
}
pub(crate) use leaf_paths;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_output_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.css");
        fs::write(&input, "x").unwrap();
        let file = LeafFile::new(&input);
        assert_eq!(file.output(), dir.path().join("a.cleaned.css"));

        file.write_output(b"first").unwrap();
        file.write_output(b"second").unwrap();
        assert_eq!(fs::read(file.output()).unwrap(), b"second");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
