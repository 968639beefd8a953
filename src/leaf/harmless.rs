//! Formats that carry no metadata of their own.

use std::fs;
use std::path::Path;

use super::{LeafFile, leaf_paths};
use crate::Result;
use crate::cleaner::{Cleaner, Metadata};

/// Copies the input unchanged.
#[derive(Debug)]
pub struct HarmlessCleaner {
    file: LeafFile,
}

impl HarmlessCleaner {
    /// Binds the cleaner to an existing regular file.
    pub fn new(path: &Path) -> Result<Self> {
        if !fs::metadata(path)?.is_file() {
            return Err(crate::Error::InvalidFormat(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(Self {
            file: LeafFile::new(path),
        })
    }
}

impl Cleaner for HarmlessCleaner {
    leaf_paths!();

    fn get_meta(&self) -> Result<Metadata> {
        Ok(Metadata::new())
    }

    fn remove_all(&mut self) -> Result<()> {
        self.file.write_output(&self.file.read()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_copy() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.xml");
        fs::write(&input, "<a>b</a>").unwrap();

        let mut cleaner = HarmlessCleaner::new(&input).unwrap();
        assert!(cleaner.get_meta().unwrap().is_empty());
        cleaner.remove_all().unwrap();
        assert_eq!(fs::read(cleaner.output_path()).unwrap(), b"<a>b</a>");
    }

    #[test]
    fn test_missing_file() {
        assert!(HarmlessCleaner::new(Path::new("/nonexistent/x.xml")).is_err());
    }
}
