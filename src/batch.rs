//! Cleaning many independent files at once.
//!
//! Each path gets its own cleaner from the dispatcher and nothing is shared
//! between them, so files can be cleaned concurrently. With the `parallel`
//! feature the work runs on the rayon global pool; without it the paths are
//! processed one after another. Either way results come back in input order.
//!
//! ```rust,no_run
//! use metastrip::CleanOptions;
//! use metastrip::batch::clean_paths;
//! use std::path::PathBuf;
//!
//! let paths = vec![PathBuf::from("a.docx"), PathBuf::from("b.jpg")];
//! for (path, result) in paths.iter().zip(clean_paths(&paths, &CleanOptions::default())) {
//!     match result {
//!         Ok(output) => println!("{} -> {}", path.display(), output.display()),
//!         Err(e) => eprintln!("{}: {}", path.display(), e),
//!     }
//! }
//! ```

use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::dispatch::dispatch;
use crate::policy::CleanOptions;
use crate::{Error, Result};

/// Cleaning depth for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Depth {
    /// [`Cleaner::remove_all`](crate::Cleaner::remove_all).
    #[default]
    Full,
    /// [`Cleaner::remove_all_lightweight`](crate::Cleaner::remove_all_lightweight).
    Lightweight,
}

/// Cleans one file and returns the path of the cleaned copy.
///
/// Fails with [`Error::UnsupportedFormat`] when no cleaner accepts the file.
pub fn clean_file(path: &Path, options: &CleanOptions, depth: Depth) -> Result<PathBuf> {
    let (cleaner, detected) = dispatch(path, options);
    let Some(mut cleaner) = cleaner else {
        return Err(Error::UnsupportedFormat {
            media_type: detected.map(|d| d.media_type.to_string()),
        });
    };
    match depth {
        Depth::Full => cleaner.remove_all()?,
        Depth::Lightweight => cleaner.remove_all_lightweight()?,
    }
    Ok(cleaner.output_path().to_path_buf())
}

/// Fully cleans every path, returning one result per path in input order.
pub fn clean_paths<P>(paths: &[P], options: &CleanOptions) -> Vec<Result<PathBuf>>
where
    P: AsRef<Path> + Sync,
{
    clean_paths_with_depth(paths, options, Depth::Full)
}

/// Like [`clean_paths`], with an explicit cleaning depth.
#[cfg(feature = "parallel")]
pub fn clean_paths_with_depth<P>(
    paths: &[P],
    options: &CleanOptions,
    depth: Depth,
) -> Vec<Result<PathBuf>>
where
    P: AsRef<Path> + Sync,
{
    paths
        .par_iter()
        .map(|path| clean_file(path.as_ref(), options, depth))
        .collect()
}

/// Like [`clean_paths`], with an explicit cleaning depth.
#[cfg(not(feature = "parallel"))]
pub fn clean_paths_with_depth<P>(
    paths: &[P],
    options: &CleanOptions,
    depth: Depth,
) -> Vec<Result<PathBuf>>
where
    P: AsRef<Path> + Sync,
{
    paths
        .iter()
        .map(|path| clean_file(path.as_ref(), options, depth))
        .collect()
}
