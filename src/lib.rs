//! # metastrip
//!
//! A pure-Rust library for removing metadata from files, recursively.
//!
//! Containers (ZIP, TAR, MS Office, OpenDocument and EPUB) are unpacked into
//! a private scratch directory, every member is cleaned by the cleaner for
//! its own format, and a new container is written with canonical per-entry
//! records: fixed timestamps, no comments, no owners, deterministic order.
//! Leaf formats (PNG, JPEG, FLAC, torrent, HTML, CSS) are cleaned directly.
//!
//! ## Quick Start
//!
//! ### Cleaning a File
//!
//! ```rust,no_run
//! use metastrip::{CleanOptions, Result, dispatch};
//! use std::path::Path;
//!
//! fn main() -> Result<()> {
//!     let (cleaner, detected) = dispatch(Path::new("report.docx"), &CleanOptions::default());
//!     let Some(mut cleaner) = cleaner else {
//!         eprintln!("no cleaner for {:?}", detected.map(|d| d.media_type));
//!         return Ok(());
//!     };
//!
//!     // Inspect first
//!     for (key, value) in cleaner.get_meta()? {
//!         println!("{}: {}", key, value);
//!     }
//!
//!     // Writes report.cleaned.docx next to the input
//!     cleaner.remove_all()?;
//!     println!("cleaned copy at {}", cleaner.output_path().display());
//!     Ok(())
//! }
//! ```
//!
//! ### Unknown Members
//!
//! A container member that no cleaner recognizes aborts the whole container
//! by default. [`UnknownMemberPolicy`] can drop or keep such members instead:
//!
//! ```rust,no_run
//! use metastrip::{CleanOptions, UnknownMemberPolicy, dispatch};
//! use std::path::Path;
//!
//! let options = CleanOptions::new().unknown_members(UnknownMemberPolicy::Omit);
//! if let (Some(mut cleaner), _) = dispatch(Path::new("bundle.zip"), &options) {
//!     cleaner.remove_all()?;
//! }
//! # Ok::<(), metastrip::Error>(())
//! ```
//!
//! ### Many Files
//!
//! ```rust,no_run
//! use metastrip::CleanOptions;
//! use metastrip::batch::clean_paths;
//!
//! let results = clean_paths(&["a.docx", "b.jpg", "c.flac"], &CleanOptions::default());
//! assert_eq!(results.len(), 3);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `bzip2` | Yes | `.tar.bz2` archives |
//! | `xz` | Yes | `.tar.xz` archives |
//! | `images` | Yes | Deep cleaning of PNG and JPEG by re-encoding pixels |
//! | `parallel` | Yes | Batch cleaning with Rayon |
//!
//! [`dispatch::check_dependencies`] reports which of them a build includes.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`]. A container in which some members
//! could not be cleaned fails with [`Error::CleaningFailed`], which lists
//! every failing member; no partial output is left behind:
//!
//! ```rust,no_run
//! use metastrip::{CleanOptions, Cleaner, Error, dispatch};
//! use std::path::Path;
//!
//! fn clean(path: &Path) -> metastrip::Result<()> {
//!     let (Some(mut cleaner), _) = dispatch(path, &CleanOptions::default()) else {
//!         return Err(Error::UnsupportedFormat { media_type: None });
//!     };
//!     match cleaner.remove_all() {
//!         Err(Error::CleaningFailed { failures, .. }) => {
//!             for failure in &failures {
//!                 eprintln!("{}", failure);
//!             }
//!             Err(Error::CleaningFailed { path: path.display().to_string(), failures })
//!         }
//!         other => other,
//!     }
//! }
//! # fn main() {}
//! ```
//!
//! ## Safety
//!
//! Containers are validated before anything is extracted: absolute or
//! `..` member paths, escaping symlinks, hard links, device nodes,
//! setuid/setgid files and duplicate names are all rejected.
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod archive;
pub mod batch;
pub mod classify;
pub mod cleaner;
pub mod codec;
pub mod containers;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod leaf;
pub mod member_path;
pub mod policy;
pub mod safety;
pub mod timestamp;
pub mod xml;

pub use cleaner::{Cleaner, MetaValue, Metadata};
pub use error::{Error, MemberFailure, Result};
pub use member_path::MemberPath;
pub use policy::{CleanOptions, UnknownMemberPolicy};

// Re-export the dispatcher entry point at crate root for convenience
pub use dispatch::dispatch;
