//! Format dispatch: from a file path to the cleaner that handles it.
//!
//! The [`Registry`] is a static table mapping media types to cleaner
//! factories. [`dispatch`] detects a file's media type and builds the
//! matching cleaner. A factory that rejects the file (it only looked like the
//! format) is reported as "recognized but unsupported", never as an error.

use std::path::Path;
use std::sync::OnceLock;

use crate::Result;
use crate::cleaner::Cleaner;
use crate::containers;
use crate::format::{self, Detection, media_type};
use crate::leaf::{
    CssCleaner, FlacCleaner, HarmlessCleaner, HtmlCleaner, JpegCleaner, PngCleaner,
    TorrentCleaner,
};
use crate::policy::CleanOptions;

/// Builds a cleaner bound to one file.
pub type Factory = fn(&Path, &CleanOptions) -> Result<Box<dyn Cleaner>>;

/// One registered cleaner.
#[derive(Clone, Copy)]
pub struct Registration {
    /// Short cleaner name, used in logs.
    pub name: &'static str,
    /// Media types the cleaner accepts.
    pub media_types: &'static [&'static str],
    /// Constructor.
    pub factory: Factory,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("media_types", &self.media_types)
            .finish_non_exhaustive()
    }
}

/// The table of every available cleaner.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<Registration>,
}

fn zip(path: &Path, options: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(containers::zip(path, options)?))
}

fn tar(path: &Path, options: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(containers::tar(path, options)?))
}

fn office(path: &Path, options: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(containers::office(path, options)?))
}

fn opendocument(path: &Path, options: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(containers::opendocument(path, options)?))
}

fn epub(path: &Path, options: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(containers::epub(path, options)?))
}

fn harmless(path: &Path, _: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(HarmlessCleaner::new(path)?))
}

fn torrent(path: &Path, _: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(TorrentCleaner::new(path)?))
}

fn png(path: &Path, _: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(PngCleaner::new(path)?))
}

fn jpeg(path: &Path, _: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(JpegCleaner::new(path)?))
}

fn flac(path: &Path, _: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(FlacCleaner::new(path)?))
}

fn html(path: &Path, _: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(HtmlCleaner::new(path)?))
}

fn css(path: &Path, _: &CleanOptions) -> Result<Box<dyn Cleaner>> {
    Ok(Box::new(CssCleaner::new(path)?))
}

impl Registry {
    /// Every cleaner this crate provides.
    pub fn standard() -> Self {
        let entry = |name: &'static str, media_types: &'static [&'static str], factory: Factory| Registration {
            name,
            media_types,
            factory,
        };
        Self {
            entries: vec![
                entry("zip", &[media_type::ZIP], zip),
                entry("tar", &[media_type::TAR], tar),
                entry("office", media_type::OFFICE, office),
                entry("opendocument", media_type::OPENDOCUMENT, opendocument),
                entry("epub", &[media_type::EPUB], epub),
                entry(
                    "harmless",
                    &[
                        media_type::XML,
                        media_type::TEXT_XML,
                        media_type::RDF,
                        media_type::RELATIONSHIPS,
                    ],
                    harmless,
                ),
                entry("torrent", &[media_type::TORRENT], torrent),
                entry("png", &[media_type::PNG], png),
                entry("jpeg", &[media_type::JPEG], jpeg),
                entry("flac", &[media_type::FLAC, "audio/x-flac"], flac),
                entry("html", &[media_type::HTML, media_type::XHTML, media_type::NCX], html),
                entry("css", &[media_type::CSS], css),
            ],
        }
    }

    /// Shared instance of [`Registry::standard`].
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Self::standard)
    }

    /// Finds the cleaner registered for a media type.
    pub fn lookup(&self, media_type: &str) -> Option<&Registration> {
        self.entries
            .iter()
            .find(|e| e.media_types.contains(&media_type))
    }

    /// Every registered media type.
    pub fn media_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().flat_map(|e| e.media_types.iter().copied())
    }

    /// Detects `path` and builds its cleaner.
    ///
    /// Returns the cleaner (if any) together with the detected media type:
    /// `(None, Some(_))` means recognized but unsupported, `(None, None)`
    /// means unrecognized.
    pub fn dispatch(
        &self,
        path: &Path,
        options: &CleanOptions,
    ) -> (Option<Box<dyn Cleaner>>, Option<Detection>) {
        if format::is_unsupported_extension(path) {
            log::debug!("{}: extension is never cleaned", path.display());
            return (None, format::detect::detect_from_name(path));
        }

        let Some(detection) = format::detect(path) else {
            log::debug!("{}: unrecognized format", path.display());
            return (None, None);
        };
        let Some(registration) = self.lookup(detection.media_type) else {
            log::debug!("{}: no cleaner for {}", path.display(), detection);
            return (None, Some(detection));
        };

        match (registration.factory)(path, options) {
            Ok(cleaner) => {
                log::debug!("{}: {} cleaner for {}", path.display(), registration.name, detection);
                (Some(cleaner), Some(detection))
            }
            Err(e) => {
                log::debug!(
                    "{}: {} cleaner rejected the file: {}",
                    path.display(),
                    registration.name,
                    e
                );
                (None, Some(detection))
            }
        }
    }
}

/// Builds the cleaner for `path` from the standard registry.
///
/// ```rust,no_run
/// use metastrip::{CleanOptions, dispatch};
/// use std::path::Path;
///
/// let (cleaner, detected) = dispatch(Path::new("report.docx"), &CleanOptions::default());
/// match cleaner {
///     Some(mut cleaner) => cleaner.remove_all()?,
///     None => eprintln!("cannot clean {:?}", detected.map(|d| d.media_type)),
/// }
/// # Ok::<(), metastrip::Error>(())
/// ```
pub fn dispatch(
    path: &Path,
    options: &CleanOptions,
) -> (Option<Box<dyn Cleaner>>, Option<Detection>) {
    Registry::global().dispatch(path, options)
}

/// An optional capability and whether this build includes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// Cargo feature name.
    pub feature: &'static str,
    /// What the feature enables.
    pub provides: &'static str,
    /// Whether it was compiled in.
    pub available: bool,
}

/// Reports which optional capabilities this build has.
pub fn check_dependencies() -> Vec<Dependency> {
    vec![
        Dependency {
            feature: "bzip2",
            provides: "tar.bz2 archives",
            available: cfg!(feature = "bzip2"),
        },
        Dependency {
            feature: "xz",
            provides: "tar.xz archives",
            available: cfg!(feature = "xz"),
        },
        Dependency {
            feature: "images",
            provides: "PNG and JPEG pixel re-encoding",
            available: cfg!(feature = "images"),
        },
        Dependency {
            feature: "parallel",
            provides: "parallel batch cleaning",
            available: cfg!(feature = "parallel"),
        },
    ]
}
