//! Media-type detection.
//!
//! Detection works on the file name first, the way the rest of the desktop
//! ecosystem does, and only looks at magic bytes when the name says nothing:
//!
//! 1. Compressed TAR double extensions (`.tar.gz`, `.tgz`, ...), reported as
//!    the TAR media type plus an explicit [`Compression`].
//! 2. A small override table for types the generic database misses.
//! 3. [`mime_guess`].
//! 4. Known signatures, for extensionless files.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::media_type;
use crate::codec::Compression;

/// Extensions that are never cleaned, even when their media type would match
/// a cleaner. Plain text formats in particular cannot be told apart from
/// arbitrary binary content by their name.
const UNSUPPORTED_EXTENSIONS: &[&str] = &[
    "asc", "bat", "brf", "c", "h", "ksh", "pl", "pot", "rdf", "srt", "text", "txt", "wsdl",
    "xpdl", "xsd", "xsl",
];

/// Compressed TAR suffixes, longest first.
const COMPRESSED_TAR: &[(&str, Compression)] = &[
    (".tar.bz2", Compression::Bzip2),
    (".tar.gz", Compression::Gzip),
    (".tar.xz", Compression::Xz),
    (".tbz2", Compression::Bzip2),
    (".tgz", Compression::Gzip),
    (".txz", Compression::Xz),
];

/// Extensions the generic database gets wrong or does not know.
const OVERRIDES: &[(&str, &str)] = &[
    ("epub", media_type::EPUB),
    ("ncx", media_type::NCX),
    ("torrent", media_type::TORRENT),
    ("flac", media_type::FLAC),
    ("opf", media_type::OPF),
    ("rels", media_type::RELATIONSHIPS),
    ("tar", media_type::TAR),
    ("xml", media_type::XML),
];

/// Known content signatures.
const SIGNATURES: &[(&[u8], &str)] = &[
    // PNG: 0x89 'P' 'N' 'G' CR LF SUB LF
    (&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], media_type::PNG),
    // JPEG: SOI followed by a marker
    (&[0xFF, 0xD8, 0xFF], media_type::JPEG),
    // FLAC: 'f' 'L' 'a' 'C'
    (&[0x66, 0x4C, 0x61, 0x43], media_type::FLAC),
    // ZIP: 'P' 'K' 0x03 0x04 (local file header)
    (&[0x50, 0x4B, 0x03, 0x04], media_type::ZIP),
    // ZIP: 'P' 'K' 0x05 0x06 (empty archive)
    (&[0x50, 0x4B, 0x05, 0x06], media_type::ZIP),
];

/// TAR USTAR signature at offset 257.
const TAR_USTAR_SIGNATURE: &[u8] = b"ustar";
const TAR_USTAR_OFFSET: usize = 257;

/// Result of media-type detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Detection {
    /// Media type of the (decompressed) content.
    pub media_type: &'static str,
    /// Compression wrapped around the content. Only ever set for TAR.
    pub compression: Compression,
}

impl Detection {
    /// A detection without compression.
    pub const fn plain(media_type: &'static str) -> Self {
        Self {
            media_type,
            compression: Compression::None,
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.compression {
            Compression::None => f.write_str(self.media_type),
            c => write!(f, "{} ({})", self.media_type, c),
        }
    }
}

fn lowercase_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Returns true if the file's extension is on the never-clean list.
///
/// ```rust
/// use metastrip::format::is_unsupported_extension;
/// use std::path::Path;
///
/// assert!(is_unsupported_extension(Path::new("notes.txt")));
/// assert!(!is_unsupported_extension(Path::new("photo.jpg")));
/// ```
pub fn is_unsupported_extension(path: &Path) -> bool {
    lowercase_extension(path).is_some_and(|ext| UNSUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Detects a media type from the file name alone.
pub fn detect_from_name(path: &Path) -> Option<Detection> {
    let name = lowercase_name(path)?;

    for (suffix, compression) in COMPRESSED_TAR {
        if name.len() > suffix.len() && name.ends_with(suffix) {
            return Some(Detection {
                media_type: media_type::TAR,
                compression: *compression,
            });
        }
    }

    let ext = lowercase_extension(path)?;
    if let Some((_, mt)) = OVERRIDES.iter().find(|(e, _)| *e == ext) {
        return Some(Detection::plain(mt));
    }

    mime_guess::from_ext(&ext)
        .first_raw()
        .map(Detection::plain)
}

/// Detects a media type from leading content bytes.
///
/// ```rust
/// use metastrip::format::detect::detect_from_signature;
///
/// let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
/// assert_eq!(detect_from_signature(&png).map(|d| d.media_type), Some("image/png"));
/// assert!(detect_from_signature(b"plain words").is_none());
/// ```
pub fn detect_from_signature(header: &[u8]) -> Option<Detection> {
    if let Some((_, mt)) = SIGNATURES.iter().find(|(sig, _)| header.starts_with(sig)) {
        return Some(Detection::plain(mt));
    }

    let ustar_end = TAR_USTAR_OFFSET + TAR_USTAR_SIGNATURE.len();
    if header.len() >= ustar_end && &header[TAR_USTAR_OFFSET..ustar_end] == TAR_USTAR_SIGNATURE {
        return Some(Detection::plain(media_type::TAR));
    }

    match Compression::from_signature(header) {
        Compression::None => None,
        // A bare compressed stream is only interesting when it wraps a TAR,
        // which the archive layer verifies on open.
        compression => Some(Detection {
            media_type: media_type::TAR,
            compression,
        }),
    }
}

/// Detects the media type of a file.
///
/// The name is authoritative; content is only sniffed for files without an
/// extension (such as container members named `mimetype` or `LICENSE`).
pub fn detect(path: &Path) -> Option<Detection> {
    if path.extension().is_some() {
        return detect_from_name(path);
    }

    let mut header = Vec::with_capacity(512);
    let read = File::open(path).and_then(|f| f.take(512).read_to_end(&mut header));
    match read {
        Ok(_) => detect_from_signature(&header),
        Err(e) => {
            log::debug!("cannot sniff {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mt(name: &str) -> Option<&'static str> {
        detect_from_name(Path::new(name)).map(|d| d.media_type)
    }

    #[test]
    fn test_compressed_tar_is_orthogonal() {
        let d = detect_from_name(Path::new("backup.tar.gz")).unwrap();
        assert_eq!(d.media_type, media_type::TAR);
        assert_eq!(d.compression, Compression::Gzip);
        assert_eq!(d.to_string(), "application/x-tar (gzip)");

        let d = detect_from_name(Path::new("BACKUP.TXZ")).unwrap();
        assert_eq!(d.compression, Compression::Xz);

        let d = detect_from_name(Path::new("plain.tar")).unwrap();
        assert_eq!(d.compression, Compression::None);
    }

    #[test]
    fn test_overrides() {
        assert_eq!(mt("book.epub"), Some(media_type::EPUB));
        assert_eq!(mt("OEBPS/toc.ncx"), Some(media_type::NCX));
        assert_eq!(mt("linux.torrent"), Some(media_type::TORRENT));
        assert_eq!(mt("song.flac"), Some(media_type::FLAC));
        assert_eq!(mt("content.opf"), Some(media_type::OPF));
    }

    #[test]
    fn test_generic_database() {
        assert_eq!(mt("photo.JPG"), Some(media_type::JPEG));
        assert_eq!(mt("image.png"), Some(media_type::PNG));
        assert_eq!(mt("report.docx"), Some(media_type::DOCX));
        assert_eq!(mt("sheet.ods"), Some(media_type::ODS));
        assert_eq!(mt("archive.zip"), Some(media_type::ZIP));
        assert_eq!(mt("style.css"), Some(media_type::CSS));
        assert_eq!(mt("index.html"), Some(media_type::HTML));
    }

    #[test]
    fn test_unknown_extension() {
        assert_eq!(mt("data.zzzunknown"), None);
    }

    #[test]
    fn test_unsupported_extensions() {
        for name in ["a.txt", "B.TXT", "x.xsd", "run.bat", "lib.c"] {
            assert!(is_unsupported_extension(Path::new(name)), "{}", name);
        }
        assert!(!is_unsupported_extension(Path::new("README")));
    }

    #[test]
    fn test_signatures() {
        assert_eq!(
            detect_from_signature(&[0xFF, 0xD8, 0xFF, 0xE0]).map(|d| d.media_type),
            Some(media_type::JPEG)
        );
        assert_eq!(
            detect_from_signature(b"fLaC\0\0\0\x22").map(|d| d.media_type),
            Some(media_type::FLAC)
        );
        let mut tar = vec![0u8; 512];
        tar[257..262].copy_from_slice(b"ustar");
        assert_eq!(
            detect_from_signature(&tar),
            Some(Detection::plain(media_type::TAR))
        );
        assert_eq!(
            detect_from_signature(&[0x1F, 0x8B, 0x08]).map(|d| d.compression),
            Some(Compression::Gzip)
        );
    }

    #[test]
    fn test_detect_sniffs_extensionless_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cover");
        std::fs::write(&path, [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]).unwrap();
        assert_eq!(detect(&path).map(|d| d.media_type), Some(media_type::PNG));

        let text = dir.path().join("mimetype");
        std::fs::write(&text, b"application/epub+zip").unwrap();
        assert_eq!(detect(&text), None);
    }
}
