//! Container kinds, media types and format detection.

pub mod detect;

pub use detect::{Detection, detect, is_unsupported_extension};

/// Media types every registered cleaner accepts.
pub mod media_type {
    /// Generic ZIP archive.
    pub const ZIP: &str = "application/zip";
    /// TAR archive, compressed or not.
    pub const TAR: &str = "application/x-tar";
    /// EPUB e-book.
    pub const EPUB: &str = "application/epub+zip";
    /// Word document.
    pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
    /// Excel workbook.
    pub const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
    /// PowerPoint presentation.
    pub const PPTX: &str =
        "application/vnd.openxmlformats-officedocument.presentationml.presentation";
    /// OpenDocument text.
    pub const ODT: &str = "application/vnd.oasis.opendocument.text";
    /// OpenDocument spreadsheet.
    pub const ODS: &str = "application/vnd.oasis.opendocument.spreadsheet";
    /// OpenDocument presentation.
    pub const ODP: &str = "application/vnd.oasis.opendocument.presentation";
    /// OpenDocument drawing.
    pub const ODG: &str = "application/vnd.oasis.opendocument.graphics";
    /// OpenDocument chart.
    pub const ODC: &str = "application/vnd.oasis.opendocument.chart";
    /// OpenDocument formula.
    pub const ODF: &str = "application/vnd.oasis.opendocument.formula";
    /// OpenDocument image.
    pub const ODI: &str = "application/vnd.oasis.opendocument.image";
    /// PNG image.
    pub const PNG: &str = "image/png";
    /// JPEG image.
    pub const JPEG: &str = "image/jpeg";
    /// FLAC audio.
    pub const FLAC: &str = "audio/flac";
    /// BitTorrent metainfo.
    pub const TORRENT: &str = "application/x-bittorrent";
    /// HTML page.
    pub const HTML: &str = "text/html";
    /// XHTML page.
    pub const XHTML: &str = "application/xhtml+xml";
    /// EPUB navigation control file.
    pub const NCX: &str = "application/x-dtbncx+xml";
    /// EPUB package document.
    pub const OPF: &str = "application/oebps-package+xml";
    /// CSS stylesheet.
    pub const CSS: &str = "text/css";
    /// Generic XML.
    pub const XML: &str = "application/xml";
    /// Generic XML, text flavor.
    pub const TEXT_XML: &str = "text/xml";
    /// RDF/XML.
    pub const RDF: &str = "application/rdf+xml";
    /// Office Open XML package relationships.
    pub const RELATIONSHIPS: &str = "application/vnd.openxmlformats-package.relationships+xml";

    /// Office Open XML documents.
    pub const OFFICE: &[&str] = &[DOCX, XLSX, PPTX];
    /// OpenDocument documents.
    pub const OPENDOCUMENT: &[&str] = &[ODT, ODS, ODP, ODG, ODC, ODF, ODI];
}

/// The container family of an archive-based format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// Any ZIP archive.
    Zip,
    /// Office Open XML (docx, xlsx, pptx).
    Office,
    /// OpenDocument (odt, ods, ...).
    OpenDocument,
    /// EPUB.
    Epub,
    /// TAR, with any supported compression.
    Tar,
}

impl ContainerKind {
    /// Returns a human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::Zip => "ZIP",
            ContainerKind::Office => "Office Open XML",
            ContainerKind::OpenDocument => "OpenDocument",
            ContainerKind::Epub => "EPUB",
            ContainerKind::Tar => "TAR",
        }
    }

    /// Maps a media type to the container family handling it.
    ///
    /// ```rust
    /// use metastrip::format::{ContainerKind, media_type};
    ///
    /// assert_eq!(ContainerKind::from_media_type(media_type::DOCX), Some(ContainerKind::Office));
    /// assert_eq!(ContainerKind::from_media_type(media_type::PNG), None);
    /// ```
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            media_type::ZIP => Some(ContainerKind::Zip),
            media_type::TAR => Some(ContainerKind::Tar),
            media_type::EPUB => Some(ContainerKind::Epub),
            mt if media_type::OFFICE.contains(&mt) => Some(ContainerKind::Office),
            mt if media_type::OPENDOCUMENT.contains(&mt) => Some(ContainerKind::OpenDocument),
            _ => None,
        }
    }

    /// Returns true if this family is stored as a ZIP archive.
    pub fn is_zip_based(&self) -> bool {
        !matches!(self, ContainerKind::Tar)
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
