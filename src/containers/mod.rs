//! Container-format specializations.
//!
//! Each constructor opens and validates the container, builds the format's
//! hooks and returns a ready [`ArchiveCleaner`]. Construction is where a file
//! that only looks like the format (by name) is rejected.

pub mod epub;
pub mod office;
pub mod opendocument;

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::archive::tar::TarReader;
use crate::archive::zip::ZipReader;
use crate::archive::{ArchiveCleaner, NoHooks};
use crate::cleaner::Metadata;
use crate::format::ContainerKind;
use crate::policy::CleanOptions;
use crate::xml::{Document, NodeId};
use crate::{Error, Result};

pub use epub::EpubHooks;
pub use office::OfficeHooks;
pub use opendocument::OpenDocumentHooks;

/// Opens a generic ZIP archive.
pub fn zip(path: &Path, options: &CleanOptions) -> Result<ArchiveCleaner> {
    let reader = ZipReader::open(path, ContainerKind::Zip)?;
    Ok(ArchiveCleaner::new(
        path,
        Box::new(reader),
        Box::new(NoHooks::default()),
        *options,
    ))
}

/// Opens a TAR archive, plain or compressed.
pub fn tar(path: &Path, options: &CleanOptions) -> Result<ArchiveCleaner> {
    let reader = TarReader::open(path)?;
    Ok(ArchiveCleaner::new(
        path,
        Box::new(reader),
        Box::new(NoHooks::default()),
        *options,
    ))
}

/// Opens an Office Open XML document (docx, xlsx, pptx).
pub fn office(path: &Path, options: &CleanOptions) -> Result<ArchiveCleaner> {
    let reader = ZipReader::open(path, ContainerKind::Office)?;
    let hooks = OfficeHooks::new(&reader)?;
    Ok(ArchiveCleaner::new(path, Box::new(reader), Box::new(hooks), *options))
}

/// Opens an OpenDocument file (odt, ods, odp, ...).
pub fn opendocument(path: &Path, options: &CleanOptions) -> Result<ArchiveCleaner> {
    let reader = ZipReader::open(path, ContainerKind::OpenDocument)?;
    let hooks = OpenDocumentHooks::new()?;
    Ok(ArchiveCleaner::new(path, Box::new(reader), Box::new(hooks), *options))
}

/// Opens an EPUB book.
pub fn epub(path: &Path, options: &CleanOptions) -> Result<ArchiveCleaner> {
    let reader = ZipReader::open(path, ContainerKind::Epub)?;
    let hooks = EpubHooks::new(&reader)?;
    Ok(ArchiveCleaner::new(path, Box::new(reader), Box::new(hooks), *options))
}

/// Collects `<tag ...>value</tag>` pairs from raw XML text.
///
/// This is a tolerant scan, not a parse: it works on near-malformed input
/// and reports leaf elements only. `tag_filter` restricts the tag names.
pub(crate) fn scan_tags(content: &str, tag_filter: Option<&Regex>) -> Metadata {
    let mut meta = Metadata::new();
    for caps in leaf_element_regex().captures_iter(content) {
        let (Some(open), Some(value), Some(close)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            continue;
        };
        if open.as_str() != close.as_str() {
            continue;
        }
        if tag_filter.is_some_and(|f| !f.is_match(open.as_str())) {
            continue;
        }
        meta.insert(open.as_str().to_string(), value.as_str().trim().into());
    }
    meta
}

fn leaf_element_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<([A-Za-z_][\w:.\-]*)(?:\s[^>]*)?>([^<]*[^<\s][^<]*)</([A-Za-z_][\w:.\-]*)>")
            .unwrap_or_else(|_| unreachable!("constant pattern"))
    })
}

/// Reads a member as UTF-8 text for [`scan_tags`].
pub(crate) fn read_text(file: &Path) -> Result<String> {
    String::from_utf8(fs::read(file)?)
        .map_err(|_| Error::invalid_data("XML", "member is not valid UTF-8"))
}

/// Sort key erasing producer-specific child order: qualified name, then the
/// `desc` attribute.
fn child_sort_key(doc: &Document, node: NodeId) -> (String, Option<String>) {
    (
        doc.name(node).unwrap_or_default().to_string(),
        doc.attr(node, "desc").map(str::to_string),
    )
}

/// Sorts the children of every child of the root element.
///
/// Elements named in `skip` keep their children in document order.
pub(crate) fn sort_second_level(doc: &mut Document, skip: &[&str]) {
    let Some(root) = doc.root_element() else {
        return;
    };
    let parents: Vec<NodeId> = doc
        .element_children(root)
        .filter(|n| !doc.name(*n).is_some_and(|name| skip.contains(&name)))
        .collect();
    for parent in parents {
        doc.sort_children_by_key(parent, child_sort_key);
    }
}

/// Returns true if the member should go through the XML rewrites.
pub(crate) fn is_xml_member(name: &str) -> bool {
    name.ends_with(".xml") || name.ends_with(".rels")
}
