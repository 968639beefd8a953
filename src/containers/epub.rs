//! EPUB hooks.
//!
//! The package document's `<metadata>` is replaced by a fresh identifier and
//! empty language and title, and the navigation `<head>` blocks are emptied.
//! Books with encrypted resources are refused outright.

use std::fs;
use std::path::Path;

use regex::Regex;
use uuid::Uuid;

use super::{read_text, scan_tags};
use crate::archive::zip::ZipReader;
use crate::archive::{ArchiveReader, FormatHooks};
use crate::classify::RuleSet;
use crate::cleaner::Metadata;
use crate::member_path::MemberPath;
use crate::xml::{Document, NodeId};
use crate::{Error, Result};

const DUBLIN_CORE: &str = "http://purl.org/dc/elements/1.1/";

const ENCRYPTION_DESCRIPTOR: &str = "META-INF/encryption.xml";

const FILES_TO_KEEP: &[&str] = &[
    r"^META-INF/container\.xml$",
    r"^mimetype$",
    r"(?:^|/)[^/]+\.opf$",
    r"^OPS/.+\.xml$",
];

const FILES_TO_OMIT: &[&str] = &[
    r"(?:^|/)iTunesMetadata\.plist$",
    r"^META-INF/calibre_bookmarks\.txt$",
];

/// Hooks for EPUB books.
#[derive(Debug)]
pub struct EpubHooks {
    rules: RuleSet,
    /// Identifier written into every cleaned package document.
    identifier: Uuid,
    ops_part: Regex,
    meta_tags: Regex,
}

impl EpubHooks {
    /// Creates the hooks for an opened book.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptedContent`] if the book has an encryption
    /// descriptor (typically obfuscated fonts).
    pub fn new(reader: &ZipReader) -> Result<Self> {
        if let Some(member) = reader.members().iter().find(|m| {
            let name = m.path.as_str();
            name == ENCRYPTION_DESCRIPTOR || name.ends_with(&format!("/{}", ENCRYPTION_DESCRIPTOR))
        }) {
            return Err(Error::EncryptedContent {
                path: member.path.to_string(),
            });
        }

        let compile = |p: &str| Regex::new(p).map_err(|e| Error::InvalidFormat(e.to_string()));
        Ok(Self {
            rules: RuleSet::new(FILES_TO_KEEP, FILES_TO_OMIT)?,
            identifier: Uuid::new_v4(),
            ops_part: compile(r"(?:^|/)OPS/[^/]+\.xml$")?,
            meta_tags: compile("^(?:meta|dc|cp)")?,
        })
    }

    fn clean_package(&self, doc: &mut Document) {
        let Some(metadata) = first_element_ending_with(doc, "metadata") else {
            return;
        };
        doc.clear_children(metadata);
        doc.retain_attrs(metadata, |a| a.name == "xmlns" || a.name.starts_with("xmlns:"));
        if doc.resolve_prefix(metadata, "dc") != Some(DUBLIN_CORE) {
            doc.set_attr(metadata, "xmlns:dc", DUBLIN_CORE);
        }

        let identifier = doc.append_element(metadata, "dc:identifier", &[("id", "id")]);
        doc.append_text(identifier, &self.identifier.to_string());
        doc.append_element(metadata, "dc:language", &[]);
        doc.append_element(metadata, "dc:title", &[]);

        if let Some(package) = doc.root_element() {
            if doc.attr(package, "unique-identifier").is_some() {
                doc.set_attr(package, "unique-identifier", "id");
            }
        }
    }
}

fn first_element_ending_with(doc: &Document, suffix: &str) -> Option<NodeId> {
    doc.descendants(doc.root()).into_iter().find(|n| {
        doc.local_name(*n)
            .is_some_and(|name| name.trim().to_ascii_lowercase().ends_with(suffix))
    })
}

/// Replaces the navigation map's `<head>` with a single empty `<meta>`.
fn clean_navigation(doc: &mut Document) {
    if let Some(head) = first_element_ending_with(doc, "head") {
        doc.clear_children(head);
        doc.append_element(head, "meta", &[("name", ""), ("content", "")]);
    }
}

fn clear_head(doc: &mut Document) {
    if let Some(head) = first_element_ending_with(doc, "head") {
        doc.clear_children(head);
    }
}

impl FormatHooks for EpubHooks {
    fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn cleanup(&mut self, member: &MemberPath, file: &Path) -> Result<()> {
        let is_package = member.extension() == Some("opf");
        let is_navigation = member.file_name() == "toc.ncx";
        let is_ops = self.ops_part.is_match(member.as_str());
        if !(is_package || is_navigation || is_ops) || fs::metadata(file)?.len() == 0 {
            return Ok(());
        }

        let mut doc = Document::open(file)?;
        if is_package {
            self.clean_package(&mut doc);
        } else if is_navigation {
            clean_navigation(&mut doc);
        } else {
            clear_head(&mut doc);
        }
        doc.save(file)
    }

    fn member_meta(&self, member: &MemberPath, file: &Path) -> Result<Metadata> {
        if member.extension() != Some("opf") {
            return Ok(Metadata::new());
        }
        Ok(scan_tags(&read_text(file)?, Some(&self.meta_tags)))
    }
}
