//! OpenDocument (odt, ods, odp, odg, ...) hooks.

use std::fs;
use std::path::Path;

use regex::Regex;

use super::{read_text, scan_tags, sort_second_level};
use crate::archive::FormatHooks;
use crate::classify::RuleSet;
use crate::cleaner::Metadata;
use crate::member_path::MemberPath;
use crate::xml::Document;
use crate::{Error, Result};

const FILES_TO_KEEP: &[&str] = &[
    r"^META-INF/manifest\.xml$",
    r"^content\.xml$",
    r"^manifest\.rdf$",
    r"^mimetype$",
    r"^settings\.xml$",
    r"^styles\.xml$",
];

const FILES_TO_OMIT: &[&str] = &[
    r"^meta\.xml$",
    r"^layout-cache$",
    r"^Configurations2/",
    r"^Thumbnails/",
];

/// Hooks for OpenDocument files.
#[derive(Debug)]
pub struct OpenDocumentHooks {
    rules: RuleSet,
    meta_tags: Regex,
}

impl OpenDocumentHooks {
    /// Creates the hooks.
    pub fn new() -> Result<Self> {
        Ok(Self {
            rules: RuleSet::new(FILES_TO_KEEP, FILES_TO_OMIT)?,
            meta_tags: Regex::new("^(?:meta|dc|cp)").map_err(|e| Error::InvalidFormat(e.to_string()))?,
        })
    }
}

/// Removes every `text:tracked-changes` block under `office:text`.
fn remove_tracked_changes(doc: &mut Document) {
    if !doc.declares_prefix("office") {
        return;
    }
    for body in doc.find_all(doc.root(), "office:text") {
        for changes in doc.find_all(body, "text:tracked-changes") {
            doc.detach(changes);
        }
    }
}

impl FormatHooks for OpenDocumentHooks {
    fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn cleanup(&mut self, member: &MemberPath, file: &Path) -> Result<()> {
        if member.extension() != Some("xml") || fs::metadata(file)?.len() == 0 {
            return Ok(());
        }
        let mut doc = Document::open(file)?;
        // Embedded objects carry their own content.xml.
        if member.file_name() == "content.xml" {
            remove_tracked_changes(&mut doc);
        }
        sort_second_level(&mut doc, &[]);
        doc.save(file)
    }

    fn member_meta(&self, member: &MemberPath, file: &Path) -> Result<Metadata> {
        if member.as_str() != "meta.xml" {
            return Ok(Metadata::new());
        }
        Ok(scan_tags(&read_text(file)?, Some(&self.meta_tags)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Disposition;

    #[test]
    fn test_tracked_changes_removed() {
        let mut doc = Document::parse(
            br#"<office:document-content xmlns:office="urn:office" xmlns:text="urn:text"><office:body><office:text><text:tracked-changes><text:changed-region text:id="ct1"/></text:tracked-changes><text:p>kept</text:p></office:text></office:body></office:document-content>"#,
        )
        .unwrap();
        remove_tracked_changes(&mut doc);
        let out = String::from_utf8(doc.to_bytes()).unwrap();
        assert!(!out.contains("tracked-changes"));
        assert!(out.contains("<text:p>kept</text:p>"));
    }

    #[test]
    fn test_rules() {
        let hooks = OpenDocumentHooks::new().unwrap();
        let rules = hooks.rules();
        assert_eq!(rules.classify("mimetype"), Disposition::Keep);
        assert_eq!(rules.classify("content.xml"), Disposition::Keep);
        assert_eq!(rules.classify("meta.xml"), Disposition::Omit);
        assert_eq!(rules.classify("Thumbnails/thumbnail.png"), Disposition::Omit);
        assert_eq!(rules.classify("Pictures/a.png"), Disposition::Recurse);
    }

    #[test]
    fn test_meta_scan() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("meta.xml");
        fs::write(
            &file,
            "<office:document-meta><office:meta><meta:generator>LibreOffice/6.0</meta:generator>\
             <dc:creator>jvoisin</dc:creator><office:x>y</office:x></office:meta></office:document-meta>",
        )
        .unwrap();
        let hooks = OpenDocumentHooks::new().unwrap();
        let meta = hooks
            .member_meta(&MemberPath::new("meta.xml").unwrap(), &file)
            .unwrap();
        assert_eq!(meta["meta:generator"].as_text(), Some("LibreOffice/6.0"));
        assert_eq!(meta["dc:creator"].as_text(), Some("jvoisin"));
        assert!(!meta.contains_key("office:x"));

        let other = hooks
            .member_meta(&MemberPath::new("content.xml").unwrap(), &file)
            .unwrap();
        assert!(other.is_empty());
    }
}
