//! Office Open XML (docx, xlsx, pptx) hooks.
//!
//! Parts are kept through an allowlist built from `[Content_Types].xml`, so
//! anything Office does not declare as a body part is dropped or cleaned
//! recursively. Every XML part is then rewritten: tracked changes, comment
//! anchors, revision session ids and numbering ids are removed, fingerprinting
//! identifiers are randomized and element order is normalized.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use rand::Rng;

use super::{is_xml_member, read_text, scan_tags, sort_second_level};
use crate::archive::FormatHooks;
use crate::archive::zip::ZipReader;
use crate::classify::RuleSet;
use crate::cleaner::Metadata;
use crate::member_path::MemberPath;
use crate::xml::{Document, NodeId};
use crate::{Error, Result};

const CONTENT_TYPES: &str = "[Content_Types].xml";

/// Content types whose parts are kept as-is.
const CONTENT_TYPES_TO_KEEP: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.wordprocessingml.endnotes+xml",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.footnotes+xml",
    "application/vnd.openxmlformats-officedocument.extended-properties+xml",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.fontTable+xml",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.footer+xml",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.header+xml",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml",
    "application/vnd.openxmlformats-package.core-properties+xml",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.settings+xml",
];

const FILES_TO_KEEP: &[&str] = &[
    r"^\[Content_Types\]\.xml$",
    r"^_rels/\.rels$",
    r"^xl/sharedStrings\.xml$",
    r"^xl/calcChain\.xml$",
    r"^(?:word|ppt|xl)/_rels/(?:document|workbook|presentation)\.xml\.rels$",
    r"^xl/worksheets/_rels/sheet[0-9]+\.xml\.rels$",
    r"^(?:word|ppt|xl)/styles\.xml$",
    r"^(?:word|ppt|xl)/fontTable\.xml$",
    r"^(?:word|ppt|xl)/settings\.xml$",
    r"^(?:word|ppt|xl)/stylesWithEffects\.xml$",
    r"^xl/workbook\.xml$",
    r"^xl/worksheets/sheet[0-9]+\.xml$",
    r"^xl/theme/theme[0-9]+\.xml$",
    r"^ppt/presentation\.xml$",
    r"^ppt/slides/slide[0-9]+\.xml$",
    r"^ppt/slides/_rels/slide[0-9]+\.xml\.rels$",
    r"^ppt/slideLayouts/slideLayout[0-9]+\.xml$",
    r"^ppt/slideLayouts/_rels/slideLayout[0-9]+\.xml\.rels$",
    r"^ppt/slideMasters/slideMaster[0-9]+\.xml$",
    r"^ppt/slideMasters/_rels/slideMaster[0-9]+\.xml\.rels$",
    r"^ppt/theme/theme[0-9]+\.xml$",
    r"^ppt/tableStyles\.xml$",
];

const FILES_TO_OMIT: &[&str] = &[
    r"^\[trash\]/",
    r"^customXml/",
    r"webSettings\.xml$",
    r"^docProps/custom\.xml$",
    r"^docProps/thumbnail\.",
    r"^(?:word|ppt|xl)/printerSettings/",
    r"^(?:word|ppt|xl)/theme",
    r"^(?:word|ppt|xl)/people\.xml$",
    r"^(?:word|ppt|xl)/persons/person\.xml$",
    r"^(?:word|ppt|xl)/tags/",
    r"^(?:word|ppt|xl)/glossary/",
    r"^(?:word|ppt|xl)/viewProps\.xml$",
    r"^(?:word|ppt|xl)/presProps\.xml$",
    r"^(?:word|ppt|xl)/comments[0-9]*\.xml$",
    r"^(?:word|ppt|xl)/threadedComments/threadedComment[0-9]*\.xml$",
    r"^(?:word|ppt|xl)/commentsExtended\.xml$",
    r"^(?:word|ppt|xl)/commentsExtensible\.xml$",
    r"^(?:word|ppt|xl)/commentsIds\.xml$",
    r"^(?:word|ppt|xl)/_rels/",
    r"docMetadata/LabelInfo\.xml$",
];

const APP_SKELETON: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties">"#,
    "</Properties>",
);

const CORE_SKELETON: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties">"#,
    "</cp:coreProperties>",
);

/// OOXML requires slide master ids in `[2^31, 2^32)`.
const MIN_SLIDE_MASTER_ID: u32 = 1 << 31;

/// Hooks for Office Open XML documents.
#[derive(Debug)]
pub struct OfficeHooks {
    rules: RuleSet,
    /// Members left out of the output; their `[Content_Types].xml` entries go too.
    omitted: HashSet<String>,
    /// `(member, counter)` pairs whose values are not a plain `1..=n` sequence.
    irregular_counters: Vec<(String, &'static str)>,
    ignorable: regex::bytes::Regex,
}

impl OfficeHooks {
    /// Builds the rules from the archive's `[Content_Types].xml`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if the manifest is missing and
    /// [`Error::MalformedXml`] if it does not parse.
    pub fn new(reader: &ZipReader) -> Result<Self> {
        let manifest = reader
            .read_member(CONTENT_TYPES)?
            .ok_or_else(|| Error::InvalidFormat(format!("missing {}", CONTENT_TYPES)))?;
        let manifest = Document::parse(&manifest)?;

        let mut rules = RuleSet::new(FILES_TO_KEEP, FILES_TO_OMIT)?;
        if let Some(root) = manifest.root_element() {
            for entry in manifest.element_children(root) {
                let (Some(part), Some(content_type)) =
                    (manifest.attr(entry, "PartName"), manifest.attr(entry, "ContentType"))
                else {
                    continue;
                };
                if CONTENT_TYPES_TO_KEEP.contains(&content_type) {
                    rules.keep_exact(part.trim_start_matches('/'));
                }
            }
        }

        let ignorable = regex::bytes::Regex::new(r#"mc:Ignorable="[^"]*""#)
            .map_err(|e| Error::InvalidFormat(e.to_string()))?;

        Ok(Self {
            rules,
            omitted: HashSet::new(),
            irregular_counters: Vec::new(),
            ignorable,
        })
    }

    /// Drops `[Content_Types].xml` overrides that point at omitted parts.
    fn remove_content_type_members(&self, member: &MemberPath, doc: &mut Document) -> Result<()> {
        let Some(root) = doc.root_element() else {
            return Ok(());
        };
        let declared = doc.namespaces();
        if declared.len() != 1 || !declared[0].0.is_empty() {
            return Err(Error::StructuralCleanup {
                member: member.to_string(),
                reason: "expected a single default namespace".into(),
            });
        }
        let dangling: Vec<NodeId> = doc
            .element_children(root)
            .filter(|n| {
                doc.attr(*n, "PartName")
                    .is_some_and(|p| self.omitted.contains(p.trim_start_matches('/')))
            })
            .collect();
        for node in dangling {
            doc.detach(node);
        }
        Ok(())
    }

    fn record_counters(&mut self, member: &MemberPath, doc: &Document) {
        let mut drawing_ids = BTreeSet::new();
        let mut relationship_ids = BTreeSet::new();
        for node in doc.descendants(doc.root()) {
            if doc.local_name(node) == Some("cNvPr") {
                if let Some(id) = doc.attr(node, "id").and_then(|v| v.parse::<u64>().ok()) {
                    drawing_ids.insert(id);
                }
            }
            if let Some(id) = doc
                .attr(node, "Id")
                .and_then(|v| v.strip_prefix("rId"))
                .and_then(|v| v.parse::<u64>().ok())
            {
                relationship_ids.insert(id);
            }
        }
        for (counter, values) in [("cNvPr", drawing_ids), ("rId", relationship_ids)] {
            if !is_plain_sequence(&values) {
                self.irregular_counters.push((member.to_string(), counter));
            }
        }
    }
}

/// Returns true if `values` is empty or exactly `{1, ..., max}`.
fn is_plain_sequence(values: &BTreeSet<u64>) -> bool {
    values.last().is_none_or(|max| *max == values.len() as u64)
}

/// Removes tracked changes: deletions entirely, insertions by keeping their content.
fn remove_revisions(doc: &mut Document) {
    let root = doc.root();
    for node in doc.find_all(root, "w:del") {
        doc.detach(node);
    }
    for node in doc.find_all(root, "w:ins") {
        doc.unwrap(node);
    }
}

/// Removes comment anchors and the runs holding comment references.
fn remove_comment_anchors(doc: &mut Document) {
    let root = doc.root();
    for name in ["w:commentRangeStart", "w:commentRangeEnd"] {
        for node in doc.find_all(root, name) {
            doc.detach(node);
        }
    }
    for run in doc.find_all(root, "w:r") {
        if !doc.find_all(run, "w:commentReference").is_empty() {
            doc.detach(run);
        }
    }
}

fn is_rsid(qname: &str) -> bool {
    match qname.split_once(':') {
        Some((_, local)) => local.to_ascii_lowercase().starts_with("rsid"),
        None => false,
    }
}

/// Removes revision session ids, both as elements and as attributes.
fn remove_rsid(doc: &mut Document) {
    for node in doc.descendants(doc.root()) {
        if doc.name(node).is_some_and(is_rsid) {
            doc.detach(node);
        } else {
            doc.retain_attrs(node, |a| !is_rsid(&a.name));
        }
    }
}

fn remove_nsid(doc: &mut Document) {
    for node in doc.find_all(doc.root(), "w:nsid") {
        doc.detach(node);
    }
}

/// Replaces identifiers that are random per author with fresh random values.
fn randomize_ids(doc: &mut Document) {
    let mut rng = rand::thread_rng();
    let root = doc.root();
    if doc.declares_prefix("p14") {
        for node in doc.find_all(root, "p14:creationId") {
            doc.set_attr(node, "val", &rng.r#gen::<u32>().to_string());
        }
    }
    if doc.declares_prefix("p") {
        for node in doc.find_all(root, "p:sldMasterId") {
            let id = rng.gen_range(MIN_SLIDE_MASTER_ID..=u32::MAX);
            doc.set_attr(node, "id", &id.to_string());
        }
    }
}

impl FormatHooks for OfficeHooks {
    fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn cleanup(&mut self, member: &MemberPath, file: &Path) -> Result<()> {
        let name = member.as_str();
        if !is_xml_member(name) || fs::metadata(file)?.len() == 0 {
            return Ok(());
        }

        match name {
            "docProps/app.xml" => {
                fs::write(file, APP_SKELETON)?;
                return Ok(());
            }
            "docProps/core.xml" => {
                fs::write(file, CORE_SKELETON)?;
                return Ok(());
            }
            _ => {}
        }

        let mut doc = Document::open(file)?;
        randomize_ids(&mut doc);

        if name == CONTENT_TYPES {
            self.remove_content_type_members(member, &mut doc)?;
        } else if name == "word/document.xml" {
            remove_revisions(&mut doc);
            remove_comment_anchors(&mut doc);
        }

        self.record_counters(member, &doc);

        if doc.declares_prefix("w") {
            remove_rsid(&mut doc);
            remove_nsid(&mut doc);
        }

        sort_second_level(&mut doc, &["w:body"]);

        let bytes = doc.to_bytes();
        let bytes = self.ignorable.replacen(&bytes, 1, &b""[..]);
        fs::write(file, bytes)?;
        Ok(())
    }

    fn deferred(&self, member: &MemberPath) -> bool {
        member.as_str() == CONTENT_TYPES
    }

    fn omitted(&mut self, member: &MemberPath) {
        self.omitted.insert(member.as_str().to_string());
    }

    fn member_meta(&self, member: &MemberPath, file: &Path) -> Result<Metadata> {
        let name = member.as_str();
        if !name.starts_with("docProps/") || !name.ends_with(".xml") {
            return Ok(Metadata::new());
        }
        Ok(scan_tags(&read_text(file)?, None))
    }

    fn final_checks(&mut self) -> Result<()> {
        // Counters are reported, not corrected.
        for (member, counter) in &self.irregular_counters {
            log::warn!("{} contains irregular {} values", member, counter);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Disposition;

    fn parse(xml: &str) -> Document {
        Document::parse(xml.as_bytes()).unwrap()
    }

    fn render(doc: &Document) -> String {
        String::from_utf8(doc.to_bytes()).unwrap()
    }

    const W: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    #[test]
    fn test_revisions_removed() {
        let mut doc = parse(&format!(
            "<w:document {W}><w:body><w:p><w:del><w:r><w:delText>old</w:delText></w:r></w:del>\
             <w:ins w:author=\"x\"><w:r><w:t>new</w:t></w:r></w:ins></w:p></w:body></w:document>"
        ));
        remove_revisions(&mut doc);
        let out = render(&doc);
        assert!(!out.contains("w:del"));
        assert!(!out.contains("w:ins"));
        assert!(!out.contains("old"));
        assert!(out.contains("<w:p><w:r><w:t>new</w:t></w:r></w:p>"));
    }

    #[test]
    fn test_nested_insertions_unwrapped() {
        let mut doc = parse(&format!(
            "<w:document {W}><w:body><w:ins><w:ins><w:r/></w:ins></w:ins></w:body></w:document>"
        ));
        remove_revisions(&mut doc);
        assert!(render(&doc).contains("<w:body><w:r/></w:body>"));
    }

    #[test]
    fn test_comment_anchors_removed() {
        let mut doc = parse(&format!(
            "<w:document {W}><w:body><w:p><w:commentRangeStart w:id=\"0\"/><w:r><w:t>a</w:t></w:r>\
             <w:commentRangeEnd w:id=\"0\"/><w:r><w:commentReference w:id=\"0\"/></w:r></w:p></w:body></w:document>"
        ));
        remove_comment_anchors(&mut doc);
        let out = render(&doc);
        assert!(!out.contains("comment"));
        assert!(out.contains("<w:p><w:r><w:t>a</w:t></w:r></w:p>"));
    }

    #[test]
    fn test_rsid_and_nsid_removed() {
        let mut doc = parse(&format!(
            "<w:settings {W}><w:rsids><w:rsidRoot w:val=\"00A1\"/></w:rsids>\
             <w:p w:rsidR=\"00B2\" w:rsidRDefault=\"00C3\" w:other=\"1\"/><w:nsid w:val=\"12\"/></w:settings>"
        ));
        remove_rsid(&mut doc);
        remove_nsid(&mut doc);
        let out = render(&doc);
        assert!(!out.to_lowercase().contains("rsid"));
        assert!(!out.contains("nsid"));
        assert!(out.contains(r#"<w:p w:other="1"/>"#));
    }

    #[test]
    fn test_randomize_ids() {
        let mut doc = parse(
            r#"<p:presentation xmlns:p="urn:p" xmlns:p14="urn:p14"><p:sldMasterIdLst><p:sldMasterId id="2147483648"/></p:sldMasterIdLst><p14:creationId val="1"/></p:presentation>"#,
        );
        randomize_ids(&mut doc);
        let root = doc.root();
        let master = doc.find_all(root, "p:sldMasterId")[0];
        let id: u32 = doc.attr(master, "id").unwrap().parse().unwrap();
        assert!(id >= MIN_SLIDE_MASTER_ID);
        let creation = doc.find_all(root, "p14:creationId")[0];
        assert!(doc.attr(creation, "val").unwrap().parse::<u32>().is_ok());
    }

    #[test]
    fn test_plain_sequence() {
        assert!(is_plain_sequence(&BTreeSet::new()));
        assert!(is_plain_sequence(&[1, 2, 3].into_iter().collect()));
        assert!(!is_plain_sequence(&[1, 2, 7].into_iter().collect()));
        assert!(!is_plain_sequence(&[2934862].into_iter().collect()));
    }

    #[test]
    fn test_rules() {
        let rules = RuleSet::new(FILES_TO_KEEP, FILES_TO_OMIT).unwrap();
        assert_eq!(rules.classify("[Content_Types].xml"), Disposition::Keep);
        assert_eq!(rules.classify("word/_rels/document.xml.rels"), Disposition::Keep);
        assert_eq!(rules.classify("word/_rels/settings.xml.rels"), Disposition::Omit);
        assert_eq!(rules.classify("xl/theme/theme1.xml"), Disposition::Keep);
        assert_eq!(rules.classify("word/theme/theme1.xml"), Disposition::Omit);
        assert_eq!(rules.classify("word/comments.xml"), Disposition::Omit);
        assert_eq!(rules.classify("customXml/item1.xml"), Disposition::Omit);
        assert_eq!(rules.classify("word/media/image1.png"), Disposition::Recurse);
        assert_eq!(rules.classify("docProps/core.xml"), Disposition::Recurse);
    }
}
