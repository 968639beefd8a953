//! HTML, XHTML, NCX and CSS.
//!
//! Markup is tokenized, not parsed into a DOM: `<meta>` and `<doctitle>`
//! elements (with everything inside them), comments and processing
//! instructions are dropped, and the remaining tokens are written back
//! verbatim. Tags must balance; a document that does not is rejected rather
//! than guessed at.

use std::borrow::Cow;
use std::path::Path;

use regex::Regex;

use super::{LeafFile, leaf_paths};
use crate::cleaner::{Cleaner, Metadata};
use crate::{Error, Result};

/// Elements removed with their content. Names are lowercase.
const BLACKLIST: &[&str] = &["doctitle", "meta"];

/// HTML elements that never have an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

const DEFAULT_META_NAME: &str = "harmful metadata";
const DEFAULT_META_CONTENT: &str = "harmful data";

fn invalid(reason: impl Into<String>) -> Error {
    Error::invalid_data("HTML", reason)
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    /// Comments, processing instructions.
    Dropped,
    Doctype(&'a str),
    Start {
        raw: &'a str,
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    End {
        raw: &'a str,
        name: String,
    },
}

fn unescape(value: &str) -> String {
    quick_xml::escape::unescape(value)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| value.to_string())
}

/// Parses the attributes inside a start tag (after its name).
fn parse_attrs(mut rest: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if rest.is_empty() {
            return attrs;
        }
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();
        let Some(after_eq) = rest.strip_prefix('=') else {
            attrs.push((name, String::new()));
            continue;
        };
        let after_eq = after_eq.trim_start();
        let (value, remaining) = match after_eq.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let body = &after_eq[1..];
                let end = body.find(quote).unwrap_or(body.len());
                (&body[..end], body.get(end + 1..).unwrap_or(""))
            }
            _ => {
                let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            }
        };
        attrs.push((name, unescape(value)));
        rest = remaining;
    }
}

struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    /// Set after a `<script>` or `<style>` start tag.
    raw_text_end: Option<String>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            raw_text_end: None,
        }
    }

    fn rest(&self) -> &'a str {
        let input = self.input;
        &input[self.pos..]
    }

    /// Consumes up to and including `terminator`.
    fn take_until(&mut self, terminator: &str) -> Result<&'a str> {
        let rest = self.rest();
        let end = rest
            .find(terminator)
            .ok_or_else(|| invalid(format!("unterminated construct, expected '{}'", terminator)))?;
        self.pos += end + terminator.len();
        Ok(&rest[..end + terminator.len()])
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>> {
        let rest = self.rest();
        if rest.is_empty() {
            return Ok(None);
        }

        if let Some(end_tag) = self.raw_text_end.take() {
            let end = rest.to_ascii_lowercase().find(&end_tag).unwrap_or(rest.len());
            self.pos += end;
            if end > 0 {
                return Ok(Some(Token::Text(&rest[..end])));
            }
            return self.next_token();
        }

        if !rest.starts_with('<') {
            let end = rest.find('<').unwrap_or(rest.len());
            self.pos += end;
            return Ok(Some(Token::Text(&rest[..end])));
        }

        if rest.starts_with("<!--") {
            self.take_until("-->")?;
            return Ok(Some(Token::Dropped));
        }
        if rest.starts_with("<?") {
            self.take_until("?>")?;
            return Ok(Some(Token::Dropped));
        }
        if rest.starts_with("<![CDATA[") {
            return Ok(Some(Token::Text(self.take_until("]]>")?)));
        }
        if rest.starts_with("<!") {
            return Ok(Some(Token::Doctype(self.take_until(">")?)));
        }

        let raw = self.take_until(">")?;
        let inner = &raw[1..raw.len() - 1];
        if let Some(name) = inner.strip_prefix('/') {
            return Ok(Some(Token::End {
                raw,
                name: name.trim().to_ascii_lowercase(),
            }));
        }

        let name_end = inner
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(inner.len());
        let name = inner[..name_end].to_ascii_lowercase();
        if name.is_empty() {
            return Err(invalid("empty tag name"));
        }
        let self_closing = inner.trim_end().ends_with('/');
        if !self_closing && RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            self.raw_text_end = Some(format!("</{}", name));
        }
        Ok(Some(Token::Start {
            raw,
            attrs: parse_attrs(&inner[name_end..]),
            name,
            self_closing,
        }))
    }
}

/// Result of one pass over a markup document.
#[derive(Debug, Default)]
struct Scrubbed {
    output: String,
    meta: Metadata,
}

fn scrub(input: &str) -> Result<Scrubbed> {
    let mut tokenizer = Tokenizer::new(input);
    let mut result = Scrubbed::default();
    let mut open: Vec<String> = Vec::new();
    // Counter rather than flag: blacklisted elements may nest.
    let mut dangerous = 0usize;

    while let Some(token) = tokenizer.next_token()? {
        match token {
            Token::Dropped => {}
            Token::Text(text) | Token::Doctype(text) => {
                if dangerous == 0 {
                    result.output.push_str(text);
                }
            }
            Token::Start {
                raw,
                name,
                attrs,
                self_closing,
            } => {
                let blacklisted = BLACKLIST.contains(&name.as_str());
                if self_closing || VOID_ELEMENTS.contains(&name.as_str()) {
                    if blacklisted {
                        let find = |key: &str| attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
                        let key = find("name").unwrap_or_else(|| DEFAULT_META_NAME.to_string());
                        let value = find("content").unwrap_or_else(|| DEFAULT_META_CONTENT.to_string());
                        result.meta.insert(key, value.into());
                    } else if dangerous == 0 {
                        result.output.push_str(raw);
                    }
                    continue;
                }
                if blacklisted {
                    dangerous += 1;
                } else if dangerous == 0 {
                    result.output.push_str(raw);
                }
                open.push(name);
            }
            Token::End { raw, name } => {
                let Some(previous) = open.pop() else {
                    return Err(invalid(format!("closing tag {} has no opening tag", name)));
                };
                if previous != name {
                    return Err(invalid(format!(
                        "closing tag {} does not match the opening tag {}",
                        name, previous
                    )));
                }
                if BLACKLIST.contains(&name.as_str()) {
                    dangerous -= 1;
                } else if dangerous == 0 {
                    result.output.push_str(raw);
                }
            }
        }
    }

    if !open.is_empty() {
        return Err(invalid(format!("unclosed tags: {}", open.join(", "))));
    }
    Ok(result)
}

fn read_utf8(file: &LeafFile, format: &'static str) -> Result<String> {
    String::from_utf8(file.read()?).map_err(|_| Error::invalid_data(format, "not valid UTF-8"))
}

/// Cleaner for HTML, XHTML and NCX documents.
#[derive(Debug)]
pub struct HtmlCleaner {
    file: LeafFile,
    scrubbed: Scrubbed,
}

impl HtmlCleaner {
    /// Tokenizes the document and checks its tag balance.
    pub fn new(path: &Path) -> Result<Self> {
        let file = LeafFile::new(path);
        let scrubbed = scrub(&read_utf8(&file, "HTML")?)?;
        Ok(Self { file, scrubbed })
    }
}

impl Cleaner for HtmlCleaner {
    leaf_paths!();

    fn get_meta(&self) -> Result<Metadata> {
        Ok(self.scrubbed.meta.clone())
    }

    fn remove_all(&mut self) -> Result<()> {
        self.file.write_output(self.scrubbed.output.as_bytes())
    }
}

fn css_comment_regex() -> Result<Regex> {
    Regex::new(r"(?s)/\*(.+?)\*/").map_err(|e| Error::invalid_data("CSS", e.to_string()))
}

/// Cleaner for CSS stylesheets: comments are the only metadata carrier.
#[derive(Debug)]
pub struct CssCleaner {
    file: LeafFile,
    content: String,
    comments: Regex,
}

impl CssCleaner {
    /// Reads the stylesheet.
    pub fn new(path: &Path) -> Result<Self> {
        let file = LeafFile::new(path);
        let content = read_utf8(&file, "CSS")?;
        Ok(Self {
            file,
            content,
            comments: css_comment_regex()?,
        })
    }
}

impl Cleaner for CssCleaner {
    leaf_paths!();

    fn get_meta(&self) -> Result<Metadata> {
        let mut meta = Metadata::new();
        for caps in self.comments.captures_iter(&self.content) {
            let Some(body) = caps.get(1) else { continue };
            for line in body.as_str().lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let parts: Vec<&str> = line.split(':').collect();
                match parts.as_slice() {
                    [key, value] => {
                        let key = key.trim_matches(|c: char| c.is_whitespace() || c == '*');
                        meta.insert(key.to_string(), value.trim().into());
                    }
                    _ => {
                        meta.insert(DEFAULT_META_CONTENT.to_string(), line.into());
                    }
                }
            }
        }
        Ok(meta)
    }

    fn remove_all(&mut self) -> Result<()> {
        let cleaned = self.comments.replace_all(&self.content, "");
        self.file.write_output(cleaned.as_bytes())
    }
}
