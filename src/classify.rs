//! Member classification by ordered path rules.
//!
//! Every container specialization declares two rule lists: members to copy
//! verbatim and members to drop. Rules are regular expressions matched
//! (unanchored, like a search) against the full member path, since the same
//! file name means different things in different directories.

use regex::Regex;

use crate::{Error, Result};

/// What happens to one container member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Copy the bytes unchanged.
    Keep,
    /// Leave the member out of the output.
    Omit,
    /// Hand the member to the dispatcher and use the cleaned result.
    Recurse,
}

/// Keep and omit rules of one container specialization.
///
/// An explicit keep always wins over an omit: omit rules tend to be broad
/// prefixes while keep rules name specific required parts.
///
/// # Example
///
/// ```rust
/// use metastrip::classify::{Disposition, RuleSet};
///
/// let rules = RuleSet::new(&[r"^word/styles\.xml$"], &[r"^word/"]).unwrap();
/// assert_eq!(rules.classify("word/styles.xml"), Disposition::Keep);
/// assert_eq!(rules.classify("word/people.xml"), Disposition::Omit);
/// assert_eq!(rules.classify("media/a.png"), Disposition::Recurse);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    keep: Vec<Regex>,
    omit: Vec<Regex>,
}

impl RuleSet {
    /// Compiles a rule set from pattern lists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if a pattern does not compile.
    pub fn new(keep: &[&str], omit: &[&str]) -> Result<Self> {
        Ok(Self {
            keep: compile_all(keep)?,
            omit: compile_all(omit)?,
        })
    }

    /// A rule set that sends every member to the dispatcher.
    pub fn recurse_all() -> Self {
        Self::default()
    }

    /// Adds a keep rule matching exactly `member`.
    pub fn keep_exact(&mut self, member: &str) {
        let pattern = format!("^{}$", regex::escape(member));
        // An escaped literal always compiles.
        if let Ok(re) = Regex::new(&pattern) {
            self.keep.push(re);
        }
    }

    /// Returns true if any keep rule matches.
    pub fn is_kept(&self, member: &str) -> bool {
        self.keep.iter().any(|r| r.is_match(member))
    }

    /// Returns true if any omit rule matches, regardless of keep rules.
    pub fn matches_omit(&self, member: &str) -> bool {
        self.omit.iter().any(|r| r.is_match(member))
    }

    /// Classifies one member path.
    pub fn classify(&self, member: &str) -> Disposition {
        if self.is_kept(member) {
            Disposition::Keep
        } else if self.matches_omit(member) {
            Disposition::Omit
        } else {
            Disposition::Recurse
        }
    }

    /// Number of keep rules, including dynamically added ones.
    pub fn keep_len(&self) -> usize {
        self.keep.len()
    }
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| Error::InvalidFormat(format!("invalid member rule '{}': {}", p, e)))
        })
        .collect()
}
