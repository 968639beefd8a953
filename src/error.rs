//! Error types for metadata removal.
//!
//! This module provides the [`Error`] enum which represents every failure mode
//! of the cleaners, along with a convenient [`Result<T>`] type alias.
//!
//! # Error Categories
//!
//! | Category | Variants | Raised |
//! |----------|----------|--------|
//! | I/O | [`Io`][Error::Io], [`Zip`][Error::Zip] | anywhere |
//! | Input rejection | [`InvalidFormat`][Error::InvalidFormat], [`PathTraversal`][Error::PathTraversal], [`EncryptedContent`][Error::EncryptedContent], ... | cleaner construction |
//! | Structural cleanup | [`MalformedXml`][Error::MalformedXml], [`StructuralCleanup`][Error::StructuralCleanup] | per member |
//! | Aggregate | [`CleaningFailed`][Error::CleaningFailed] | end of `remove_all` |
//!
//! Input rejections happen before anything is extracted, so no output file
//! exists when one of them is returned.
//!
//! ```rust
//! use metastrip::Error;
//!
//! fn describe(error: &Error) -> String {
//!     match error {
//!         Error::CleaningFailed { failures, .. } => {
//!             format!("{} member(s) could not be cleaned", failures.len())
//!         }
//!         e if e.is_security_error() => "unsafe container rejected".to_string(),
//!         e => e.to_string(),
//!     }
//! }
//! ```

use std::fmt;
use std::io;

/// One member that made a container cleaning fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberFailure {
    /// Container-relative path of the member.
    pub member: String,
    /// Human readable reason.
    pub reason: String,
}

impl MemberFailure {
    /// Creates a new failure record.
    pub fn new(member: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MemberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.member, self.reason)
    }
}

/// Helper struct for formatting CleaningFailed error messages.
struct FailuresDisplay<'a> {
    path: &'a str,
    failures: &'a [MemberFailure],
}

impl fmt::Display for FailuresDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cleaning of {} failed", self.path)?;
        match self.failures {
            [] => Ok(()),
            [only] => write!(f, " ({})", only),
            [first, rest @ ..] => write!(f, " ({} and {} more)", first, rest.len()),
        }
    }
}

/// The main error type for metadata removal.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The ZIP backend failed to read or write an archive.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The file is not a well-formed container of its declared kind.
    #[error("Invalid container format: {0}")]
    InvalidFormat(String),

    /// A member path is empty, contains NUL bytes, or is otherwise unusable.
    #[error("Invalid member path: {0}")]
    InvalidMemberPath(String),

    /// A member path is absolute or escapes the extraction root.
    #[error("Path traversal detected in member: {path}")]
    PathTraversal {
        /// The offending member path.
        path: String,
    },

    /// A symbolic link points outside the extraction root or to an absolute target.
    #[error("Symbolic link target escapes extraction directory: {path} -> {target}")]
    SymlinkTargetEscape {
        /// The link member path.
        path: String,
        /// The link target.
        target: String,
    },

    /// A TAR member is a hard link.
    #[error("Hard link rejected: {path}")]
    HardLinkRejected {
        /// The link member path.
        path: String,
    },

    /// A TAR member is a device node, FIFO or other non-regular file.
    #[error("Non-regular member rejected: {path}")]
    SpecialFileRejected {
        /// The member path.
        path: String,
    },

    /// A TAR member carries the setuid or setgid bit.
    #[error("setuid/setgid member rejected: {path}")]
    PrivilegedFileRejected {
        /// The member path.
        path: String,
    },

    /// Two members share the same name.
    #[error("Duplicate member: {path}")]
    DuplicateMember {
        /// The duplicated member path.
        path: String,
    },

    /// The container holds encrypted content that cannot be cleaned.
    #[error("Encrypted content cannot be cleaned: {path}")]
    EncryptedContent {
        /// The encrypted member (or descriptor) path.
        path: String,
    },

    /// An XML part could not be parsed.
    #[error("Malformed XML: {reason}")]
    MalformedXml {
        /// Parser diagnostic.
        reason: String,
    },

    /// No cleaner exists for this file.
    #[error("Unsupported format: {}", media_type.as_deref().unwrap_or("unknown"))]
    UnsupportedFormat {
        /// Detected media type, if any.
        media_type: Option<String>,
    },

    /// A string did not name a valid unknown-member policy.
    #[error("Invalid unknown-member policy '{0}': expected abort, omit or keep")]
    InvalidPolicy(String),

    /// A format-specific structural rewrite of one member failed.
    #[error("Structural cleanup of {member} failed: {reason}")]
    StructuralCleanup {
        /// The member being rewritten.
        member: String,
        /// Why the rewrite failed.
        reason: String,
    },

    /// A leaf format could not be parsed or rewritten.
    #[error("Invalid {format} data: {reason}")]
    InvalidData {
        /// Short format name (e.g. "PNG").
        format: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// One or more members failed; the output container was deleted.
    #[error("{}", FailuresDisplay { path, failures })]
    CleaningFailed {
        /// The container that was being cleaned.
        path: String,
        /// Every member that failed during the pass.
        failures: Vec<MemberFailure>,
    },
}

impl Error {
    /// Returns true if this error is a security rejection of the input.
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            Error::PathTraversal { .. }
                | Error::SymlinkTargetEscape { .. }
                | Error::HardLinkRejected { .. }
                | Error::SpecialFileRejected { .. }
                | Error::PrivilegedFileRejected { .. }
                | Error::DuplicateMember { .. }
        )
    }

    /// Returns true if the input was rejected before any extraction.
    pub fn is_input_rejection(&self) -> bool {
        self.is_security_error()
            || matches!(
                self,
                Error::InvalidFormat(_)
                    | Error::InvalidMemberPath(_)
                    | Error::EncryptedContent { .. }
                    | Error::Zip(_)
            )
    }

    /// Returns the failing members of a [`Error::CleaningFailed`], or an empty slice.
    pub fn failed_members(&self) -> &[MemberFailure] {
        match self {
            Error::CleaningFailed { failures, .. } => failures,
            _ => &[],
        }
    }

    pub(crate) fn invalid_data(format: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidData {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_xml(reason: impl fmt::Display) -> Self {
        Error::MalformedXml {
            reason: reason.to_string(),
        }
    }
}

/// A specialized Result type for metadata removal.
pub type Result<T> = std::result::Result<T, Error>;
