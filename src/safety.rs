//! Safety validation for container members.
//!
//! Every check here runs while a container is being opened, before any byte
//! is extracted. A container that fails one of them is rejected as a whole:
//! cleaning a subset of a hostile archive would still hand the user a file
//! that unpacks somewhere it should not.

use std::collections::HashSet;
use std::path::{Component, Path};

use crate::member_path::MemberPath;
use crate::{Error, Result};

/// Set-user-ID permission bit.
const S_ISUID: u32 = 0o4000;
/// Set-group-ID permission bit.
const S_ISGID: u32 = 0o2000;

/// The kind of a TAR entry, as far as validation cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
    /// A symbolic link with its raw target.
    Symlink(String),
    /// A hard link.
    HardLink,
    /// A character or block device, FIFO, or any other special file.
    Special,
}

/// Validates a symbolic link target relative to the link's own location.
///
/// The target must be relative and, resolved from the link's parent
/// directory, must never climb above the extraction root. A link at
/// `a/b/link` may point to `../c` but not to `../../../c`.
///
/// ```rust
/// use metastrip::MemberPath;
/// use metastrip::safety::validate_symlink_target;
///
/// let link = MemberPath::new("docs/current").unwrap();
/// assert!(validate_symlink_target(&link, "v2/index.html").is_ok());
/// assert!(validate_symlink_target(&link, "../README").is_ok());
/// assert!(validate_symlink_target(&link, "../../etc/passwd").is_err());
/// assert!(validate_symlink_target(&link, "/etc/passwd").is_err());
/// ```
pub fn validate_symlink_target(link: &MemberPath, target: &str) -> Result<()> {
    let escape = || Error::SymlinkTargetEscape {
        path: link.to_string(),
        target: target.to_string(),
    };

    if target.is_empty() || target.starts_with('/') || target.starts_with('\\') {
        return Err(escape());
    }

    // Windows absolute paths (C:\, D:/)
    let bytes = target.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(escape());
    }

    // Depth of the link's parent directory below the root.
    let mut depth = link.depth() as i64;
    for segment in target.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return Err(escape());
                }
            }
            _ => depth += 1,
        }
    }

    Ok(())
}

/// Validates one TAR entry's kind and permission bits.
///
/// # Errors
///
/// - [`Error::HardLinkRejected`] for hard links
/// - [`Error::SpecialFileRejected`] for devices, FIFOs and unknown types
/// - [`Error::PrivilegedFileRejected`] for setuid/setgid members
/// - [`Error::SymlinkTargetEscape`] for links leaving the root
pub fn validate_entry(path: &MemberPath, kind: &EntryKind, mode: u32) -> Result<()> {
    match kind {
        EntryKind::Regular | EntryKind::Directory => {}
        EntryKind::Symlink(target) => validate_symlink_target(path, target)?,
        EntryKind::HardLink => {
            return Err(Error::HardLinkRejected {
                path: path.to_string(),
            });
        }
        EntryKind::Special => {
            return Err(Error::SpecialFileRejected {
                path: path.to_string(),
            });
        }
    }

    if mode & (S_ISUID | S_ISGID) != 0 {
        return Err(Error::PrivilegedFileRejected {
            path: path.to_string(),
        });
    }

    Ok(())
}

/// Tracks member names seen so far and rejects repeats.
///
/// Two members with the same name extract to the same place, so which one
/// "wins" depends on the unpacking tool. Duplicates are rejected outright.
#[derive(Debug, Default)]
pub struct DuplicateGuard {
    seen: HashSet<MemberPath>,
}

impl DuplicateGuard {
    /// Creates an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a member name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateMember`] if the name was already recorded.
    pub fn insert(&mut self, path: &MemberPath) -> Result<()> {
        if self.seen.insert(path.clone()) {
            Ok(())
        } else {
            Err(Error::DuplicateMember {
                path: path.to_string(),
            })
        }
    }

    /// Number of distinct names seen.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true if nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Verifies that `path` resolves inside `root`.
///
/// `root` must exist. Components of `path` that do not exist yet are checked
/// lexically against the deepest existing ancestor, which is canonicalized.
pub fn ensure_within(root: &Path, path: &Path) -> Result<()> {
    let canonical_root = root.canonicalize()?;

    let mut ancestor = path;
    let mut pending = Vec::new();
    while !ancestor.exists() {
        match (ancestor.file_name(), ancestor.parent()) {
            (Some(name), Some(parent)) => {
                pending.push(name.to_os_string());
                ancestor = parent;
            }
            _ => break,
        }
    }

    let mut resolved = if ancestor.exists() {
        ancestor.canonicalize()?
    } else {
        canonical_root.clone()
    };
    for name in pending.into_iter().rev() {
        match Path::new(&name).components().next() {
            Some(Component::Normal(_)) => resolved.push(name),
            _ => {
                return Err(Error::PathTraversal {
                    path: path.display().to_string(),
                });
            }
        }
    }

    if resolved.starts_with(&canonical_root) {
        Ok(())
    } else {
        Err(Error::PathTraversal {
            path: path.display().to_string(),
        })
    }
}
