//! Member records and per-entry sidecar metadata.

use crate::cleaner::Metadata;
use crate::member_path::MemberPath;
use crate::timestamp::{self, DosDateTime, TAR_CANONICAL_MTIME};

/// ZIP "version made by" host byte for Unix.
pub const ZIP_HOST_UNIX: u8 = 3;
/// ZIP "version made by" host byte for MS-DOS/FAT, written by Windows tools.
pub const ZIP_HOST_DOS: u8 = 0;

/// What a member is, beyond its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    /// Regular file with content.
    File,
    /// Symbolic link with an already validated target.
    Symlink(String),
    /// Directory. Never re-emitted.
    Directory,
}

/// Archive bookkeeping for one ZIP entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipSidecar {
    /// Host system from the central directory "version made by" field.
    pub host: u8,
    /// Per-entry comment.
    pub comment: Vec<u8>,
    /// Modification time.
    pub modified: DosDateTime,
}

impl ZipSidecar {
    /// The record every cleaned entry gets.
    pub const CANONICAL: ZipSidecar = ZipSidecar {
        host: ZIP_HOST_UNIX,
        comment: Vec::new(),
        modified: DosDateTime::CANONICAL,
    };

    /// Non-canonical fields, as metadata.
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        match self.host {
            ZIP_HOST_UNIX => {}
            ZIP_HOST_DOS => {
                meta.insert("create_system".into(), "Windows".into());
            }
            _ => {
                meta.insert("create_system".into(), "Weird".into());
            }
        }
        if !self.comment.is_empty() {
            meta.insert(
                "comment".into(),
                String::from_utf8_lossy(&self.comment).into_owned().into(),
            );
        }
        if !self.modified.is_canonical() {
            meta.insert("date_time".into(), self.modified.to_string().into());
        }
        meta
    }
}

/// Archive bookkeeping for one TAR entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TarSidecar {
    /// Modification time, in seconds since the epoch.
    pub mtime: u64,
    /// Owner user ID.
    pub uid: u64,
    /// Owner group ID.
    pub gid: u64,
    /// Owner user name.
    pub uname: String,
    /// Owner group name.
    pub gname: String,
    /// Full mode field, including permission bits.
    pub mode: u32,
}

impl TarSidecar {
    /// Permission bits carried over to the cleaned entry.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o777
    }

    /// Non-canonical fields, as metadata.
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        if self.mtime != TAR_CANONICAL_MTIME {
            meta.insert("mtime".into(), timestamp::format_unix(self.mtime).into());
        }
        if self.uid != 0 {
            meta.insert("uid".into(), self.uid.to_string().into());
        }
        if self.gid != 0 {
            meta.insert("gid".into(), self.gid.to_string().into());
        }
        if !self.uname.is_empty() {
            meta.insert("uname".into(), self.uname.clone().into());
        }
        if !self.gname.is_empty() {
            meta.insert("gname".into(), self.gname.clone().into());
        }
        meta
    }
}

/// Per-entry bookkeeping of either container family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sidecar {
    /// ZIP central directory record.
    Zip(ZipSidecar),
    /// TAR header fields.
    Tar(TarSidecar),
    /// The record could not be read; nothing is reported for it.
    Unknown,
}

impl Sidecar {
    /// Non-canonical fields, as metadata.
    pub fn metadata(&self) -> Metadata {
        match self {
            Sidecar::Zip(z) => z.metadata(),
            Sidecar::Tar(t) => t.metadata(),
            Sidecar::Unknown => Metadata::new(),
        }
    }
}

/// One validated container member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Normalized container-relative path.
    pub path: MemberPath,
    /// What the member is.
    pub kind: MemberKind,
    /// Archive bookkeeping read from the input.
    pub sidecar: Sidecar,
}

impl MemberInfo {
    /// Returns true for regular files.
    pub fn is_file(&self) -> bool {
        self.kind == MemberKind::File
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == MemberKind::Directory
    }
}

/// Orders members for writing: `mimetype` first, the rest by path.
///
/// Returns indices into `members`. Directories are dropped. Members with
/// equal paths cannot exist, since containers with duplicates are rejected
/// on open.
pub fn write_order(members: &[MemberInfo]) -> Vec<usize> {
    let mut ordered: Vec<usize> = (0..members.len())
        .filter(|i| !members[*i].is_dir())
        .collect();
    ordered.sort_by_key(|i| {
        let path = members[*i].path.as_str();
        (path != "mimetype", path)
    });
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> MemberInfo {
        MemberInfo {
            path: MemberPath::new(name).unwrap(),
            kind: MemberKind::File,
            sidecar: Sidecar::Unknown,
        }
    }

    #[test]
    fn test_write_order_mimetype_first() {
        let mut dir = file("META-INF");
        dir.kind = MemberKind::Directory;
        let members = vec![
            file("content.xml"),
            file("META-INF/manifest.xml"),
            dir,
            file("mimetype"),
            file("Thumbnails/thumbnail.png"),
        ];
        let names: Vec<_> = write_order(&members)
            .into_iter()
            .map(|i| members[i].path.as_str())
            .collect();
        assert_eq!(
            names,
            [
                "mimetype",
                "META-INF/manifest.xml",
                "Thumbnails/thumbnail.png",
                "content.xml"
            ]
        );
    }

    #[test]
    fn test_nested_mimetype_is_not_special() {
        let members = vec![file("b"), file("a/mimetype")];
        let names: Vec<_> = write_order(&members)
            .into_iter()
            .map(|i| members[i].path.as_str())
            .collect();
        assert_eq!(names, ["a/mimetype", "b"]);
    }

    #[test]
    fn test_zip_sidecar_metadata() {
        assert!(ZipSidecar::CANONICAL.metadata().is_empty());

        let sidecar = ZipSidecar {
            host: ZIP_HOST_DOS,
            comment: b"Thank you for using MAT!".to_vec(),
            modified: DosDateTime::from_raw(((2018 - 1980) << 9) | (3 << 5) | 20, 0),
        };
        let meta = sidecar.metadata();
        assert_eq!(meta["create_system"].as_text(), Some("Windows"));
        assert_eq!(meta["comment"].as_text(), Some("Thank you for using MAT!"));
        assert_eq!(meta["date_time"].as_text(), Some("2018-03-20 00:00:00"));

        let weird = ZipSidecar {
            host: 19,
            ..ZipSidecar::CANONICAL
        };
        assert_eq!(weird.metadata()["create_system"].as_text(), Some("Weird"));
    }

    #[test]
    fn test_tar_sidecar_metadata() {
        assert!(TarSidecar::default().metadata().is_empty());
        let sidecar = TarSidecar {
            mtime: 86_400,
            uid: 1000,
            gid: 1000,
            uname: "jvoisin".into(),
            gname: "users".into(),
            mode: 0o100644,
        };
        let meta = sidecar.metadata();
        assert_eq!(meta.len(), 5);
        assert_eq!(meta["mtime"].as_text(), Some("1970-01-02 00:00:00"));
        assert_eq!(meta["uname"].as_text(), Some("jvoisin"));
        assert_eq!(sidecar.permissions(), 0o644);
    }
}
