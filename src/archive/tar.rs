//! TAR backend, with optional gzip/bzip2/xz compression.
//!
//! The compression is detected from the stream's magic bytes, not from the
//! file name, and the cleaned archive is written with the same codec.
//! Every entry is validated on open; see [`crate::safety`].

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tar::{EntryType, Header};

use super::member::{MemberInfo, MemberKind, Sidecar, TarSidecar};
use super::{ArchiveReader, ArchiveWriter};
use crate::codec::{Compression, Encoder};
use crate::format::ContainerKind;
use crate::member_path::MemberPath;
use crate::safety::{self, DuplicateGuard, EntryKind};
use crate::timestamp::TAR_CANONICAL_MTIME;
use crate::{Error, Result};

/// Size of one TAR block; nothing shorter is an archive.
const BLOCK_SIZE: usize = 512;

/// Permissions used when the original entry carried none.
const DEFAULT_PERMISSIONS: u32 = 0o644;

fn malformed(e: io::Error) -> Error {
    Error::InvalidFormat(format!("malformed TAR archive: {}", e))
}

fn lossy(bytes: Option<&[u8]>) -> String {
    bytes
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

/// Reads a header field that is only reported, never trusted.
///
/// These fields are replaced on output, so an unparsable value reads as 0.
fn bookkeeping(member: &MemberPath, field: &str, value: io::Result<u64>) -> u64 {
    value.unwrap_or_else(|e| {
        log::debug!("{}: unreadable {} field: {}", member, field, e);
        0
    })
}

/// Returns true for names that denote the archive root itself (`./`).
fn is_root_entry(raw: &str) -> bool {
    !raw.starts_with('/') && raw.split('/').all(|s| s.is_empty() || s == ".")
}

/// A validated TAR archive, decompressed in memory.
#[derive(Debug)]
pub struct TarReader {
    compression: Compression,
    data: Vec<u8>,
    members: Vec<MemberInfo>,
    /// Position of each member in the entry stream.
    positions: Vec<usize>,
}

impl TarReader {
    /// Opens, decompresses and validates an archive.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedFormat`] if the compression codec is not compiled in
    /// - [`Error::InvalidFormat`] for undecodable streams and malformed headers
    /// - [`Error::PathTraversal`], [`Error::SymlinkTargetEscape`],
    ///   [`Error::HardLinkRejected`], [`Error::SpecialFileRejected`],
    ///   [`Error::PrivilegedFileRejected`], [`Error::DuplicateMember`] for
    ///   unsafe entries
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut magic = Vec::with_capacity(8);
        (&mut file).take(8).read_to_end(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        let compression = Compression::from_signature(&magic);
        let mut data = Vec::new();
        compression
            .decoder(BufReader::new(file))?
            .read_to_end(&mut data)
            .map_err(|e| Error::InvalidFormat(format!("cannot decode {} stream: {}", compression, e)))?;
        if data.len() < BLOCK_SIZE {
            return Err(Error::InvalidFormat(format!(
                "{} bytes is too short for a TAR archive",
                data.len()
            )));
        }

        let mut reader = Self {
            compression,
            data,
            members: Vec::new(),
            positions: Vec::new(),
        };
        reader.scan()?;
        Ok(reader)
    }

    fn scan(&mut self) -> Result<()> {
        let mut archive = tar::Archive::new(self.data.as_slice());
        let mut guard = DuplicateGuard::new();

        for (position, entry) in archive.entries().map_err(malformed)?.enumerate() {
            let entry = entry.map_err(malformed)?;
            let header = entry.header();
            let entry_type = header.entry_type();

            // Archive-wide PAX records (such as a VCS commit id) are dropped.
            if entry_type == EntryType::XGlobalHeader {
                log::debug!("dropping global PAX header");
                continue;
            }

            let raw = String::from_utf8(entry.path_bytes().into_owned())
                .map_err(|_| Error::InvalidMemberPath("member name is not UTF-8".into()))?;
            if entry_type == EntryType::Directory && is_root_entry(&raw) {
                continue;
            }
            let path = MemberPath::new(&raw)?;

            let kind = match entry_type {
                EntryType::Regular | EntryType::Continuous => EntryKind::Regular,
                EntryType::Directory => EntryKind::Directory,
                EntryType::Symlink => {
                    EntryKind::Symlink(lossy(entry.link_name_bytes().as_deref()))
                }
                EntryType::Link => EntryKind::HardLink,
                _ => EntryKind::Special,
            };
            let mode = header.mode().map_err(malformed)?;
            safety::validate_entry(&path, &kind, mode)?;
            guard.insert(&path)?;

            let sidecar = TarSidecar {
                mtime: bookkeeping(&path, "mtime", header.mtime()),
                uid: bookkeeping(&path, "uid", header.uid()),
                gid: bookkeeping(&path, "gid", header.gid()),
                uname: lossy(header.username_bytes()),
                gname: lossy(header.groupname_bytes()),
                mode,
            };

            let kind = match kind {
                EntryKind::Regular => MemberKind::File,
                EntryKind::Directory => MemberKind::Directory,
                EntryKind::Symlink(target) => MemberKind::Symlink(target),
                // Rejected by validate_entry above.
                EntryKind::HardLink | EntryKind::Special => continue,
            };

            self.members.push(MemberInfo {
                path,
                kind,
                sidecar: Sidecar::Tar(sidecar),
            });
            self.positions.push(position);
        }
        Ok(())
    }

    /// The compression wrapped around the TAR stream.
    pub fn compression(&self) -> Compression {
        self.compression
    }
}

impl ArchiveReader for TarReader {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Tar
    }

    fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    fn extract_files(&self, place: &dyn Fn(usize) -> PathBuf) -> Result<()> {
        let by_position: HashMap<usize, usize> = self
            .positions
            .iter()
            .enumerate()
            .map(|(index, position)| (*position, index))
            .collect();

        let mut archive = tar::Archive::new(self.data.as_slice());
        for (position, entry) in archive.entries().map_err(malformed)?.enumerate() {
            let mut entry = entry.map_err(malformed)?;
            let Some(&index) = by_position.get(&position) else {
                continue;
            };
            if !self.members[index].is_file() {
                continue;
            }
            let dest = place(index);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&dest)?;
            io::copy(&mut entry, &mut out)?;
        }
        Ok(())
    }

    fn create_writer(&self, output: &Path) -> Result<Box<dyn ArchiveWriter>> {
        let file = BufWriter::new(File::create(output)?);
        Ok(Box::new(TarArchiveWriter {
            builder: tar::Builder::new(self.compression.encoder(file)?),
        }))
    }
}

/// Writes entries with a canonical header: mtime 0, owner 0:0, no owner
/// names, permission bits only.
pub struct TarArchiveWriter {
    builder: tar::Builder<Encoder<BufWriter<File>>>,
}

fn canonical_header(entry_type: EntryType, size: u64, mode: u32) -> Result<Header> {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(TAR_CANONICAL_MTIME);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("")?;
    header.set_groupname("")?;
    Ok(header)
}

impl ArchiveWriter for TarArchiveWriter {
    fn add_file(&mut self, member: &MemberInfo, data: &[u8]) -> Result<()> {
        let mode = match &member.sidecar {
            Sidecar::Tar(t) => t.permissions(),
            _ => DEFAULT_PERMISSIONS,
        };
        let mut header = canonical_header(EntryType::Regular, data.len() as u64, mode)?;
        self.builder
            .append_data(&mut header, member.path.as_str(), data)?;
        Ok(())
    }

    fn add_symlink(&mut self, member: &MemberInfo, target: &str) -> Result<()> {
        let mut header = canonical_header(EntryType::Symlink, 0, 0o777)?;
        self.builder
            .append_link(&mut header, member.path.as_str(), target)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let encoder = self.builder.into_inner()?;
        let mut file = encoder.finish()?;
        file.flush()?;
        Ok(())
    }
}
