//! ZIP backend.
//!
//! Content is read and written through the `zip` crate. The per-entry
//! records that leak provenance (host system, entry comment, DOS timestamp)
//! are read straight from the central directory, since they are not all
//! exposed by the crate.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::member::{MemberInfo, MemberKind, Sidecar, ZipSidecar};
use super::{ArchiveReader, ArchiveWriter};
use crate::format::ContainerKind;
use crate::member_path::MemberPath;
use crate::safety::{self, DuplicateGuard};
use crate::timestamp::DosDateTime;
use crate::{Error, Result};

/// End of central directory record signature.
const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];
/// Central directory file header signature.
const CENTRAL_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x01, 0x02];
/// Fixed size of the end of central directory record.
const EOCD_SIZE: usize = 22;
/// Fixed size of a central directory file header.
const CENTRAL_HEADER_SIZE: usize = 46;

/// Unix file type mask and symlink type.
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Permissions of every cleaned entry.
const CANONICAL_PERMISSIONS: u32 = 0o644;

/// The member that must stay uncompressed so tools can sniff it.
const MIMETYPE_MEMBER: &str = "mimetype";

fn u16_at(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

fn u32_at(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Reads the sidecar record of every entry, in central directory order.
pub(crate) fn read_central_directory(path: &Path) -> io::Result<Vec<ZipSidecar>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let tail_len = len.min((EOCD_SIZE + u16::MAX as usize) as u64);
    file.seek(SeekFrom::Start(len - tail_len))?;
    let mut tail = vec![0u8; tail_len as usize];
    file.read_exact(&mut tail)?;

    if tail.len() < EOCD_SIZE {
        return Err(invalid_data("file too short for a ZIP archive"));
    }
    let eocd = (0..=tail.len() - EOCD_SIZE)
        .rev()
        .find(|&i| tail[i..].starts_with(&EOCD_SIGNATURE))
        .ok_or_else(|| invalid_data("end of central directory not found"))?;
    let record = &tail[eocd..];

    let entries = u16_at(record, 10);
    let cd_size = u32_at(record, 12);
    let cd_offset = u32_at(record, 16);
    if entries == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX {
        return Err(invalid_data("ZIP64 central directory"));
    }

    file.seek(SeekFrom::Start(u64::from(cd_offset)))?;
    let mut cd = vec![0u8; cd_size as usize];
    file.read_exact(&mut cd)?;

    let mut records = Vec::with_capacity(entries as usize);
    let mut pos = 0;
    for _ in 0..entries {
        if cd.len() < pos + CENTRAL_HEADER_SIZE || !cd[pos..].starts_with(&CENTRAL_SIGNATURE) {
            return Err(invalid_data("truncated central directory"));
        }
        let header = &cd[pos..];
        let host = header[5];
        let time = u16_at(header, 12);
        let date = u16_at(header, 14);
        let name_len = u16_at(header, 28) as usize;
        let extra_len = u16_at(header, 30) as usize;
        let comment_len = u16_at(header, 32) as usize;

        let comment_start = CENTRAL_HEADER_SIZE + name_len + extra_len;
        let end = comment_start + comment_len;
        if header.len() < end {
            return Err(invalid_data("truncated central directory entry"));
        }
        records.push(ZipSidecar {
            host,
            comment: header[comment_start..end].to_vec(),
            modified: DosDateTime::from_raw(date, time),
        });
        pos += end;
    }
    Ok(records)
}

fn open_archive(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    Ok(ZipArchive::new(BufReader::new(File::open(path)?))?)
}

/// A validated ZIP archive on disk.
#[derive(Debug)]
pub struct ZipReader {
    path: PathBuf,
    kind: ContainerKind,
    members: Vec<MemberInfo>,
}

impl ZipReader {
    /// Opens and validates an archive.
    ///
    /// # Errors
    ///
    /// - [`Error::Zip`] if the file is not a readable ZIP archive
    /// - [`Error::EncryptedContent`] if any entry is encrypted
    /// - [`Error::PathTraversal`] / [`Error::InvalidMemberPath`] for unsafe names
    /// - [`Error::DuplicateMember`] for repeated names
    /// - [`Error::SymlinkTargetEscape`] for symlinks leaving the archive
    pub fn open(path: &Path, kind: ContainerKind) -> Result<Self> {
        let mut archive = open_archive(path)?;

        let sidecars = match read_central_directory(path) {
            Ok(records) if records.len() == archive.len() => Some(records),
            Ok(records) => {
                log::warn!(
                    "{}: central directory lists {} entries, expected {}",
                    path.display(),
                    records.len(),
                    archive.len()
                );
                None
            }
            Err(e) => {
                log::debug!("{}: cannot read entry records: {}", path.display(), e);
                None
            }
        };

        let mut guard = DuplicateGuard::new();
        let mut members = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let (raw_name, is_dir, mode) = {
                let entry = archive.by_index_raw(index)?;
                if entry.encrypted() {
                    return Err(Error::EncryptedContent {
                        path: entry.name().to_string(),
                    });
                }
                (entry.name().to_string(), entry.is_dir(), entry.unix_mode())
            };

            let path = MemberPath::new(&raw_name)?;
            guard.insert(&path)?;

            let kind = if is_dir {
                MemberKind::Directory
            } else if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
                let mut target = String::new();
                archive
                    .by_index(index)?
                    .read_to_string(&mut target)
                    .map_err(|_| Error::InvalidMemberPath(format!("unreadable link target in '{}'", raw_name)))?;
                safety::validate_symlink_target(&path, &target)?;
                MemberKind::Symlink(target)
            } else {
                MemberKind::File
            };

            let sidecar = sidecars
                .as_ref()
                .and_then(|s| s.get(index).cloned())
                .map(Sidecar::Zip)
                .unwrap_or(Sidecar::Unknown);

            members.push(MemberInfo {
                path,
                kind,
                sidecar,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            members,
        })
    }

    /// Reads one member by its exact name, `None` if absent.
    pub fn read_member(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut archive = open_archive(&self.path)?;
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    /// Returns true if a member with this exact normalized path exists.
    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.path.as_str() == name)
    }
}

impl ArchiveReader for ZipReader {
    fn kind(&self) -> ContainerKind {
        self.kind
    }

    fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    fn extract_files(&self, place: &dyn Fn(usize) -> PathBuf) -> Result<()> {
        let mut archive = open_archive(&self.path)?;
        for (index, member) in self.members.iter().enumerate() {
            if !member.is_file() {
                continue;
            }
            let dest = place(index);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut entry = archive.by_index(index)?;
            let mut out = File::create(&dest)?;
            io::copy(&mut entry, &mut out)?;
        }
        Ok(())
    }

    fn create_writer(&self, output: &Path) -> Result<Box<dyn ArchiveWriter>> {
        Ok(Box::new(ZipArchiveWriter {
            inner: ZipWriter::new(File::create(output)?),
        }))
    }
}

/// Writes entries with a canonical record: Unix host, no comment,
/// 1980-01-01 00:00:00, mode 0644.
pub struct ZipArchiveWriter {
    inner: ZipWriter<File>,
}

fn entry_options(name: &str, size: usize) -> SimpleFileOptions {
    let method = if name == MIMETYPE_MEMBER {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(CANONICAL_PERMISSIONS)
        .large_file(size as u64 >= u64::from(u32::MAX))
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add_file(&mut self, member: &MemberInfo, data: &[u8]) -> Result<()> {
        let name = member.path.as_str();
        self.inner.start_file(name, entry_options(name, data.len()))?;
        self.inner.write_all(data)?;
        Ok(())
    }

    fn add_symlink(&mut self, member: &MemberInfo, target: &str) -> Result<()> {
        let name = member.path.as_str();
        self.inner
            .add_symlink(name, target, entry_options(name, target.len()))?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.inner.finish()?;
        Ok(())
    }
}
