//! The recursive archive cleaner.
//!
//! [`ArchiveCleaner`] drives every container format. It is parameterized by
//! two seams:
//!
//! - an [`ArchiveReader`]/[`ArchiveWriter`] pair for the byte-level container
//!   (ZIP or TAR), which validates members on open and writes canonical
//!   per-entry records;
//! - a [`FormatHooks`] implementation for the document format stored in it
//!   (Office, OpenDocument, EPUB or none), which supplies keep/omit rules and
//!   destructive rewrites of individual members.
//!
//! # Cleaning
//!
//! All regular members are extracted into a private scratch directory, each
//! into its own subdirectory so nested cleaner outputs can never collide.
//! Members are then processed in write order (`mimetype` first, then by
//! path), except that members the hooks defer go last: the format hook runs,
//! the member is classified, and kept, omitted or recursively cleaned through
//! the dispatcher. A member that fails is recorded and the loop continues, so
//! one pass reports every problem. If anything failed, no output is left and
//! [`Error::CleaningFailed`] lists the failures. Otherwise the resolved
//! members are written in write order. The scratch directory is removed on
//! every path.

pub mod member;
pub mod tar;
pub mod zip;

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::cleaner::{self, Cleaner, HARMFUL_CONTENT, MetaValue, Metadata};
use crate::classify::{Disposition, RuleSet};
use crate::dispatch;
use crate::error::MemberFailure;
use crate::format::ContainerKind;
use crate::member_path::MemberPath;
use crate::policy::{CleanOptions, UnknownMemberPolicy};
use crate::safety;
use crate::{Error, Result};

pub use member::{MemberInfo, MemberKind, Sidecar, TarSidecar, ZipSidecar, write_order};

/// Read side of a container backend.
///
/// Implementations validate every member when they are opened, so a reader
/// that exists describes a container that is safe to extract.
pub trait ArchiveReader: Send {
    /// The container family.
    fn kind(&self) -> ContainerKind;

    /// Every member, in on-disk order.
    fn members(&self) -> &[MemberInfo];

    /// Writes the content of every regular member to `place(index)`, where
    /// `index` is the member's position in [`members`](ArchiveReader::members).
    fn extract_files(&self, place: &dyn Fn(usize) -> PathBuf) -> Result<()>;

    /// Creates a writer producing a container of the same kind at `output`.
    fn create_writer(&self, output: &Path) -> Result<Box<dyn ArchiveWriter>>;
}

/// Write side of a container backend. Every entry gets a canonical record.
pub trait ArchiveWriter {
    /// Appends a regular file.
    fn add_file(&mut self, member: &MemberInfo, data: &[u8]) -> Result<()>;

    /// Appends a symbolic link.
    fn add_symlink(&mut self, member: &MemberInfo, target: &str) -> Result<()>;

    /// Completes the container.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Format-specific behavior layered on the generic engine.
pub trait FormatHooks: Send {
    /// Keep/omit rules of this format.
    fn rules(&self) -> &RuleSet;

    /// Rewrites one extracted member in place, before classification.
    ///
    /// Runs for every regular member, whatever its classification.
    fn cleanup(&mut self, member: &MemberPath, file: &Path) -> Result<()> {
        let _ = (member, file);
        Ok(())
    }

    /// Format-specific metadata found in one extracted member.
    fn member_meta(&self, member: &MemberPath, file: &Path) -> Result<Metadata> {
        let _ = (member, file);
        Ok(Metadata::new())
    }

    /// Returns true for members that must be cleaned after every other
    /// member was resolved, such as manifests listing the other parts.
    ///
    /// Deferral changes the processing order only; the write order is fixed.
    fn deferred(&self, member: &MemberPath) -> bool {
        let _ = member;
        false
    }

    /// Called for every member left out of the output, whether by a rule or
    /// by the unknown member policy.
    fn omitted(&mut self, member: &MemberPath) {
        let _ = member;
    }

    /// Runs once after every member was written.
    fn final_checks(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Hooks for plain ZIP and TAR archives: no rules, no rewrites.
#[derive(Debug, Default)]
pub struct NoHooks {
    rules: RuleSet,
}

impl FormatHooks for NoHooks {
    fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

/// A container cleaner: one backend plus one set of format hooks.
pub struct ArchiveCleaner {
    path: PathBuf,
    output: PathBuf,
    reader: Box<dyn ArchiveReader>,
    hooks: Box<dyn FormatHooks>,
    options: CleanOptions,
}

impl std::fmt::Debug for ArchiveCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveCleaner")
            .field("path", &self.path)
            .field("kind", &self.reader.kind())
            .field("members", &self.reader.members().len())
            .field("options", &self.options)
            .finish()
    }
}

fn scratch_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("metastrip-").tempdir()?)
}

fn placement(scratch: &Path, members: &[MemberInfo]) -> impl Fn(usize) -> PathBuf + use<> {
    let names: Vec<String> = members
        .iter()
        .map(|m| m.path.file_name().to_string())
        .collect();
    let root = scratch.to_path_buf();
    move |index| root.join(index.to_string()).join(&names[index])
}

/// Outcome of processing one member.
enum Outcome {
    /// Write the content of this scratch file.
    File(PathBuf),
    /// Re-emit a validated symbolic link.
    Link(String),
    Skip,
}

impl ArchiveCleaner {
    /// Binds a backend and hooks to the file at `path`.
    pub fn new(
        path: &Path,
        reader: Box<dyn ArchiveReader>,
        hooks: Box<dyn FormatHooks>,
        options: CleanOptions,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            output: cleaner::cleaned_path(path),
            reader,
            hooks,
            options,
        }
    }

    /// The container family being cleaned.
    pub fn kind(&self) -> ContainerKind {
        self.reader.kind()
    }

    /// Every member of the input, in on-disk order.
    pub fn members(&self) -> &[MemberInfo] {
        self.reader.members()
    }

    /// Overrides where [`remove_all`](Cleaner::remove_all) writes.
    pub fn set_output_path(&mut self, output: impl Into<PathBuf>) {
        self.output = output.into();
    }

    fn container_name(&self) -> String {
        self.path.display().to_string()
    }

    fn clean_member(&mut self, member: &MemberInfo, file: &Path, lightweight: bool) -> Result<Outcome> {
        self.hooks.cleanup(&member.path, file)?;

        match self.hooks.rules().classify(member.path.as_str()) {
            Disposition::Keep => Ok(Outcome::File(file.to_path_buf())),
            Disposition::Omit => Ok(Outcome::Skip),
            Disposition::Recurse => self.recurse(member, file, lightweight),
        }
    }

    fn recurse(&self, member: &MemberInfo, file: &Path, lightweight: bool) -> Result<Outcome> {
        // Nested containers start from the default policy.
        let (nested, detection) = dispatch::dispatch(file, &CleanOptions::default());
        let format = detection
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let Some(mut nested) = nested else {
            return match self.options.unknown_member_policy() {
                UnknownMemberPolicy::Omit => {
                    log::warn!(
                        "In file {}, omitting unknown element {} (format: {})",
                        self.container_name(),
                        member.path,
                        format
                    );
                    Ok(Outcome::Skip)
                }
                UnknownMemberPolicy::Keep => {
                    log::warn!(
                        "In file {}, keeping unknown element {} (format: {})",
                        self.container_name(),
                        member.path,
                        format
                    );
                    Ok(Outcome::File(file.to_path_buf()))
                }
                UnknownMemberPolicy::Abort => Err(Error::UnsupportedFormat {
                    media_type: detection.map(|d| d.media_type.to_string()),
                }),
            };
        };

        log::debug!("cleaning {} as {}", member.path, format);
        if lightweight {
            nested.remove_all_lightweight()?;
        } else {
            nested.remove_all()?;
        }
        // The nested output sits next to the member in the scratch directory.
        Ok(Outcome::File(nested.output_path().to_path_buf()))
    }

    fn process(&mut self, lightweight: bool) -> Result<()> {
        let scratch = scratch_dir()?;
        let place = placement(scratch.path(), self.reader.members());
        for (index, member) in self.reader.members().iter().enumerate() {
            if member.is_file() {
                safety::ensure_within(scratch.path(), &place(index))?;
            }
        }
        self.reader.extract_files(&place)?;

        let order = write_order(self.reader.members());
        let (deferred, regular): (Vec<usize>, Vec<usize>) = order
            .iter()
            .copied()
            .partition(|&index| self.hooks.deferred(&self.reader.members()[index].path));

        let mut outcomes: Vec<Option<Outcome>> = Vec::new();
        outcomes.resize_with(self.reader.members().len(), || None);
        let mut failures = Vec::new();

        for index in regular.into_iter().chain(deferred) {
            let member = self.reader.members()[index].clone();
            let outcome = match &member.kind {
                MemberKind::Directory => continue,
                MemberKind::Symlink(target) => {
                    match self.hooks.rules().classify(member.path.as_str()) {
                        Disposition::Omit => Ok(Outcome::Skip),
                        _ => Ok(Outcome::Link(target.clone())),
                    }
                }
                MemberKind::File => self.clean_member(&member, &place(index), lightweight),
            };

            match outcome {
                Ok(outcome) => {
                    if matches!(outcome, Outcome::Skip) {
                        self.hooks.omitted(&member.path);
                    }
                    outcomes[index] = Some(outcome);
                }
                Err(e) => {
                    log::error!(
                        "In file {}, cleaning of {} failed: {}",
                        self.container_name(),
                        member.path,
                        e
                    );
                    failures.push(MemberFailure::new(member.path.as_str(), e.to_string()));
                }
            }
        }

        if !failures.is_empty() {
            return self.abandon(Error::CleaningFailed {
                path: self.container_name(),
                failures,
            });
        }

        if let Err(e) = self.write(&order, &outcomes) {
            return self.abandon(e);
        }
        if let Err(e) = self.hooks.final_checks() {
            return self.abandon(Error::CleaningFailed {
                path: self.container_name(),
                failures: vec![MemberFailure::new(self.container_name(), e.to_string())],
            });
        }
        Ok(())
    }

    /// Writes the resolved members in write order.
    fn write(&self, order: &[usize], outcomes: &[Option<Outcome>]) -> Result<()> {
        let mut writer = self.reader.create_writer(&self.output)?;
        for &index in order {
            let member = &self.reader.members()[index];
            match &outcomes[index] {
                Some(Outcome::File(file)) => writer.add_file(member, &fs::read(file)?)?,
                Some(Outcome::Link(target)) => writer.add_symlink(member, target)?,
                Some(Outcome::Skip) | None => {}
            }
        }
        writer.finish()
    }

    /// Deletes the partial output and returns `error`.
    fn abandon(&self, error: Error) -> Result<()> {
        match fs::remove_file(&self.output) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("cannot remove {}: {}", self.output.display(), e),
        }
        Err(error)
    }

    fn member_meta(&self, member: &MemberInfo, file: &Path) -> MetaValue {
        let mut local = member.sidecar.metadata();
        if !member.is_file() {
            return local.into();
        }

        match self.hooks.member_meta(&member.path, file) {
            Ok(specific) => local.extend(specific),
            Err(e) => {
                log::debug!("metadata scan of {} failed: {}", member.path, e);
                return HARMFUL_CONTENT.into();
            }
        }

        if let (Some(nested), _) = dispatch::dispatch(file, &CleanOptions::default()) {
            match nested.get_meta() {
                Ok(meta) => local.extend(meta),
                Err(e) => {
                    log::debug!("cannot read metadata of {}: {}", member.path, e);
                    return HARMFUL_CONTENT.into();
                }
            }
        }
        local.into()
    }
}

impl Cleaner for ArchiveCleaner {
    fn path(&self) -> &Path {
        &self.path
    }

    fn output_path(&self) -> &Path {
        &self.output
    }

    fn get_meta(&self) -> Result<Metadata> {
        let scratch = scratch_dir()?;
        let place = placement(scratch.path(), self.reader.members());
        self.reader.extract_files(&place)?;

        let mut meta = Metadata::new();
        for (index, member) in self.reader.members().iter().enumerate() {
            if member.is_dir() {
                continue;
            }
            let value = self.member_meta(member, &place(index));
            let empty = matches!(&value, MetaValue::Nested(m) if m.is_empty());
            if !empty {
                meta.insert(member.path.to_string(), value);
            }
        }
        Ok(meta)
    }

    fn remove_all(&mut self) -> Result<()> {
        self.process(false)
    }

    fn remove_all_lightweight(&mut self) -> Result<()> {
        self.process(true)
    }
}
