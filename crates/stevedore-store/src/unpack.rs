use crate::{extraction_err, StoreError};
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::{chown, symlink, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tracing::{trace, warn};

/// Permission bits that are carried over from archive headers.
const MODE_MASK: u32 = 0o7777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Symbolic,
    Hard,
}

/// What an archive entry materializes as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File { size: u64 },
    Link { kind: LinkKind, target: PathBuf },
    /// Device nodes, FIFOs and anything else we do not replay. Carries the raw
    /// type byte from the header.
    Other(u8),
}

/// Header data of one archive entry, read before its content is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl ArchiveEntry {
    fn read<R: Read>(entry: &tar::Entry<'_, R>) -> io::Result<Self> {
        let header = entry.header();
        let entry_type = header.entry_type();
        let name = entry.path()?.into_owned();

        let kind = if entry_type.is_dir() {
            EntryKind::Directory
        } else if entry_type.is_file() {
            EntryKind::File { size: entry.size() }
        } else if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry
                .link_name()?
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "link entry without a target")
                })?
                .into_owned();
            let kind = if entry_type.is_symlink() {
                LinkKind::Symbolic
            } else {
                LinkKind::Hard
            };
            EntryKind::Link { kind, target }
        } else {
            EntryKind::Other(entry_type.as_byte())
        };

        Ok(Self {
            name,
            kind,
            mode: header.mode()? & MODE_MASK,
            uid: to_id(header.uid()?)?,
            gid: to_id(header.gid()?)?,
        })
    }
}

fn to_id(raw: u64) -> io::Result<u32> {
    u32::try_from(raw).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("owner id {raw} out of range"),
        )
    })
}

/// Counts of what an unpack produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackReport {
    pub directories: usize,
    pub files: usize,
    pub links: usize,
    /// Entries of unsupported type that were skipped: (type byte, archive path).
    pub skipped: Vec<(u8, PathBuf)>,
}

/// Replays a tar stream onto disk under a destination root.
///
/// Entries are applied in stream order. Content is copied through a bounded
/// buffer, so memory use does not grow with the archive.
pub struct ArchiveUnpacker {
    root: PathBuf,
    preserve_ownership: bool,
}

impl ArchiveUnpacker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            preserve_ownership: true,
        }
    }

    /// Whether header uid/gid are applied. When enabled, a failed chown is
    /// fatal.
    #[must_use]
    pub fn with_ownership(mut self, preserve: bool) -> Self {
        self.preserve_ownership = preserve;
        self
    }

    pub fn unpack<R: Read>(&self, reader: R) -> Result<UnpackReport, StoreError> {
        let canonical_root = fs::canonicalize(&self.root).map_err(extraction_err(&self.root))?;
        let mut archive = tar::Archive::new(reader);
        let mut report = UnpackReport::default();
        let mut dir_modes = Vec::new();
        let mut last_entry = self.root.clone();
        let archive_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| StoreError::Archive { path, source }
        };

        for entry in archive.entries().map_err(archive_err(&last_entry))? {
            let mut entry = entry.map_err(archive_err(&last_entry))?;
            let header = ArchiveEntry::read(&entry).map_err(archive_err(&last_entry))?;
            trace!("unpacking {}", header.name.display());
            last_entry.clone_from(&header.name);

            match &header.kind {
                EntryKind::Directory => {
                    let target = self.resolve(&canonical_root, &header.name)?;
                    self.unpack_directory(&header, &target)?;
                    // Later entries may swap symlinks along `target`; keep the
                    // real location for the deferred chmod.
                    let real = fs::canonicalize(&target).map_err(extraction_err(&target))?;
                    if !real.starts_with(&canonical_root) {
                        return Err(StoreError::PathEscape(header.name.clone()));
                    }
                    dir_modes.push((real, header.mode));
                    report.directories += 1;
                }
                EntryKind::File { size } => {
                    let target = self.resolve(&canonical_root, &header.name)?;
                    self.unpack_file(&header, *size, &target, &mut entry)?;
                    report.files += 1;
                }
                EntryKind::Link { kind, target: link } => {
                    let target = self.resolve(&canonical_root, &header.name)?;
                    self.unpack_link(&canonical_root, *kind, link, &target)?;
                    report.links += 1;
                }
                EntryKind::Other(code) => {
                    warn!(
                        "skipping archive entry of unknown type '{}' ({code:#04x}): {}",
                        char::from(*code).escape_default(),
                        self.root.join(&header.name).display()
                    );
                    report.skipped.push((*code, header.name.clone()));
                }
            }
        }

        // Children are written by now; apply directory modes deepest first so a
        // read-only parent never blocks the chmod of its children.
        for (dir, mode) in dir_modes.iter().rev() {
            fs::set_permissions(dir, fs::Permissions::from_mode(*mode))
                .map_err(extraction_err(dir))?;
        }

        Ok(report)
    }

    fn unpack_directory(&self, header: &ArchiveEntry, target: &Path) -> Result<(), StoreError> {
        remove_non_directory(target)?;
        match fs::create_dir(target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(extraction_err(target)(e)),
        }
        self.apply_ownership(header, target)
    }

    fn unpack_file(
        &self,
        header: &ArchiveEntry,
        size: u64,
        target: &Path,
        content: &mut impl Read,
    ) -> Result<(), StoreError> {
        remove_non_directory(target)?;
        let mut file = File::create(target).map_err(extraction_err(target))?;
        let copied = io::copy(content, &mut file).map_err(extraction_err(target))?;
        drop(file);

        if copied != size {
            return Err(StoreError::Extraction {
                path: target.to_path_buf(),
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("expected {size} bytes, archive provided {copied}"),
                ),
            });
        }

        // Mode goes last: chown clears setuid/setgid bits on some filesystems.
        self.apply_ownership(header, target)?;
        fs::set_permissions(target, fs::Permissions::from_mode(header.mode))
            .map_err(extraction_err(target))
    }

    fn unpack_link(
        &self,
        canonical_root: &Path,
        kind: LinkKind,
        link: &Path,
        target: &Path,
    ) -> Result<(), StoreError> {
        remove_non_directory(target)?;
        match kind {
            // Symlink targets are interpreted inside the sandbox; keep them verbatim.
            LinkKind::Symbolic => symlink(link, target).map_err(extraction_err(target)),
            LinkKind::Hard => {
                let source = self.link_source(canonical_root, link)?;
                fs::hard_link(&source, target).map_err(extraction_err(target))
            }
        }
    }

    fn apply_ownership(&self, header: &ArchiveEntry, target: &Path) -> Result<(), StoreError> {
        if !self.preserve_ownership {
            return Ok(());
        }
        chown(target, Some(header.uid), Some(header.gid)).map_err(extraction_err(target))
    }

    /// Map an archive path to a location under the root.
    ///
    /// Leading `/` and `.` components are dropped; `..` is rejected. Missing
    /// parent directories are created, but only after the deepest existing
    /// ancestor has been shown to resolve inside the root, so a symlink left by
    /// an earlier entry cannot redirect the write.
    fn resolve(&self, canonical_root: &Path, name: &Path) -> Result<PathBuf, StoreError> {
        let relative = sanitize(name)?;
        let target = self.root.join(&relative);
        let Some(parent) = relative.parent().map(|p| self.root.join(p)) else {
            return Ok(target);
        };

        let existing = self.confined_ancestor(canonical_root, &parent, name)?;
        if existing != parent {
            fs::create_dir_all(&parent).map_err(extraction_err(&parent))?;
        }

        Ok(target)
    }

    /// Like `resolve` for the existing file a hard link points at, but never
    /// creates anything: a dangling link fails without leaving directories.
    fn link_source(&self, canonical_root: &Path, link: &Path) -> Result<PathBuf, StoreError> {
        let relative = sanitize(link)?;
        let source = self.root.join(&relative);
        let parent = source.parent().unwrap_or(self.root.as_path()).to_path_buf();

        let existing = self.confined_ancestor(canonical_root, &parent, link)?;
        if existing != parent {
            return Err(StoreError::Extraction {
                path: source,
                source: io::Error::new(io::ErrorKind::NotFound, "hard link target does not exist"),
            });
        }
        Ok(source)
    }

    /// Deepest existing ancestor of `dir` (itself included), which must
    /// resolve inside the root.
    fn confined_ancestor(
        &self,
        canonical_root: &Path,
        dir: &Path,
        name: &Path,
    ) -> Result<PathBuf, StoreError> {
        let existing = dir
            .ancestors()
            .find(|p| fs::symlink_metadata(p).is_ok())
            .unwrap_or(self.root.as_path());
        let resolved = fs::canonicalize(existing).map_err(extraction_err(existing))?;
        if !resolved.starts_with(canonical_root) {
            return Err(StoreError::PathEscape(name.to_path_buf()));
        }
        Ok(existing.to_path_buf())
    }
}

/// Archive path relative to the root. Leading `/` and `.` are dropped; `..`
/// is rejected.
fn sanitize(name: &Path) -> Result<PathBuf, StoreError> {
    let mut relative = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(StoreError::PathEscape(name.to_path_buf()));
            }
        }
    }
    Ok(relative)
}

/// Clear the way for a new entry without ever writing through an existing
/// file or symlink. Directories are left alone.
fn remove_non_directory(target: &Path) -> Result<(), StoreError> {
    match fs::symlink_metadata(target) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(target).map_err(extraction_err(target)),
        _ => Ok(()),
    }
}
