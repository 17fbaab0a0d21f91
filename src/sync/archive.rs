//! Streaming tar archive of a local file subset.
//!
//! Entries are produced lazily while walking the source tree and written
//! straight into the output sink, one at a time. Nothing but the entry being
//! written is held in memory.
//!
//! Every entry name starts with a synthetic top-level component (the
//! destination prefix) so the remote side can unpack with
//! `tar xf - -C <dir> --strip 1`. Names always use `/` separators.

use std::collections::VecDeque;
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use jwalk::{Parallelism, WalkDir};
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::debug;

use crate::error::SyncError;
use crate::sync::filter::PathFilter;
use crate::sync::request::SyncRequest;

/// Kind of archive record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
}

/// One record of the archive stream.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Slash-separated name, rooted at the destination prefix.
    pub name: String,
    pub kind: EntryKind,
    /// Content length; zero for directories and symlinks.
    pub size: u64,
    /// Permission bits.
    pub mode: u32,
    /// Literal symlink target, never resolved.
    pub link_target: Option<PathBuf>,
    /// Local path the entry was read from.
    pub source: PathBuf,
    metadata: Metadata,
}

impl ArchiveEntry {
    fn from_path(root: &ArchiveRoot, path: &Path) -> Result<Option<Self>, SyncError> {
        let metadata = fs::symlink_metadata(path).map_err(|e| SyncError::source_read(path, e))?;
        let relative = path.strip_prefix(&root.source).unwrap_or_else(|_| Path::new(""));
        let name = entry_name(&root.name, relative);
        let file_type = metadata.file_type();

        let (kind, size, link_target) = if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| SyncError::source_read(path, e))?;
            (EntryKind::Symlink, 0, Some(target))
        } else if file_type.is_dir() {
            (EntryKind::Directory, 0, None)
        } else if file_type.is_file() {
            (EntryKind::Regular, metadata.len(), None)
        } else {
            debug!(path = %path.display(), "skipping special file");
            return Ok(None);
        };

        Ok(Some(Self {
            name,
            kind,
            size,
            mode: file_mode(&metadata),
            link_target,
            source: path.to_path_buf(),
            metadata,
        }))
    }

    /// Open the content of a regular file.
    pub fn open(&self) -> Result<File, SyncError> {
        File::open(&self.source).map_err(|e| SyncError::source_read(&self.source, e))
    }

    fn header(&self) -> Header {
        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&self.metadata, HeaderMode::Complete);
        header.set_mode(self.mode);
        header.set_size(self.size);
        header.set_entry_type(match self.kind {
            EntryKind::Regular => EntryType::Regular,
            EntryKind::Directory => EntryType::Directory,
            EntryKind::Symlink => EntryType::Symlink,
        });
        header
    }
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// `prefix/a/b` from a relative path, ignoring anything but normal components.
fn entry_name(prefix: &str, relative: &Path) -> String {
    let mut name = prefix.to_string();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            name.push('/');
            name.push_str(&part.to_string_lossy());
        }
    }
    name
}

/// A path to walk and the archive name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRoot {
    pub source: PathBuf,
    pub name: String,
}

/// Counters for a finished archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
    pub bytes: u64,
}

impl ArchiveStats {
    fn record(&mut self, entry: &ArchiveEntry) {
        match entry.kind {
            EntryKind::Regular => {
                self.files += 1;
                self.bytes += entry.size;
            }
            EntryKind::Directory => self.directories += 1,
            EntryKind::Symlink => self.symlinks += 1,
        }
    }
}

/// Builds the archive for a [`SyncRequest`].
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    filter: PathFilter,
}

impl ArchiveBuilder {
    pub fn new(filter: PathFilter) -> Self {
        Self { filter }
    }

    /// Resolve the request into the roots to walk.
    ///
    /// Without a file list the base path itself is the only root and must be
    /// a directory. With a list, every path that currently exists becomes a
    /// root named after its position below the base path. Listed paths that
    /// climb out of the base through `..` are rejected.
    pub fn plan(&self, request: &SyncRequest, prefix: &str) -> Result<Vec<ArchiveRoot>, SyncError> {
        if prefix.is_empty() || prefix.contains('/') || prefix == "." || prefix == ".." {
            return Err(SyncError::Configuration(format!(
                "invalid archive prefix '{}'",
                prefix
            )));
        }
        let base = request.local_path.as_path();

        if request.is_whole_subtree() {
            let metadata =
                fs::symlink_metadata(base).map_err(|e| SyncError::source_read(base, e))?;
            if !metadata.is_dir() {
                return Err(SyncError::Configuration(format!(
                    "{} is not a directory; pass single files as an explicit file list",
                    base.display()
                )));
            }
            return Ok(vec![ArchiveRoot {
                source: base.to_path_buf(),
                name: prefix.to_string(),
            }]);
        }

        let mut roots = Vec::with_capacity(request.files.len());
        for file in &request.files {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                base.join(file)
            };

            let outside = || {
                SyncError::Configuration(format!(
                    "{} is not below the sync base {}",
                    path.display(),
                    base.display()
                ))
            };
            let relative = path.strip_prefix(base).map_err(|_| outside())?;
            if relative.components().any(|c| c == Component::ParentDir) {
                return Err(outside());
            }

            if fs::symlink_metadata(&path).is_err() {
                debug!(path = %path.display(), "listed path no longer exists, skipping");
                continue;
            }
            roots.push(ArchiveRoot {
                name: entry_name(prefix, relative),
                source: path,
            });
        }
        Ok(roots)
    }

    /// Lazily enumerate the entries of the archive, in write order.
    pub fn entries(&self, request: &SyncRequest, prefix: &str) -> Result<Entries, SyncError> {
        Ok(Entries {
            roots: self.plan(request, prefix)?.into(),
            walk: None,
            filter: self.filter.clone(),
            done: false,
        })
    }

    /// Write the whole archive into `sink` and finish it.
    ///
    /// A local read failure aborts with [`SyncError::SourceRead`]; a failure
    /// of the sink itself is reported as [`SyncError::StreamBroken`]. Bytes
    /// already written are not retracted.
    pub fn write_to<W: Write>(
        &self,
        request: &SyncRequest,
        prefix: &str,
        sink: W,
    ) -> Result<ArchiveStats, SyncError> {
        let mut tar = Builder::new(SealableSink {
            inner: sink,
            sealed: false,
        });
        let mut stats = ArchiveStats::default();

        let appended = self.entries(request, prefix).and_then(|entries| {
            for entry in entries {
                let entry = entry?;
                append_entry(&mut tar, &entry)?;
                stats.record(&entry);
            }
            Ok(())
        });
        if let Err(err) = appended {
            // The builder writes the end-of-archive marker when dropped; a
            // failed archive must not look complete to the reader.
            tar.get_mut().sealed = true;
            return Err(err);
        }

        tar.finish().map_err(SyncError::from_stream)?;
        debug!(
            files = stats.files,
            directories = stats.directories,
            symlinks = stats.symlinks,
            bytes = stats.bytes,
            "archive complete"
        );
        Ok(stats)
    }
}

fn append_entry<W: Write>(tar: &mut Builder<W>, entry: &ArchiveEntry) -> Result<(), SyncError> {
    debug!(name = %entry.name, kind = ?entry.kind, size = entry.size, "adding archive entry");
    let mut header = entry.header();

    match entry.kind {
        EntryKind::Directory => tar
            .append_data(&mut header, format!("{}/", entry.name), io::empty())
            .map_err(SyncError::from_stream),
        EntryKind::Symlink => {
            let target = entry.link_target.as_deref().unwrap_or_else(|| Path::new(""));
            tar.append_link(&mut header, &entry.name, target)
                .map_err(SyncError::from_stream)
        }
        EntryKind::Regular => {
            let mut content = SourceContent {
                file: entry.open()?,
                remaining: entry.size,
                read_error: None,
            };
            match tar.append_data(&mut header, &entry.name, &mut content) {
                Ok(()) => Ok(()),
                Err(err) => match content.read_error.take() {
                    Some(read_err) => Err(SyncError::source_read(&entry.source, read_err)),
                    None => Err(SyncError::from_stream(err)),
                },
            }
        }
    }
}

/// Sink that refuses further writes once sealed.
struct SealableSink<W> {
    inner: W,
    sealed: bool,
}

impl<W: Write> Write for SealableSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.sealed {
            return Err(io::Error::other("archive aborted"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// File content capped at the size recorded in the header.
///
/// Read failures are remembered so they can be told apart from sink
/// failures once the tar builder returns.
struct SourceContent {
    file: File,
    remaining: u64,
    read_error: Option<io::Error>,
}

impl Read for SourceContent {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = self.remaining.min(buf.len() as u64) as usize;
        match self.file.read(&mut buf[..max]) {
            Ok(0) => {
                let message = "file shrank while it was being archived";
                self.read_error = Some(io::Error::new(io::ErrorKind::UnexpectedEof, message));
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, message))
            }
            Ok(n) => {
                self.remaining -= n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                let copy = io::Error::new(e.kind(), e.to_string());
                self.read_error = Some(e);
                Err(copy)
            }
        }
    }
}

type WalkIter = Box<dyn Iterator<Item = Result<jwalk::DirEntry<((), ())>, jwalk::Error>>>;

fn walk(root: &Path, filter: PathFilter) -> WalkIter {
    let walker = WalkDir::new(root)
        .parallelism(Parallelism::Serial)
        .sort(true)
        .skip_hidden(false)
        .follow_links(false)
        .process_read_dir(move |_depth, _path, _state, children| {
            // Excluded directories are dropped here so they are never descended into.
            children.retain(|child| {
                child
                    .as_ref()
                    .map_or(true, |entry| !filter.is_excluded(&entry.path()))
            });
        });
    Box::new(walker.into_iter())
}

/// Lazy entry sequence returned by [`ArchiveBuilder::entries`].
///
/// Stops after the first error.
pub struct Entries {
    roots: VecDeque<ArchiveRoot>,
    walk: Option<(ArchiveRoot, WalkIter)>,
    filter: PathFilter,
    done: bool,
}

impl Iterator for Entries {
    type Item = Result<ArchiveEntry, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if self.walk.is_none() {
                let root = self.roots.pop_front()?;
                if self.filter.is_excluded(&root.source) {
                    debug!(path = %root.source.display(), "root excluded");
                    continue;
                }
                // The walker stats through a root symlink, so anything but a
                // real directory is emitted as a single entry.
                let is_dir = match fs::symlink_metadata(&root.source) {
                    Ok(metadata) => metadata.is_dir(),
                    Err(err) => {
                        self.done = true;
                        return Some(Err(SyncError::source_read(&root.source, err)));
                    }
                };
                if !is_dir {
                    match ArchiveEntry::from_path(&root, &root.source) {
                        Ok(Some(entry)) => return Some(Ok(entry)),
                        Ok(None) => continue,
                        Err(err) => {
                            self.done = true;
                            return Some(Err(err));
                        }
                    }
                }
                let walker = walk(&root.source, self.filter.clone());
                self.walk = Some((root, walker));
            }

            let (root, walker) = self.walk.as_mut()?;
            match walker.next() {
                None => self.walk = None,
                Some(Err(err)) => {
                    self.done = true;
                    let source = io::Error::other(err.to_string());
                    return Some(Err(SyncError::source_read(&root.source, source)));
                }
                Some(Ok(dir_entry)) => match ArchiveEntry::from_path(root, &dir_entry.path()) {
                    Ok(Some(entry)) => return Some(Ok(entry)),
                    Ok(None) => continue,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                },
            }
        }
    }
}
