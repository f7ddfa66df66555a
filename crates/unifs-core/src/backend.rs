//! Backend contract.
//!
//! A storage system participates by implementing [`Backend`]: a required
//! surface (identification, stat, listing, streams, make-dir, remove, close)
//! plus optional capability groups declared through
//! [`Backend::capabilities`]. Optional operations default to `Unsupported`.
//!
//! All paths handed to a backend are backend-local: the registry has already
//! stripped the prefix. Calls are synchronous and may block.

use std::fmt;
use std::io::{Read, Seek, Write};
use std::sync::Arc;

use crate::cancel::OpContext;
use crate::capability::{Capabilities, Capability};
use crate::error::{FsError, FsResult};
use crate::path;
use crate::types::{DirEntry, FileInfo, Permissions, WatchEvent};

/// Readable, seekable stream.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Readable, writable, seekable stream.
pub trait ReadWriteSeek: Read + Write + Seek + Send {}
impl<T: Read + Write + Seek + Send> ReadWriteSeek for T {}

pub type Reader = Box<dyn ReadSeek>;
pub type Writer = Box<dyn Write + Send>;
pub type ReadWriter = Box<dyn ReadWriteSeek>;

/// Callback for change notifications.
pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Callback for directory listings.
pub type ListCallback<'a> = &'a mut dyn FnMut(DirEntry) -> FsResult<()>;

/// Keeps a watch alive; dropping it unsubscribes.
pub struct WatchGuard {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchGuard {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop watching now.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A storage system reachable through the registry.
pub trait Backend: Send + Sync + fmt::Debug {
    // ========================================================================
    // Identification
    // ========================================================================

    /// Unique id of this instance.
    fn id(&self) -> &str;

    /// Handle prefix owned by this instance, e.g. `mem://<id>` or `file://`.
    fn prefix(&self) -> &str;

    /// Human readable backend name.
    fn name(&self) -> &str;

    /// One-line description for logs.
    fn describe(&self) -> String {
        format!("{} ({})", self.name(), self.prefix())
    }

    /// Optional groups this backend implements.
    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// Whether mutating operations are refused with `PermissionDenied`.
    fn read_only(&self) -> bool {
        false
    }

    // ========================================================================
    // Path algebra
    // ========================================================================

    /// Path separator used by backend-local paths.
    fn separator(&self) -> char;

    /// Length of the volume name at the start of `path` (drive letters etc.).
    fn volume_len(&self, _path: &str) -> usize {
        0
    }

    /// Full handle for a backend-local path.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.prefix(), path)
    }

    /// Join `parts` with the separator and clean the result lexically.
    fn join_clean_path(&self, parts: &[&str]) -> String {
        path::join_clean(parts, self.separator())
    }

    /// Non-empty segments of `path`.
    fn split_path(&self, path: &str) -> Vec<String> {
        path::split(path, self.separator())
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Split `path` into parent directory and final name.
    fn dir_and_name(&self, path: &str) -> (String, String) {
        path::dir_and_name(path, self.separator(), self.volume_len(path))
    }

    /// Whether `path` starts at the root, after any volume name.
    fn is_abs_path(&self, path: &str) -> bool {
        path::is_abs(path, self.separator(), self.volume_len(path))
    }

    /// Cleaned absolute form of `path`; relative paths hang off the root.
    fn abs_path(&self, path: &str) -> FsResult<String> {
        if self.is_abs_path(path) {
            Ok(path::clean_with_volume(path, self.separator(), self.volume_len(path)))
        } else {
            Ok(self.join_clean_path(&[&self.separator().to_string(), path]))
        }
    }

    /// Whether `name` matches any glob in `patterns`. An empty list matches everything.
    fn match_any_pattern(&self, name: &str, patterns: &[&str]) -> FsResult<bool> {
        path::match_any_pattern(name, patterns)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Metadata of `path`; `DoesNotExist` if missing.
    fn stat(&self, path: &str) -> FsResult<FileInfo>;

    /// Whether `path` exists. Any stat error reads as absent.
    fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }

    /// Whether the final name of `path` is a dotfile.
    fn is_hidden(&self, path: &str) -> bool {
        path::is_hidden_name(&self.dir_and_name(path).1)
    }

    /// Whether `path` is a symlink. Backends without links say no.
    fn is_symbolic_link(&self, _path: &str) -> bool {
        false
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Invoke `callback` for each direct child of `dir` whose name matches
    /// any of `patterns`. `ctx` is checked before every entry.
    fn list_dir_info(
        &self,
        ctx: &OpContext,
        dir: &str,
        callback: ListCallback<'_>,
        patterns: &[&str],
    ) -> FsResult<()>;

    /// Invoke `callback` for every non-directory below `dir` whose name
    /// matches `patterns`. All subdirectories are descended regardless of
    /// the patterns.
    fn list_dir_info_recursive(
        &self,
        ctx: &OpContext,
        dir: &str,
        callback: ListCallback<'_>,
        patterns: &[&str],
    ) -> FsResult<()> {
        let mut entries = Vec::new();
        self.list_dir_info(ctx, dir, &mut |entry| {
            entries.push(entry);
            Ok(())
        }, &[])?;
        for entry in entries {
            ctx.check()?;
            if entry.info.is_dir {
                self.list_dir_info_recursive(ctx, &entry.path, callback, patterns)?;
            } else if self.match_any_pattern(&entry.info.name, patterns)? {
                callback(entry)?;
            }
        }
        Ok(())
    }

    /// Paths of at most `max` children of `dir` (all when `None`).
    fn list_dir_max(
        &self,
        ctx: &OpContext,
        dir: &str,
        max: Option<usize>,
        patterns: &[&str],
    ) -> FsResult<Vec<String>> {
        let mut paths = Vec::new();
        if max == Some(0) {
            return Ok(paths);
        }
        self.list_dir_info(ctx, dir, &mut |entry| {
            if max.is_none_or(|max| paths.len() < max) {
                paths.push(entry.path);
            }
            Ok(())
        }, patterns)?;
        Ok(paths)
    }

    // ========================================================================
    // Data access
    // ========================================================================

    /// Open an existing file for reading; `DoesNotExist` if missing.
    fn open_reader(&self, path: &str) -> FsResult<Reader>;

    /// Open for writing, creating or truncating the file.
    fn open_writer(&self, path: &str, perm: Permissions) -> FsResult<Writer>;

    /// Open for reading and writing, creating the file if missing.
    fn open_read_writer(&self, path: &str, perm: Permissions) -> FsResult<ReadWriter>;

    /// Whole contents of `path`.
    fn read_all(&self, ctx: &OpContext, path: &str) -> FsResult<Vec<u8>> {
        ctx.check()?;
        let mut reader = self.open_reader(path)?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(data)
    }

    /// Replace the contents of `path` with `data`, creating it if missing.
    fn write_all(&self, ctx: &OpContext, path: &str, data: &[u8], perm: Permissions) -> FsResult<()> {
        ctx.check()?;
        let mut writer = self.open_writer(path, perm)?;
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| FsError::from_io(e, path))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a single directory; the parent must exist.
    fn make_dir(&self, path: &str, perm: Permissions) -> FsResult<()>;

    /// Remove the file or directory at `path`. The root cannot be removed.
    fn remove(&self, path: &str) -> FsResult<()>;

    /// Release all resources. Must be idempotent.
    fn close(&self) -> FsResult<()>;

    // ========================================================================
    // Optional capability groups
    // ========================================================================

    /// Copy `src` to `dst` in place. Copying a file onto itself is a no-op.
    fn copy_file(&self, _ctx: &OpContext, src: &str, _dst: &str) -> FsResult<()> {
        Err(unsupported(Capability::Copy, src))
    }

    /// Move `src` to `dst` in place, replacing an existing file.
    fn move_file(&self, src: &str, _dst: &str) -> FsResult<()> {
        Err(unsupported(Capability::Move, src))
    }

    /// Rename within the parent directory, returning the new path.
    fn rename(&self, path: &str, _new_name: &str) -> FsResult<String> {
        Err(unsupported(Capability::Rename, path))
    }

    /// Update the modification time, creating an empty file if missing.
    fn touch(&self, path: &str, _perm: Permissions) -> FsResult<()> {
        Err(unsupported(Capability::Touch, path))
    }

    /// Cut or zero-extend `path` to `size` bytes.
    fn truncate(&self, path: &str, _size: u64) -> FsResult<()> {
        Err(unsupported(Capability::Truncate, path))
    }

    /// Append `data` to `path`, creating it if missing.
    fn append(&self, _ctx: &OpContext, path: &str, _data: &[u8], _perm: Permissions) -> FsResult<()> {
        Err(unsupported(Capability::Append, path))
    }

    /// Writer positioned at the end of `path`, creating it if missing.
    fn open_append_writer(&self, path: &str, _perm: Permissions) -> FsResult<Writer> {
        Err(unsupported(Capability::AppendWriter, path))
    }

    /// Replace the permission bits of `path`.
    fn set_permissions(&self, path: &str, _perm: Permissions) -> FsResult<()> {
        Err(unsupported(Capability::Permissions, path))
    }

    /// Owning user of `path`.
    fn user(&self, path: &str) -> FsResult<String> {
        Err(unsupported(Capability::User, path))
    }

    /// Change the owning user of `path`.
    fn set_user(&self, path: &str, _user: &str) -> FsResult<()> {
        Err(unsupported(Capability::User, path))
    }

    /// Owning group of `path`.
    fn group(&self, path: &str) -> FsResult<String> {
        Err(unsupported(Capability::Group, path))
    }

    /// Change the owning group of `path`.
    fn set_group(&self, path: &str, _group: &str) -> FsResult<()> {
        Err(unsupported(Capability::Group, path))
    }

    /// Deliver changes under `path` to `callback` until the guard drops.
    fn watch(&self, path: &str, _callback: WatchCallback) -> FsResult<WatchGuard> {
        Err(unsupported(Capability::Watch, path))
    }

    /// Volume name at the start of `path`, empty when there is none.
    fn volume_name(&self, path: &str) -> FsResult<String> {
        Err(unsupported(Capability::VolumeName, path))
    }

    /// Create `path` and any missing ancestors.
    fn make_all(&self, path: &str, _perm: Permissions) -> FsResult<()> {
        Err(unsupported(Capability::MakeAll, path))
    }
}

/// `Unsupported` error for a capability group.
pub fn unsupported(cap: Capability, path: &str) -> FsError {
    FsError::unsupported(cap.into(), path)
}
