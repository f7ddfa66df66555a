//! Local filesystem backend.
//!
//! The registry's fallback target. Without a root it addresses host paths
//! directly; with a root every path is taken relative to it and attempts to
//! escape (via `..` or a symlink) are refused.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::time::SystemTime;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, event::ModifyKind};

use crate::backend::{Backend, ListCallback, ReadWriter, Reader, WatchCallback, WatchGuard, Writer};
use crate::cancel::OpContext;
use crate::capability::{Capabilities, Capability};
use crate::config::LocalConfig;
use crate::error::{ErrorKind, FsError, FsResult};
use crate::path;
use crate::types::{DirEntry, FileInfo, Permissions, WatchEvent, WatchEventKind};

/// Prefix owned by the local backend.
pub const LOCAL_PREFIX: &str = "file://";

/// Local filesystem backend.
///
/// With a root of `/home/amy/project`, the backend-local path `/src/main.rs`
/// is `/home/amy/project/src/main.rs` on disk.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    id: String,
    root: Option<PathBuf>,
    read_only: bool,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    /// Unrestricted access to host paths.
    pub fn new() -> Self {
        Self::with_config(LocalConfig::default())
    }

    /// Jail all paths below `root`.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self::with_config(LocalConfig {
            root: Some(root.into()),
            read_only: false,
        })
    }

    pub fn with_config(config: LocalConfig) -> Self {
        let root = config
            .root
            .map(|root| dunce::canonicalize(&root).unwrap_or(root));
        let id = match &root {
            Some(root) => format!("local:{}", root.display()),
            None => "local".to_string(),
        };
        Self {
            id,
            root,
            read_only: config.read_only,
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Map a backend-local path onto the host filesystem.
    fn resolve(&self, path: &str) -> FsResult<PathBuf> {
        let Some(root) = &self.root else {
            return Ok(PathBuf::from(if path.is_empty() { "." } else { path }));
        };

        let rel = path::clean(path.trim_start_matches(MAIN_SEPARATOR), MAIN_SEPARATOR);
        if rel == ".." || rel.starts_with(&format!("..{MAIN_SEPARATOR}")) {
            return Err(FsError::permission_denied(path));
        }
        if rel == "." {
            return Ok(root.clone());
        }

        let full = root.join(&rel);
        let canonical = if full.exists() {
            dunce::canonicalize(&full).map_err(|e| FsError::from_io(e, path))?
        } else {
            match (full.parent(), full.file_name()) {
                (Some(parent), Some(name)) if parent.exists() => dunce::canonicalize(parent)
                    .map_err(|e| FsError::from_io(e, path))?
                    .join(name),
                _ => full.clone(),
            }
        };
        if !canonical.starts_with(root) {
            tracing::debug!("LocalBackend: {} escapes {}", canonical.display(), root.display());
            return Err(FsError::permission_denied(path));
        }
        Ok(full)
    }

    fn check_writable(&self, path: &str) -> FsResult<()> {
        if self.read_only {
            Err(FsError::read_only(path))
        } else {
            Ok(())
        }
    }

    fn leaf_name(&self, path: &str) -> String {
        let name = self.dir_and_name(path).1;
        if name.is_empty() {
            MAIN_SEPARATOR.to_string()
        } else {
            name
        }
    }

    fn open_options(perm: Permissions) -> OpenOptions {
        let mut opts = OpenOptions::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(perm.bits());
        }
        #[cfg(not(unix))]
        let _ = perm;
        opts
    }

    fn dir_builder(perm: Permissions) -> fs::DirBuilder {
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(perm.bits());
        }
        #[cfg(not(unix))]
        let _ = perm;
        builder
    }
}

/// Backend-local spelling of a host path, `None` if outside the root.
fn to_local(root: Option<&Path>, full: &Path) -> Option<String> {
    let Some(root) = root else {
        return Some(full.to_string_lossy().into_owned());
    };
    let rel = full.strip_prefix(root).ok()?;
    let segs: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("{MAIN_SEPARATOR}{}", segs.join(&MAIN_SEPARATOR.to_string())))
}

/// Whether two host paths name the same file once links are resolved.
fn same_file(a: &Path, b: &Path) -> bool {
    match (dunce::canonicalize(a), dunce::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn info_from(name: String, meta: &fs::Metadata) -> FileInfo {
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let perm = permissions_of(meta);
    if meta.is_dir() {
        FileInfo::directory(name, modified, perm)
    } else {
        let mut info = FileInfo::file(name, meta.len(), modified, perm);
        info.is_regular = meta.is_file();
        info
    }
}

#[cfg(unix)]
fn permissions_of(meta: &fs::Metadata) -> Permissions {
    use std::os::unix::fs::PermissionsExt;
    Permissions::from_bits(meta.permissions().mode())
}

#[cfg(not(unix))]
fn permissions_of(meta: &fs::Metadata) -> Permissions {
    if meta.permissions().readonly() {
        Permissions::from_bits(0o444)
    } else {
        Permissions::FILE_DEFAULT
    }
}

fn watch_kind(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Create),
        EventKind::Remove(_) => Some(WatchEventKind::Remove),
        EventKind::Modify(ModifyKind::Name(_)) => Some(WatchEventKind::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(WatchEventKind::Chmod),
        EventKind::Modify(_) => Some(WatchEventKind::Write),
        _ => None,
    }
}

impl Backend for LocalBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn prefix(&self) -> &str {
        LOCAL_PREFIX
    }

    fn name(&self) -> &str {
        "local"
    }

    fn describe(&self) -> String {
        match &self.root {
            Some(root) => format!("local ({LOCAL_PREFIX}, root {})", root.display()),
            None => format!("local ({LOCAL_PREFIX})"),
        }
    }

    fn capabilities(&self) -> Capabilities {
        let caps: Capabilities = [
            Capability::Copy,
            Capability::Move,
            Capability::Rename,
            Capability::Touch,
            Capability::Truncate,
            Capability::Append,
            Capability::AppendWriter,
            Capability::Watch,
            Capability::VolumeName,
            Capability::MakeAll,
        ]
        .into_iter()
        .collect();
        if cfg!(unix) {
            caps.with(Capability::Permissions)
        } else {
            caps
        }
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn separator(&self) -> char {
        MAIN_SEPARATOR
    }

    /// Drive letter prefix (`C:`) on Windows, nothing elsewhere.
    fn volume_len(&self, path: &str) -> usize {
        let bytes = path.as_bytes();
        if cfg!(windows) && bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            2
        } else {
            0
        }
    }

    fn abs_path(&self, path: &str) -> FsResult<String> {
        if self.root.is_some() || self.is_abs_path(path) {
            let rooted = format!("{MAIN_SEPARATOR}{path}");
            let path = if self.is_abs_path(path) { path } else { rooted.as_str() };
            return Ok(path::clean_with_volume(path, MAIN_SEPARATOR, self.volume_len(path)));
        }
        let abs = std::path::absolute(path).map_err(|e| FsError::from_io(e, path))?;
        Ok(abs.to_string_lossy().into_owned())
    }

    fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).map_err(|e| FsError::from_io(e, path))?;
        Ok(info_from(self.leaf_name(path), &meta))
    }

    fn is_symbolic_link(&self, path: &str) -> bool {
        self.resolve(path)
            .and_then(|full| fs::symlink_metadata(full).map_err(FsError::from))
            .is_ok_and(|meta| meta.file_type().is_symlink())
    }

    fn list_dir_info(
        &self,
        ctx: &OpContext,
        dir: &str,
        callback: ListCallback<'_>,
        patterns: &[&str],
    ) -> FsResult<()> {
        ctx.check()?;
        let full = self.resolve(dir)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| FsError::from_io(e, dir))? {
            let entry = entry.map_err(|e| FsError::from_io(e, dir))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        for name in names {
            ctx.check()?;
            if !self.match_any_pattern(&name, patterns)? {
                continue;
            }
            let meta = match fs::metadata(full.join(&name)) {
                Ok(meta) => meta,
                // Vanished between read_dir and stat, or a dangling symlink.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(FsError::from_io(e, dir)),
            };
            let child = self.join_clean_path(&[dir, &name]);
            callback(DirEntry::new(child, info_from(name, &meta)))?;
        }
        Ok(())
    }

    fn open_reader(&self, path: &str) -> FsResult<Reader> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(FsError::is_directory(path));
        }
        let file = fs::File::open(&full).map_err(|e| FsError::from_io(e, path))?;
        Ok(Box::new(file))
    }

    fn open_writer(&self, path: &str, perm: Permissions) -> FsResult<Writer> {
        self.check_writable(path)?;
        let full = self.resolve(path)?;
        let file = Self::open_options(perm)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(Box::new(file))
    }

    fn open_read_writer(&self, path: &str, perm: Permissions) -> FsResult<ReadWriter> {
        self.check_writable(path)?;
        let full = self.resolve(path)?;
        let file = Self::open_options(perm)
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&full)
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(Box::new(file))
    }

    fn read_all(&self, ctx: &OpContext, path: &str) -> FsResult<Vec<u8>> {
        ctx.check()?;
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(FsError::is_directory(path));
        }
        fs::read(&full).map_err(|e| FsError::from_io(e, path))
    }

    fn make_dir(&self, path: &str, perm: Permissions) -> FsResult<()> {
        self.check_writable(path)?;
        let full = self.resolve(path)?;
        Self::dir_builder(perm)
            .create(&full)
            .map_err(|e| FsError::from_io(e, path))
    }

    /// Remove a file or an empty directory.
    fn remove(&self, path: &str) -> FsResult<()> {
        self.check_writable(path)?;
        let full = self.resolve(path)?;
        if self.root.as_deref() == Some(full.as_path()) {
            return Err(FsError::permission_denied(path));
        }
        let meta = fs::symlink_metadata(&full).map_err(|e| FsError::from_io(e, path))?;
        let result = if meta.is_dir() {
            fs::remove_dir(&full)
        } else {
            fs::remove_file(&full)
        };
        result.map_err(|e| FsError::from_io(e, path))
    }

    fn close(&self) -> FsResult<()> {
        Ok(())
    }

    fn copy_file(&self, ctx: &OpContext, src: &str, dst: &str) -> FsResult<()> {
        ctx.check()?;
        self.check_writable(dst)?;
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        if from.is_dir() {
            return Err(FsError::is_directory(src));
        }
        if same_file(&from, &to) {
            return Ok(());
        }
        fs::copy(&from, &to).map_err(|e| FsError::from_io(e, src))?;
        Ok(())
    }

    fn move_file(&self, src: &str, dst: &str) -> FsResult<()> {
        self.check_writable(src)?;
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        fs::rename(&from, &to).map_err(|e| FsError::from_io(e, src))
    }

    fn rename(&self, path: &str, new_name: &str) -> FsResult<String> {
        self.check_writable(path)?;
        if new_name.is_empty()
            || new_name == "."
            || new_name == ".."
            || new_name.contains(MAIN_SEPARATOR)
        {
            return Err(FsError::invalid_path(new_name));
        }
        let (dir, _) = self.dir_and_name(path);
        let renamed = self.join_clean_path(&[&dir, new_name]);
        fs::rename(self.resolve(path)?, self.resolve(&renamed)?)
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(renamed)
    }

    fn touch(&self, path: &str, perm: Permissions) -> FsResult<()> {
        self.check_writable(path)?;
        let full = self.resolve(path)?;
        if full.is_dir() {
            let dir = fs::File::open(&full).map_err(|e| FsError::from_io(e, path))?;
            return dir
                .set_modified(SystemTime::now())
                .map_err(|e| FsError::from_io(e, path));
        }
        let file = Self::open_options(perm)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&full)
            .map_err(|e| FsError::from_io(e, path))?;
        file.set_modified(SystemTime::now())
            .map_err(|e| FsError::from_io(e, path))
    }

    fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        self.check_writable(path)?;
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(FsError::is_directory(path));
        }
        let file = OpenOptions::new()
            .write(true)
            .open(&full)
            .map_err(|e| FsError::from_io(e, path))?;
        file.set_len(size).map_err(|e| FsError::from_io(e, path))
    }

    fn append(&self, ctx: &OpContext, path: &str, data: &[u8], perm: Permissions) -> FsResult<()> {
        ctx.check()?;
        let mut file = self.open_append_writer(path, perm)?;
        file.write_all(data)
            .and_then(|_| file.flush())
            .map_err(|e| FsError::from_io(e, path))
    }

    fn open_append_writer(&self, path: &str, perm: Permissions) -> FsResult<Writer> {
        self.check_writable(path)?;
        let full = self.resolve(path)?;
        let file = Self::open_options(perm)
            .append(true)
            .create(true)
            .open(&full)
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(Box::new(file))
    }

    #[cfg(unix)]
    fn set_permissions(&self, path: &str, perm: Permissions) -> FsResult<()> {
        use std::os::unix::fs::PermissionsExt;
        self.check_writable(path)?;
        let full = self.resolve(path)?;
        fs::set_permissions(&full, fs::Permissions::from_mode(perm.bits()))
            .map_err(|e| FsError::from_io(e, path))
    }

    /// Watch a file or directory (non-recursively) through the OS notifier.
    fn watch(&self, path: &str, callback: WatchCallback) -> FsResult<WatchGuard> {
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(FsError::does_not_exist(path));
        }
        let root = self.root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let Some(kind) = watch_kind(&event.kind) else {
                        return;
                    };
                    for changed in &event.paths {
                        if let Some(local) = to_local(root.as_deref(), changed) {
                            callback(WatchEvent::new(local, kind));
                        }
                    }
                }
                Err(e) => tracing::warn!("LocalBackend: watch error: {}", e),
            },
            notify::Config::default(),
        )
        .map_err(|e| FsError::backend(ErrorKind::Other, path, e))?;
        watcher
            .watch(&full, RecursiveMode::NonRecursive)
            .map_err(|e| FsError::backend(ErrorKind::Other, path, e))?;
        tracing::debug!("LocalBackend: watching {}", full.display());
        Ok(WatchGuard::new(move || drop(watcher)))
    }

    fn volume_name(&self, path: &str) -> FsResult<String> {
        Ok(path[..self.volume_len(path)].to_string())
    }

    fn make_all(&self, path: &str, perm: Permissions) -> FsResult<()> {
        self.check_writable(path)?;
        let full = self.resolve(path)?;
        Self::dir_builder(perm)
            .recursive(true)
            .create(&full)
            .map_err(|e| FsError::from_io(e, path))
    }
}
