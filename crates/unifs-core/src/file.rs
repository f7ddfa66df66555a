//! File values: a handle bound to a registry.
//!
//! A [`File`] holds no backend state. Every operation resolves the handle
//! through the registry, delegates to the backend with the backend-local
//! path, and attaches the handle to any error on the way back.
//!
//! Optional operations check the backend's declared capabilities first and
//! fail with `Unsupported` when the group is missing.

use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Weak};

use crate::backend::{Backend, ReadWriter, Reader, WatchGuard, Writer, unsupported};
use crate::cancel::OpContext;
use crate::capability::Capability;
use crate::error::{ErrorKind, FsError, FsResult};
use crate::handle::FileHandle;
use crate::hash;
use crate::path;
use crate::registry::{Registry, Resolved};
use crate::types::{FileInfo, Permissions, WatchEvent, WatchEventKind};

const COPY_CHUNK: usize = 64 * 1024;

/// A file or directory addressed by handle.
#[derive(Clone)]
pub struct File {
    handle: FileHandle,
    registry: Arc<Registry>,
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({:?})", self.handle.as_str())
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.handle.as_str())
    }
}

impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for File {}

impl File {
    pub fn new(registry: Arc<Registry>, handle: impl Into<FileHandle>) -> Self {
        Self {
            handle: handle.into(),
            registry,
        }
    }

    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }

    pub fn as_str(&self) -> &str {
        self.handle.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn resolve(&self) -> FsResult<Resolved> {
        if self.handle.is_empty() {
            return Err(FsError::EmptyPath);
        }
        Ok(self.registry.resolve(self.handle.as_str()))
    }

    fn attach(&self, err: FsError) -> FsError {
        err.with_handle(self.handle.as_str())
    }

    /// Resolve and run `op` against the backend with the local path.
    fn run<T>(&self, op: impl FnOnce(&dyn Backend, &str) -> FsResult<T>) -> FsResult<T> {
        let resolved = self.resolve()?;
        op(resolved.backend.as_ref(), &resolved.path).map_err(|e| self.attach(e))
    }

    /// Like [`run`](Self::run), but only if the backend declares `cap`.
    fn run_with<T>(
        &self,
        cap: Capability,
        op: impl FnOnce(&dyn Backend, &str) -> FsResult<T>,
    ) -> FsResult<T> {
        let resolved = self.resolve()?;
        if !resolved.backend.capabilities().contains(cap) {
            return Err(unsupported(cap, self.handle.as_str()));
        }
        op(resolved.backend.as_ref(), &resolved.path).map_err(|e| self.attach(e))
    }

    fn sibling(&self, resolved: &Resolved, path: &str) -> File {
        File::new(Arc::clone(&self.registry), resolved.handle_for(path))
    }

    /// Backend owning this handle.
    pub fn backend(&self) -> FsResult<Arc<dyn Backend>> {
        Ok(self.resolve()?.backend)
    }

    /// Backend-local path.
    pub fn local_path(&self) -> FsResult<String> {
        Ok(self.resolve()?.path)
    }

    // ========================================================================
    // Path algebra
    // ========================================================================

    /// Leaf name, empty for a root or an empty handle.
    pub fn name(&self) -> String {
        self.resolve()
            .map(|r| r.backend.dir_and_name(&r.path).1)
            .unwrap_or_default()
    }

    /// Parent directory.
    pub fn dir(&self) -> File {
        self.dir_and_name().0
    }

    pub fn dir_and_name(&self) -> (File, String) {
        match self.resolve() {
            Ok(r) => {
                let (dir, name) = r.backend.dir_and_name(&r.path);
                (self.sibling(&r, &dir), name)
            }
            Err(_) => (self.clone(), String::new()),
        }
    }

    /// Extension of the name including the dot, or `""`.
    pub fn ext(&self) -> String {
        path::ext(&self.name()).to_string()
    }

    pub fn ext_lower(&self) -> String {
        self.ext().to_lowercase()
    }

    /// Name without its extension.
    pub fn trim_ext(&self) -> String {
        path::trim_ext(&self.name()).to_string()
    }

    /// Join `parts` onto this path with the backend's separator.
    pub fn join(&self, parts: &[&str]) -> File {
        let resolved = self.registry.resolve(self.handle.as_str());
        let mut all = Vec::with_capacity(parts.len() + 1);
        all.push(resolved.path.as_str());
        all.extend_from_slice(parts);
        let joined = resolved.backend.join_clean_path(&all);
        self.sibling(&resolved, &joined)
    }

    pub fn is_abs(&self) -> bool {
        self.resolve()
            .is_ok_and(|r| r.backend.is_abs_path(&r.path))
    }

    pub fn abs(&self) -> FsResult<File> {
        let resolved = self.resolve()?;
        let abs = resolved
            .backend
            .abs_path(&resolved.path)
            .map_err(|e| self.attach(e))?;
        Ok(self.sibling(&resolved, &abs))
    }

    /// Fully qualified URL, `file://` for local paths.
    pub fn url(&self) -> String {
        match self.resolve() {
            Ok(r) => r.backend.url(&r.path),
            Err(_) => String::new(),
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn stat(&self) -> FsResult<FileInfo> {
        self.run(|b, p| b.stat(p))
    }

    /// Metadata snapshot that never fails; missing files report
    /// `exists == false`.
    pub fn info(&self) -> FileInfo {
        match self.stat() {
            Ok(info) => info,
            Err(e) => {
                if !e.is_not_exist() {
                    tracing::debug!("File: stat {} failed: {}", self.handle, e);
                }
                FileInfo::missing(self.name())
            }
        }
    }

    pub fn exists(&self) -> bool {
        self.resolve().is_ok_and(|r| r.backend.exists(&r.path))
    }

    pub fn is_dir(&self) -> bool {
        self.info().is_dir
    }

    pub fn is_regular(&self) -> bool {
        self.info().is_regular
    }

    pub fn is_hidden(&self) -> bool {
        self.resolve().is_ok_and(|r| r.backend.is_hidden(&r.path))
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.resolve()
            .is_ok_and(|r| r.backend.is_symbolic_link(&r.path))
    }

    pub fn size(&self) -> FsResult<u64> {
        Ok(self.stat()?.size)
    }

    /// Content hash, from the backend's metadata when it has one.
    pub fn content_hash(&self, ctx: &OpContext) -> FsResult<String> {
        let info = self.stat()?;
        if info.is_dir {
            return Err(FsError::is_directory(self.handle.as_str()));
        }
        if let Some(hash) = info.content_hash {
            return Ok(hash);
        }
        let reader = self.open_reader()?;
        hash::content_hash_with(ctx, reader).map_err(|e| self.attach(e))
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Call `callback` for each direct child matching `patterns`.
    pub fn list_dir_info(
        &self,
        ctx: &OpContext,
        mut callback: impl FnMut(File, FileInfo) -> FsResult<()>,
        patterns: &[&str],
    ) -> FsResult<()> {
        let resolved = self.resolve()?;
        resolved
            .backend
            .list_dir_info(ctx, &resolved.path, &mut |entry| {
                callback(self.sibling(&resolved, &entry.path), entry.info)
            }, patterns)
            .map_err(|e| self.attach(e))
    }

    /// Call `callback` for every non-directory below this one whose name
    /// matches `patterns`.
    pub fn list_dir_info_recursive(
        &self,
        ctx: &OpContext,
        mut callback: impl FnMut(File, FileInfo) -> FsResult<()>,
        patterns: &[&str],
    ) -> FsResult<()> {
        let resolved = self.resolve()?;
        resolved
            .backend
            .list_dir_info_recursive(ctx, &resolved.path, &mut |entry| {
                callback(self.sibling(&resolved, &entry.path), entry.info)
            }, patterns)
            .map_err(|e| self.attach(e))
    }

    pub fn list_dir(&self, ctx: &OpContext, patterns: &[&str]) -> FsResult<Vec<File>> {
        let mut files = Vec::new();
        self.list_dir_info(ctx, |file, _| {
            files.push(file);
            Ok(())
        }, patterns)?;
        Ok(files)
    }

    pub fn list_dir_recursive(&self, ctx: &OpContext, patterns: &[&str]) -> FsResult<Vec<File>> {
        let mut files = Vec::new();
        self.list_dir_info_recursive(ctx, |file, _| {
            files.push(file);
            Ok(())
        }, patterns)?;
        Ok(files)
    }

    /// At most `max` children (all when `None`).
    pub fn list_dir_max(
        &self,
        ctx: &OpContext,
        max: Option<usize>,
        patterns: &[&str],
    ) -> FsResult<Vec<File>> {
        let resolved = self.resolve()?;
        let paths = resolved
            .backend
            .list_dir_max(ctx, &resolved.path, max, patterns)
            .map_err(|e| self.attach(e))?;
        Ok(paths
            .iter()
            .map(|p| self.sibling(&resolved, p))
            .collect())
    }

    // ========================================================================
    // Data access
    // ========================================================================

    pub fn open_reader(&self) -> FsResult<Reader> {
        self.run(|b, p| b.open_reader(p))
    }

    pub fn open_writer(&self) -> FsResult<Writer> {
        self.run(|b, p| b.open_writer(p, Permissions::FILE_DEFAULT))
    }

    pub fn open_read_writer(&self) -> FsResult<ReadWriter> {
        self.run(|b, p| b.open_read_writer(p, Permissions::FILE_DEFAULT))
    }

    pub fn open_append_writer(&self) -> FsResult<Writer> {
        self.run_with(Capability::AppendWriter, |b, p| {
            b.open_append_writer(p, Permissions::FILE_DEFAULT)
        })
    }

    pub fn read_all(&self, ctx: &OpContext) -> FsResult<Vec<u8>> {
        self.run(|b, p| b.read_all(ctx, p))
    }

    pub fn read_all_string(&self, ctx: &OpContext) -> FsResult<String> {
        let data = self.read_all(ctx)?;
        String::from_utf8(data)
            .map_err(|e| FsError::backend(ErrorKind::Other, self.handle.as_str(), e))
    }

    pub fn write_all(&self, ctx: &OpContext, data: &[u8]) -> FsResult<()> {
        self.run(|b, p| b.write_all(ctx, p, data, Permissions::FILE_DEFAULT))
    }

    pub fn write_all_string(&self, ctx: &OpContext, text: &str) -> FsResult<()> {
        self.write_all(ctx, text.as_bytes())
    }

    pub fn append(&self, ctx: &OpContext, data: &[u8]) -> FsResult<()> {
        self.run_with(Capability::Append, |b, p| {
            b.append(ctx, p, data, Permissions::FILE_DEFAULT)
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn make_dir(&self) -> FsResult<()> {
        self.run(|b, p| b.make_dir(p, Permissions::DIR_DEFAULT))
    }

    /// Create this directory and any missing ancestors.
    pub fn make_all(&self) -> FsResult<()> {
        self.run_with(Capability::MakeAll, |b, p| {
            b.make_all(p, Permissions::DIR_DEFAULT)
        })
    }

    pub fn remove(&self) -> FsResult<()> {
        self.run(|b, p| b.remove(p))
    }

    /// Remove this file or directory tree. Missing files are not an error.
    pub fn remove_recursive(&self, ctx: &OpContext) -> FsResult<()> {
        ctx.check().map_err(|e| self.attach(e))?;
        match self.stat() {
            Ok(info) if info.is_dir => self.remove_dir_contents(ctx)?,
            Ok(_) => {}
            Err(e) if e.is_not_exist() => return Ok(()),
            Err(e) => return Err(e),
        }
        ignore_missing(self.remove())
    }

    /// Remove everything inside this directory, keeping the directory.
    pub fn remove_dir_contents(&self, ctx: &OpContext) -> FsResult<()> {
        let children = match self.list_dir(ctx, &[]) {
            Ok(children) => children,
            Err(e) if e.is_not_exist() => return Ok(()),
            Err(e) => return Err(e),
        };
        for child in children {
            child.remove_recursive(ctx)?;
        }
        Ok(())
    }

    pub fn touch(&self) -> FsResult<()> {
        self.run_with(Capability::Touch, |b, p| b.touch(p, Permissions::FILE_DEFAULT))
    }

    pub fn truncate(&self, size: u64) -> FsResult<()> {
        self.run_with(Capability::Truncate, |b, p| b.truncate(p, size))
    }

    /// Rename within the same directory.
    pub fn rename(&self, new_name: &str) -> FsResult<File> {
        let resolved = self.resolve()?;
        if !resolved.backend.capabilities().contains(Capability::Rename) {
            return Err(unsupported(Capability::Rename, self.handle.as_str()));
        }
        let renamed = resolved
            .backend
            .rename(&resolved.path, new_name)
            .map_err(|e| self.attach(e))?;
        Ok(self.sibling(&resolved, &renamed))
    }

    pub fn set_permissions(&self, perm: Permissions) -> FsResult<()> {
        self.run_with(Capability::Permissions, |b, p| b.set_permissions(p, perm))
    }

    pub fn user(&self) -> FsResult<String> {
        self.run_with(Capability::User, |b, p| b.user(p))
    }

    pub fn set_user(&self, user: &str) -> FsResult<()> {
        self.run_with(Capability::User, |b, p| b.set_user(p, user))
    }

    pub fn group(&self) -> FsResult<String> {
        self.run_with(Capability::Group, |b, p| b.group(p))
    }

    pub fn set_group(&self, group: &str) -> FsResult<()> {
        self.run_with(Capability::Group, |b, p| b.set_group(p, group))
    }

    pub fn volume_name(&self) -> FsResult<String> {
        self.run_with(Capability::VolumeName, |b, p| b.volume_name(p))
    }

    /// Watch this file or directory; `callback` gets the changed file.
    pub fn watch(
        &self,
        callback: impl Fn(File, WatchEventKind) + Send + Sync + 'static,
    ) -> FsResult<WatchGuard> {
        let resolved = self.resolve()?;
        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        let prefix = resolved.prefix.clone();
        self.run_with(Capability::Watch, move |b, p| {
            b.watch(p, Arc::new(move |event: WatchEvent| {
                if let Some(registry) = registry.upgrade() {
                    let file = File::new(registry, format!("{prefix}{}", event.path));
                    callback(file, event.kind);
                }
            }))
        })
    }

    // ========================================================================
    // Transfer
    // ========================================================================

    /// Copy this file to `dst`, in place when both live on one backend that
    /// can copy, streaming otherwise.
    pub fn copy_to(&self, ctx: &OpContext, dst: &File) -> FsResult<()> {
        let src = self.resolve()?;
        let target = dst.resolve()?;
        if same_target(&src, &target) {
            return ctx.check().map_err(|e| self.attach(e));
        }
        if same_backend(&src, &target) && src.backend.capabilities().contains(Capability::Copy) {
            return src
                .backend
                .copy_file(ctx, &src.path, &target.path)
                .map_err(|e| self.attach(e));
        }

        ctx.check().map_err(|e| self.attach(e))?;
        tracing::debug!("File: streaming copy {} -> {}", self.handle, dst.handle);
        let mut reader = self.open_reader()?;
        let mut writer = dst.open_writer()?;
        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            ctx.check().map_err(|e| self.attach(e))?;
            let n = reader
                .read(&mut buf)
                .map_err(|e| FsError::from_io(e, self.handle.as_str()))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .map_err(|e| FsError::from_io(e, dst.handle.as_str()))?;
        }
        writer
            .flush()
            .map_err(|e| FsError::from_io(e, dst.handle.as_str()))
    }

    /// Move this file to `dst`, in place when both live on one backend that
    /// can move, copy-then-remove otherwise.
    pub fn move_to(&self, ctx: &OpContext, dst: &File) -> FsResult<()> {
        let src = self.resolve()?;
        let target = dst.resolve()?;
        if same_target(&src, &target) {
            return ctx.check().map_err(|e| self.attach(e));
        }
        if same_backend(&src, &target) && src.backend.capabilities().contains(Capability::Move) {
            return src
                .backend
                .move_file(&src.path, &target.path)
                .map_err(|e| self.attach(e));
        }
        self.copy_to(ctx, dst)?;
        self.remove()
    }
}

fn same_backend(a: &Resolved, b: &Resolved) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(&a.backend), Arc::as_ptr(&b.backend))
}

/// Both handles name one path on one backend instance.
fn same_target(a: &Resolved, b: &Resolved) -> bool {
    if !same_backend(a, b) {
        return false;
    }
    match (a.backend.abs_path(&a.path), b.backend.abs_path(&b.path)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a.path == b.path,
    }
}

fn ignore_missing(result: FsResult<()>) -> FsResult<()> {
    match result {
        Err(e) if e.is_not_exist() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::config::MemoryConfig;
    use parking_lot::Mutex;

    fn setup() -> (Arc<Registry>, Arc<MemoryBackend>) {
        let registry = Registry::new();
        let mem = MemoryBackend::new_registered(&registry, MemoryConfig {
            id: Some("t".into()),
            ..Default::default()
        })
        .unwrap();
        (registry, mem)
    }

    fn ctx() -> OpContext {
        OpContext::new()
    }

    #[test]
    fn test_path_algebra() {
        let (registry, _mem) = setup();
        let f = registry.file("mem://t/docs/Report.Final.PDF");
        assert_eq!(f.name(), "Report.Final.PDF");
        assert_eq!(f.ext(), ".PDF");
        assert_eq!(f.ext_lower(), ".pdf");
        assert_eq!(f.trim_ext(), "Report.Final");
        assert_eq!(f.dir().as_str(), "mem://t/docs");
        assert_eq!(f.dir().dir().as_str(), "mem://t/");
        assert!(f.is_abs());
        assert_eq!(f.url(), "mem://t/docs/Report.Final.PDF");

        let joined = f.dir().join(&["sub", "..", "x.txt"]);
        assert_eq!(joined.as_str(), "mem://t/docs/x.txt");
    }

    #[test]
    fn test_local_fallback_url() {
        let registry = Registry::new();
        let f = registry.file("/tmp/unifs/x.txt");
        assert_eq!(f.url(), "file:///tmp/unifs/x.txt");
        assert_eq!(f.name(), "x.txt");
        assert_eq!(f.dir().as_str(), "/tmp/unifs");
    }

    #[test]
    fn test_empty_handle() {
        let registry = Registry::new();
        let f = registry.file("");
        assert_eq!(f.stat().unwrap_err().kind(), ErrorKind::EmptyPath);
        assert_eq!(f.read_all(&ctx()).unwrap_err().kind(), ErrorKind::EmptyPath);
        assert_eq!(f.touch().unwrap_err().kind(), ErrorKind::EmptyPath);
        assert!(!f.exists());
        assert!(!f.info().exists);
        assert_eq!(f.name(), "");
    }

    #[test]
    fn test_read_write_and_info() {
        let (registry, _mem) = setup();
        let f = registry.file("mem://t/hello.txt");
        assert!(!f.info().exists);
        f.write_all_string(&ctx(), "hello world").unwrap();
        assert_eq!(f.read_all_string(&ctx()).unwrap(), "hello world");
        assert_eq!(f.size().unwrap(), 11);
        assert!(f.is_regular() && !f.is_dir());
        assert_eq!(
            f.content_hash(&ctx()).unwrap(),
            "bc62d4b80d9e36da29c16c5d4d9f11731f36052c72401a76c23c0fb5a9b74423"
        );
    }

    #[test]
    fn test_errors_carry_handle() {
        let (registry, _mem) = setup();
        let err = registry.file("mem://t/missing").read_all(&ctx()).unwrap_err();
        assert!(matches!(&err, FsError::DoesNotExist(h) if h == "mem://t/missing"));

        let canceled = OpContext::new();
        canceled.cancel();
        let err = registry.file("mem://t/").list_dir(&canceled, &[]).unwrap_err();
        assert!(err.is_canceled());
        assert!(err.to_string().contains("mem://t/"));
    }

    #[test]
    fn test_unsupported_capability() {
        #[derive(Debug)]
        struct Bare(MemoryBackend);

        impl Backend for Bare {
            fn id(&self) -> &str {
                self.0.id()
            }
            fn prefix(&self) -> &str {
                "bare://"
            }
            fn name(&self) -> &str {
                "bare"
            }
            fn separator(&self) -> char {
                '/'
            }
            fn stat(&self, path: &str) -> FsResult<FileInfo> {
                self.0.stat(path)
            }
            fn list_dir_info(
                &self,
                ctx: &OpContext,
                dir: &str,
                callback: crate::backend::ListCallback<'_>,
                patterns: &[&str],
            ) -> FsResult<()> {
                self.0.list_dir_info(ctx, dir, callback, patterns)
            }
            fn open_reader(&self, path: &str) -> FsResult<Reader> {
                self.0.open_reader(path)
            }
            fn open_writer(&self, path: &str, perm: Permissions) -> FsResult<Writer> {
                self.0.open_writer(path, perm)
            }
            fn open_read_writer(&self, path: &str, perm: Permissions) -> FsResult<ReadWriter> {
                self.0.open_read_writer(path, perm)
            }
            fn make_dir(&self, path: &str, perm: Permissions) -> FsResult<()> {
                self.0.make_dir(path, perm)
            }
            fn remove(&self, path: &str) -> FsResult<()> {
                self.0.remove(path)
            }
            fn close(&self) -> FsResult<()> {
                self.0.close()
            }
        }

        let registry = Registry::new();
        registry.register(Arc::new(Bare(MemoryBackend::new()))).unwrap();
        let f = registry.file("bare:///x");
        f.write_all(&ctx(), b"x").unwrap();

        for err in [
            f.touch().unwrap_err(),
            f.truncate(0).unwrap_err(),
            f.rename("y").map(|_| ()).unwrap_err(),
            f.append(&ctx(), b"y").unwrap_err(),
            f.watch(|_, _| {}).map(|_| ()).unwrap_err(),
        ] {
            assert!(err.is_unsupported(), "{err}");
        }

        // Copy and move fall back to streaming.
        let dst = registry.file("bare:///y");
        f.copy_to(&ctx(), &dst).unwrap();
        assert_eq!(dst.read_all(&ctx()).unwrap(), b"x");
        dst.move_to(&ctx(), &registry.file("bare:///z")).unwrap();
        assert!(!dst.exists());
        assert!(registry.file("bare:///z").exists());
    }

    #[test]
    fn test_copy_and_move_across_backends() {
        let (registry, _mem) = setup();
        let other = MemoryBackend::new_registered(&registry, MemoryConfig {
            id: Some("u".into()),
            ..Default::default()
        })
        .unwrap();
        let src = registry.file("mem://t/src.bin");
        src.write_all(&ctx(), &[7u8; 200_000]).unwrap();

        let dst = registry.file("mem://u/dst.bin");
        src.copy_to(&ctx(), &dst).unwrap();
        assert_eq!(dst.size().unwrap(), 200_000);

        let moved = registry.file("mem://u/moved.bin");
        src.move_to(&ctx(), &moved).unwrap();
        assert!(!src.exists());
        assert_eq!(other.read_all(&ctx(), "/moved.bin").unwrap(), vec![7u8; 200_000]);
    }

    #[test]
    fn test_rename_returns_new_file() {
        let (registry, _mem) = setup();
        let f = registry.file("mem://t/old.txt");
        f.write_all(&ctx(), b"x").unwrap();
        let renamed = f.rename("new.txt").unwrap();
        assert_eq!(renamed.as_str(), "mem://t/new.txt");
        assert!(renamed.exists() && !f.exists());
    }

    #[test]
    fn test_listing() {
        let (registry, _mem) = setup();
        let root = registry.file("mem://t/");
        root.join(&["a"]).make_dir().unwrap();
        root.join(&["a", "b"]).make_all().unwrap();
        root.join(&["a", "one.txt"]).write_all(&ctx(), b"1").unwrap();
        root.join(&["a", "b", "two.txt"]).write_all(&ctx(), b"22").unwrap();
        root.join(&["a", "b", "skip.md"]).write_all(&ctx(), b"").unwrap();

        let a = root.join(&["a"]);
        let direct: Vec<_> = a.list_dir(&ctx(), &[]).unwrap().iter().map(File::name).collect();
        assert_eq!(direct, ["b", "one.txt"]);

        let deep: Vec<_> = a
            .list_dir_recursive(&ctx(), &["*.txt"])
            .unwrap()
            .iter()
            .map(|f| f.as_str().to_string())
            .collect();
        assert_eq!(deep, ["mem://t/a/b/two.txt", "mem://t/a/one.txt"]);

        assert_eq!(a.list_dir_max(&ctx(), Some(1), &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_recursive_and_contents() {
        let (registry, _mem) = setup();
        let dir = registry.file("mem://t/tree");
        dir.join(&["x", "y"]).make_all().unwrap();
        dir.join(&["x", "y", "f"]).write_all(&ctx(), b"").unwrap();
        dir.join(&["g"]).write_all(&ctx(), b"").unwrap();

        dir.remove_dir_contents(&ctx()).unwrap();
        assert!(dir.is_dir());
        assert!(dir.list_dir(&ctx(), &[]).unwrap().is_empty());

        dir.remove_recursive(&ctx()).unwrap();
        assert!(!dir.exists());
        dir.remove_recursive(&ctx()).unwrap();
    }

    #[test]
    fn test_watch_reports_files() {
        let (registry, _mem) = setup();
        let dir = registry.file("mem://t/w");
        dir.make_dir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _guard = dir
            .watch(move |file, kind| sink.lock().push((file.as_str().to_string(), kind)))
            .unwrap();
        dir.join(&["n.txt"]).write_all(&ctx(), b"x").unwrap();
        assert_eq!(
            *seen.lock(),
            [("mem://t/w/n.txt".to_string(), WatchEventKind::Create)]
        );
    }
}
