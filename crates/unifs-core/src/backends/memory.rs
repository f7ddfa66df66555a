//! In-memory filesystem backend.
//!
//! A tree of directory and file nodes guarded by one tree-wide `RwLock`:
//! shared for reads, exclusive for mutations, so all mutations are
//! linearizable. Used as a test double and as a small cache. All data is
//! lost on close or drop.
//!
//! Watch callbacks and listing callbacks never run under the tree lock.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::backend::{
    Backend, ListCallback, ReadWriter, Reader, WatchCallback, WatchGuard, Writer,
};
use crate::cancel::OpContext;
use crate::capability::{Capabilities, Capability};
use crate::config::MemoryConfig;
use crate::error::{FsError, FsResult};
use crate::hash::content_hash_bytes;
use crate::path;
use crate::registry::Registry;
use crate::types::{DirEntry, FileInfo, Permissions, WatchEvent, WatchEventKind};

/// Prefix scheme for in-memory backends.
pub const MEMORY_SCHEME: &str = "mem://";

#[derive(Debug, Clone)]
struct DirNode {
    modified: SystemTime,
    perm: Permissions,
    children: BTreeMap<String, Node>,
}

impl DirNode {
    fn new(perm: Permissions) -> Self {
        Self {
            modified: SystemTime::now(),
            perm,
            children: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct FileNode {
    modified: SystemTime,
    perm: Permissions,
    data: Vec<u8>,
    /// Content hash of `data`, reset by every mutation.
    hash: OnceLock<String>,
}

impl FileNode {
    fn new(data: Vec<u8>, perm: Permissions) -> Self {
        Self {
            modified: SystemTime::now(),
            perm,
            data,
            hash: OnceLock::new(),
        }
    }

    fn touched(&mut self) {
        self.modified = SystemTime::now();
        self.hash = OnceLock::new();
    }

    fn content_hash(&self) -> &str {
        self.hash.get_or_init(|| content_hash_bytes(&self.data))
    }
}

#[derive(Debug, Clone)]
enum Node {
    Dir(DirNode),
    File(FileNode),
}

impl Node {
    fn info(&self, name: &str, with_hash: bool) -> FileInfo {
        match self {
            Node::Dir(dir) => FileInfo::directory(name, dir.modified, dir.perm),
            Node::File(file) => {
                let info = FileInfo::file(name, file.data.len() as u64, file.modified, file.perm);
                let hash = if with_hash {
                    Some(file.content_hash())
                } else {
                    file.hash.get().map(String::as_str)
                };
                match hash {
                    Some(hash) => info.with_content_hash(hash),
                    None => info,
                }
            }
        }
    }

    fn set_modified(&mut self) {
        match self {
            Node::Dir(dir) => dir.modified = SystemTime::now(),
            Node::File(file) => file.modified = SystemTime::now(),
        }
    }
}

/// A cleaned, rooted backend-local path and its segments.
#[derive(Debug, Clone)]
struct MemPath {
    path: String,
    segs: Vec<String>,
}

impl MemPath {
    fn parse(raw: &str, sep: char) -> Self {
        let path = path::clean(&format!("{sep}{raw}"), sep);
        let segs = path::split(&path, sep)
            .into_iter()
            .map(str::to_string)
            .collect();
        Self { path, segs }
    }

    fn is_root(&self) -> bool {
        self.segs.is_empty()
    }

    fn name(&self) -> &str {
        self.segs.last().map_or("", String::as_str)
    }

    fn parent(&self, sep: char) -> String {
        path::dir_and_name(&self.path, sep, 0).0
    }

    fn child(&self, name: &str, sep: char) -> String {
        if self.is_root() {
            format!("{sep}{name}")
        } else {
            format!("{}{sep}{name}", self.path)
        }
    }

    /// Whether `self` is `other` or lies below it.
    fn within(&self, other: &MemPath) -> bool {
        self.segs.starts_with(&other.segs)
    }
}

fn lookup<'a>(root: &'a Node, p: &MemPath) -> FsResult<&'a Node> {
    let mut node = root;
    for seg in &p.segs {
        node = match node {
            Node::Dir(dir) => dir
                .children
                .get(seg)
                .ok_or_else(|| FsError::does_not_exist(&p.path))?,
            Node::File(_) => return Err(FsError::is_not_directory(&p.path)),
        };
    }
    Ok(node)
}

fn walk_mut<'a>(root: &'a mut Node, segs: &[String], path: &str) -> FsResult<&'a mut Node> {
    let mut node = root;
    for seg in segs {
        node = match node {
            Node::Dir(dir) => dir
                .children
                .get_mut(seg)
                .ok_or_else(|| FsError::does_not_exist(path))?,
            Node::File(_) => return Err(FsError::is_not_directory(path)),
        };
    }
    Ok(node)
}

fn lookup_mut<'a>(root: &'a mut Node, p: &MemPath) -> FsResult<&'a mut Node> {
    walk_mut(root, &p.segs, &p.path)
}

/// Directory that holds (or would hold) the last segment of `p`.
fn parent_dir_mut<'a>(root: &'a mut Node, p: &MemPath) -> FsResult<&'a mut DirNode> {
    let parent_segs = match p.segs.split_last() {
        Some((_, parent)) => parent,
        None => return Err(FsError::permission_denied(&p.path)),
    };
    match walk_mut(root, parent_segs, &p.path)? {
        Node::Dir(dir) => Ok(dir),
        Node::File(_) => Err(FsError::is_not_directory(&p.path)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Replace,
    Append,
}

/// Create or update the file at `p`; the parent directory must exist.
///
/// Returns the event to report, `None` when nothing changed.
fn put_file(
    root: &mut Node,
    p: &MemPath,
    data: &[u8],
    perm: Permissions,
    mode: WriteMode,
) -> FsResult<Option<WatchEventKind>> {
    let parent = parent_dir_mut(root, p)?;
    match parent.children.get_mut(p.name()) {
        Some(Node::Dir(_)) => Err(FsError::is_directory(&p.path)),
        Some(Node::File(_)) if mode == WriteMode::Append && data.is_empty() => Ok(None),
        Some(Node::File(file)) => {
            match mode {
                WriteMode::Replace => {
                    file.data.clear();
                    file.data.extend_from_slice(data);
                }
                WriteMode::Append => file.data.extend_from_slice(data),
            }
            file.touched();
            Ok(Some(WatchEventKind::Write))
        }
        None => {
            parent
                .children
                .insert(p.name().to_string(), Node::File(FileNode::new(data.to_vec(), perm)));
            parent.modified = SystemTime::now();
            Ok(Some(WatchEventKind::Create))
        }
    }
}

struct Watcher {
    id: u64,
    path: String,
    callback: WatchCallback,
}

struct MemInner {
    id: String,
    prefix: String,
    sep: char,
    read_only: AtomicBool,
    closed: AtomicBool,
    root: RwLock<Node>,
    watchers: Mutex<Vec<Watcher>>,
    next_watch: AtomicU64,
    registry: OnceLock<Weak<Registry>>,
}

impl MemInner {
    fn parse(&self, path: &str) -> MemPath {
        MemPath::parse(path, self.sep)
    }

    fn check_writable(&self, path: &str) -> FsResult<()> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(FsError::read_only(path));
        }
        Ok(())
    }

    fn put(&self, path: &str, data: &[u8], perm: Permissions, mode: WriteMode) -> FsResult<()> {
        self.check_writable(path)?;
        let p = self.parse(path);
        let kind = {
            let mut root = self.root.write();
            put_file(&mut root, &p, data, perm, mode)?
        };
        self.emit(kind.map(|kind| WatchEvent::new(p.path, kind)).into_iter().collect());
        Ok(())
    }

    /// Deliver events to matching watchers, outside every lock.
    fn emit(&self, events: Vec<WatchEvent>) {
        if events.is_empty() {
            return;
        }
        let deliveries: Vec<(WatchCallback, WatchEvent)> = {
            let watchers = self.watchers.lock();
            if watchers.is_empty() {
                return;
            }
            events
                .iter()
                .flat_map(|event| {
                    let parent = path::dir_and_name(&event.path, self.sep, 0).0;
                    watchers
                        .iter()
                        .filter(move |w| w.path == event.path || w.path == parent)
                        .map(move |w| (Arc::clone(&w.callback), event.clone()))
                })
                .collect()
        };
        for (callback, event) in deliveries {
            tracing::trace!("MemoryBackend: {} {}", event.kind, event.path);
            callback(event);
        }
    }
}

/// In-memory filesystem backend.
///
/// Cheap to clone; clones share the same tree.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemInner>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("id", &self.inner.id)
            .field("prefix", &self.inner.prefix)
            .field("read_only", &self.inner.read_only.load(Ordering::Relaxed))
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty tree under `mem://<uuid>`.
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        let id = config.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let prefix = config
            .prefix
            .unwrap_or_else(|| format!("{MEMORY_SCHEME}{id}"));
        Self {
            inner: Arc::new(MemInner {
                id,
                prefix,
                sep: config.separator,
                read_only: AtomicBool::new(config.read_only),
                closed: AtomicBool::new(false),
                root: RwLock::new(Node::Dir(DirNode::new(Permissions::DIR_DEFAULT))),
                watchers: Mutex::new(Vec::new()),
                next_watch: AtomicU64::new(1),
                registry: OnceLock::new(),
            }),
        }
    }

    /// Create a backend and register it; closing it releases the entry.
    pub fn new_registered(registry: &Arc<Registry>, config: MemoryConfig) -> FsResult<Arc<Self>> {
        let backend = Arc::new(Self::with_config(config));
        let _ = backend.inner.registry.set(Arc::downgrade(registry));
        registry.register(backend.clone())?;
        Ok(backend)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.store(read_only, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn parse(&self, path: &str) -> MemPath {
        self.inner.parse(path)
    }

    fn check_writable(&self, path: &str) -> FsResult<()> {
        self.inner.check_writable(path)
    }

    /// Move the node at `src` to `dst`, replacing a file at `dst`.
    fn relocate(&self, src: &MemPath, dst: &MemPath, kind: WatchEventKind) -> FsResult<()> {
        if src.is_root() {
            return Err(FsError::permission_denied(&src.path));
        }
        if src.path == dst.path {
            return Ok(());
        }
        if dst.within(src) {
            return Err(FsError::invalid_path(format!(
                "cannot move {} into itself ({})",
                src.path, dst.path
            )));
        }
        {
            let mut root = self.inner.root.write();
            let moving_dir = matches!(lookup(&root, src)?, Node::Dir(_));
            match parent_dir_mut(&mut root, dst)?.children.get(dst.name()) {
                Some(Node::Dir(_)) => return Err(FsError::already_exists(&dst.path)),
                Some(Node::File(_)) if moving_dir => {
                    return Err(FsError::already_exists(&dst.path));
                }
                _ => {}
            }
            let src_parent = parent_dir_mut(&mut root, src)?;
            let Some(mut node) = src_parent.children.remove(src.name()) else {
                return Err(FsError::does_not_exist(&src.path));
            };
            src_parent.modified = SystemTime::now();
            node.set_modified();
            let dst_parent = parent_dir_mut(&mut root, dst)?;
            dst_parent.children.insert(dst.name().to_string(), node);
            dst_parent.modified = SystemTime::now();
        }
        self.inner.emit(vec![
            WatchEvent::new(src.path.clone(), kind),
            WatchEvent::new(dst.path.clone(), WatchEventKind::Create),
        ]);
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        [
            Capability::Copy,
            Capability::Move,
            Capability::Rename,
            Capability::Touch,
            Capability::Truncate,
            Capability::Append,
            Capability::AppendWriter,
            Capability::Permissions,
            Capability::Watch,
            Capability::MakeAll,
        ]
        .into_iter()
        .collect()
    }

    fn read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::Acquire)
    }

    fn separator(&self) -> char {
        self.inner.sep
    }

    fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let p = self.parse(path);
        let root = self.inner.root.read();
        let node = lookup(&root, &p)?;
        let name = if p.is_root() {
            self.inner.sep.to_string()
        } else {
            p.name().to_string()
        };
        Ok(node.info(&name, true))
    }

    fn list_dir_info(
        &self,
        ctx: &OpContext,
        dir: &str,
        callback: ListCallback<'_>,
        patterns: &[&str],
    ) -> FsResult<()> {
        ctx.check()?;
        let p = self.parse(dir);
        let entries: Vec<DirEntry> = {
            let root = self.inner.root.read();
            match lookup(&root, &p)? {
                Node::Dir(dir) => dir
                    .children
                    .iter()
                    .map(|(name, node)| {
                        DirEntry::new(p.child(name, self.inner.sep), node.info(name, false))
                    })
                    .collect(),
                Node::File(_) => return Err(FsError::is_not_directory(&p.path)),
            }
        };
        for entry in entries {
            ctx.check()?;
            if self.match_any_pattern(&entry.info.name, patterns)? {
                callback(entry)?;
            }
        }
        Ok(())
    }

    fn open_reader(&self, path: &str) -> FsResult<Reader> {
        let p = self.parse(path);
        let root = self.inner.root.read();
        match lookup(&root, &p)? {
            Node::File(file) => Ok(Box::new(Cursor::new(file.data.clone()))),
            Node::Dir(_) => Err(FsError::is_directory(&p.path)),
        }
    }

    fn open_writer(&self, path: &str, perm: Permissions) -> FsResult<Writer> {
        self.inner.put(path, &[], perm, WriteMode::Replace)?;
        Ok(Box::new(MemWriter::new(&self.inner, path, perm)))
    }

    fn open_read_writer(&self, path: &str, perm: Permissions) -> FsResult<ReadWriter> {
        self.inner.put(path, &[], perm, WriteMode::Append)?;
        let data = self.read_all(&OpContext::new(), path)?;
        Ok(Box::new(MemReadWriter {
            inner: Arc::clone(&self.inner),
            path: path.to_string(),
            perm,
            cursor: Cursor::new(data),
            dirty: false,
        }))
    }

    fn read_all(&self, ctx: &OpContext, path: &str) -> FsResult<Vec<u8>> {
        ctx.check()?;
        let p = self.parse(path);
        let root = self.inner.root.read();
        match lookup(&root, &p)? {
            Node::File(file) => Ok(file.data.clone()),
            Node::Dir(_) => Err(FsError::is_directory(&p.path)),
        }
    }

    fn write_all(&self, ctx: &OpContext, path: &str, data: &[u8], perm: Permissions) -> FsResult<()> {
        ctx.check()?;
        self.inner.put(path, data, perm, WriteMode::Replace)
    }

    fn make_dir(&self, path: &str, perm: Permissions) -> FsResult<()> {
        self.check_writable(path)?;
        let p = self.parse(path);
        if p.is_root() {
            return Err(FsError::already_exists(&p.path));
        }
        {
            let mut root = self.inner.root.write();
            let parent = parent_dir_mut(&mut root, &p)?;
            if parent.children.contains_key(p.name()) {
                return Err(FsError::already_exists(&p.path));
            }
            parent
                .children
                .insert(p.name().to_string(), Node::Dir(DirNode::new(perm)));
            parent.modified = SystemTime::now();
        }
        self.inner
            .emit(vec![WatchEvent::new(p.path, WatchEventKind::Create)]);
        Ok(())
    }

    /// Detach the node from its parent; a directory takes its whole subtree.
    fn remove(&self, path: &str) -> FsResult<()> {
        self.check_writable(path)?;
        let p = self.parse(path);
        if p.is_root() {
            return Err(FsError::permission_denied(&p.path));
        }
        {
            let mut root = self.inner.root.write();
            let parent = parent_dir_mut(&mut root, &p)?;
            if parent.children.remove(p.name()).is_none() {
                return Err(FsError::does_not_exist(&p.path));
            }
            parent.modified = SystemTime::now();
        }
        self.inner
            .emit(vec![WatchEvent::new(p.path, WatchEventKind::Remove)]);
        Ok(())
    }

    #[tracing::instrument(skip(self), name = "memory.close", fields(prefix = %self.inner.prefix))]
    fn close(&self) -> FsResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Node::Dir(root) = &mut *self.inner.root.write() {
            root.children.clear();
        }
        self.inner.watchers.lock().clear();
        if let Some(registry) = self.inner.registry.get().and_then(Weak::upgrade) {
            registry.release(&self.inner.prefix, self);
        }
        tracing::debug!("MemoryBackend: closed {}", self.inner.prefix);
        Ok(())
    }

    fn copy_file(&self, ctx: &OpContext, src: &str, dst: &str) -> FsResult<()> {
        ctx.check()?;
        self.check_writable(dst)?;
        let sp = self.parse(src);
        let dp = self.parse(dst);
        let kind = {
            let mut root = self.inner.root.write();
            let copy = match lookup(&root, &sp)? {
                Node::File(file) => file.clone(),
                Node::Dir(_) => return Err(FsError::is_directory(&sp.path)),
            };
            if sp.path == dp.path {
                return Ok(());
            }
            let parent = parent_dir_mut(&mut root, &dp)?;
            let kind = match parent.children.get(dp.name()) {
                Some(Node::Dir(_)) => return Err(FsError::is_directory(&dp.path)),
                Some(Node::File(_)) => WatchEventKind::Write,
                None => WatchEventKind::Create,
            };
            parent.children.insert(
                dp.name().to_string(),
                Node::File(FileNode {
                    modified: SystemTime::now(),
                    ..copy
                }),
            );
            parent.modified = SystemTime::now();
            kind
        };
        self.inner.emit(vec![WatchEvent::new(dp.path, kind)]);
        Ok(())
    }

    fn move_file(&self, src: &str, dst: &str) -> FsResult<()> {
        self.check_writable(src)?;
        self.relocate(&self.parse(src), &self.parse(dst), WatchEventKind::Remove)
    }

    fn rename(&self, path: &str, new_name: &str) -> FsResult<String> {
        self.check_writable(path)?;
        if new_name.is_empty()
            || new_name == "."
            || new_name == ".."
            || new_name.contains(self.inner.sep)
        {
            return Err(FsError::invalid_path(new_name));
        }
        let src = self.parse(path);
        if src.is_root() {
            return Err(FsError::permission_denied(&src.path));
        }
        let dst = self.parse(&format!(
            "{}{}{new_name}",
            src.parent(self.inner.sep),
            self.inner.sep
        ));
        self.relocate(&src, &dst, WatchEventKind::Rename)?;
        Ok(dst.path)
    }

    fn touch(&self, path: &str, perm: Permissions) -> FsResult<()> {
        self.check_writable(path)?;
        let p = self.parse(path);
        let touched = {
            let mut root = self.inner.root.write();
            match lookup_mut(&mut root, &p) {
                Ok(node) => {
                    node.set_modified();
                    true
                }
                Err(e) if e.is_not_exist() => false,
                Err(e) => return Err(e),
            }
        };
        if touched {
            self.inner
                .emit(vec![WatchEvent::new(p.path, WatchEventKind::Write)]);
            Ok(())
        } else {
            self.inner.put(path, &[], perm, WriteMode::Append)
        }
    }

    /// Resize to `size`, cutting bytes off or padding with zeros.
    fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        self.check_writable(path)?;
        let p = self.parse(path);
        let size = usize::try_from(size).map_err(|_| FsError::invalid_path(&p.path))?;
        {
            let mut root = self.inner.root.write();
            match lookup_mut(&mut root, &p)? {
                Node::File(file) => {
                    if file.data.len() == size {
                        return Ok(());
                    }
                    file.data.resize(size, 0);
                    file.touched();
                }
                Node::Dir(_) => return Err(FsError::is_directory(&p.path)),
            }
        }
        self.inner
            .emit(vec![WatchEvent::new(p.path, WatchEventKind::Write)]);
        Ok(())
    }

    fn append(&self, ctx: &OpContext, path: &str, data: &[u8], perm: Permissions) -> FsResult<()> {
        ctx.check()?;
        self.inner.put(path, data, perm, WriteMode::Append)
    }

    fn open_append_writer(&self, path: &str, perm: Permissions) -> FsResult<Writer> {
        self.inner.put(path, &[], perm, WriteMode::Append)?;
        Ok(Box::new(MemWriter::new(&self.inner, path, perm)))
    }

    fn set_permissions(&self, path: &str, perm: Permissions) -> FsResult<()> {
        self.check_writable(path)?;
        let p = self.parse(path);
        {
            let mut root = self.inner.root.write();
            match lookup_mut(&mut root, &p)? {
                Node::Dir(dir) => dir.perm = perm,
                Node::File(file) => file.perm = perm,
            }
        }
        self.inner
            .emit(vec![WatchEvent::new(p.path, WatchEventKind::Chmod)]);
        Ok(())
    }

    /// Watch a node and its direct children.
    fn watch(&self, path: &str, callback: WatchCallback) -> FsResult<WatchGuard> {
        let p = self.parse(path);
        lookup(&self.inner.root.read(), &p)?;
        let id = self.inner.next_watch.fetch_add(1, Ordering::Relaxed);
        self.inner.watchers.lock().push(Watcher {
            id,
            path: p.path,
            callback,
        });
        let weak = Arc::downgrade(&self.inner);
        Ok(WatchGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.watchers.lock().retain(|w| w.id != id);
            }
        }))
    }

    fn make_all(&self, path: &str, perm: Permissions) -> FsResult<()> {
        self.check_writable(path)?;
        let p = self.parse(path);
        let mut created = Vec::new();
        {
            let mut root = self.inner.root.write();
            let mut node = &mut *root;
            let mut current = MemPath {
                path: self.inner.sep.to_string(),
                segs: Vec::new(),
            };
            for seg in &p.segs {
                current = MemPath {
                    path: current.child(seg, self.inner.sep),
                    segs: [current.segs.as_slice(), std::slice::from_ref(seg)].concat(),
                };
                let Node::Dir(dir) = node else {
                    return Err(FsError::is_not_directory(&current.path));
                };
                if !dir.children.contains_key(seg) {
                    dir.children
                        .insert(seg.clone(), Node::Dir(DirNode::new(perm)));
                    dir.modified = SystemTime::now();
                    created.push(WatchEvent::new(current.path.clone(), WatchEventKind::Create));
                }
                node = dir
                    .children
                    .get_mut(seg)
                    .ok_or_else(|| FsError::does_not_exist(&current.path))?;
            }
            if let Node::File(_) = node {
                return Err(FsError::is_not_directory(&p.path));
            }
        }
        self.inner.emit(created);
        Ok(())
    }
}

/// Buffers writes and commits them to the tree on flush and on drop.
struct MemWriter {
    inner: Arc<MemInner>,
    path: String,
    perm: Permissions,
    pending: Vec<u8>,
}

impl MemWriter {
    fn new(inner: &Arc<MemInner>, path: &str, perm: Permissions) -> Self {
        Self {
            inner: Arc::clone(inner),
            path: path.to_string(),
            perm,
            pending: Vec::new(),
        }
    }

    fn commit(&mut self) -> FsResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let data = std::mem::take(&mut self.pending);
        self.inner.put(&self.path, &data, self.perm, WriteMode::Append)
    }
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit().map_err(io::Error::from)
    }
}

impl Drop for MemWriter {
    fn drop(&mut self) {
        if let Err(e) = self.commit() {
            tracing::warn!("MemoryBackend: dropped writer for {} failed to commit: {}", self.path, e);
        }
    }
}

/// Works on a private copy and writes it back on flush and on drop.
struct MemReadWriter {
    inner: Arc<MemInner>,
    path: String,
    perm: Permissions,
    cursor: Cursor<Vec<u8>>,
    dirty: bool,
}

impl MemReadWriter {
    fn commit(&mut self) -> FsResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.inner
            .put(&self.path, self.cursor.get_ref(), self.perm, WriteMode::Replace)?;
        self.dirty = false;
        Ok(())
    }
}

impl Read for MemReadWriter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemReadWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl Write for MemReadWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.dirty = true;
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit().map_err(io::Error::from)
    }
}

impl Drop for MemReadWriter {
    fn drop(&mut self) {
        if let Err(e) = self.commit() {
            tracing::warn!("MemoryBackend: dropped read-writer for {} failed to commit: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const PERM: Permissions = Permissions::FILE_DEFAULT;

    fn ctx() -> OpContext {
        OpContext::new()
    }

    fn names(fs: &MemoryBackend, dir: &str, patterns: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        fs.list_dir_info(&ctx(), dir, &mut |e| {
            out.push(e.info.name);
            Ok(())
        }, patterns)
        .unwrap();
        out
    }

    #[test]
    fn test_crud() {
        let fs = MemoryBackend::new();
        fs.make_dir("/a", Permissions::DIR_DEFAULT).unwrap();
        let info = fs.stat("/a").unwrap();
        assert!(info.is_dir && info.exists);

        fs.write_all(&ctx(), "/a/b.txt", b"hi", PERM).unwrap();
        assert_eq!(fs.read_all(&ctx(), "/a/b.txt").unwrap(), b"hi");

        fs.remove("/a/b.txt").unwrap();
        assert!(fs.stat("/a/b.txt").unwrap_err().is_not_exist());
    }

    #[test]
    fn test_default_prefix_and_id() {
        let fs = MemoryBackend::new();
        assert_eq!(fs.prefix(), format!("mem://{}", fs.id()));
        assert_eq!(fs.name(), "memory");
        assert!(!fs.capabilities().contains(Capability::User));
    }

    #[test]
    fn test_make_dir_errors() {
        let fs = MemoryBackend::new();
        fs.make_dir("/a", Permissions::DIR_DEFAULT).unwrap();
        assert!(fs.make_dir("/a", Permissions::DIR_DEFAULT).unwrap_err().is_already_exists());
        assert!(fs.make_dir("/missing/x", Permissions::DIR_DEFAULT).unwrap_err().is_not_exist());

        fs.write_all(&ctx(), "/f", b"", PERM).unwrap();
        let err = fs.make_dir("/f/x", Permissions::DIR_DEFAULT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IsNotDirectory);
    }

    #[test]
    fn test_write_requires_parent() {
        let fs = MemoryBackend::new();
        let err = fs.write_all(&ctx(), "/nope/x.txt", b"x", PERM).unwrap_err();
        assert!(err.is_not_exist());
        let err = fs.write_all(&ctx(), "/", b"x", PERM).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_write_onto_directory_fails() {
        let fs = MemoryBackend::new();
        fs.make_dir("/d", Permissions::DIR_DEFAULT).unwrap();
        let err = fs.write_all(&ctx(), "/d", b"x", PERM).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IsDirectory);
        assert_eq!(fs.read_all(&ctx(), "/d").unwrap_err().kind(), ErrorKind::IsDirectory);
    }

    #[test]
    fn test_append_and_touch() {
        let fs = MemoryBackend::new();
        fs.append(&ctx(), "/log", b"one ", PERM).unwrap();
        fs.append(&ctx(), "/log", b"two", PERM).unwrap();
        assert_eq!(fs.read_all(&ctx(), "/log").unwrap(), b"one two");

        fs.touch("/empty", PERM).unwrap();
        assert_eq!(fs.stat("/empty").unwrap().size, 0);

        let before = fs.stat("/log").unwrap().modified;
        std::thread::sleep(std::time::Duration::from_millis(5));
        fs.touch("/log", PERM).unwrap();
        assert!(fs.stat("/log").unwrap().modified > before);
        assert_eq!(fs.read_all(&ctx(), "/log").unwrap(), b"one two");

        assert!(fs.touch("/no/dir", PERM).unwrap_err().is_not_exist());
    }

    #[test]
    fn test_truncate_both_directions() {
        let fs = MemoryBackend::new();
        fs.write_all(&ctx(), "/t", b"hello", PERM).unwrap();
        fs.truncate("/t", 2).unwrap();
        assert_eq!(fs.read_all(&ctx(), "/t").unwrap(), b"he");
        fs.truncate("/t", 4).unwrap();
        assert_eq!(fs.read_all(&ctx(), "/t").unwrap(), b"he\0\0");
        assert!(fs.truncate("/missing", 1).unwrap_err().is_not_exist());
    }

    #[test]
    fn test_remove_directory_detaches_subtree() {
        let fs = MemoryBackend::new();
        fs.make_all("/a/b/c", Permissions::DIR_DEFAULT).unwrap();
        fs.write_all(&ctx(), "/a/b/c/f.txt", b"x", PERM).unwrap();
        fs.remove("/a").unwrap();
        assert!(fs.stat("/a/b/c/f.txt").unwrap_err().is_not_exist());
        assert!(fs.stat("/a").unwrap_err().is_not_exist());
        assert_eq!(fs.remove("/").unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert!(fs.remove("/a").unwrap_err().is_not_exist());
    }

    #[test]
    fn test_listing_sorted_and_filtered() {
        let fs = MemoryBackend::new();
        for name in ["b.rs", "a.rs", "c.toml"] {
            fs.write_all(&ctx(), &format!("/{name}"), b"", PERM).unwrap();
        }
        fs.make_dir("/sub", Permissions::DIR_DEFAULT).unwrap();
        assert_eq!(names(&fs, "/", &[]), ["a.rs", "b.rs", "c.toml", "sub"]);
        assert_eq!(names(&fs, "/", &["*.rs"]), ["a.rs", "b.rs"]);

        let err = fs
            .list_dir_info(&ctx(), "/a.rs", &mut |_| Ok(()), &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IsNotDirectory);
    }

    #[test]
    fn test_listing_paths_and_recursion() {
        let fs = MemoryBackend::new();
        fs.make_all("/x/y", Permissions::DIR_DEFAULT).unwrap();
        fs.write_all(&ctx(), "/x/top.txt", b"", PERM).unwrap();
        fs.write_all(&ctx(), "/x/y/deep.txt", b"", PERM).unwrap();
        fs.write_all(&ctx(), "/x/y/deep.bin", b"", PERM).unwrap();

        let mut found = Vec::new();
        fs.list_dir_info_recursive(&ctx(), "/x", &mut |e| {
            found.push(e.path);
            Ok(())
        }, &["*.txt"])
        .unwrap();
        assert_eq!(found, ["/x/top.txt", "/x/y/deep.txt"]);

        let max = fs.list_dir_max(&ctx(), "/x", Some(1), &[]).unwrap();
        assert_eq!(max, ["/x/top.txt"]);
    }

    #[test]
    fn test_listing_cancelled() {
        let fs = MemoryBackend::new();
        fs.write_all(&ctx(), "/a", b"", PERM).unwrap();
        let ctx = OpContext::new();
        ctx.cancel();
        let err = fs.list_dir_info(&ctx, "/", &mut |_| Ok(()), &[]).unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn test_listing_callback_may_mutate() {
        let fs = MemoryBackend::new();
        fs.write_all(&ctx(), "/a", b"", PERM).unwrap();
        fs.write_all(&ctx(), "/b", b"", PERM).unwrap();
        fs.list_dir_info(&ctx(), "/", &mut |e| fs.remove(&e.path), &[])
            .unwrap();
        assert!(names(&fs, "/", &[]).is_empty());
    }

    #[test]
    fn test_stat_reports_cached_hash() {
        let fs = MemoryBackend::new();
        fs.write_all(&ctx(), "/h", b"hi", PERM).unwrap();
        assert_eq!(
            fs.stat("/h").unwrap().content_hash.as_deref(),
            Some("bc4f48d7a8651dc97ae415f0b47a52ef1a2702098202392b88bc925f6e89ee17")
        );
        fs.append(&ctx(), "/h", b"!", PERM).unwrap();
        assert_eq!(
            fs.stat("/h").unwrap().content_hash,
            Some(content_hash_bytes(b"hi!"))
        );
        let root = fs.stat("/").unwrap();
        assert_eq!(root.name, "/");
        assert!(root.content_hash.is_none());
    }

    #[test]
    fn test_writer_commits_on_flush_and_drop() {
        let fs = MemoryBackend::new();
        let mut w = fs.open_writer("/w", PERM).unwrap();
        assert_eq!(fs.stat("/w").unwrap().size, 0);
        w.write_all(b"abc").unwrap();
        w.flush().unwrap();
        assert_eq!(fs.read_all(&ctx(), "/w").unwrap(), b"abc");
        w.write_all(b"def").unwrap();
        drop(w);
        assert_eq!(fs.read_all(&ctx(), "/w").unwrap(), b"abcdef");

        let mut w = fs.open_append_writer("/w", PERM).unwrap();
        w.write_all(b"!").unwrap();
        drop(w);
        assert_eq!(fs.read_all(&ctx(), "/w").unwrap(), b"abcdef!");
    }

    #[test]
    fn test_read_writer() {
        let fs = MemoryBackend::new();
        fs.write_all(&ctx(), "/rw", b"hello world", PERM).unwrap();
        let mut rw = fs.open_read_writer("/rw", PERM).unwrap();
        let mut head = [0u8; 5];
        rw.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"hello");
        rw.seek(SeekFrom::Start(6)).unwrap();
        rw.write_all(b"there").unwrap();
        drop(rw);
        assert_eq!(fs.read_all(&ctx(), "/rw").unwrap(), b"hello there");
    }

    #[test]
    fn test_copy_move_rename() {
        let fs = MemoryBackend::new();
        fs.make_dir("/d", Permissions::DIR_DEFAULT).unwrap();
        fs.write_all(&ctx(), "/src.txt", b"data", PERM).unwrap();

        fs.copy_file(&ctx(), "/src.txt", "/d/copy.txt").unwrap();
        assert_eq!(fs.read_all(&ctx(), "/d/copy.txt").unwrap(), b"data");
        assert!(fs.exists("/src.txt"));

        fs.move_file("/src.txt", "/d/moved.txt").unwrap();
        assert!(!fs.exists("/src.txt"));
        assert_eq!(fs.read_all(&ctx(), "/d/moved.txt").unwrap(), b"data");

        let renamed = fs.rename("/d/moved.txt", "final.txt").unwrap();
        assert_eq!(renamed, "/d/final.txt");
        assert!(fs.exists("/d/final.txt"));

        assert_eq!(
            fs.rename("/d/final.txt", "a/b").unwrap_err().kind(),
            ErrorKind::InvalidPath
        );
        assert_eq!(
            fs.move_file("/d", "/d/inner").unwrap_err().kind(),
            ErrorKind::InvalidPath
        );
    }

    #[test]
    fn test_move_directory_with_children() {
        let fs = MemoryBackend::new();
        fs.make_all("/a/b", Permissions::DIR_DEFAULT).unwrap();
        fs.write_all(&ctx(), "/a/b/f", b"1", PERM).unwrap();
        fs.move_file("/a", "/z").unwrap();
        assert_eq!(fs.read_all(&ctx(), "/z/b/f").unwrap(), b"1");

        fs.write_all(&ctx(), "/file", b"", PERM).unwrap();
        assert!(fs.move_file("/z", "/file").unwrap_err().is_already_exists());
    }

    #[test]
    fn test_make_all() {
        let fs = MemoryBackend::new();
        fs.make_all("/p/q/r", Permissions::DIR_DEFAULT).unwrap();
        assert!(fs.stat("/p/q/r").unwrap().is_dir);
        fs.make_all("/p/q/r", Permissions::DIR_DEFAULT).unwrap();

        fs.write_all(&ctx(), "/p/file", b"", PERM).unwrap();
        let err = fs.make_all("/p/file/x", Permissions::DIR_DEFAULT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IsNotDirectory);
    }

    #[test]
    fn test_set_permissions() {
        let fs = MemoryBackend::new();
        fs.write_all(&ctx(), "/p", b"", PERM).unwrap();
        fs.set_permissions("/p", Permissions::from_bits(0o600)).unwrap();
        assert_eq!(fs.stat("/p").unwrap().permissions.bits(), 0o600);
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let fs = MemoryBackend::new();
        fs.write_all(&ctx(), "/keep", b"x", PERM).unwrap();
        fs.set_read_only(true);
        assert!(fs.read_only());
        for err in [
            fs.write_all(&ctx(), "/new", b"x", PERM).unwrap_err(),
            fs.make_dir("/d", Permissions::DIR_DEFAULT).unwrap_err(),
            fs.remove("/keep").unwrap_err(),
            fs.truncate("/keep", 0).unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::ReadOnlyFileSystem);
        }
        assert_eq!(fs.read_all(&ctx(), "/keep").unwrap(), b"x");
    }

    #[test]
    fn test_watch_events() {
        let fs = MemoryBackend::new();
        fs.make_dir("/w", Permissions::DIR_DEFAULT).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let guard = fs
            .watch("/w", Arc::new(move |event: WatchEvent| sink.lock().push(event)))
            .unwrap();

        fs.write_all(&ctx(), "/w/a", b"1", PERM).unwrap();
        fs.write_all(&ctx(), "/w/a", b"2", PERM).unwrap();
        fs.write_all(&ctx(), "/elsewhere", b"", PERM).unwrap();
        fs.remove("/w/a").unwrap();
        drop(guard);
        fs.write_all(&ctx(), "/w/b", b"", PERM).unwrap();

        let kinds: Vec<_> = seen.lock().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [WatchEventKind::Create, WatchEventKind::Write, WatchEventKind::Remove]
        );
    }

    #[test]
    fn test_watch_callback_may_reenter() {
        let fs = MemoryBackend::new();
        let probe = fs.clone();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sizes);
        let _guard = fs
            .watch("/", Arc::new(move |event: WatchEvent| {
                sink.lock().push(probe.stat(&event.path).map(|i| i.size).ok());
            }))
            .unwrap();
        fs.write_all(&ctx(), "/x", b"abc", PERM).unwrap();
        assert_eq!(*sizes.lock(), [Some(3)]);
    }

    #[test]
    fn test_close_clears_and_is_idempotent() {
        let fs = MemoryBackend::new();
        fs.write_all(&ctx(), "/a", b"x", PERM).unwrap();
        fs.close().unwrap();
        fs.close().unwrap();
        assert!(fs.is_closed());
        assert!(!fs.exists("/a"));
        assert!(fs.stat("/").unwrap().is_dir);
    }

    #[test]
    fn test_close_releases_registry_entry() {
        let registry = Registry::new();
        let fs = MemoryBackend::new_registered(&registry, MemoryConfig::default()).unwrap();
        assert!(registry.get(fs.prefix()).is_some());
        fs.close().unwrap();
        assert!(registry.get(fs.prefix()).is_none());
    }

    #[test]
    fn test_close_spares_successor_at_same_prefix() {
        let registry = Registry::new();
        let first = MemoryBackend::new_registered(&registry, MemoryConfig {
            prefix: Some("mem://shared".to_string()),
            ..Default::default()
        })
        .unwrap();

        // Entry gone but close not yet run, as between unregister and teardown.
        assert!(registry.release("mem://shared", &*first));
        let second = Arc::new(MemoryBackend::with_config(MemoryConfig {
            prefix: Some("mem://shared".to_string()),
            ..Default::default()
        }));
        registry.register(second.clone()).unwrap();

        first.close().unwrap();
        let live = registry.get("mem://shared").unwrap();
        assert_eq!(live.id(), second.id());
        assert!(!registry.release("mem://shared", &*first));
    }

    #[test]
    fn test_backslash_separator() {
        let fs = MemoryBackend::with_config(MemoryConfig {
            separator: '\\',
            ..Default::default()
        });
        fs.make_dir(r"\dir", Permissions::DIR_DEFAULT).unwrap();
        fs.write_all(&ctx(), r"\dir\f.txt", b"x", PERM).unwrap();
        let mut paths = Vec::new();
        fs.list_dir_info(&ctx(), r"\dir", &mut |e| {
            paths.push(e.path);
            Ok(())
        }, &[])
        .unwrap();
        assert_eq!(paths, [r"\dir\f.txt"]);
        assert_eq!(fs.join_clean_path(&[r"\dir", "f.txt"]), r"\dir\f.txt");
    }

    #[test]
    fn test_concurrent_appends_are_linearized() {
        let fs = MemoryBackend::new();
        fs.touch("/c", PERM).unwrap();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let fs = fs.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        fs.append(&OpContext::new(), "/c", b"x", PERM).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(fs.stat("/c").unwrap().size, 800);
    }
}
