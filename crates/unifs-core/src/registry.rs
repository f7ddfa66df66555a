//! Dispatch registry with longest-prefix routing.
//!
//! Maps handle prefixes to live backend instances. A handle resolves to the
//! backend whose prefix is the longest literal prefix of the handle, so a
//! specific, already-connected endpoint (`sftp://user@host`) shadows a more
//! generic protocol registration (`sftp://`). Handles matching nothing go to
//! the local backend unchanged.
//!
//! The table lock only guards the table. Backend teardown at refcount zero
//! and dialing both run after the lock is released.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::Backend;
use crate::backends::LocalBackend;
use crate::cancel::OpContext;
use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::handle::FileHandle;

struct Entry {
    prefix: String,
    backend: Arc<dyn Backend>,
    refs: usize,
}

/// Public view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub prefix: String,
    pub name: String,
    pub refs: usize,
}

/// Outcome of resolving a handle.
#[derive(Clone)]
pub struct Resolved {
    pub backend: Arc<dyn Backend>,
    /// Matched prefix, empty for the local fallback.
    pub prefix: String,
    /// Backend-local path.
    pub path: String,
}

impl Resolved {
    /// Handle for another backend-local path on the same backend, spelled
    /// the same way as the resolved one.
    pub fn handle_for(&self, path: &str) -> FileHandle {
        FileHandle::new(format!("{}{}", self.prefix, path))
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("backend", &self.backend.describe())
            .field("prefix", &self.prefix)
            .field("path", &self.path)
            .finish()
    }
}

/// Table of live backends keyed by prefix.
///
/// Owned by the composing application and passed to whatever needs it;
/// independent registries do not share state.
pub struct Registry {
    entries: RwLock<Vec<Entry>>,
    local: Arc<dyn Backend>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &"<locked>")
            .field("local", &self.local.describe())
            .finish()
    }
}

impl Registry {
    /// Registry whose fallback is an unrestricted [`LocalBackend`], also
    /// registered under `file://`.
    pub fn new() -> Arc<Self> {
        Self::with_local(Arc::new(LocalBackend::new()))
    }

    /// Registry with a custom fallback backend, registered under its prefix.
    pub fn with_local(local: Arc<dyn Backend>) -> Arc<Self> {
        let registry = Self {
            entries: RwLock::new(vec![Entry {
                prefix: local.prefix().to_string(),
                backend: Arc::clone(&local),
                refs: 1,
            }]),
            local,
        };
        Arc::new(registry)
    }

    /// Fallback backend for unmatched handles.
    pub fn local(&self) -> &Arc<dyn Backend> {
        &self.local
    }

    /// Register a backend under its prefix, returning the new refcount.
    ///
    /// Re-registering the same instance bumps its count. A different
    /// instance claiming a taken prefix is rejected with `AlreadyExists`.
    pub fn register(&self, backend: Arc<dyn Backend>) -> FsResult<usize> {
        let prefix = backend.prefix().to_string();
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.prefix == prefix) {
            if !same_instance(&entry.backend, &backend) {
                return Err(FsError::already_exists(prefix));
            }
            entry.refs += 1;
            tracing::debug!("Registry: {} refcount now {}", prefix, entry.refs);
            return Ok(entry.refs);
        }
        tracing::debug!("Registry: registered {}", backend.describe());
        entries.push(Entry {
            prefix,
            backend,
            refs: 1,
        });
        Ok(1)
    }

    /// Drop one registration of `backend`, returning the remaining count.
    ///
    /// At zero the entry leaves the table and the backend is closed, after
    /// the table lock has been released. Unknown backends are a no-op.
    #[tracing::instrument(skip(self, backend), name = "registry.unregister", fields(prefix = %backend.prefix()))]
    pub fn unregister(&self, backend: &Arc<dyn Backend>) -> usize {
        let removed = {
            let mut entries = self.entries.write();
            let Some(idx) = entries
                .iter()
                .position(|e| e.prefix == backend.prefix() && same_instance(&e.backend, backend))
            else {
                return 0;
            };
            entries[idx].refs -= 1;
            if entries[idx].refs > 0 {
                return entries[idx].refs;
            }
            entries.remove(idx)
        };

        tracing::info!("Registry: tearing down {}", removed.backend.describe());
        if let Err(e) = removed.backend.close() {
            tracing::warn!("Registry: closing {} failed: {}", removed.prefix, e);
        }
        0
    }

    /// Remove the entry for `prefix` without closing its backend, but only
    /// while that entry still holds `backend`.
    ///
    /// Used by a backend that is closing itself.
    pub fn release(&self, prefix: &str, backend: &dyn Backend) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        let target = std::ptr::from_ref(backend);
        entries.retain(|e| e.prefix != prefix || !std::ptr::addr_eq(Arc::as_ptr(&e.backend), target));
        before != entries.len()
    }

    /// Route `uri` to a backend and backend-local path. Never fails.
    pub fn resolve(&self, uri: &str) -> Resolved {
        let entries = self.entries.read();
        let best = entries
            .iter()
            .filter(|e| uri.starts_with(e.prefix.as_str()))
            .max_by_key(|e| e.prefix.len());

        match best {
            Some(entry) => Resolved {
                backend: Arc::clone(&entry.backend),
                prefix: entry.prefix.clone(),
                path: uri[entry.prefix.len()..].to_string(),
            },
            None => Resolved {
                backend: Arc::clone(&self.local),
                prefix: String::new(),
                path: uri.to_string(),
            },
        }
    }

    /// Backend registered at exactly `prefix`.
    pub fn get(&self, prefix: &str) -> Option<Arc<dyn Backend>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.prefix == prefix)
            .map(|e| Arc::clone(&e.backend))
    }

    /// Reuse the backend at `prefix`, or dial a new one.
    ///
    /// An existing entry gets its refcount bumped and is returned as is.
    /// Otherwise `ctx` is checked and `dialer` runs without the table lock;
    /// if another caller registered the prefix meanwhile, the fresh backend
    /// is closed and the winner reused.
    #[tracing::instrument(skip(self, ctx, dialer), name = "registry.dial")]
    pub fn dial<F>(&self, ctx: &OpContext, prefix: &str, dialer: F) -> FsResult<Arc<dyn Backend>>
    where
        F: FnOnce(&OpContext) -> FsResult<Arc<dyn Backend>>,
    {
        if let Some(existing) = self.acquire(prefix) {
            return Ok(existing);
        }

        ctx.check()?;
        let dialed = dialer(ctx)?;
        if dialed.prefix() != prefix {
            if let Err(e) = dialed.close() {
                tracing::warn!("Registry: closing misprefixed {} failed: {}", dialed.prefix(), e);
            }
            return Err(FsError::invalid_path(format!(
                "dialed backend has prefix {} instead of {}",
                dialed.prefix(),
                prefix
            )));
        }

        match self.register(Arc::clone(&dialed)) {
            Ok(_) => Ok(dialed),
            Err(e) if e.is_already_exists() => {
                tracing::debug!("Registry: lost dial race for {}, reusing", prefix);
                if let Err(e) = dialed.close() {
                    tracing::warn!("Registry: closing redundant {} failed: {}", prefix, e);
                }
                self.acquire(prefix).ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Bump the refcount of the entry at `prefix` and return its backend.
    fn acquire(&self, prefix: &str) -> Option<Arc<dyn Backend>> {
        let mut entries = self.entries.write();
        let entry = entries.iter_mut().find(|e| e.prefix == prefix)?;
        entry.refs += 1;
        Some(Arc::clone(&entry.backend))
    }

    /// Snapshot of the table for diagnostics.
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.entries
            .read()
            .iter()
            .map(|e| RegistryEntry {
                prefix: e.prefix.clone(),
                name: e.backend.name().to_string(),
                refs: e.refs,
            })
            .collect()
    }

    /// File value for `uri`, bound to this registry.
    pub fn file(self: &Arc<Self>, uri: impl Into<FileHandle>) -> File {
        File::new(Arc::clone(self), uri.into())
    }
}

fn same_instance(a: &Arc<dyn Backend>, b: &Arc<dyn Backend>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
