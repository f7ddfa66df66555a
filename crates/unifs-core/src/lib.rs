//! # unifs-core
//!
//! One file API over many storage systems.
//!
//! A file is addressed by a handle string, either `<scheme>://<authority>/path`
//! or a bare local path. A [`Registry`] maps handle prefixes to live
//! [`Backend`]s and routes each handle to the backend with the longest
//! matching prefix; unmatched handles go to the local filesystem.
//!
//! ```no_run
//! use unifs_core::{MemoryBackend, MemoryConfig, OpContext, Registry};
//!
//! # fn main() -> unifs_core::FsResult<()> {
//! let registry = Registry::new();
//! let _mem = MemoryBackend::new_registered(&registry, MemoryConfig {
//!     id: Some("scratch".into()),
//!     ..Default::default()
//! })?;
//!
//! let ctx = OpContext::new();
//! let file = registry.file("mem://scratch/notes.txt");
//! file.write_all_string(&ctx, "hello")?;
//! assert_eq!(file.read_all_string(&ctx)?, "hello");
//! # Ok(())
//! # }
//! ```
//!
//! Backends declare optional capability groups up front; asking a backend
//! for something it does not declare fails with
//! [`ErrorKind::Unsupported`]. Errors are tested by kind, through any
//! amount of wrapping.

pub mod backend;
pub mod backends;
pub mod cancel;
pub mod capability;
pub mod config;
pub mod error;
pub mod file;
pub mod handle;
pub mod hash;
pub mod path;
pub mod registry;
pub mod types;

pub use backend::{Backend, ReadWriter, Reader, WatchCallback, WatchGuard, Writer};
pub use backends::{LocalBackend, MemoryBackend};
pub use cancel::OpContext;
pub use capability::{Capabilities, Capability};
pub use config::{LocalConfig, MemoryConfig};
pub use error::{ErrorKind, FsError, FsResult, error_kind};
pub use file::File;
pub use handle::FileHandle;
pub use hash::{BLOCK_SIZE, ContentHasher, content_hash, content_hash_with};
pub use registry::{Registry, RegistryEntry, Resolved};
pub use types::{DirEntry, FileInfo, Permissions, WatchEvent, WatchEventKind};
