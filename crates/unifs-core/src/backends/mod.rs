//! Backends shipped with the core.
//!
//! Network and archive adapters live outside this crate and plug in through
//! the same [`Backend`](crate::backend::Backend) trait.

mod local;
mod memory;

pub use local::{LOCAL_PREFIX, LocalBackend};
pub use memory::{MEMORY_SCHEME, MemoryBackend};
