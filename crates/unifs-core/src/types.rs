//! Core value types shared by all backends.
//!
//! Everything here is a plain snapshot value; nothing holds a live
//! backend resource.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};
use std::time::SystemTime;

/// Unix-style permission bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u32);

impl Permissions {
    pub const USER_READ: Permissions = Permissions(0o400);
    pub const USER_WRITE: Permissions = Permissions(0o200);
    pub const USER_EXECUTE: Permissions = Permissions(0o100);
    pub const GROUP_READ: Permissions = Permissions(0o040);
    pub const GROUP_WRITE: Permissions = Permissions(0o020);
    pub const GROUP_EXECUTE: Permissions = Permissions(0o010);
    pub const OTHERS_READ: Permissions = Permissions(0o004);
    pub const OTHERS_WRITE: Permissions = Permissions(0o002);
    pub const OTHERS_EXECUTE: Permissions = Permissions(0o001);

    /// `rw-r--r--`, used for new files.
    pub const FILE_DEFAULT: Permissions = Permissions(0o644);
    /// `rwxr-xr-x`, used for new directories.
    pub const DIR_DEFAULT: Permissions = Permissions(0o755);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 0o777)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Permissions) -> Self {
        Self(self.0 | other.0)
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::FILE_DEFAULT
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({:#o})", self.0)
    }
}

/// `rwxr-x---` style.
impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const FLAGS: [(u32, char); 9] = [
            (0o400, 'r'),
            (0o200, 'w'),
            (0o100, 'x'),
            (0o040, 'r'),
            (0o020, 'w'),
            (0o010, 'x'),
            (0o004, 'r'),
            (0o002, 'w'),
            (0o001, 'x'),
        ];
        for (bit, ch) in FLAGS {
            f.write_char(if self.0 & bit != 0 { ch } else { '-' })?;
        }
        Ok(())
    }
}

/// Snapshot of a file's metadata at the time of a stat-like call.
///
/// Never updated after creation; staleness is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Leaf name (the separator for a backend root).
    pub name: String,
    pub exists: bool,
    pub is_dir: bool,
    pub is_regular: bool,
    pub is_hidden: bool,
    /// Size in bytes, zero for directories.
    pub size: u64,
    pub modified: SystemTime,
    pub permissions: Permissions,
    /// Content hash, when the backend has one at hand.
    pub content_hash: Option<String>,
}

impl FileInfo {
    /// Info for a regular file.
    pub fn file(name: impl Into<String>, size: u64, modified: SystemTime, permissions: Permissions) -> Self {
        let name = name.into();
        Self {
            is_hidden: crate::path::is_hidden_name(&name),
            name,
            exists: true,
            is_dir: false,
            is_regular: true,
            size,
            modified,
            permissions,
            content_hash: None,
        }
    }

    /// Info for a directory.
    pub fn directory(name: impl Into<String>, modified: SystemTime, permissions: Permissions) -> Self {
        let name = name.into();
        Self {
            is_hidden: crate::path::is_hidden_name(&name),
            name,
            exists: true,
            is_dir: true,
            is_regular: false,
            size: 0,
            modified,
            permissions,
            content_hash: None,
        }
    }

    /// Info describing a file that does not exist.
    pub fn missing(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            is_hidden: crate::path::is_hidden_name(&name),
            name,
            exists: false,
            is_dir: false,
            is_regular: false,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            permissions: Permissions::from_bits(0),
            content_hash: None,
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

/// Directory listing entry: backend-local path plus its info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub path: String,
    pub info: FileInfo,
}

impl DirEntry {
    pub fn new(path: impl Into<String>, info: FileInfo) -> Self {
        Self {
            path: path.into(),
            info,
        }
    }
}

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum WatchEventKind {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

/// Change notification delivered to a watch callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Backend-local path of the node that changed.
    pub path: String,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn new(path: impl Into<String>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_display() {
        assert_eq!(Permissions::FILE_DEFAULT.to_string(), "rw-r--r--");
        assert_eq!(Permissions::DIR_DEFAULT.to_string(), "rwxr-xr-x");
        assert_eq!(Permissions::from_bits(0).to_string(), "---------");
        assert_eq!(format!("{:?}", Permissions::from_bits(0o640)), "Permissions(0o640)");
    }

    #[test]
    fn test_permissions_bits() {
        let p = Permissions::USER_READ.union(Permissions::USER_WRITE);
        assert_eq!(p.bits(), 0o600);
        assert!(p.contains(Permissions::USER_READ));
        assert!(!p.contains(Permissions::OTHERS_READ));
        assert_eq!(Permissions::from_bits(0o100644).bits(), 0o644);
    }

    #[test]
    fn test_file_info_constructors() {
        let f = FileInfo::file("a.txt", 3, SystemTime::UNIX_EPOCH, Permissions::FILE_DEFAULT);
        assert!(f.exists && f.is_regular && !f.is_dir && !f.is_hidden);
        assert_eq!(f.size, 3);

        let d = FileInfo::directory(".cache", SystemTime::UNIX_EPOCH, Permissions::DIR_DEFAULT);
        assert!(d.is_dir && d.is_hidden && !d.is_regular);

        let m = FileInfo::missing("gone");
        assert!(!m.exists && !m.is_dir && !m.is_regular);
    }

    #[test]
    fn test_permissions_serialize_as_number() {
        let json = serde_json::to_string(&Permissions::from_bits(0o600)).unwrap();
        assert_eq!(json, "384");
    }
}
