//! Error taxonomy shared by every backend.
//!
//! Backends classify their native failures into one of a small set of
//! [`ErrorKind`]s. Callers test errors by kind, never by backend-specific
//! type, and the test works through any number of wrapping layers.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Classification of a filesystem error, independent of its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum ErrorKind {
    DoesNotExist,
    AlreadyExists,
    IsDirectory,
    IsNotDirectory,
    ReadOnlyFileSystem,
    WriteOnlyFileSystem,
    PermissionDenied,
    Unsupported,
    Canceled,
    InvalidPath,
    EmptyPath,
    Other,
}

impl ErrorKind {
    /// Map a `std::io::ErrorKind` onto the taxonomy.
    pub fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => ErrorKind::DoesNotExist,
            io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::IsADirectory => ErrorKind::IsDirectory,
            io::ErrorKind::NotADirectory => ErrorKind::IsNotDirectory,
            io::ErrorKind::ReadOnlyFilesystem => ErrorKind::ReadOnlyFileSystem,
            io::ErrorKind::Unsupported => ErrorKind::Unsupported,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidPath,
            _ => ErrorKind::Other,
        }
    }

    fn to_io(self) -> io::ErrorKind {
        match self {
            ErrorKind::DoesNotExist => io::ErrorKind::NotFound,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::IsDirectory => io::ErrorKind::IsADirectory,
            ErrorKind::IsNotDirectory => io::ErrorKind::NotADirectory,
            ErrorKind::ReadOnlyFileSystem => io::ErrorKind::ReadOnlyFilesystem,
            ErrorKind::WriteOnlyFileSystem | ErrorKind::PermissionDenied => {
                io::ErrorKind::PermissionDenied
            }
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::Canceled => io::ErrorKind::Interrupted,
            ErrorKind::InvalidPath | ErrorKind::EmptyPath => io::ErrorKind::InvalidInput,
            ErrorKind::Other => io::ErrorKind::Other,
        }
    }
}

/// Filesystem error type.
#[derive(Debug, Error)]
pub enum FsError {
    /// File or directory not found.
    #[error("file does not exist: {0}")]
    DoesNotExist(String),

    /// Path already exists.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// Expected a file, found a directory.
    #[error("is a directory: {0}")]
    IsDirectory(String),

    /// Expected a directory, found a file.
    #[error("is not a directory: {0}")]
    IsNotDirectory(String),

    /// Backend refuses mutations.
    #[error("read-only file system: {0}")]
    ReadOnlyFileSystem(String),

    /// Backend refuses reads.
    #[error("write-only file system: {0}")]
    WriteOnlyFileSystem(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend does not declare the capability needed for `op`.
    #[error("{op} is not supported: {path}")]
    Unsupported { op: &'static str, path: String },

    /// Operation gave up because its context was cancelled or timed out.
    #[error("operation canceled: {0}")]
    Canceled(String),

    /// Malformed path or pattern.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Operation on an empty file handle.
    #[error("empty file path")]
    EmptyPath,

    /// An error with the offending file handle attached.
    #[error("{handle}: {source}")]
    InFile {
        handle: String,
        #[source]
        source: Box<FsError>,
    },

    /// A backend's native error, classified.
    #[error("{path}: {source}")]
    Backend {
        kind: ErrorKind,
        path: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl FsError {
    /// Create a DoesNotExist error.
    pub fn does_not_exist(path: impl Into<String>) -> Self {
        Self::DoesNotExist(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create an IsDirectory error.
    pub fn is_directory(path: impl Into<String>) -> Self {
        Self::IsDirectory(path.into())
    }

    /// Create an IsNotDirectory error.
    pub fn is_not_directory(path: impl Into<String>) -> Self {
        Self::IsNotDirectory(path.into())
    }

    /// Create a ReadOnlyFileSystem error.
    pub fn read_only(path: impl Into<String>) -> Self {
        Self::ReadOnlyFileSystem(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create an Unsupported error for the named operation.
    pub fn unsupported(op: &'static str, path: impl Into<String>) -> Self {
        Self::Unsupported {
            op,
            path: path.into(),
        }
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Wrap a backend's native error under the given classification.
    pub fn backend(
        kind: ErrorKind,
        path: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            kind,
            path: path.into(),
            source: source.into(),
        }
    }

    /// Classify a `std::io::Error` raised while operating on `path`.
    pub fn from_io(err: io::Error, path: impl Into<String>) -> Self {
        let path = path.into();
        if let Some(kind) = io_payload_kind(&err) {
            return Self::backend(kind, path, err);
        }
        match err.kind() {
            io::ErrorKind::NotFound => Self::DoesNotExist(path),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            io::ErrorKind::IsADirectory => Self::IsDirectory(path),
            io::ErrorKind::NotADirectory => Self::IsNotDirectory(path),
            io::ErrorKind::ReadOnlyFilesystem => Self::ReadOnlyFileSystem(path),
            kind => Self::backend(ErrorKind::from_io(kind), path, err),
        }
    }

    /// Attach the offending file handle.
    ///
    /// Classified variants keep their identity with the handle replacing the
    /// backend-local path; everything else is wrapped in [`FsError::InFile`].
    pub fn with_handle(self, handle: impl Into<String>) -> Self {
        let handle = handle.into();
        match self {
            Self::DoesNotExist(_) => Self::DoesNotExist(handle),
            Self::AlreadyExists(_) => Self::AlreadyExists(handle),
            Self::IsDirectory(_) => Self::IsDirectory(handle),
            Self::IsNotDirectory(_) => Self::IsNotDirectory(handle),
            Self::ReadOnlyFileSystem(_) => Self::ReadOnlyFileSystem(handle),
            Self::WriteOnlyFileSystem(_) => Self::WriteOnlyFileSystem(handle),
            Self::PermissionDenied(_) => Self::PermissionDenied(handle),
            Self::InvalidPath(_) => Self::InvalidPath(handle),
            Self::Unsupported { op, .. } => Self::Unsupported { op, path: handle },
            Self::Backend { kind, source, .. } => Self::Backend {
                kind,
                path: handle,
                source,
            },
            Self::InFile { source, .. } => Self::InFile { handle, source },
            other => Self::InFile {
                handle,
                source: Box::new(other),
            },
        }
    }

    /// Classification of this error, seen through any wrapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DoesNotExist(_) => ErrorKind::DoesNotExist,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::IsDirectory(_) => ErrorKind::IsDirectory,
            Self::IsNotDirectory(_) => ErrorKind::IsNotDirectory,
            Self::ReadOnlyFileSystem(_) => ErrorKind::ReadOnlyFileSystem,
            Self::WriteOnlyFileSystem(_) => ErrorKind::WriteOnlyFileSystem,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Canceled(_) => ErrorKind::Canceled,
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::EmptyPath => ErrorKind::EmptyPath,
            Self::InFile { source, .. } => source.kind(),
            Self::Backend { kind, .. } => *kind,
            Self::Io(e) => io_payload_kind(e).unwrap_or_else(|| ErrorKind::from_io(e.kind())),
            Self::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_not_exist(&self) -> bool {
        self.kind() == ErrorKind::DoesNotExist
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::Unsupported
    }

    pub fn is_canceled(&self) -> bool {
        self.kind() == ErrorKind::Canceled
    }
}

/// Kind of an `FsError` carried inside an `io::Error`, if any.
fn io_payload_kind(err: &io::Error) -> Option<ErrorKind> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<FsError>())
        .map(FsError::kind)
}

/// Find the first classified kind in an arbitrary error chain.
///
/// Walks `source()` links, so an `FsError` buried under context layers of
/// another error type is still found.
pub fn error_kind(err: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(fs) = e.downcast_ref::<FsError>() {
            return Some(fs.kind());
        }
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if let Some(kind) = io_payload_kind(io) {
                return Some(kind);
            }
        }
        current = e.source();
    }
    None
}

/// Convert FsError to std::io::Error so readers and writers can surface it.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Io(e) => e,
            other => io::Error::new(other.kind().to_io(), other),
        }
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_classified_variants() {
        assert_eq!(FsError::does_not_exist("/a").kind(), ErrorKind::DoesNotExist);
        assert_eq!(FsError::already_exists("/a").kind(), ErrorKind::AlreadyExists);
        assert_eq!(FsError::unsupported("rename", "/a").kind(), ErrorKind::Unsupported);
        assert_eq!(FsError::Canceled("deadline exceeded".into()).kind(), ErrorKind::Canceled);
        assert_eq!(FsError::EmptyPath.kind(), ErrorKind::EmptyPath);
    }

    #[test]
    fn test_with_handle_keeps_variant() {
        let err = FsError::does_not_exist("/a/b.txt").with_handle("mem://x/a/b.txt");
        assert!(matches!(&err, FsError::DoesNotExist(h) if h == "mem://x/a/b.txt"));
        assert!(err.is_not_exist());
    }

    #[test]
    fn test_with_handle_wraps_unclassified() {
        let err = FsError::Canceled("canceled".into()).with_handle("mem://x/big.bin");
        assert!(matches!(err, FsError::InFile { .. }));
        assert!(err.is_canceled());
        assert!(err.to_string().starts_with("mem://x/big.bin"));
    }

    #[test]
    fn test_kind_through_nested_wrapping() {
        let err = FsError::InFile {
            handle: "outer".into(),
            source: Box::new(FsError::InFile {
                handle: "inner".into(),
                source: Box::new(FsError::backend(
                    ErrorKind::DoesNotExist,
                    "/x",
                    "404 Not Found",
                )),
            }),
        };
        assert!(err.is_not_exist());
    }

    #[test]
    fn test_from_io_classifies() {
        let err = FsError::from_io(io::Error::from(io::ErrorKind::NotFound), "/nope");
        assert!(matches!(err, FsError::DoesNotExist(ref p) if p == "/nope"));

        let err = FsError::from_io(io::Error::other("disk on fire"), "/x");
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_io_roundtrip_preserves_kind() {
        let io_err: io::Error = FsError::read_only("/x").into();
        assert_eq!(io_err.kind(), io::ErrorKind::ReadOnlyFilesystem);

        let back = FsError::from(io_err);
        assert_eq!(back.kind(), ErrorKind::ReadOnlyFileSystem);

        let io_err: io::Error = FsError::unsupported("truncate", "/x").into();
        let classified = FsError::from_io(io_err, "/x");
        assert!(classified.is_unsupported());
    }

    #[test]
    fn test_error_kind_through_anyhow_context() {
        let err = anyhow::Error::new(FsError::does_not_exist("/missing"))
            .context("loading settings")
            .context("starting up");
        assert_eq!(error_kind(err.as_ref()), Some(ErrorKind::DoesNotExist));

        let plain = anyhow::anyhow!("nothing classified here");
        assert_eq!(error_kind(plain.as_ref()), None);
    }
}
