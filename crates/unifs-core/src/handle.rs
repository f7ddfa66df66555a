//! File handle strings.
//!
//! A handle is either `<scheme>://[<authority>]<path>` or a bare local path.
//! It is parsed once at construction; the scheme / authority / path split is
//! stored as byte ranges into the original string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

const SCHEME_SEP: &str = "://";

/// Immutable, cheap-to-clone file identifier.
///
/// Equality and hashing use the raw string. Two spellings of the same file
/// compare unequal here; they only meet after the owning backend cleans them.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FileHandle {
    raw: String,
    scheme: Option<Range<usize>>,
    authority: Option<Range<usize>>,
    path: Range<usize>,
}

impl FileHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let (scheme, authority, path) = parse(&raw);
        Self {
            raw,
            scheme,
            authority,
            path,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Scheme without `://`, `None` for bare paths.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.clone().map(|r| &self.raw[r])
    }

    /// Authority between `://` and the path; may be empty.
    pub fn authority(&self) -> Option<&str> {
        self.authority.clone().map(|r| &self.raw[r])
    }

    /// Path part: everything after the authority, or the whole bare path.
    pub fn path(&self) -> &str {
        &self.raw[self.path.clone()]
    }

    /// `scheme://authority`, the natural registry prefix for this handle.
    pub fn origin(&self) -> Option<&str> {
        self.authority.as_ref().map(|r| &self.raw[..r.end])
    }

    pub fn is_bare(&self) -> bool {
        self.scheme.is_none()
    }

    pub fn into_string(self) -> String {
        self.raw
    }
}

type Parsed = (Option<Range<usize>>, Option<Range<usize>>, Range<usize>);

fn parse(raw: &str) -> Parsed {
    let bare = (None, None, 0..raw.len());
    let Some(pos) = raw.find(SCHEME_SEP) else {
        return bare;
    };
    if !is_scheme(&raw[..pos]) {
        return bare;
    }
    let auth_start = pos + SCHEME_SEP.len();
    let auth_end = raw[auth_start..]
        .find('/')
        .map_or(raw.len(), |i| auth_start + i);
    (
        Some(0..pos),
        Some(auth_start..auth_end),
        auth_end..raw.len(),
    )
}

/// RFC 3986 scheme: a letter followed by letters, digits, `+`, `-` or `.`.
fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl PartialEq for FileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for FileHandle {}

impl Hash for FileHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for FileHandle {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileHandle {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHandle({:?})", self.raw)
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for FileHandle {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl From<String> for FileHandle {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for FileHandle {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<FileHandle> for String {
    fn from(handle: FileHandle) -> Self {
        handle.raw
    }
}
