//! Optional capability groups a backend may declare.
//!
//! Every backend supplies its [`Capabilities`] at construction. The file
//! layer consults the declared set before calling an optional operation and
//! fails with `Unsupported` when the group is absent, instead of probing.

use std::fmt;

use strum::IntoEnumIterator;

/// An optional cluster of related backend operations.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Capability {
    /// Copy a file within the backend without streaming through the caller.
    Copy,
    /// Move a file or directory to another path in the same backend.
    Move,
    /// Rename within the same directory.
    Rename,
    Touch,
    Truncate,
    Append,
    AppendWriter,
    Permissions,
    User,
    Group,
    Watch,
    VolumeName,
    /// Create a directory together with its missing ancestors.
    MakeAll,
}

impl Capability {
    const fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Set of declared capabilities.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Capability::iter().collect()
    }

    pub const fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    pub const fn without(self, cap: Capability) -> Self {
        Self(self.0 & !cap.bit())
    }

    pub const fn contains(self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::iter().filter(move |cap| self.contains(*cap))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
