//! Host scheduler version selection.
//!
//! The set of job descriptor fields depends on the host scheduler release the
//! plugin is built against. The release is picked at build time with one of
//! the `host-*` cargo features; without any of them the newest known layout
//! is used. Nothing here is negotiated at runtime.

use std::fmt;

/// A host scheduler release, compared the same way the host encodes
/// `VERSION_NUM(major, minor, micro)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostVersion {
    major: u8,
    minor: u8,
    micro: u8,
}

impl HostVersion {
    /// Create a version from its components.
    pub const fn new(major: u8, minor: u8, micro: u8) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }

    /// The packed numeric form, `major << 16 | minor << 8 | micro`.
    pub const fn number(&self) -> u32 {
        ((self.major as u32) << 16) | ((self.minor as u32) << 8) | self.micro as u32
    }
}

impl PartialOrd for HostVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HostVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.number().cmp(&other.number())
    }
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}.{}", self.major, self.minor, self.micro)
    }
}

pub(crate) const V17_02: HostVersion = HostVersion::new(17, 2, 0);
pub(crate) const V17_11: HostVersion = HostVersion::new(17, 11, 0);
pub(crate) const V18_08: HostVersion = HostVersion::new(18, 8, 0);
pub(crate) const V19_05: HostVersion = HostVersion::new(19, 5, 0);
pub(crate) const V21_00: HostVersion = HostVersion::new(21, 0, 0);

/// The host release this build targets.
pub const HOST_VERSION: HostVersion = if cfg!(feature = "host-16-05") {
    HostVersion::new(16, 5, 0)
} else if cfg!(feature = "host-17-02") {
    V17_02
} else if cfg!(feature = "host-17-11") {
    V17_11
} else if cfg!(feature = "host-18-08") {
    V18_08
} else if cfg!(feature = "host-19-05") {
    V19_05
} else if cfg!(feature = "host-20-11") {
    HostVersion::new(20, 11, 0)
} else {
    HostVersion::new(21, 8, 0)
};

/// The half-open window of host releases a field exists in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGate {
    since: Option<HostVersion>,
    before: Option<HostVersion>,
}

impl VersionGate {
    /// Present in every release.
    pub const ALWAYS: Self = Self {
        since: None,
        before: None,
    };

    /// Present from `version` onwards.
    pub const fn since(version: HostVersion) -> Self {
        Self {
            since: Some(version),
            before: None,
        }
    }

    /// Present in releases older than `version`.
    pub const fn before(version: HostVersion) -> Self {
        Self {
            since: None,
            before: Some(version),
        }
    }

    /// Present from `since` up to, but excluding, `before`.
    pub const fn between(since: HostVersion, before: HostVersion) -> Self {
        Self {
            since: Some(since),
            before: Some(before),
        }
    }

    /// Whether a field with this gate exists in `version`.
    pub fn admits(&self, version: HostVersion) -> bool {
        self.since.is_none_or(|since| version >= since)
            && self.before.is_none_or(|before| version < before)
    }
}
