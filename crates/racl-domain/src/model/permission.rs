//! Permission masks.

use std::fmt;
use std::ops::BitOr;

/// Bitmask identifying one or more permission kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionMask(u32);

impl PermissionMask {
    pub const READ: PermissionMask = PermissionMask(1);
    pub const WRITE: PermissionMask = PermissionMask(1 << 1);
    pub const CREATE: PermissionMask = PermissionMask(1 << 2);
    pub const DELETE: PermissionMask = PermissionMask(1 << 3);
    pub const ADMINISTRATION: PermissionMask = PermissionMask(1 << 4);

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set in `self`.
    pub const fn contains(self, other: PermissionMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PermissionMask {
    type Output = PermissionMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        PermissionMask(self.0 | rhs.0)
    }
}

impl From<u32> for PermissionMask {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl fmt::Display for PermissionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}
