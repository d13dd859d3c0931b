//! Type-safe identifiers for relay entities.
//!
//! Newtype wrappers prevent mixing a tab id with a frame id or with a
//! provider-assigned request id at compile time.
//!
//! | Type | Wire form | Notes |
//! |------|-----------|-------|
//! | [`TabId`] | positive integer | Stable for the tab's lifetime |
//! | [`FrameId`] | integer, `0` = top frame | Per-tab |
//! | [`RpcId`] | positive integer | Assigned by [`PageProvider`](crate::PageProvider) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// TabId
// ============================================================================

/// Browser tab identifier.
///
/// Tab ids are assigned by the browser and are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(NonZeroU32);

impl TabId {
    /// Creates a tab id, returning `None` for `0`.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Option<Self> {
        match NonZeroU32::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// FrameId
// ============================================================================

/// Frame identifier within a tab (`0` is the top-level frame).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FrameId(u64);

impl FrameId {
    /// Creates a frame id.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the top-level frame id.
    #[inline]
    #[must_use]
    pub const fn main() -> Self {
        Self(0)
    }

    /// Returns `true` for the top-level frame.
    #[inline]
    #[must_use]
    pub const fn is_main(self) -> bool {
        self.0 == 0
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RpcId
// ============================================================================

/// JSON-RPC request id assigned by a page provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcId(u64);

impl RpcId {
    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source owned by one provider instance.
#[derive(Debug)]
pub struct RpcIdSource(AtomicU64);

impl RpcIdSource {
    /// Creates a source whose first id is `1`.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Returns the next id.
    #[inline]
    pub fn next(&self) -> RpcId {
        RpcId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RpcIdSource {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
