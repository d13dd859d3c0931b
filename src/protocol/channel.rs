//! Channel identifiers shared by every relay endpoint.
//!
//! Two layers of names exist:
//!
//! | Type | Layer | Values |
//! |------|-------|--------|
//! | [`PageChannel`] | Page-level window messaging | `wallet-relay-inpage`, `wallet-relay-contentscript` |
//! | [`ChannelId`] | Logical channels multiplexed over a page stream | `provider`, `publicConfig` |
//!
//! Both are closed enums so a misspelt name is a compile error on our side
//! and a deserialization failure (logged and dropped) on the wire.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// PageChannel
// ============================================================================

/// Well-known window message names for the page transport.
///
/// Each page endpoint listens on its own name and posts to its peer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageChannel {
    /// Listened on by the page provider (content→page traffic).
    #[serde(rename = "wallet-relay-inpage")]
    Inpage,
    /// Listened on by the content relay (page→content traffic).
    #[serde(rename = "wallet-relay-contentscript")]
    ContentScript,
}

impl PageChannel {
    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inpage => "wallet-relay-inpage",
            Self::ContentScript => "wallet-relay-contentscript",
        }
    }

    /// Returns the name of the opposite endpoint.
    #[inline]
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Inpage => Self::ContentScript,
            Self::ContentScript => Self::Inpage,
        }
    }
}

impl fmt::Display for PageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ChannelId
// ============================================================================

/// Logical channel multiplexed over a page stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// JSON-RPC traffic between the page provider and the daemon.
    #[serde(rename = "provider")]
    Provider,
    /// Channel used by the previous protocol version.
    ///
    /// Still recognised so it can be dropped explicitly.
    #[serde(rename = "publicConfig")]
    Legacy,
}

impl ChannelId {
    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Legacy => "publicConfig",
        }
    }

    /// Returns `true` for channels that must never be forwarded.
    #[inline]
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::Legacy)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
