//! Per-tab connection metadata.

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::identifiers::{FrameId, TabId};
use crate::transport::PortSender;

// ============================================================================
// ConnectionContext
// ============================================================================

/// Identifying metadata of the frame behind one connection manager.
///
/// Captured once when the content port connects and never refreshed. A
/// navigation opens a new port and therefore a new context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    /// Owning tab.
    pub tab_id: TabId,
    /// Frame within the tab.
    pub frame_id: FrameId,
    /// Page origin.
    pub origin: Option<String>,
    /// Page URL.
    pub url: Option<String>,
    /// Page title.
    pub title: Option<String>,
    /// Favicon URL.
    pub fav_icon_url: Option<String>,
}

impl ConnectionContext {
    /// Creates a context with only a tab id.
    #[inline]
    #[must_use]
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            frame_id: FrameId::main(),
            origin: None,
            url: None,
            title: None,
            fav_icon_url: None,
        }
    }

    /// Captures the context from a port's sender metadata.
    ///
    /// Returns `None` for senders outside a tab.
    #[must_use]
    pub fn from_sender(sender: &PortSender) -> Option<Self> {
        Some(Self {
            tab_id: sender.tab_id?,
            frame_id: sender.frame_id,
            origin: sender.origin.clone(),
            url: sender.url.clone(),
            title: sender.title.clone(),
            fav_icon_url: sender.fav_icon_url.clone(),
        })
    }

    /// Returns the daemon query parameters in wire order.
    ///
    /// Absent and empty fields are omitted.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let tab_id = self.tab_id.to_string();
        [
            ("origin", self.origin.as_deref()),
            ("tabId", Some(tab_id.as_str())),
            ("favicon", self.fav_icon_url.as_deref()),
            ("url", self.url.as_deref()),
            ("title", self.title.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| match value {
            Some(value) if !value.is_empty() => Some((key, value.to_string())),
            _ => None,
        })
        .collect()
    }

    /// Builds the daemon URL: `endpoint` plus the encoded query parameters.
    ///
    /// Parameters already on `endpoint` are kept in front.
    #[must_use]
    pub fn daemon_url(&self, endpoint: &Url) -> Url {
        let encoded = self
            .query_pairs()
            .into_iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(&value)))
            .collect::<Vec<_>>()
            .join("&");

        let query = match endpoint.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
            _ => encoded,
        };

        let mut url = endpoint.clone();
        url.set_query(Some(&query));
        url
    }
}

// ============================================================================
// Tests
// ============================================================================
