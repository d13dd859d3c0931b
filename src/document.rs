//! Document lifecycle as seen by the content script.
//!
//! A pre-rendered document may never be shown, so the content relay waits
//! for it to leave the [`DocumentState::Prerendering`] state before opening
//! any port.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::watch;

// ============================================================================
// DocumentState
// ============================================================================

/// Lifecycle state of the hosting document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// Loaded speculatively, not yet shown.
    Prerendering,
    /// Shown in the foreground.
    Visible,
    /// Shown, currently in a background tab.
    Hidden,
}

impl DocumentState {
    /// Returns `true` while the document is pre-rendering.
    #[inline]
    #[must_use]
    pub const fn is_prerendering(self) -> bool {
        matches!(self, Self::Prerendering)
    }
}

// ============================================================================
// Document
// ============================================================================

/// Handle to the hosting document's lifecycle.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct Document {
    state: Arc<watch::Sender<DocumentState>>,
}

impl Document {
    /// Creates a document in `state`.
    #[must_use]
    pub fn new(state: DocumentState) -> Self {
        let (tx, _) = watch::channel(state);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> DocumentState {
        *self.state.borrow()
    }

    /// Moves the document to `state`.
    pub fn set_state(&self, state: DocumentState) {
        self.state.send_replace(state);
    }

    /// Returns `true` while the document is pre-rendering.
    #[inline]
    #[must_use]
    pub fn is_prerendering(&self) -> bool {
        self.state().is_prerendering()
    }

    /// Resolves once the document is no longer pre-rendering.
    ///
    /// Resolves immediately for a document that was never pre-rendered.
    pub async fn activated(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| !state.is_prerendering()).await;
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new(DocumentState::Visible)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    #[tokio::test]
    async fn test_visible_document_is_active_immediately() {
        let document = Document::default();
        timeout(Duration::from_millis(100), document.activated())
            .await
            .expect("should resolve immediately");
    }

    #[tokio::test]
    async fn test_prerendering_document_waits_for_activation() {
        let document = Document::new(DocumentState::Prerendering);
        let waiter = tokio::spawn({
            let document = document.clone();
            async move { document.activated().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        document.set_state(DocumentState::Hidden);
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("should resolve after activation")
            .expect("task");
        assert!(!document.is_prerendering());
    }
}
