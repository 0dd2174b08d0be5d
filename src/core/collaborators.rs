//! Capabilities the workflow consumes from its environment
//!
//! None of these are implemented by the core itself (apart from the
//! pattern detector and pool faker fallbacks). A browser bridge, a desktop
//! shell or a test harness plugs in its own versions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::compliance::classifier::DetectionStrategy;
use crate::compliance::mapping::{EntityType, Span};
use crate::compliance::revert::{RenderedDocument, RevertTarget};
use crate::core::error::DetectorError;

/// One span reported by a detector, before it is accepted into a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedSpan {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub original: String,
    pub span: Span,
}

impl DetectedSpan {
    pub fn new(entity_type: EntityType, original: impl Into<String>, start: usize, end: usize) -> Self {
        DetectedSpan {
            entity_type,
            original: original.into(),
            span: Span::new(start, end),
        }
    }
}

/// PII detection backend
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(
        &self,
        text: &str,
        strategy: DetectionStrategy,
    ) -> Result<Vec<DetectedSpan>, DetectorError>;
}

/// Produces synthetic values of the same semantic type
pub trait Faker: Send + Sync {
    /// Must never return `original`
    fn generate(&self, entity_type: EntityType, original: &str) -> String;
}

/// The chat input the outbound text is written to and sent from
pub trait ChatSurface: Send + Sync {
    /// `Err(reason)` when this surface cannot be driven automatically
    fn automation_support(&self) -> Result<(), String> {
        Ok(())
    }

    fn editable_text(&self) -> String;

    fn set_editable_text(&self, text: &str);

    /// Actuate the send affordance. False when none was available.
    fn submit(&self) -> bool;
}

/// Callback invoked whenever the observed response area changes
pub type ChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Handle returned by `ResponseObserver::subscribe`. Dropping it
/// unsubscribes.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A handle with nothing to release
    pub fn detached() -> Self {
        Subscription { unsubscribe: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

/// Push-model view of the responses rendered by the external system
pub trait ResponseObserver: Send + Sync {
    fn subscribe(&self, on_change: ChangeCallback) -> Subscription;

    fn count_responses(&self) -> usize;

    fn latest_response_text(&self) -> String;

    /// Rendered fragments the revert engine may rewrite
    fn rendered_document(&self) -> RenderedDocument {
        RenderedDocument::from_response(self.latest_response_text())
    }

    /// Write a reverted document back to the surface
    fn commit_document(&self, _document: &RenderedDocument) {}
}

/// Adapts an observer to the revert engine's target interface
pub struct ObservedResponse<'a>(pub &'a dyn ResponseObserver);

impl RevertTarget for ObservedResponse<'_> {
    fn rendered_document(&self) -> RenderedDocument {
        self.0.rendered_document()
    }

    fn commit_document(&self, document: &RenderedDocument) {
        self.0.commit_document(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn subscription_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = released.clone();
        let sub = Subscription::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let r = released.clone();
        {
            let _sub = Subscription::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
        drop(Subscription::detached());
    }

    struct Plain;

    impl ResponseObserver for Plain {
        fn subscribe(&self, _on_change: ChangeCallback) -> Subscription {
            Subscription::detached()
        }
        fn count_responses(&self) -> usize {
            1
        }
        fn latest_response_text(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn default_document_is_single_container() {
        let target = ObservedResponse(&Plain);
        let doc = target.rendered_document();
        assert_eq!(doc, RenderedDocument::from_response("hello"));
        target.commit_document(&doc);
    }
}
