use std::error::Error as StdError;
use std::fmt;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use kube::api::WatchEvent;
use tracing::debug;

/// Transport failure reported by an event source.
pub type StreamError = Box<dyn StdError + Send + Sync>;

type EventStream<K> = BoxStream<'static, Result<ResourceEvent<K>, StreamError>>;

/// One decoded notification from a watch.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// The API reported a failure on the watch itself.
    Error(String),
}

impl<K> ResourceEvent<K> {
    pub fn object(&self) -> Option<&K> {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Modified(obj) | ResourceEvent::Deleted(obj) => {
                Some(obj)
            }
            ResourceEvent::Error(_) => None,
        }
    }

    pub fn into_object(self) -> Option<K> {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Modified(obj) | ResourceEvent::Deleted(obj) => {
                Some(obj)
            }
            ResourceEvent::Error(_) => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, ResourceEvent::Deleted(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "added",
            ResourceEvent::Modified(_) => "modified",
            ResourceEvent::Deleted(_) => "deleted",
            ResourceEvent::Error(_) => "error",
        }
    }
}

/// Decode a raw API watch event. Bookmarks carry no state and are dropped.
pub fn decode<K>(event: WatchEvent<K>) -> Option<ResourceEvent<K>> {
    match event {
        WatchEvent::Added(obj) => Some(ResourceEvent::Added(obj)),
        WatchEvent::Modified(obj) => Some(ResourceEvent::Modified(obj)),
        WatchEvent::Deleted(obj) => Some(ResourceEvent::Deleted(obj)),
        WatchEvent::Bookmark(_) => None,
        WatchEvent::Error(err) => Some(ResourceEvent::Error(format!(
            "{} ({}, code {})",
            err.message, err.reason, err.code
        ))),
    }
}

/// Where a subscription stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Open,
    /// The source ended, or the subscription was released.
    Closed,
    /// The source reported a transport failure.
    Errored,
}

/// An ordered event source for one selector, owned by a single wait.
///
/// The source is released when the subscription is unsubscribed or dropped,
/// whichever happens first.
pub struct WatchSubscription<K> {
    selector: String,
    events: Option<EventStream<K>>,
    state: SubscriptionState,
}

impl<K: Send + 'static> WatchSubscription<K> {
    pub fn new<S>(selector: impl Into<String>, events: S) -> Self
    where
        S: Stream<Item = Result<ResourceEvent<K>, StreamError>> + Send + 'static,
    {
        Self {
            selector: selector.into(),
            events: Some(events.boxed()),
            state: SubscriptionState::Open,
        }
    }

    /// Wrap a raw API watch stream.
    pub fn from_watch<S>(selector: impl Into<String>, stream: S) -> Self
    where
        S: Stream<Item = kube::Result<WatchEvent<K>>> + Send + 'static,
    {
        let events = stream.filter_map(|item| async move {
            match item {
                Ok(event) => decode(event).map(Ok),
                Err(err) => Some(Err(Box::new(err) as StreamError)),
            }
        });
        Self::new(selector, events)
    }
}

impl<K> WatchSubscription<K> {
    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Next event in delivery order, or `None` once the source is done.
    ///
    /// A transport error is returned once and closes the subscription.
    pub async fn next_event(&mut self) -> Option<Result<ResourceEvent<K>, StreamError>> {
        let events = self.events.as_mut()?;
        match events.next().await {
            Some(Ok(event)) => Some(Ok(event)),
            Some(Err(err)) => {
                self.state = SubscriptionState::Errored;
                self.events = None;
                Some(Err(err))
            }
            None => {
                self.state = SubscriptionState::Closed;
                self.events = None;
                None
            }
        }
    }

    /// Release the event source. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if self.events.take().is_some() {
            debug!(selector = %self.selector, "unsubscribed watch");
        }
        if self.state == SubscriptionState::Open {
            self.state = SubscriptionState::Closed;
        }
    }
}

impl<K> Drop for WatchSubscription<K> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<K> fmt::Debug for WatchSubscription<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("selector", &self.selector)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_end_of_stream_closes() {
        let mut sub = WatchSubscription::new(
            "app=web",
            stream::iter(vec![Ok(ResourceEvent::Added(1u32))]),
        );

        assert_eq!(sub.next_event().await.unwrap().unwrap(), ResourceEvent::Added(1));
        assert!(sub.next_event().await.is_none());
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert!(sub.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_is_terminal() {
        let mut sub = WatchSubscription::new(
            "app=web",
            stream::iter(vec![
                Err::<ResourceEvent<u32>, StreamError>("connection reset".into()),
                Ok(ResourceEvent::Added(1)),
            ]),
        );

        let err = sub.next_event().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(sub.state(), SubscriptionState::Errored);
        assert!(sub.next_event().await.is_none());
    }

    #[test]
    fn test_decode_keeps_object_events() {
        let added = decode(WatchEvent::Added(7u32));
        assert_eq!(added, Some(ResourceEvent::Added(7)));
        assert_eq!(added.unwrap().kind_name(), "added");
    }

    #[test]
    fn test_event_object_accessors() {
        let deleted = ResourceEvent::Deleted("ns");
        assert!(deleted.is_deleted());
        assert_eq!(deleted.object(), Some(&"ns"));
        assert_eq!(ResourceEvent::<&str>::Error("gone".into()).into_object(), None);
    }
}
