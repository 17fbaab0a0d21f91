use std::time::{Duration, Instant};

use kube::{Resource, ResourceExt};
use tracing::{debug, warn};

use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::watch::subscription::{ResourceEvent, WatchSubscription};

/// What a predicate makes of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Keep waiting.
    Pending,
    /// The desired condition is reached.
    Satisfied,
    /// The resource reached a state the condition can no longer recover from.
    Failed(String),
}

/// How one wait ended. Exactly one is produced per call.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<K> {
    Satisfied(K),
    /// `resource` is `None` when the API reported an error event.
    Failed { resource: Option<K>, reason: String },
    ChannelClosed { reason: Option<String> },
    TimedOut,
}

impl<K> WaitOutcome<K> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, WaitOutcome::Satisfied(_))
    }
}

impl<K> WaitOutcome<K>
where
    K: Resource<DynamicType = ()>,
{
    /// Convert into a result, naming `selector` and `elapsed` in the error.
    pub fn into_result(self, selector: &str, elapsed: Duration) -> Result<K, WatchError> {
        match self {
            WaitOutcome::Satisfied(resource) => Ok(resource),
            WaitOutcome::Failed { resource, reason } => Err(WatchError::Failed {
                resource: resource
                    .as_ref()
                    .map(describe)
                    .unwrap_or_else(|| format!("watch on '{}'", selector)),
                reason,
            }),
            WaitOutcome::ChannelClosed { reason } => Err(WatchError::ChannelClosed {
                selector: selector.to_string(),
                elapsed,
                reason,
            }),
            WaitOutcome::TimedOut => Err(WatchError::TimedOut {
                selector: selector.to_string(),
                elapsed,
            }),
        }
    }
}

/// `Kind/name` of a resource, for messages.
pub fn describe<K: Resource<DynamicType = ()>>(resource: &K) -> String {
    format!("{}/{}", K::kind(&()), resource.name_any())
}

/// Resolves a [`WatchSubscription`] against a predicate and a deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionWatcher {
    config: WatchConfig,
}

impl ConditionWatcher {
    pub fn new(config: WatchConfig) -> Self {
        Self { config }
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Consume events until `predicate` settles, the source ends, or the
    /// deadline passes.
    ///
    /// API error events end the wait as [`WaitOutcome::Failed`] without
    /// reaching the predicate. The subscription is released before this
    /// returns, and also if the returned future is dropped early.
    pub async fn wait<K, P>(&self, mut subscription: WatchSubscription<K>, mut predicate: P) -> WaitOutcome<K>
    where
        P: FnMut(&ResourceEvent<K>) -> Verdict,
    {
        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                _ = &mut deadline => break WaitOutcome::TimedOut,
                next = subscription.next_event() => {
                    let event = match next {
                        None => break WaitOutcome::ChannelClosed { reason: None },
                        Some(Err(err)) => break WaitOutcome::ChannelClosed {
                            reason: Some(err.to_string()),
                        },
                        Some(Ok(ResourceEvent::Error(reason))) => {
                            break WaitOutcome::Failed { resource: None, reason };
                        }
                        Some(Ok(event)) => event,
                    };

                    let verdict = predicate(&event);
                    debug!(
                        selector = subscription.selector(),
                        event = event.kind_name(),
                        ?verdict,
                        "watch event"
                    );
                    match verdict {
                        Verdict::Pending => {}
                        Verdict::Satisfied => {
                            if let Some(resource) = event.into_object() {
                                break WaitOutcome::Satisfied(resource);
                            }
                        }
                        Verdict::Failed(reason) => {
                            break WaitOutcome::Failed {
                                resource: event.into_object(),
                                reason,
                            };
                        }
                    }
                }
            }
        };

        subscription.unsubscribe();
        outcome
    }

    /// [`wait`](Self::wait) plus conversion into a [`WatchError`] carrying the
    /// selector and the time spent.
    pub async fn wait_for<K, P>(&self, subscription: WatchSubscription<K>, predicate: P) -> Result<K, WatchError>
    where
        K: Resource<DynamicType = ()>,
        P: FnMut(&ResourceEvent<K>) -> Verdict,
    {
        let selector = subscription.selector().to_string();
        let started = Instant::now();
        let outcome = self.wait(subscription, predicate).await;
        let elapsed = started.elapsed();

        match outcome.into_result(&selector, elapsed) {
            Ok(resource) => {
                debug!(%selector, ?elapsed, resource = %describe(&resource), "condition reached");
                Ok(resource)
            }
            Err(err) => {
                warn!(%selector, ?elapsed, error = %err, "wait ended without reaching condition");
                Err(err)
            }
        }
    }
}
