//! Watch a resource until it reaches a condition
//!
//! A [`ConditionWatcher`] races the events of one [`WatchSubscription`]
//! against a single deadline and resolves to exactly one [`WaitOutcome`].

pub mod condition;
pub mod predicates;
pub mod subscription;

pub use condition::{describe, ConditionWatcher, Verdict, WaitOutcome};
pub use subscription::{ResourceEvent, StreamError, SubscriptionState, WatchSubscription};
