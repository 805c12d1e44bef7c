use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::Demand;

/// Failure type for producers that cannot fail
pub type Never = std::convert::Infallible;

/// The terminal signal of a stream. Exactly one of these is delivered, or none if the subscriber cancels first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<E = Never> {
    Finished,
    Failed(E),
}

impl<E> Completion<E> {
    pub fn is_failure(&self) -> bool { matches!(self, Completion::Failed(_)) }
}

/// A unique identifier for a subscription, used to locate it in a subscriber registry.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(usize);

static NEXT_SUBSCRIPTION_ID: AtomicUsize = AtomicUsize::new(0);

impl SubscriptionId {
    pub(crate) fn next() -> Self { Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed)) }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A delivery target.
///
/// After `on_complete` a subscriber receives nothing further, and it must not request more demand.
pub trait Subscriber<T, E = Never>: Send + Sync {
    /// Called once, before any value, with the link to the producer
    fn on_subscribe(&self, subscription: SubscriptionHandle);

    /// Receives one item and returns the subscriber's new outstanding demand
    fn on_next(&self, value: T) -> Demand;

    fn on_complete(&self, completion: Completion<E>);
}

/// One producer-to-subscriber link
pub trait Subscription: Send + Sync {
    fn id(&self) -> SubscriptionId;

    /// Grants additional demand. Producers that push regardless of demand ignore this.
    fn request(&self, demand: Demand);

    /// Detaches the subscriber. Idempotent.
    fn cancel(&self);
}

/// A cancel/request capability into a subscription. Cloning the handle does not create a new link.
#[derive(Clone)]
pub struct SubscriptionHandle(Arc<dyn Subscription>);

impl SubscriptionHandle {
    pub fn new<S: Subscription + 'static>(subscription: Arc<S>) -> Self { Self(subscription) }

    pub fn id(&self) -> SubscriptionId { self.0.id() }

    pub fn request(&self, demand: Demand) { self.0.request(demand) }

    pub fn cancel(&self) { self.0.cancel() }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_tuple("SubscriptionHandle").field(&self.0.id()).finish() }
}

/// Anything a subscriber can attach to.
///
/// Publishers hold subscribers weakly, so the caller must keep the `Arc` alive for as long as it wants values.
/// A subscriber that has been dropped is treated as cancelled.
pub trait Publisher<T, E = Never>: Send + Sync {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T, E>>) -> SubscriptionHandle;
}

/// A publisher that external code can push into
pub trait Subject<T, E = Never>: Publisher<T, E> {
    fn send(&self, value: T);

    fn send_completion(&self, completion: Completion<E>);
}
