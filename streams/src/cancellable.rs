use std::sync::{Arc, Mutex};

use crate::{SubscriptionHandle, lock::lock};

/// Something that can be cancelled. Cancelling twice has no further effect.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

impl Cancellable for SubscriptionHandle {
    fn cancel(&self) { SubscriptionHandle::cancel(self) }
}

/// A type-erased cancellation guard. Cancels when dropped.
///
/// The guard owns whatever it wraps, so a [`crate::Sink`] stored in one stays alive exactly as long as the guard.
#[must_use = "dropping the guard cancels the subscription immediately"]
pub struct AnyCancellable(Option<Arc<dyn Cancellable>>);

impl AnyCancellable {
    pub fn new<C: Cancellable + 'static>(cancellable: Arc<C>) -> Self { Self(Some(cancellable)) }

    pub fn from_fn<F: Fn() + Send + Sync + 'static>(f: F) -> Self { Self(Some(Arc::new(FnCancellable(f)))) }

    /// Stores this guard in a bag, handing ownership over
    pub fn store(self, bag: &Cancellables) { bag.store(self) }

    pub fn cancel(&mut self) {
        if let Some(inner) = self.0.take() {
            inner.cancel();
        }
    }
}

impl Drop for AnyCancellable {
    fn drop(&mut self) { self.cancel() }
}

impl std::fmt::Debug for AnyCancellable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyCancellable").field("active", &self.0.is_some()).finish()
    }
}

struct FnCancellable<F>(F);

impl<F: Fn() + Send + Sync> Cancellable for FnCancellable<F> {
    fn cancel(&self) { (self.0)() }
}

/// A collection of guards that are cancelled together
#[derive(Default)]
pub struct Cancellables(Mutex<Vec<AnyCancellable>>);

impl Cancellables {
    pub fn new() -> Self { Self::default() }

    pub fn store(&self, guard: AnyCancellable) { lock(&self.0).push(guard); }

    pub fn len(&self) -> usize { lock(&self.0).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Cancels and releases every stored guard
    pub fn cancel_all(&self) {
        // take them out first so a guard's cancel callback may store into this bag again
        let guards = std::mem::take(&mut *lock(&self.0));
        drop(guards);
    }
}
