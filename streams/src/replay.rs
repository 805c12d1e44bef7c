use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};

use tracing::{debug, trace, warn};

use crate::{
    Completion, Demand, Never, Publisher, ReplayConfig, SendError, Subject, Subscriber, Subscription, SubscriptionHandle, SubscriptionId,
    lock::lock,
};

/// A hot multicast subject that remembers its last `capacity` values.
///
/// Every new subscriber first receives the buffered values, oldest first, and then every value sent afterwards.
/// Values are pushed to all subscribers in registration order regardless of their demand - `request` is a no-op,
/// so a slow subscriber is never throttled.
///
/// All deliveries go through one ordered queue. Whoever enqueues while the queue is idle delivers it, including
/// anything enqueued re-entrantly from subscriber callbacks or from other threads meanwhile. That keeps a new
/// subscriber's replay ahead of any value sent after it registered. A subscriber registered from inside a callback
/// on the delivering thread is replayed inline, so its replay is complete before `subscribe` returns.
pub struct ReplaySubject<T, E = Never>(Arc<Inner<T, E>>);

struct Inner<T, E> {
    capacity: usize,
    state: Mutex<State<T, E>>,
}

struct State<T, E> {
    buffer: VecDeque<T>,
    registry: Vec<Arc<Entry<T, E>>>,
    completion: Option<Completion<E>>,
    deliveries: VecDeque<Delivery<T, E>>,
    // the thread currently delivering the queue, if any
    drainer: Option<ThreadId>,
}

enum Delivery<T, E> {
    Value(T, Vec<Arc<Entry<T, E>>>),
    Replay(Vec<T>, Arc<Entry<T, E>>),
    Terminal(Completion<E>, Vec<Arc<Entry<T, E>>>),
}

/// A registered subscriber, and also its subscription
struct Entry<T, E> {
    id: SubscriptionId,
    subscriber: Weak<dyn Subscriber<T, E>>,
    subject: Weak<Inner<T, E>>,
    cancelled: AtomicBool,
    terminated: AtomicBool,
}

impl<T, E> Clone for ReplaySubject<T, E> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T, E> ReplaySubject<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(Inner {
            capacity,
            state: Mutex::new(State {
                buffer: VecDeque::with_capacity(capacity),
                registry: Vec::new(),
                completion: None,
                deliveries: VecDeque::new(),
                drainer: None,
            }),
        }))
    }

    pub fn from_config(config: ReplayConfig) -> Self { Self::new(config.capacity) }

    /// A subject that forwards live values only
    pub fn passthrough() -> Self { Self::new(0) }

    pub fn capacity(&self) -> usize { self.0.capacity }

    /// The values a new subscriber would be replayed, oldest first
    pub fn buffered(&self) -> Vec<T> { lock(&self.0.state).buffer.iter().cloned().collect() }

    pub fn subscriber_count(&self) -> usize { lock(&self.0.state).registry.len() }

    pub fn is_completed(&self) -> bool { lock(&self.0.state).completion.is_some() }

    /// Sends a value, handing it back if the subject has already completed.
    pub fn try_send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = lock(&self.0.state);
        if state.completion.is_some() {
            return Err(SendError::Completed(value));
        }
        if self.0.capacity > 0 {
            state.buffer.push_back(value.clone());
            if state.buffer.len() > self.0.capacity {
                state.buffer.pop_front();
            }
        }
        let targets = state.registry.clone();
        trace!("ReplaySubject: sending to {} subscribers", targets.len());
        state.deliveries.push_back(Delivery::Value(value, targets));
        self.0.drain(state);
        Ok(())
    }
}

impl<T, E> Inner<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Delivers queued items until the queue is empty. Returns immediately if another call is already doing so.
    fn drain(&self, mut state: MutexGuard<'_, State<T, E>>) {
        if state.drainer.is_some() {
            return;
        }
        state.drainer = Some(thread::current().id());
        drop(state);

        let _reset = DrainReset(self);
        loop {
            let delivery = {
                let mut state = lock(&self.state);
                match state.deliveries.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        state.drainer = None;
                        return;
                    }
                }
            };
            // no lock is held while subscriber callbacks run
            delivery.deliver();
        }
    }
}

/// Releases the drain flag if a subscriber callback panics, so the subject stays usable.
struct DrainReset<'a, T, E>(&'a Inner<T, E>);

impl<T, E> Drop for DrainReset<'_, T, E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(&self.0.state).drainer = None;
        }
    }
}

impl<T, E> Delivery<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn deliver(self) {
        match self {
            Delivery::Value(value, targets) => {
                // clone the value for each subscriber except the last one
                if let Some((last, rest)) = targets.split_last() {
                    for entry in rest {
                        entry.push(value.clone());
                    }
                    last.push(value);
                }
            }
            Delivery::Replay(values, entry) => {
                trace!("ReplaySubject: replaying {} values to {}", values.len(), entry.id);
                for value in values {
                    entry.push(value);
                }
            }
            Delivery::Terminal(completion, targets) => {
                for entry in targets {
                    entry.terminate(completion.clone());
                }
            }
        }
    }
}

impl<T, E> Entry<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn is_live(&self) -> bool { !self.cancelled.load(Ordering::Acquire) && !self.terminated.load(Ordering::Acquire) }

    fn subscriber(&self) -> Option<Arc<dyn Subscriber<T, E>>> {
        let subscriber = self.subscriber.upgrade();
        if subscriber.is_none() {
            debug!("ReplaySubject: subscriber {} dropped, cancelling", self.id);
            self.cancel();
        }
        subscriber
    }

    fn push(&self, value: T) {
        if !self.is_live() {
            return;
        }
        if let Some(subscriber) = self.subscriber() {
            // demand is not consulted
            let _ = subscriber.on_next(value);
        }
    }

    fn terminate(&self, completion: Completion<E>) {
        if self.cancelled.load(Ordering::Acquire) || self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(subscriber) = self.subscriber.upgrade() {
            subscriber.on_complete(completion);
        }
    }
}

impl<T, E> Subscription for Entry<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn id(&self) -> SubscriptionId { self.id }

    fn request(&self, demand: Demand) {
        trace!("ReplaySubject: subscriber {} requested {demand}, ignored", self.id);
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(subject) = self.subject.upgrade() {
            lock(&subject.state).registry.retain(|entry| entry.id != self.id);
        }
        debug!("ReplaySubject: subscriber {} cancelled", self.id);
    }
}

impl<T, E> Publisher<T, E> for ReplaySubject<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T, E>>) -> SubscriptionHandle {
        let entry = Arc::new(Entry {
            id: SubscriptionId::next(),
            subscriber: Arc::downgrade(&subscriber),
            subject: Arc::downgrade(&self.0),
            cancelled: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        });
        let handle = SubscriptionHandle::new(entry.clone());
        subscriber.on_subscribe(handle.clone());

        let mut state = lock(&self.0.state);
        if entry.cancelled.load(Ordering::Acquire) {
            debug!("ReplaySubject: subscriber {} cancelled during on_subscribe", entry.id);
            return handle;
        }
        state.registry.push(entry.clone());
        debug!("ReplaySubject: registered subscriber {}, replaying {} values", entry.id, state.buffer.len());

        let mut greeting = Vec::new();
        if !state.buffer.is_empty() {
            greeting.push(Delivery::Replay(state.buffer.iter().cloned().collect(), entry.clone()));
        }
        if let Some(completion) = state.completion.clone() {
            greeting.push(Delivery::Terminal(completion, vec![entry]));
        }

        if state.drainer == Some(thread::current().id()) {
            // called from a callback on the delivering thread: nothing queued so far targets this entry and anything
            // sent from now on queues behind the current delivery, so the replay can go out right away
            drop(state);
            for delivery in greeting {
                delivery.deliver();
            }
            return handle;
        }

        // queued under the same lock that registered the entry, so later sends queue behind it
        state.deliveries.extend(greeting);
        self.0.drain(state);
        handle
    }
}

impl<T, E> Subject<T, E> for ReplaySubject<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Sends a value. After completion the value is dropped and the misuse is logged; see [`ReplaySubject::try_send`].
    fn send(&self, value: T) {
        if self.try_send(value).is_err() {
            warn!("ReplaySubject: ignoring send after completion");
        }
    }

    fn send_completion(&self, completion: Completion<E>) {
        let mut state = lock(&self.0.state);
        if state.completion.is_some() {
            warn!("ReplaySubject: ignoring completion after completion");
            return;
        }
        debug!("ReplaySubject: completing {} subscribers (failed: {})", state.registry.len(), completion.is_failure());
        state.completion = Some(completion.clone());
        let targets = state.registry.clone();
        state.deliveries.push_back(Delivery::Terminal(completion, targets));
        self.0.drain(state);
    }
}

impl<T, E> std::fmt::Debug for ReplaySubject<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.0.state);
        f.debug_struct("ReplaySubject")
            .field("capacity", &self.0.capacity)
            .field("buffered", &state.buffer.len())
            .field("subscribers", &state.registry.len())
            .field("completed", &state.completion.is_some())
            .finish()
    }
}
