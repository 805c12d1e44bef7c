use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::{AnyCancellable, Cancellable, Completion, Demand, Never, Publisher, Subscriber, SubscriptionHandle, lock::lock};

/// Boxed value callback used by [`Sink`]
pub type ValueListener<T> = Box<dyn Fn(T) + Send + Sync + 'static>;

/// Trait for types that can receive the values of a sink
pub trait IntoValueListener<T> {
    fn into_value_listener(self) -> ValueListener<T>;
}

impl<F, T> IntoValueListener<T> for F
where F: Fn(T) + Send + Sync + 'static
{
    fn into_value_listener(self) -> ValueListener<T> { Box::new(self) }
}

impl<T: Send + 'static> IntoValueListener<T> for std::sync::mpsc::Sender<T> {
    fn into_value_listener(self) -> ValueListener<T> {
        Box::new(move |value| {
            let _ = self.send(value); // receiver may be gone
        })
    }
}

#[cfg(feature = "tokio")]
impl<T: Send + 'static> IntoValueListener<T> for tokio::sync::mpsc::UnboundedSender<T> {
    fn into_value_listener(self) -> ValueListener<T> {
        Box::new(move |value| {
            let _ = self.send(value);
        })
    }
}

type CompletionListener<E> = Box<dyn FnOnce(Completion<E>) + Send + 'static>;

/// A subscriber that bridges the demand protocol to two plain callbacks.
///
/// On subscribe it requests its initial demand. Every value is handed to `on_value`, then the local demand is
/// decremented by one and returned to the producer as the new outstanding demand. `on_completion` runs at most once.
/// The sink doubles as the cancel handle for its subscription.
pub struct Sink<T, E = Never> {
    on_value: ValueListener<T>,
    on_completion: Mutex<Option<CompletionListener<E>>>,
    initial: Demand,
    state: Mutex<SinkState>,
}

struct SinkState {
    demand: Demand,
    subscription: Option<SubscriptionHandle>,
    terminated: bool,
}

impl<T, E> Sink<T, E> {
    pub fn new<V, C>(demand: Demand, on_value: V, on_completion: C) -> Self
    where
        V: Fn(T) + Send + Sync + 'static,
        C: FnOnce(Completion<E>) + Send + 'static,
    {
        Self::with_listener(demand, on_value, on_completion)
    }

    /// Like [`Sink::new`], but values go to any [`IntoValueListener`] such as a channel sender
    pub fn with_listener<L, C>(demand: Demand, listener: L, on_completion: C) -> Self
    where
        L: IntoValueListener<T>,
        C: FnOnce(Completion<E>) + Send + 'static,
    {
        Self {
            on_value: listener.into_value_listener(),
            on_completion: Mutex::new(Some(Box::new(on_completion))),
            initial: demand,
            state: Mutex::new(SinkState { demand, subscription: None, terminated: false }),
        }
    }

    /// Demand the sink has left to grant
    pub fn demand(&self) -> Demand { lock(&self.state).demand }

    /// True once a terminal signal arrived or the sink was cancelled
    pub fn is_terminated(&self) -> bool { lock(&self.state).terminated }
}

impl<T, E> Subscriber<T, E> for Sink<T, E>
where
    T: 'static,
    E: 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionHandle) {
        {
            let mut state = lock(&self.state);
            if state.terminated || state.subscription.is_some() {
                drop(state);
                warn!("Sink: rejecting subscription {} - already subscribed or terminated", subscription.id());
                subscription.cancel();
                return;
            }
            state.subscription = Some(subscription.clone());
        }
        debug!("Sink: subscribed to {}, requesting {}", subscription.id(), self.initial);
        subscription.request(self.initial);
    }

    fn on_next(&self, value: T) -> Demand {
        if lock(&self.state).terminated {
            return Demand::none();
        }
        (self.on_value)(value);
        let mut state = lock(&self.state);
        state.demand = state.demand.decremented();
        state.demand
    }

    fn on_complete(&self, completion: Completion<E>) {
        {
            let mut state = lock(&self.state);
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.subscription = None;
        }
        if let Some(on_completion) = lock(&self.on_completion).take() {
            on_completion(completion);
        }
    }
}

impl<T, E> Cancellable for Sink<T, E> {
    fn cancel(&self) {
        let subscription = {
            let mut state = lock(&self.state);
            state.terminated = true;
            state.subscription.take()
        };
        if let Some(subscription) = subscription {
            debug!("Sink: cancelling subscription {}", subscription.id());
            subscription.cancel();
        }
    }
}

/// Closure-based subscription for every publisher
pub trait SinkExt<T: 'static, E: 'static>: Publisher<T, E> {
    /// Attaches a [`Sink`] with the given initial demand. Dropping the returned guard cancels it.
    fn sink<V, C>(&self, demand: Demand, on_value: V, on_completion: C) -> AnyCancellable
    where
        V: Fn(T) + Send + Sync + 'static,
        C: FnOnce(Completion<E>) + Send + 'static,
    {
        let sink = Arc::new(Sink::<T, E>::new(demand, on_value, on_completion));
        self.subscribe(sink.clone());
        AnyCancellable::new(sink)
    }

    /// Attaches a sink with unlimited demand that ignores the terminal signal
    fn sink_values<V>(&self, on_value: V) -> AnyCancellable
    where V: Fn(T) + Send + Sync + 'static {
        self.sink(Demand::unlimited(), on_value, |_| {})
    }

    /// Forwards every value into a listener such as a channel sender, with unlimited demand
    fn sink_into<L>(&self, listener: L) -> AnyCancellable
    where L: IntoValueListener<T> {
        let sink = Arc::new(Sink::<T, E>::with_listener(Demand::unlimited(), listener, |_| {}));
        self.subscribe(sink.clone());
        AnyCancellable::new(sink)
    }
}

impl<T: 'static, E: 'static, P: Publisher<T, E> + ?Sized> SinkExt<T, E> for P {}
