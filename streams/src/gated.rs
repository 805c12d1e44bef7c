use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::{
    Completion, ConfigError, Demand, EmitterConfig, Publisher, Scheduler, Subscriber, Subscription, SubscriptionHandle, SubscriptionId,
    TaskHandle, config::ValueSource, lock::lock,
};

/// A cold publisher of pseudo-random integers that only emits when pulled.
///
/// Each unit of requested demand yields exactly one value, one `period` after the previous one. The demand returned
/// by the subscriber's `on_next`, plus anything requested while that emission was pending, becomes the new
/// outstanding demand, and the stream completes once it reaches zero. Requesting [`Demand::none`] completes the stream
/// immediately.
pub struct DemandGatedPublisher {
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    source: Arc<ValueSource>,
}

impl DemandGatedPublisher {
    pub fn new(scheduler: Arc<dyn Scheduler>, config: EmitterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { scheduler, delay: config.period, source: Arc::new(ValueSource::new(&config)) })
    }
}

impl Publisher<i64> for DemandGatedPublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<i64>>) -> SubscriptionHandle {
        let subscription = Arc::new_cyclic(|me| GatedSubscription {
            id: SubscriptionId::next(),
            me: me.clone(),
            subscriber: Arc::downgrade(&subscriber),
            scheduler: self.scheduler.clone(),
            delay: self.delay,
            source: self.source.clone(),
            state: Mutex::new(GatedState { demand: Demand::none(), requested_since_emission: Demand::none(), phase: Phase::Idle }),
        });
        debug!("DemandGatedPublisher: new subscription {}", subscription.id);
        let handle = SubscriptionHandle::new(subscription);
        subscriber.on_subscribe(handle.clone());
        handle
    }
}

struct GatedSubscription {
    id: SubscriptionId,
    me: Weak<GatedSubscription>,
    subscriber: Weak<dyn Subscriber<i64>>,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    source: Arc<ValueSource>,
    state: Mutex<GatedState>,
}

struct GatedState {
    demand: Demand,
    // demand granted after the pending emission was scheduled, added on top of what on_next returns
    requested_since_emission: Demand,
    phase: Phase,
}

enum Phase {
    /// Demand is exhausted and nothing is scheduled
    Idle,
    Scheduled(TaskHandle),
    /// Inside the subscriber's on_next
    Emitting,
    Terminated,
    Cancelled,
}

impl GatedSubscription {
    fn schedule_emission(&self) -> Option<TaskHandle> {
        // the pending task owns the link until it fires
        let this = self.me.upgrade()?;
        Some(self.scheduler.schedule(self.delay, Box::new(move || this.emit())))
    }

    fn emit(&self) {
        let (value, outstanding) = {
            let mut state = lock(&self.state);
            // a cancel that raced with the timer wins
            if !matches!(state.phase, Phase::Scheduled(_)) {
                trace!("GatedSubscription {}: dropping stale emission", self.id);
                return;
            }
            state.phase = Phase::Emitting;
            (self.source.next_value(), state.demand)
        };

        let Some(subscriber) = self.subscriber.upgrade() else {
            debug!("GatedSubscription {}: subscriber dropped, cancelling", self.id);
            self.cancel();
            return;
        };

        trace!("GatedSubscription {}: emitting {value} against {outstanding}", self.id);
        let returned = subscriber.on_next(value);

        let mut state = lock(&self.state);
        if !matches!(state.phase, Phase::Emitting) {
            // cancelled or completed from inside on_next
            return;
        }
        state.demand = returned + std::mem::take(&mut state.requested_since_emission);
        if state.demand.is_none() {
            state.phase = Phase::Terminated;
            drop(state);
            debug!("GatedSubscription {}: demand exhausted, completing", self.id);
            subscriber.on_complete(Completion::Finished);
        } else {
            state.phase = match self.schedule_emission() {
                Some(task) => Phase::Scheduled(task),
                None => Phase::Idle,
            };
        }
    }

    fn finish(&self) {
        debug!("GatedSubscription {}: zero demand requested, completing", self.id);
        if let Some(subscriber) = self.subscriber.upgrade() {
            subscriber.on_complete(Completion::Finished);
        }
    }
}

impl Subscription for GatedSubscription {
    fn id(&self) -> SubscriptionId { self.id }

    fn request(&self, demand: Demand) {
        let mut state = lock(&self.state);
        if matches!(state.phase, Phase::Terminated | Phase::Cancelled) {
            warn!("GatedSubscription {}: ignoring request({demand}) after termination", self.id);
            return;
        }
        trace!("GatedSubscription {}: request({demand})", self.id);

        if demand.is_none() {
            if let Phase::Scheduled(task) = std::mem::replace(&mut state.phase, Phase::Terminated) {
                task.cancel();
            }
            drop(state);
            self.finish();
            return;
        }

        let state = &mut *state;
        match state.phase {
            Phase::Scheduled(_) | Phase::Emitting => state.requested_since_emission += demand,
            Phase::Idle => {
                state.demand += demand;
                if let Some(task) = self.schedule_emission() {
                    state.phase = Phase::Scheduled(task);
                }
            }
            Phase::Terminated | Phase::Cancelled => {}
        }
    }

    fn cancel(&self) {
        let mut state = lock(&self.state);
        match std::mem::replace(&mut state.phase, Phase::Cancelled) {
            Phase::Scheduled(task) => task.cancel(),
            previous @ (Phase::Cancelled | Phase::Terminated) => {
                state.phase = previous;
                return;
            }
            Phase::Idle | Phase::Emitting => {}
        }
        debug!("GatedSubscription {}: cancelled", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Requests a fixed demand on subscribe and counts down like the plain counting subscriber
    struct CountingSubscriber {
        initial: Demand,
        demand: Mutex<Demand>,
        values: Mutex<Vec<i64>>,
        returned: Mutex<Vec<Demand>>,
        completions: AtomicUsize,
        subscription: Mutex<Option<SubscriptionHandle>>,
    }

    impl CountingSubscriber {
        fn new(initial: Demand) -> Arc<Self> {
            Arc::new(Self {
                initial,
                demand: Mutex::new(initial),
                values: Mutex::new(Vec::new()),
                returned: Mutex::new(Vec::new()),
                completions: AtomicUsize::new(0),
                subscription: Mutex::new(None),
            })
        }
    }

    impl Subscriber<i64> for CountingSubscriber {
        fn on_subscribe(&self, subscription: SubscriptionHandle) {
            subscription.request(self.initial);
            *self.subscription.lock().unwrap() = Some(subscription);
        }
        fn on_next(&self, value: i64) -> Demand {
            self.values.lock().unwrap().push(value);
            let mut demand = self.demand.lock().unwrap();
            *demand = demand.decremented();
            self.returned.lock().unwrap().push(*demand);
            *demand
        }
        fn on_complete(&self, _completion: Completion) { self.completions.fetch_add(1, Ordering::SeqCst); }
    }

    fn publisher(scheduler: &ManualScheduler) -> DemandGatedPublisher {
        DemandGatedPublisher::new(Arc::new(scheduler.clone()), EmitterConfig::demand_gated().with_seed(1)).unwrap()
    }

    #[test]
    fn test_emits_once_per_delay_then_completes() {
        let scheduler = ManualScheduler::new();
        let subscriber = CountingSubscriber::new(Demand::max(3));
        let _handle = publisher(&scheduler).subscribe(subscriber.clone());

        // nothing is delivered synchronously
        assert!(subscriber.values.lock().unwrap().is_empty());

        scheduler.advance(Duration::from_secs(1));
        assert_eq!(subscriber.values.lock().unwrap().len(), 1);
        scheduler.advance(Duration::from_secs(1));
        assert_eq!(subscriber.values.lock().unwrap().len(), 2);
        assert_eq!(subscriber.completions.load(Ordering::SeqCst), 0);
        scheduler.advance(Duration::from_secs(1));

        assert_eq!(subscriber.values.lock().unwrap().len(), 3);
        assert_eq!(*subscriber.returned.lock().unwrap(), vec![Demand::max(2), Demand::max(1), Demand::none()]);
        assert_eq!(subscriber.completions.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
        assert!(subscriber.values.lock().unwrap().iter().all(|value| (0..=100).contains(value)));
    }

    #[test]
    fn test_zero_demand_completes_immediately() {
        let scheduler = ManualScheduler::new();
        let subscriber = CountingSubscriber::new(Demand::none());
        let _handle = publisher(&scheduler).subscribe(subscriber.clone());

        assert_eq!(subscriber.completions.load(Ordering::SeqCst), 1);
        scheduler.advance(Duration::from_secs(10));
        assert!(subscriber.values.lock().unwrap().is_empty());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_request_after_completion_is_ignored() {
        let scheduler = ManualScheduler::new();
        let subscriber = CountingSubscriber::new(Demand::max(1));
        let handle = publisher(&scheduler).subscribe(subscriber.clone());
        scheduler.advance(Duration::from_secs(1));
        assert_eq!(subscriber.completions.load(Ordering::SeqCst), 1);

        handle.request(Demand::max(5));
        handle.request(Demand::none());
        scheduler.advance(Duration::from_secs(10));
        assert_eq!(subscriber.values.lock().unwrap().len(), 1);
        assert_eq!(subscriber.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_non_positive_request_while_pending_completes() {
        let scheduler = ManualScheduler::new();
        let subscriber = CountingSubscriber::new(Demand::max(3));
        let handle = publisher(&scheduler).subscribe(subscriber.clone());
        scheduler.advance(Duration::from_secs(1));
        assert_eq!(subscriber.values.lock().unwrap().len(), 1);
        assert_eq!(scheduler.pending(), 1);

        handle.request(Demand::from_signed(-2));
        assert_eq!(subscriber.completions.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);

        scheduler.advance(Duration::from_secs(10));
        assert_eq!(subscriber.values.lock().unwrap().len(), 1);
        assert_eq!(subscriber.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_while_pending_is_added_to_returned_demand() {
        let scheduler = ManualScheduler::new();
        let subscriber = CountingSubscriber::new(Demand::max(1));
        let handle = publisher(&scheduler).subscribe(subscriber.clone());

        // the subscriber returns none from its first on_next, so only the extra request keeps the stream going
        handle.request(Demand::max(2));
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.run_until_idle(100), 2);

        // the second on_next returns none again and nothing was requested meanwhile
        assert_eq!(subscriber.values.lock().unwrap().len(), 2);
        assert_eq!(*subscriber.returned.lock().unwrap(), vec![Demand::none(), Demand::none()]);
        assert_eq!(subscriber.completions.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_aborts_pending_emission() {
        let scheduler = ManualScheduler::new();
        let subscriber = CountingSubscriber::new(Demand::max(5));
        let handle = publisher(&scheduler).subscribe(subscriber.clone());
        scheduler.advance(Duration::from_secs(1));

        // a tick is pending for t=2s
        assert_eq!(scheduler.pending(), 1);
        handle.cancel();
        handle.cancel();
        scheduler.advance(Duration::from_secs(10));

        assert_eq!(subscriber.values.lock().unwrap().len(), 1);
        assert_eq!(subscriber.completions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropped_subscriber_stops_emission() {
        let scheduler = ManualScheduler::new();
        let subscriber = CountingSubscriber::new(Demand::max(5));
        let _handle = publisher(&scheduler).subscribe(subscriber.clone());
        drop(subscriber);

        scheduler.advance(Duration::from_secs(1));
        assert_eq!(scheduler.pending(), 0);
    }
}
