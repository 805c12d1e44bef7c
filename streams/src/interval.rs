use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, trace};

use crate::{
    ConfigError, Demand, EmitterConfig, Publisher, Scheduler, Subscriber, Subscription, SubscriptionHandle, SubscriptionId, TaskHandle,
    config::ValueSource, lock::lock,
};

/// A hot publisher that pushes a pseudo-random value on every timer tick, whatever the subscriber asked for.
///
/// There is no buffering and no flow control: a slow subscriber simply receives every tick. Requested demand is
/// ignored and the stream never completes on its own.
pub struct IntervalPublisher {
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
    source: Arc<ValueSource>,
}

impl IntervalPublisher {
    pub fn new(scheduler: Arc<dyn Scheduler>, config: EmitterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { scheduler, interval: config.period, source: Arc::new(ValueSource::new(&config)) })
    }
}

impl Publisher<i64> for IntervalPublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<i64>>) -> SubscriptionHandle {
        let subscription =
            Arc::new(IntervalSubscription { id: SubscriptionId::next(), cancelled: AtomicBool::new(false), timer: Mutex::new(None) });
        debug!("IntervalPublisher: new subscription {}", subscription.id);

        // the timer owns the link until it is cancelled
        let on_tick = {
            let weak = Arc::downgrade(&subscriber);
            let subscription = subscription.clone();
            let source = self.source.clone();
            Arc::new(move || push_tick(&subscription, &weak, &source))
        };
        let timer = self.scheduler.schedule_repeating(self.interval, on_tick);
        *lock(&subscription.timer) = Some(timer);

        let handle = SubscriptionHandle::new(subscription.clone());
        subscriber.on_subscribe(handle.clone());
        handle
    }
}

fn push_tick(subscription: &IntervalSubscription, subscriber: &Weak<dyn Subscriber<i64>>, source: &ValueSource) {
    if subscription.cancelled.load(Ordering::Acquire) {
        return;
    }
    let Some(subscriber) = subscriber.upgrade() else {
        debug!("IntervalSubscription {}: subscriber dropped, cancelling", subscription.id);
        subscription.cancel();
        return;
    };
    let value = source.next_value();
    trace!("IntervalSubscription {}: pushing {value}", subscription.id);
    // the returned demand is deliberately not consulted
    let _ = subscriber.on_next(value);
}

struct IntervalSubscription {
    id: SubscriptionId,
    cancelled: AtomicBool,
    timer: Mutex<Option<TaskHandle>>,
}

impl Subscription for IntervalSubscription {
    fn id(&self) -> SubscriptionId { self.id }

    fn request(&self, demand: Demand) {
        trace!("IntervalSubscription {}: ignoring request({demand})", self.id);
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(timer) = lock(&self.timer).take() {
            timer.cancel();
        }
        debug!("IntervalSubscription {}: cancelled", self.id);
    }
}
