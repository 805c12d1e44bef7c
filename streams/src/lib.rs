/*!
Hand-rolled publish/subscribe primitives with pull-based flow control

# Design requirements:
- Subscribers and subscriptions are dyn object safe.
- A subscription never keeps its subscriber alive - it holds a `Weak`. The subscriber holds the subscription handle
  as a cancel capability, so there are no reference cycles.
- Demand-gated producers only emit what was requested. Push producers and subjects ignore demand entirely.
- Timing goes through a [`Scheduler`] so tests can drive a virtual clock.

# Nomenclature:
- `request` - grant additional demand to a producer. Only meaningful for [`DemandGatedPublisher`].
- `cancel` - detach a subscriber. Idempotent everywhere, and nothing is delivered afterward.
- `send` - push a value (or a terminal signal) into a [`Subject`].

# Basic usage

```rust
use demandflow::*;
use std::sync::{Arc, Mutex};

let subject = ReplaySubject::<i32>::new(3);
for value in 1..=5 {
    subject.send(value);
}

let seen = Arc::new(Mutex::new(Vec::new()));
let _guard = {
    let seen = seen.clone();
    subject.sink_values(move |value| seen.lock().unwrap().push(value))
};
// late subscribers get the last three values replayed
assert_eq!(*seen.lock().unwrap(), vec![3, 4, 5]);
```

# Demand-gated usage

```rust
use demandflow::*;
use std::sync::Arc;
use std::time::Duration;

let scheduler = ManualScheduler::new();
let publisher = DemandGatedPublisher::new(Arc::new(scheduler.clone()), EmitterConfig::demand_gated()).unwrap();

let _guard = publisher.sink(Demand::max(2), |value: i64| println!("value: {value}"), |completion: Completion| println!("{completion:?}"));
scheduler.advance(Duration::from_secs(1)); // value: ..
scheduler.advance(Duration::from_secs(1)); // value: .. then Finished
```
*/

mod cancellable;
mod config;
mod demand;
mod error;
mod gated;
mod interval;
mod lock;
mod replay;
mod scheduler;
mod sink;
mod traits;

pub use cancellable::*;
pub use config::*;
pub use demand::*;
pub use error::*;
pub use gated::*;
pub use interval::*;
pub use replay::*;
pub use scheduler::*;
pub use sink::*;
pub use traits::*;
