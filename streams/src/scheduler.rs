use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::lock::lock;

/// A one-shot scheduled action
pub type Action = Box<dyn FnOnce() + Send + 'static>;
/// An action fired on every tick of a periodic timer
pub type RepeatingAction = Arc<dyn Fn() + Send + Sync + 'static>;

/// Source of timer callbacks. Producers never block - they schedule.
pub trait Scheduler: Send + Sync {
    /// Runs `action` once after `after` has elapsed, unless cancelled first.
    fn schedule(&self, after: Duration, action: Action) -> TaskHandle;

    /// Runs `action` every `every`, starting one period from now, until cancelled.
    fn schedule_repeating(&self, every: Duration, action: RepeatingAction) -> TaskHandle;
}

/// Handle to a pending scheduled task
#[derive(Clone)]
pub struct TaskHandle(Arc<TaskState>);

struct TaskState {
    cancelled: AtomicBool,
    canceller: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl TaskHandle {
    pub(crate) fn new() -> Self { Self(Arc::new(TaskState { cancelled: AtomicBool::new(false), canceller: Mutex::new(None) })) }

    /// Registers extra work to run on cancellation (e.g. aborting a runtime task)
    #[allow(unused)]
    pub(crate) fn on_cancel(&self, f: impl FnOnce() + Send + 'static) {
        // the flag is only set under the canceller lock, so a concurrent cancel either sees `f` or runs before it
        let mut canceller = lock(&self.0.canceller);
        if self.is_cancelled() {
            drop(canceller);
            f();
        } else {
            *canceller = Some(Box::new(f));
        }
    }

    /// Cancels the task if it has not run yet. Idempotent.
    pub fn cancel(&self) {
        let canceller = {
            let mut canceller = lock(&self.0.canceller);
            if self.0.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            canceller.take()
        };
        if let Some(canceller) = canceller {
            canceller();
        }
    }

    pub fn is_cancelled(&self) -> bool { self.0.cancelled.load(Ordering::Acquire) }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("cancelled", &self.is_cancelled()).finish()
    }
}

/// A deterministic scheduler driven by a virtual clock.
///
/// Nothing runs until [`ManualScheduler::advance`] is called. Tasks due at the same instant run in the order they
/// were scheduled, and actions may schedule further work while running.
#[derive(Clone, Default)]
pub struct ManualScheduler(Arc<Mutex<ManualState>>);

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    queue: BTreeMap<(Duration, u64), Entry>,
}

struct Entry {
    handle: TaskHandle,
    kind: TaskKind,
}

enum TaskKind {
    Once(Action),
    Repeating { every: Duration, action: RepeatingAction },
}

impl ManualState {
    fn enqueue(&mut self, due: Duration, entry: Entry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((due, seq), entry);
    }
}

impl ManualScheduler {
    pub fn new() -> Self { Self::default() }

    /// Virtual time elapsed since creation
    pub fn now(&self) -> Duration { lock(&self.0).now }

    /// Number of tasks that are scheduled and not cancelled
    pub fn pending(&self) -> usize { lock(&self.0).queue.values().filter(|entry| !entry.handle.is_cancelled()).count() }

    /// Moves the clock forward, running every task that falls due on the way.
    pub fn advance(&self, by: Duration) {
        let target = lock(&self.0).now + by;
        while self.step(Some(target)) {}
        let mut state = lock(&self.0);
        state.now = state.now.max(target);
    }

    /// Runs due tasks in order, jumping the clock straight to each one, until the queue is empty or `limit` tasks
    /// have run. Returns the number of tasks run. The limit matters for periodic timers, which never go idle.
    pub fn run_until_idle(&self, limit: usize) -> usize {
        let mut ran = 0;
        while ran < limit && self.step(None) {
            ran += 1;
        }
        ran
    }

    /// Pops and runs the next task due no later than `deadline`. Returns false when there is none.
    fn step(&self, deadline: Option<Duration>) -> bool {
        let (due, entry) = {
            let mut state = lock(&self.0);
            let Some(&key) = state.queue.keys().next() else { return false };
            if deadline.is_some_and(|deadline| key.0 > deadline) {
                return false;
            }
            let Some(entry) = state.queue.remove(&key) else { return false };
            state.now = key.0;
            (key.0, entry)
        };

        if entry.handle.is_cancelled() {
            return true;
        }

        // the lock is released while the action runs so it can schedule more work
        match entry.kind {
            TaskKind::Once(action) => action(),
            TaskKind::Repeating { every, action } => {
                action();
                if !entry.handle.is_cancelled() {
                    lock(&self.0).enqueue(due + every, Entry { handle: entry.handle, kind: TaskKind::Repeating { every, action } });
                }
            }
        }
        true
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, after: Duration, action: Action) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut state = lock(&self.0);
        let due = state.now + after;
        state.enqueue(due, Entry { handle: handle.clone(), kind: TaskKind::Once(action) });
        handle
    }

    fn schedule_repeating(&self, every: Duration, action: RepeatingAction) -> TaskHandle {
        // a zero period would never let the clock move past the first tick
        let every = every.max(Duration::from_nanos(1));
        let handle = TaskHandle::new();
        let mut state = lock(&self.0);
        let due = state.now + every;
        state.enqueue(due, Entry { handle: handle.clone(), kind: TaskKind::Repeating { every, action } });
        handle
    }
}

/// Schedules onto the tokio runtime that is current when the task is scheduled.
#[cfg(feature = "tokio")]
#[derive(Clone)]
pub struct TokioScheduler(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioScheduler {
    /// Captures the current runtime. Panics outside of a tokio runtime, like `tokio::spawn`.
    pub fn current() -> Self { Self(tokio::runtime::Handle::current()) }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self { Self(handle) }
}

#[cfg(feature = "tokio")]
impl Scheduler for TokioScheduler {
    fn schedule(&self, after: Duration, action: Action) -> TaskHandle {
        let handle = TaskHandle::new();
        let task = {
            let handle = handle.clone();
            self.0.spawn(async move {
                tokio::time::sleep(after).await;
                if !handle.is_cancelled() {
                    action();
                }
            })
        };
        handle.on_cancel(move || task.abort());
        handle
    }

    fn schedule_repeating(&self, every: Duration, action: RepeatingAction) -> TaskHandle {
        let handle = TaskHandle::new();
        let task = {
            let handle = handle.clone();
            self.0.spawn(async move {
                let start = tokio::time::Instant::now() + every;
                let mut interval = tokio::time::interval_at(start, every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    if handle.is_cancelled() {
                        break;
                    }
                    action();
                }
            })
        };
        handle.on_cancel(move || task.abort());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Action) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |label: &'static str| -> Action {
                let log = log.clone();
                Box::new(move || log.lock().unwrap().push(label))
            }
        };
        (log, make)
    }

    #[test]
    fn test_manual_runs_in_due_order() {
        let scheduler = ManualScheduler::new();
        let (log, make) = recorder();
        scheduler.schedule(Duration::from_secs(2), make("late"));
        scheduler.schedule(Duration::from_secs(1), make("early"));
        scheduler.schedule(Duration::from_secs(1), make("early-second"));

        scheduler.advance(Duration::from_millis(999));
        assert!(log.lock().unwrap().is_empty());

        scheduler.advance(Duration::from_secs(5));
        assert_eq!(*log.lock().unwrap(), vec!["early", "early-second", "late"]);
        assert_eq!(scheduler.now(), Duration::from_millis(5999));
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let scheduler = ManualScheduler::new();
        let (log, make) = recorder();
        let handle = scheduler.schedule(Duration::from_secs(1), make("cancelled"));
        assert_eq!(scheduler.pending(), 1);
        handle.cancel();
        handle.cancel();
        assert_eq!(scheduler.pending(), 0);

        scheduler.advance(Duration::from_secs(2));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_hook_runs_once_whenever_it_is_registered() {
        let runs = Arc::new(AtomicUsize::new(0));
        let hook = || {
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        };

        let before = TaskHandle::new();
        before.on_cancel(hook());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        before.cancel();
        before.cancel();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // registered after cancellation, so it runs right away
        let after = TaskHandle::new();
        after.cancel();
        after.on_cancel(hook());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_racing_hook_registration_always_runs_the_hook() {
        for _ in 0..200 {
            let runs = Arc::new(AtomicUsize::new(0));
            let handle = TaskHandle::new();
            let canceller = {
                let handle = handle.clone();
                std::thread::spawn(move || handle.cancel())
            };
            {
                let runs = runs.clone();
                handle.on_cancel(move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                });
            }
            canceller.join().unwrap();
            assert_eq!(runs.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_repeating_until_cancelled() {
        let scheduler = ManualScheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let handle = {
            let ticks = ticks.clone();
            scheduler.schedule_repeating(
                Duration::from_millis(500),
                Arc::new(move || {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };

        scheduler.advance(Duration::from_millis(1600));
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        handle.cancel();
        scheduler.advance(Duration::from_secs(10));
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_action_can_schedule_more_work() {
        let scheduler = ManualScheduler::new();
        let (log, make) = recorder();
        {
            let inner = scheduler.clone();
            let follow_up = make("follow-up");
            scheduler.schedule(
                Duration::from_secs(1),
                Box::new(move || {
                    inner.schedule(Duration::from_secs(1), follow_up);
                }),
            );
        }

        assert_eq!(scheduler.run_until_idle(10), 2);
        assert_eq!(*log.lock().unwrap(), vec!["follow-up"]);
        assert_eq!(scheduler.now(), Duration::from_secs(2));
    }

    #[cfg(feature = "tokio")]
    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_and_cancels() {
        let scheduler = TokioScheduler::current();
        let ticks = Arc::new(AtomicUsize::new(0));

        let once = {
            let ticks = ticks.clone();
            scheduler.schedule(
                Duration::from_millis(100),
                Box::new(move || {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        let cancelled = {
            let ticks = ticks.clone();
            scheduler.schedule(
                Duration::from_millis(100),
                Box::new(move || {
                    ticks.fetch_add(100, Ordering::SeqCst);
                }),
            )
        };
        cancelled.cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert!(!once.is_cancelled());
    }
}
