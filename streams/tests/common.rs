use std::sync::{Arc, Mutex};

/// Returns a listener that records every value, and a check that drains what was recorded so far.
#[allow(unused)]
pub fn change_watcher<T: Send + Sync + 'static>() -> (impl Fn(T) + Send + Sync + 'static, impl Fn() -> Vec<T> + Send + Sync + 'static) {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let watcher = {
        let changes = changes.clone();
        move |value: T| changes.lock().unwrap().push(value)
    };
    let check = move || changes.lock().unwrap().drain(..).collect::<Vec<T>>();
    (watcher, check)
}

#[allow(unused)]
pub fn init_tracing() { let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init(); }
