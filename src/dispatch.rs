use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tracing::{debug, error};

use crate::error::SyncError;

/// Worker count used when none is configured.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Runs `task` once per item on at most `workers` threads and waits for all
/// of them.
///
/// Outcomes come back in item order. A panicking task does not take down its
/// siblings; `on_panic` turns it into an outcome for that item.
pub fn dispatch<T, R, F, P>(items: &[T], workers: usize, task: F, on_panic: P) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
    P: Fn(&T, SyncError) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, items.len());
    let next = AtomicUsize::new(0);
    let slots: Vec<Mutex<Option<R>>> = items.iter().map(|_| Mutex::new(None)).collect();

    thread::scope(|scope| {
        for worker in 0..workers {
            let next = &next;
            let slots = &slots;
            let task = &task;
            let on_panic = &on_panic;
            scope.spawn(move || {
                debug!(worker, "worker started");
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task(item))) {
                        Ok(outcome) => outcome,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            error!(worker, index, message = %message, "task panicked");
                            on_panic(item, SyncError::WorkerPanic(message))
                        }
                    };
                    if let Ok(mut slot) = slots[index].lock() {
                        *slot = Some(outcome);
                    }
                }
                debug!(worker, "worker finished");
            });
        }
    });

    slots
        .into_iter()
        .zip(items)
        .map(|(slot, item)| {
            slot.into_inner().ok().flatten().unwrap_or_else(|| {
                on_panic(item, SyncError::WorkerPanic("task produced no outcome".to_string()))
            })
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
