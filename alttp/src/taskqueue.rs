//! Bounded work queue with a fixed worker pool. Workers may submit more
//! work; `wait()` blocks until the transitive closure drains. A panic inside
//! a task is contained at the worker boundary and counted as completed work.
//!
//! NOTE: the channel capacity must exceed the largest burst of sibling
//! submissions from a single task or submitters deadlock against a full
//! channel while holding no worker.

use crossbeam_channel::{bounded, Receiver, Sender};
use log::error;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

pub type WorkerFn<T> = fn(&Q<T>, T);

struct Item<T> {
    worker: WorkerFn<T>,
    item: T,
}

struct Inner<T> {
    tx: Mutex<Option<Sender<Item<T>>>>,
    outstanding: Mutex<usize>,
    drained: Condvar,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

pub struct Q<T>(Arc<Inner<T>>);

impl<T> Clone for Q<T> {
    fn clone(&self) -> Q<T> {
        Q(self.0.clone())
    }
}

impl<T: Send + 'static> Q<T> {
    pub fn new(worker_count: usize, chan_size: usize) -> Q<T> {
        assert!(worker_count >= 1, "worker_count must be at least 1");

        let (tx, rx): (Sender<Item<T>>, Receiver<Item<T>>) = bounded(chan_size);
        let q = Q(Arc::new(Inner {
            tx: Mutex::new(Some(tx)),
            outstanding: Mutex::new(0),
            drained: Condvar::new(),
            handles: Mutex::new(Vec::with_capacity(worker_count)),
        }));

        for _ in 0..worker_count {
            let q2 = q.clone();
            let rx2 = rx.clone();
            let handle = thread::spawn(move || {
                for it in rx2.iter() {
                    q2.run_worker(it);
                }
            });
            q.0.handles.lock().push(handle);
        }

        q
    }

    fn run_worker(&self, it: Item<T>) {
        let worker = it.worker;
        let item = it.item;
        let result = catch_unwind(AssertUnwindSafe(|| worker(self, item)));
        if let Err(ex) = result {
            let msg = ex
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| ex.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!("taskqueue: task panicked: {}", msg);
        }
        self.done();
    }

    fn done(&self) {
        let mut n = self.0.outstanding.lock();
        *n -= 1;
        if *n == 0 {
            self.0.drained.notify_all();
        }
    }

    /// Enqueue one task. Blocks once the channel is at capacity.
    pub fn submit(&self, item: T, worker: WorkerFn<T>) {
        *self.0.outstanding.lock() += 1;
        // clone the sender out so a full channel doesn't block the lock
        let tx = self.0.tx.lock().clone();
        let sent = match tx {
            Some(tx) => tx.send(Item { worker, item }).is_ok(),
            None => false,
        };
        if !sent {
            error!("taskqueue: submit after close");
            self.done();
        }
    }

    /// Block until every submitted task, including transitively submitted
    /// ones, has completed.
    pub fn wait(&self) {
        let mut n = self.0.outstanding.lock();
        while *n > 0 {
            self.0.drained.wait(&mut n);
        }
    }

    /// Shut the pool down. Call only after `wait()` returns.
    pub fn close(&self) {
        self.0.tx.lock().take();
        let handles: Vec<_> = self.0.handles.lock().drain(..).collect();
        for h in handles {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Counted = (Arc<AtomicUsize>, u32);

    fn fanout_worker(q: &Q<Counted>, (count, depth): Counted) {
        count.fetch_add(1, Ordering::SeqCst);
        if depth > 0 {
            // two children per task
            q.submit((count.clone(), depth - 1), fanout_worker);
            q.submit((count.clone(), depth - 1), fanout_worker);
        }
    }

    #[test]
    fn transitive_closure_drains() {
        let q: Q<Counted> = Q::new(4, 0x1000);
        let count = Arc::new(AtomicUsize::new(0));
        q.submit((count.clone(), 5), fanout_worker);
        q.wait();
        q.close();
        // a full binary tree of depth 5: 2^6 - 1 tasks
        assert_eq!(count.load(Ordering::SeqCst), 63);
    }

    fn panicky_worker(_q: &Q<Counted>, (count, depth): Counted) {
        if depth == 0 {
            panic!("boom");
        }
        count.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn panics_are_contained() {
        let q: Q<Counted> = Q::new(2, 64);
        let count = Arc::new(AtomicUsize::new(0));
        q.submit((count.clone(), 0), panicky_worker);
        for _ in 0..8 {
            q.submit((count.clone(), 1), panicky_worker);
        }
        q.wait();
        q.close();
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn wait_returns_immediately_when_idle() {
        let q: Q<Counted> = Q::new(1, 4);
        q.wait();
        q.close();
    }
}
