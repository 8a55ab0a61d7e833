//! Request coalescing ("single-flight").
//!
//! When several callers ask for the same expensive thing at the same time
//! (a layout load, a directory scan), only the first one does the work; the
//! rest block and share the result. The map holds state only while a call
//! is in flight; it is empty between calls.

use std::hash::Hash;
use std::sync::Arc;

use ahash::HashMap;
use parking_lot::{Condvar, Mutex};

/// Outcome of one in-flight call, shared by leader and waiters.
enum CallState<V> {
    Running,
    Done(V),
}

struct Call<V> {
    state: Mutex<CallState<V>>,
    done: Condvar,
}

impl<V: Clone> Call<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CallState::Running),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> V {
        let mut state = self.state.lock();
        loop {
            match &*state {
                CallState::Done(value) => return value.clone(),
                CallState::Running => self.done.wait(&mut state),
            }
        }
    }

    fn complete(&self, value: V) {
        *self.state.lock() = CallState::Done(value);
        self.done.notify_all();
    }
}

/// Deduplicates concurrent identical calls by key.
///
/// `V` is typically a `Result<T, E>` with cloneable halves, so an error from
/// the leader propagates to every waiter.
pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::default()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` for `key`, unless a call for `key` is already in flight, in
    /// which case this blocks and returns that call's value instead.
    ///
    /// For any key, at most one `f` executes at a time.
    pub fn run<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        let call = {
            let mut calls = self.calls.lock();
            if let Some(existing) = calls.get(&key) {
                let existing = Arc::clone(existing);
                drop(calls);
                return existing.wait();
            }
            let call = Arc::new(Call::new());
            calls.insert(key.clone(), Arc::clone(&call));
            call
        };

        // Leader path. No lock is held while `f` runs.
        let value = f();

        // Deregister before waking waiters, so the map is empty the moment
        // the result is observable. `forget` may have replaced the entry
        // with a newer flight; only remove our own.
        {
            let mut calls = self.calls.lock();
            if let Some(current) = calls.get(&key) {
                if Arc::ptr_eq(current, &call) {
                    calls.remove(&key);
                }
            }
        }

        call.complete(value.clone());
        value
    }

    /// Joins an in-flight call for `key` if there is one, blocking until it
    /// completes. Returns `None` immediately if nothing is in flight.
    pub fn try_piggyback(&self, key: &K) -> Option<V> {
        let call = {
            let calls = self.calls.lock();
            calls.get(key).map(Arc::clone)?
        };
        Some(call.wait())
    }

    /// Drops any in-flight mapping for `key`, so the next [`Self::run`]
    /// starts fresh instead of piggybacking. The detached leader still
    /// completes and wakes its existing waiters.
    pub fn forget(&self, key: &K) {
        self.calls.lock().remove(key);
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn sequential_calls_each_execute() {
        let sf: SingleFlight<&str, u32> = SingleFlight::new();
        assert_eq!(sf.run("k", || 1), 1);
        assert_eq!(sf.run("k", || 2), 2);
        assert_eq!(sf.in_flight(), 0);
    }

    #[test]
    fn concurrent_calls_execute_once() {
        let sf: Arc<SingleFlight<String, u64>> = Arc::new(SingleFlight::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let sf = Arc::clone(&sf);
                let executions = Arc::clone(&executions);
                std::thread::spawn(move || {
                    sf.run("k1".to_owned(), || {
                        executions.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        42
                    })
                })
            })
            .collect();

        let results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(results, vec![42; 5]);
        assert_eq!(sf.in_flight(), 0);
    }

    #[test]
    fn errors_propagate_to_waiters() {
        use st_types::{Error, Result};

        let sf: Arc<SingleFlight<&'static str, Result<u32>>> = Arc::new(SingleFlight::new());

        let sf2 = Arc::clone(&sf);
        let waiter = std::thread::spawn(move || {
            // Spin until the leader registers, then join its flight. The
            // closure must never run: if it does, the distinct kind below
            // fails the assertion.
            while sf2.in_flight() == 0 {
                std::thread::yield_now();
            }
            sf2.run("boom", || Err(Error::invalid_argument("waiter executed")))
        });

        let leader = sf.run("boom", || -> Result<u32> {
            std::thread::sleep(Duration::from_millis(50));
            Err(Error::io("backend exploded"))
        });

        assert_eq!(leader.unwrap_err().kind(), st_types::ErrorKind::IoError);
        let joined = waiter.join().unwrap();
        assert_eq!(joined.unwrap_err().kind(), st_types::ErrorKind::IoError);
    }

    #[test]
    fn piggyback_without_flight_returns_none() {
        let sf: SingleFlight<&str, u32> = SingleFlight::new();
        assert_eq!(sf.try_piggyback(&"nope"), None);
    }

    #[test]
    fn piggyback_joins_flight() {
        let sf: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());

        let sf2 = Arc::clone(&sf);
        let leader = std::thread::spawn(move || {
            sf2.run("k", || {
                std::thread::sleep(Duration::from_millis(50));
                7
            })
        });

        // Spin until the leader registers, then join its flight.
        let value = loop {
            if let Some(v) = sf.try_piggyback(&"k") {
                break v;
            }
            std::thread::yield_now();
        };

        assert_eq!(value, 7);
        assert_eq!(leader.join().unwrap(), 7);
    }

    #[test]
    fn forget_detaches_in_flight_call() {
        let sf: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());

        let sf2 = Arc::clone(&sf);
        let leader = std::thread::spawn(move || {
            sf2.run("k", || {
                std::thread::sleep(Duration::from_millis(50));
                1
            })
        });

        // Wait for the leader to register, then forget it. A new call for
        // the same key must execute on its own.
        while sf.in_flight() == 0 {
            std::thread::yield_now();
        }
        sf.forget(&"k");

        let fresh = sf.run("k", || 2);
        assert_eq!(fresh, 2);
        assert_eq!(leader.join().unwrap(), 1);
        assert_eq!(sf.in_flight(), 0);
    }
}
