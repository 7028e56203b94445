//! Subscription handles and the keyed subscriber lists behind them.
//!
//! Delivery rules shared by `TaskManager` and `MessageBus`:
//! - callbacks run on the publishing call, outside any internal lock
//! - a disposed subscription is never invoked again: `dispose` waits for
//!   callbacks already running on other threads
//! - a panicking callback is logged and does not stop delivery to others

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};

use tracing::error;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Disposer = Box<dyn FnOnce() + Send + Sync>;

/// Handle pairing a registered callback with its disposer.
///
/// Dropping the handle disposes it. `dispose` is idempotent.
#[must_use = "dropping a Subscription disposes it immediately"]
pub struct Subscription {
    disposer: Option<Disposer>,
}

impl Subscription {
    pub(crate) fn new(disposer: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            disposer: Some(Box::new(disposer)),
        }
    }

    /// A handle that owns nothing.
    pub fn noop() -> Self {
        Self { disposer: None }
    }

    pub fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }

    pub fn is_active(&self) -> bool {
        self.disposer.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Liveness of one registration plus the threads currently inside its
/// callback.
#[derive(Default)]
struct Gate {
    closed: bool,
    running: Vec<ThreadId>,
}

#[derive(Default)]
struct EntryState {
    gate: Mutex<Gate>,
    idle: Condvar,
}

impl EntryState {
    /// Registers the current thread as running the callback, unless closed.
    fn enter(&self) -> bool {
        let mut gate = lock(&self.gate);
        if gate.closed {
            return false;
        }
        gate.running.push(thread::current().id());
        true
    }

    fn leave(&self) {
        let me = thread::current().id();
        let mut gate = lock(&self.gate);
        if let Some(i) = gate.running.iter().position(|t| *t == me) {
            gate.running.swap_remove(i);
        }
        self.idle.notify_all();
    }

    /// Closes the gate and waits out callbacks running on other threads. A
    /// callback disposing its own subscription does not wait for itself.
    fn close(&self) {
        let me = thread::current().id();
        let mut gate = lock(&self.gate);
        gate.closed = true;
        while gate.running.iter().any(|t| *t != me) {
            gate = self.idle.wait(gate).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

struct Entry<T> {
    id: u64,
    state: Arc<EntryState>,
    callback: Callback<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state: Arc::clone(&self.state),
            callback: Arc::clone(&self.callback),
        }
    }
}

type Table<K, T> = Mutex<HashMap<K, Vec<Entry<T>>>>;

/// Callbacks keyed by `K` (task id, agent name).
pub(crate) struct SubscriberMap<K, T> {
    table: Arc<Table<K, T>>,
    next_id: AtomicU64,
}

impl<K, T> SubscriberMap<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe(&self, key: K, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(EntryState::default());
        let entry = Entry {
            id,
            state: Arc::clone(&state),
            callback: Arc::new(callback),
        };
        lock(&self.table).entry(key.clone()).or_default().push(entry);

        let table: Weak<Table<K, T>> = Arc::downgrade(&self.table);
        Subscription::new(move || {
            state.close();
            if let Some(table) = table.upgrade() {
                let mut table = lock(&table);
                if let Some(entries) = table.get_mut(&key) {
                    entries.retain(|e| e.id != id);
                    if entries.is_empty() {
                        table.remove(&key);
                    }
                }
            }
        })
    }

    /// Invoke every active callback for `key`, in subscription order.
    /// Returns how many callbacks were invoked.
    pub(crate) fn notify(&self, key: &K, value: &T) -> usize {
        let entries: Vec<Entry<T>> = match lock(&self.table).get(key) {
            Some(entries) => entries.clone(),
            None => return 0,
        };

        let mut invoked = 0;
        for entry in entries {
            if !entry.state.enter() {
                continue;
            }
            invoked += 1;
            let callback = &entry.callback;
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                error!(subscriber = entry.id, "subscriber callback panicked");
            }
            entry.state.leave();
        }
        invoked
    }

    pub(crate) fn count(&self, key: &K) -> usize {
        lock(&self.table).get(key).map_or(0, Vec::len)
    }
}

fn lock<G>(mutex: &Mutex<G>) -> MutexGuard<'_, G> {
    // Callbacks never run under these locks, so poisoning cannot leave the
    // guarded state half-updated.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn notify_reaches_only_matching_key() {
        let map = SubscriberMap::<&'static str, u32>::new();
        let (a_hits, a) = counter();
        let (b_hits, b) = counter();
        let _sa = map.subscribe("a", a);
        let _sb = map.subscribe("b", b);

        assert_eq!(map.notify(&"a", &1), 1);
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disposed_subscription_is_never_invoked() {
        let map = SubscriberMap::<&'static str, u32>::new();
        let (hits, cb) = counter();
        let mut sub = map.subscribe("a", cb);
        sub.dispose();
        sub.dispose();

        assert_eq!(map.notify(&"a", &1), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(map.count(&"a"), 0);
        assert!(!sub.is_active());
    }

    #[test]
    fn drop_disposes() {
        let map = SubscriberMap::<&'static str, u32>::new();
        let (hits, cb) = counter();
        drop(map.subscribe("a", cb));
        map.notify(&"a", &1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let map = SubscriberMap::<&'static str, u32>::new();
        let _bad = map.subscribe("a", |_: &u32| panic!("subscriber bug"));
        let (hits, cb) = counter();
        let _good = map.subscribe("a", cb);

        assert_eq!(map.notify(&"a", &7), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_may_dispose_other_subscriptions() {
        let map = Arc::new(SubscriberMap::<&'static str, u32>::new());
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let v = Arc::clone(&victim);
        let _killer = map.subscribe("a", move |_: &u32| {
            if let Some(mut s) = v.lock().unwrap().take() {
                s.dispose();
            }
        });
        let (hits, cb) = counter();
        *victim.lock().unwrap() = Some(map.subscribe("a", cb));

        assert_eq!(map.notify(&"a", &1), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_may_dispose_their_own_subscription() {
        let map = SubscriberMap::<&'static str, u32>::new();
        let own: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let (o, h) = (Arc::clone(&own), Arc::clone(&hits));
        *own.lock().unwrap() = Some(map.subscribe("a", move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(mut s) = o.lock().unwrap().take() {
                s.dispose();
            }
        }));

        assert_eq!(map.notify(&"a", &1), 1);
        assert_eq!(map.notify(&"a", &2), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_waits_for_a_callback_running_on_another_thread() {
        let map = Arc::new(SubscriberMap::<&'static str, u32>::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let finished = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&finished);
        let mut sub = map.subscribe("a", move |_: &u32| {
            let _ = entered_tx.send(());
            thread::sleep(std::time::Duration::from_millis(100));
            f.fetch_add(1, Ordering::SeqCst);
        });

        let publisher = {
            let map = Arc::clone(&map);
            thread::spawn(move || map.notify(&"a", &1))
        };
        entered_rx.recv().unwrap();
        sub.dispose();

        // Nothing may still be running once dispose has returned.
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.join().unwrap(), 1);
        assert_eq!(map.notify(&"a", &2), 0);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_subscription_is_inactive() {
        let mut sub = Subscription::noop();
        assert!(!sub.is_active());
        sub.dispose();
    }
}
