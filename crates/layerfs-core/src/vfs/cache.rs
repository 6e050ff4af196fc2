//! Reference-counted resource cache.
//!
//! Entries are keyed by structural [`PathSpec`] identity. A resource stays
//! open while at least one [`CacheHandle`] refers to it; dropping the last
//! handle closes the resource and evicts the entry.
//!
//! ## Locking
//!
//! One mutex guards the bookkeeping. Resources are never opened or closed
//! while it is held, so a slow `close` on one layer does not serialize
//! lookups on unrelated layers.
//!
//! ## Teardown
//!
//! Closing a layer drops its handle on the parent layer, which may evict
//! and close the parent in turn. Evictions that happen while another close
//! is running on the same thread are queued and closed by the outermost
//! release in a loop, so tearing down a chain of any depth uses constant
//! stack.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use layerfs_types::PathSpec;

use super::ops::Resource;
use super::{VfsError, VfsResult};

type PendingClose = Box<dyn FnOnce()>;

thread_local! {
    /// `Some` while this thread is inside an eviction close.
    static PENDING_CLOSES: RefCell<Option<VecDeque<PendingClose>>> = const { RefCell::new(None) };
}

/// Resets the queue if a close panics, so later evictions still run.
struct CloseLoop;

impl Drop for CloseLoop {
    fn drop(&mut self) {
        PENDING_CLOSES.with(|pending| pending.borrow_mut().take());
    }
}

/// Close `resource` now, or queue it when an eviction close is already
/// running on this thread.
fn close_evicted<R: ?Sized + Resource>(resource: Arc<R>) {
    let close: PendingClose = Box::new(move || resource.close());
    let first = PENDING_CLOSES.with(|pending| {
        let mut pending = pending.borrow_mut();
        match pending.as_mut() {
            Some(queue) => {
                queue.push_back(close);
                None
            }
            None => {
                *pending = Some(VecDeque::new());
                Some(close)
            }
        }
    });
    let Some(mut close) = first else {
        return;
    };

    let _reset = CloseLoop;
    loop {
        close();
        let next = PENDING_CLOSES.with(|pending| pending.borrow_mut().as_mut()?.pop_front());
        match next {
            Some(queued) => close = queued,
            None => break,
        }
    }
}

struct CacheEntry<R: ?Sized> {
    resource: Arc<R>,
    refs: usize,
}

struct CacheState<R: ?Sized> {
    entries: HashMap<PathSpec, CacheEntry<R>>,
    /// Bumped by [`ResourceCache::drain`]; handles from an older epoch no
    /// longer count against any entry.
    epoch: u64,
}

/// Reference-counted store of opened resources.
pub struct ResourceCache<R: ?Sized + Resource> {
    name: &'static str,
    state: Mutex<CacheState<R>>,
}

impl<R: ?Sized + Resource> ResourceCache<R> {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                epoch: 0,
            }),
        })
    }

    /// Take another reference to a cached resource.
    pub fn acquire(self: &Arc<Self>, key: &PathSpec) -> Option<CacheHandle<R>> {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        let entry = state.entries.get_mut(key)?;
        entry.refs += 1;
        trace!(cache = self.name, path_spec = %key, refs = entry.refs, "acquire");
        Some(CacheHandle {
            cache: Arc::clone(self),
            key: key.clone(),
            resource: Arc::clone(&entry.resource),
            epoch,
        })
    }

    /// Insert a freshly opened resource with one reference.
    ///
    /// When another thread stored the same key first, that resource wins:
    /// it gains the reference and `resource` is closed.
    pub fn store(self: &Arc<Self>, key: PathSpec, resource: Arc<R>) -> CacheHandle<R> {
        let (handle, loser) = {
            let mut state = self.state.lock();
            let epoch = state.epoch;
            match state.entries.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    let entry = occupied.get_mut();
                    entry.refs += 1;
                    let handle = CacheHandle {
                        cache: Arc::clone(self),
                        key,
                        resource: Arc::clone(&entry.resource),
                        epoch,
                    };
                    (handle, Some(resource))
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(CacheEntry {
                        resource: Arc::clone(&resource),
                        refs: 1,
                    });
                    debug!(cache = self.name, path_spec = %key, "stored");
                    let handle = CacheHandle {
                        cache: Arc::clone(self),
                        key,
                        resource,
                        epoch,
                    };
                    (handle, None)
                }
            }
        };

        if let Some(loser) = loser {
            debug!(cache = self.name, path_spec = %handle.key, "lost open race, closing duplicate");
            loser.close();
        }
        handle
    }

    /// Drop one reference, closing and evicting at zero.
    fn release(&self, key: &PathSpec, epoch: u64) -> VfsResult<()> {
        let evicted = {
            let mut state = self.state.lock();
            if epoch != state.epoch {
                return Ok(());
            }
            let Some(entry) = state.entries.get_mut(key) else {
                return Err(VfsError::cache_consistency(format!(
                    "{}: release of uncached {key}",
                    self.name
                )));
            };
            if entry.refs == 0 {
                return Err(VfsError::cache_consistency(format!(
                    "{}: reference count of {key} would go negative",
                    self.name
                )));
            }
            entry.refs -= 1;
            trace!(cache = self.name, path_spec = %key, refs = entry.refs, "release");
            if entry.refs == 0 {
                state.entries.remove(key).map(|entry| entry.resource)
            } else {
                None
            }
        };

        if let Some(resource) = evicted {
            debug!(cache = self.name, path_spec = %key, "evicting");
            close_evicted(resource);
        }
        Ok(())
    }

    pub fn contains(&self, key: &PathSpec) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Live references to `key`, or `None` when not cached.
    pub fn reference_count(&self, key: &PathSpec) -> Option<usize> {
        self.state.lock().entries.get(key).map(|entry| entry.refs)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every cached resource, referenced or not.
    ///
    /// Outstanding handles keep their `Arc` but their release becomes a
    /// no-op. Returns the number of resources closed.
    pub fn drain(&self) -> usize {
        let drained: Vec<(PathSpec, CacheEntry<R>)> = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.entries.drain().collect()
        };

        for (key, entry) in &drained {
            if entry.refs > 0 {
                warn!(cache = self.name, path_spec = %key, refs = entry.refs, "draining referenced resource");
            }
            entry.resource.close();
        }
        drained.len()
    }
}

impl<R: ?Sized + Resource> fmt::Debug for ResourceCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourceCache")
            .field("name", &self.name)
            .field("entries", &state.entries.len())
            .field("epoch", &state.epoch)
            .finish()
    }
}

/// Scoped reference to a cached resource.
///
/// Cloning acquires another reference; dropping releases one.
pub struct CacheHandle<R: ?Sized + Resource> {
    cache: Arc<ResourceCache<R>>,
    key: PathSpec,
    resource: Arc<R>,
    epoch: u64,
}

impl<R: ?Sized + Resource> CacheHandle<R> {
    /// The cache key this handle counts against.
    pub fn key(&self) -> &PathSpec {
        &self.key
    }

    /// The shared resource, for callers that need an owned `Arc`.
    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    /// True when both handles point at the same opened instance.
    pub fn same_resource(&self, other: &CacheHandle<R>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.resource), Arc::as_ptr(&other.resource))
    }
}

impl<R: ?Sized + Resource> Clone for CacheHandle<R> {
    fn clone(&self) -> Self {
        {
            let mut state = self.cache.state.lock();
            if state.epoch == self.epoch {
                if let Some(entry) = state.entries.get_mut(&self.key) {
                    entry.refs += 1;
                }
            }
        }
        Self {
            cache: Arc::clone(&self.cache),
            key: self.key.clone(),
            resource: Arc::clone(&self.resource),
            epoch: self.epoch,
        }
    }
}

impl<R: ?Sized + Resource> Drop for CacheHandle<R> {
    fn drop(&mut self) {
        if let Err(e) = self.cache.release(&self.key, self.epoch) {
            warn!(error = %e, "handle release failed");
            debug_assert!(false, "{e}");
        }
    }
}

impl<R: ?Sized + Resource> Deref for CacheHandle<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: ?Sized + Resource> fmt::Debug for CacheHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("cache", &self.cache.name)
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counted {
        closes: AtomicUsize,
    }

    impl Resource for Counted {
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Counted {
        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    fn key(name: &str) -> PathSpec {
        PathSpec::os(format!("/{name}"))
    }

    #[test]
    fn test_store_acquire_release() {
        let cache = ResourceCache::<Counted>::new("test");
        let counted = Arc::new(Counted::default());

        let first = cache.store(key("a"), Arc::clone(&counted));
        assert!(cache.contains(&key("a")));
        assert_eq!(cache.reference_count(&key("a")), Some(1));

        let second = cache.acquire(&key("a")).unwrap();
        assert!(first.same_resource(&second));
        assert_eq!(cache.reference_count(&key("a")), Some(2));

        drop(first);
        assert_eq!(counted.closes(), 0);
        assert_eq!(cache.reference_count(&key("a")), Some(1));

        drop(second);
        assert_eq!(counted.closes(), 1);
        assert!(!cache.contains(&key("a")));
        assert!(cache.acquire(&key("a")).is_none());
    }

    #[test]
    fn test_clone_counts_as_acquire() {
        let cache = ResourceCache::<Counted>::new("test");
        let counted = Arc::new(Counted::default());
        let handle = cache.store(key("a"), Arc::clone(&counted));
        let copy = handle.clone();
        assert_eq!(cache.reference_count(&key("a")), Some(2));
        drop(handle);
        drop(copy);
        assert_eq!(counted.closes(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_duplicate_store_keeps_first() {
        let cache = ResourceCache::<Counted>::new("test");
        let winner = Arc::new(Counted::default());
        let loser = Arc::new(Counted::default());

        let a = cache.store(key("a"), Arc::clone(&winner));
        let b = cache.store(key("a"), Arc::clone(&loser));
        assert!(a.same_resource(&b));
        assert_eq!(loser.closes(), 1);
        assert_eq!(cache.reference_count(&key("a")), Some(2));

        drop(a);
        drop(b);
        assert_eq!(winner.closes(), 1);
    }

    #[test]
    fn test_release_of_unknown_key_is_consistency_error() {
        let cache = ResourceCache::<Counted>::new("test");
        let err = cache.release(&key("ghost"), 0).unwrap_err();
        assert!(matches!(err, VfsError::CacheConsistency(_)));
    }

    #[test]
    fn test_drain_closes_everything_and_ignores_stale_handles() {
        let cache = ResourceCache::<Counted>::new("test");
        let a = Arc::new(Counted::default());
        let b = Arc::new(Counted::default());
        let ha = cache.store(key("a"), Arc::clone(&a));
        let hb = cache.store(key("b"), Arc::clone(&b));

        assert_eq!(cache.drain(), 2);
        assert_eq!(a.closes(), 1);
        assert_eq!(b.closes(), 1);
        assert!(cache.is_empty());

        // Re-opened under the same key after the drain.
        let fresh = Arc::new(Counted::default());
        let hf = cache.store(key("a"), Arc::clone(&fresh));
        let stale_copy = ha.clone();
        drop(ha);
        drop(stale_copy);
        drop(hb);
        assert_eq!(cache.reference_count(&key("a")), Some(1));
        assert_eq!(fresh.closes(), 0);
        drop(hf);
        assert_eq!(fresh.closes(), 1);
    }

    /// Holds a handle on the layer below, like a driver holds its parent.
    struct Linked {
        parent: Mutex<Option<CacheHandle<Linked>>>,
        closes: Arc<AtomicUsize>,
    }

    impl Resource for Linked {
        fn close(&self) {
            let parent = self.parent.lock().take();
            drop(parent);
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_deep_chain_teardown_is_iterative() {
        const DEPTH: usize = 20_000;
        let cache = ResourceCache::<Linked>::new("chain");
        let closes = Arc::new(AtomicUsize::new(0));

        let mut spec = key("root");
        let mut top: Option<CacheHandle<Linked>> = None;
        for i in 0..DEPTH {
            if i > 0 {
                spec = PathSpec::builder("data_range")
                    .parameter("range_offset", i as u64)
                    .parent(spec)
                    .build()
                    .unwrap();
            }
            let linked = Arc::new(Linked {
                parent: Mutex::new(top.take()),
                closes: Arc::clone(&closes),
            });
            top = Some(cache.store(spec.clone(), linked));
        }
        assert_eq!(cache.len(), DEPTH);
        // Every layer below the top is held only by its child.
        assert_eq!(cache.reference_count(spec.parent().unwrap()), Some(1));

        drop(top);
        assert_eq!(closes.load(Ordering::SeqCst), DEPTH);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_teardown_queue_resets_between_releases() {
        let cache = ResourceCache::<Linked>::new("chain");
        let closes = Arc::new(AtomicUsize::new(0));
        for round in 0..3 {
            let bottom = cache.store(
                key(&format!("bottom{round}")),
                Arc::new(Linked {
                    parent: Mutex::new(None),
                    closes: Arc::clone(&closes),
                }),
            );
            let top = cache.store(
                key(&format!("top{round}")),
                Arc::new(Linked {
                    parent: Mutex::new(Some(bottom)),
                    closes: Arc::clone(&closes),
                }),
            );
            drop(top);
            assert_eq!(closes.load(Ordering::SeqCst), 2 * (round + 1));
            assert!(cache.is_empty());
        }
    }

    /// xorshift64; deterministic so failures reproduce.
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }
    }

    #[test]
    fn test_randomized_refcount_interleavings() {
        const KEYS: usize = 4;
        const CONSUMERS: usize = 6;

        for seed in 1..=32u64 {
            let mut rng = Rng(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let cache = ResourceCache::<Counted>::new("random");
            let mut tracked: Vec<Vec<Arc<Counted>>> = vec![Vec::new(); KEYS];
            let mut held: Vec<Vec<CacheHandle<Counted>>> = (0..CONSUMERS).map(|_| Vec::new()).collect();

            for _ in 0..400 {
                let consumer = rng.below(CONSUMERS);
                let k = rng.below(KEYS);
                let spec = key(&format!("k{k}"));

                match rng.below(3) {
                    0 | 1 => match cache.acquire(&spec) {
                        Some(handle) => held[consumer].push(handle),
                        None => {
                            let counted = Arc::new(Counted::default());
                            tracked[k].push(Arc::clone(&counted));
                            held[consumer].push(cache.store(spec, counted));
                        }
                    },
                    _ => {
                        if !held[consumer].is_empty() {
                            let i = rng.below(held[consumer].len());
                            drop(held[consumer].swap_remove(i));
                        }
                    }
                }

                for (k, generations) in tracked.iter().enumerate() {
                    let spec = key(&format!("k{k}"));
                    let live = held
                        .iter()
                        .flatten()
                        .filter(|h| h.key() == &spec)
                        .count();
                    assert_eq!(cache.reference_count(&spec).unwrap_or(0), live);
                    for (generation, counted) in generations.iter().enumerate() {
                        let is_current = generation + 1 == generations.len();
                        let expected = if is_current && live > 0 { 0 } else { 1 };
                        assert_eq!(counted.closes(), expected, "seed {seed} key k{k} gen {generation}");
                    }
                }
            }

            held.clear();
            assert!(cache.is_empty());
            for counted in tracked.iter().flatten() {
                assert_eq!(counted.closes(), 1);
            }
        }
    }
}
