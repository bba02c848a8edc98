use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static GENERATION: AtomicU64 = AtomicU64::new(1);

/// Draw a new generation stamp
///
/// Stamps are unique across the whole process, so two objects can never share a generation by accident
/// (for example a replaced `CoilSet` and the one it replaced).
pub fn next_generation() -> u64 {
    return GENERATION.fetch_add(1, Ordering::Relaxed);
}

/// Lazily computed value tagged with the key it was computed at
///
/// The value is recomputed when requested with a different key. The key is usually a generation stamp,
/// or a tuple of stamps when the value depends on more than one owner.
#[derive(Debug)]
pub struct LazyCache<K, T> {
    slot: RefCell<Option<(K, Arc<T>)>>,
}

impl<K: PartialEq + Copy, T> LazyCache<K, T> {
    pub fn new() -> Self {
        return LazyCache { slot: RefCell::new(None) };
    }

    /// Return the cached value for `key`, computing it with `compute` if stale or empty
    pub fn get_or_compute<F>(&self, key: K, compute: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        if let Some((cached_key, value)) = self.slot.borrow().as_ref() {
            if *cached_key == key {
                return Arc::clone(value);
            }
        }
        let value: Arc<T> = Arc::new(compute());
        *self.slot.borrow_mut() = Some((key, Arc::clone(&value)));
        return value;
    }

    /// Fallible version of `get_or_compute`; nothing is cached on error
    pub fn try_get_or_compute<F, E>(&self, key: K, compute: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some((cached_key, value)) = self.slot.borrow().as_ref() {
            if *cached_key == key {
                return Ok(Arc::clone(value));
            }
        }
        let value: Arc<T> = Arc::new(compute()?);
        *self.slot.borrow_mut() = Some((key, Arc::clone(&value)));
        return Ok(value);
    }

    /// Store a value directly
    pub fn set(&self, key: K, value: T) {
        *self.slot.borrow_mut() = Some((key, Arc::new(value)));
    }

    /// Cached value, if it was computed at `key`
    pub fn get(&self, key: K) -> Option<Arc<T>> {
        return match self.slot.borrow().as_ref() {
            Some((cached_key, value)) if *cached_key == key => Some(Arc::clone(value)),
            _ => None,
        };
    }

    pub fn clear(&self) {
        *self.slot.borrow_mut() = None;
    }
}

impl<K: Copy, T> Clone for LazyCache<K, T> {
    fn clone(&self) -> Self {
        return LazyCache {
            slot: RefCell::new(self.slot.borrow().as_ref().map(|(key, value)| (*key, Arc::clone(value)))),
        };
    }
}

impl<K: PartialEq + Copy, T> Default for LazyCache<K, T> {
    fn default() -> Self {
        return LazyCache::new();
    }
}

#[test]
fn test_lazy_cache_recomputes_on_new_key() {
    let cache: LazyCache<u64, f64> = LazyCache::new();
    let mut n_computations: usize = 0;

    let generation_1: u64 = next_generation();
    let value: Arc<f64> = cache.get_or_compute(generation_1, || {
        n_computations += 1;
        1.0
    });
    assert_eq!(*value, 1.0);

    let value: Arc<f64> = cache.get_or_compute(generation_1, || {
        n_computations += 1;
        2.0
    });
    assert_eq!(*value, 1.0);
    assert_eq!(n_computations, 1);

    let generation_2: u64 = next_generation();
    assert!(generation_2 > generation_1);
    assert!(cache.get(generation_2).is_none());
    let value: Arc<f64> = cache.get_or_compute(generation_2, || 3.0);
    assert_eq!(*value, 3.0);
}
