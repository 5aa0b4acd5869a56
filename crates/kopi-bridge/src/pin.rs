//! Pin table
//!
//! Keeps native values alive while the VM holds their address. The VM sees
//! only a [`PinKey`] (a `long` on its side); the table maps it back to the
//! value and counts how many times it was pinned.
//!
//! The table lock is held only for the count update. A value whose count
//! drops to zero is destroyed after the lock is released, so destructors
//! may themselves use the table.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::FatalPolicy;

/// Address of a pinned value, as handed to the VM
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinKey(NonZeroUsize);

impl PinKey {
    /// Key of a value, whether or not it is pinned
    pub fn of<T: ?Sized>(value: &Arc<T>) -> Self {
        let addr = Arc::as_ptr(value) as *const () as usize;
        // Arc allocations are never at address zero
        Self(NonZeroUsize::new(addr).unwrap_or(NonZeroUsize::MIN))
    }

    /// The key as a VM `long`
    pub fn as_i64(self) -> i64 {
        self.0.get() as i64
    }

    /// Key from a VM `long`; `None` for zero
    pub fn from_i64(raw: i64) -> Option<Self> {
        NonZeroUsize::new(raw as usize).map(Self)
    }
}

impl fmt::Debug for PinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinKey({:#x})", self.0)
    }
}

struct PinEntry {
    value: Arc<dyn Any + Send + Sync>,
    count: usize,
}

/// Address-keyed table of pinned native values
pub struct PinTable {
    entries: Mutex<HashMap<PinKey, PinEntry>>,
    policy: FatalPolicy,
}

impl PinTable {
    /// Create an empty table
    pub fn new(policy: FatalPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Pin a value (again) and return its key
    pub fn pin<T: Any + Send + Sync>(&self, value: &Arc<T>) -> PinKey {
        let key = PinKey::of(value);
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(|| PinEntry {
            value: Arc::clone(value) as Arc<dyn Any + Send + Sync>,
            count: 0,
        });
        entry.count += 1;
        let count = entry.count;
        drop(entries);
        log::debug!("pinned {:?} (count {})", key, count);
        key
    }

    /// Drop one pin. The value is released when its last pin goes.
    ///
    /// Unpinning a key that is not pinned is fatal.
    pub fn unpin(&self, key: PinKey) {
        let removed = {
            let mut entries = self.entries.lock();
            let remaining = entries.get_mut(&key).map(|entry| {
                entry.count -= 1;
                entry.count
            });
            match remaining {
                Some(0) => entries.remove(&key),
                Some(_) => None,
                None => {
                    drop(entries);
                    self.policy.fail(format!("unpin of {:?}, which is not pinned", key));
                }
            }
        };
        if let Some(entry) = removed {
            log::debug!("unpinned {:?}, releasing value", key);
            drop(entry);
        }
    }

    /// Drop one pin of `value`
    pub fn unpin_value<T: ?Sized>(&self, value: &Arc<T>) {
        self.unpin(PinKey::of(value));
    }

    /// The pinned value, if `key` is pinned
    pub fn get(&self, key: PinKey) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.lock().get(&key).map(|entry| Arc::clone(&entry.value))
    }

    /// The pinned value as a `T`.
    ///
    /// An unknown key or a value of another type is fatal.
    pub fn get_as<T: Any + Send + Sync>(&self, key: PinKey) -> Arc<T> {
        let Some(value) = self.get(key) else {
            self.policy.fail(format!("{:?} is not pinned", key));
        };
        match value.downcast::<T>() {
            Ok(value) => value,
            Err(_) => self.policy.fail(format!(
                "{:?} does not point at a {}",
                key,
                std::any::type_name::<T>()
            )),
        }
    }

    /// How many times `key` is pinned (zero if it is not)
    pub fn count(&self, key: PinKey) -> usize {
        self.entries.lock().get(&key).map_or(0, |entry| entry.count)
    }

    /// Number of distinct pinned values
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is pinned
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PinTable {
    fn default() -> Self {
        Self::new(FatalPolicy::default())
    }
}
