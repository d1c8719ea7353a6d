//! Per key mutual exclusion for record mutations.

use std::sync::{Mutex, MutexGuard};

use crate::common::Id;

/// Number of stripes, keys sharing a stripe also share its lock.
pub const LOCK_STRIPES: usize = 64;

#[derive(Debug)]
/// Striped locks serializing stores, deletions and rebalancing of the same key.
pub struct RecordLocks {
    stripes: Vec<Mutex<()>>,
}

impl Default for RecordLocks {
    fn default() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock of `key`'s stripe is held.
    pub fn lock(&self, key: &Id) -> MutexGuard<'_, ()> {
        self.stripes[stripe(key)]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn stripe(key: &Id) -> usize {
    // Ids are uniformly distributed hashes, any byte will do.
    key.as_bytes()[crate::common::ID_SIZE - 1] as usize % LOCK_STRIPES
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn same_key_is_exclusive() {
        let locks = Arc::new(RecordLocks::new());
        let key = Id::derive("Azuki");

        let guard = locks.lock(&key);

        let clone = locks.clone();
        let handle = thread::spawn(move || {
            let _guard = clone.lock(&key);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn different_stripes_do_not_block() {
        let locks = RecordLocks::new();

        let mut a = [0_u8; 20];
        let mut b = [0_u8; 20];
        a[19] = 1;
        b[19] = 2;

        let _a = locks.lock(&Id::from(a));
        let _b = locks.lock(&Id::from(b));
    }
}
