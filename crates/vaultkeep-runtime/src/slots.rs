//! Thread-slot governor (C5).
//!
//! Named counted semaphores for classified background work. Plain
//! `Mutex<HashMap<_, _>>` is used rather than a lock-free map: a small
//! single-purpose lock wrapper is simpler than reaching for a
//! concurrent-map crate for state this rarely contended.

use std::collections::HashMap;
use std::sync::Mutex;

/// Named, counted capacity table. Unknown kinds are unrestricted: an
/// acquire for a kind this table has never been told about always
/// succeeds and is not tracked, so new classes of background work can run
/// before the controller has been taught their caps.
#[derive(Debug, Default)]
pub struct ThreadSlots {
    inner: Mutex<HashMap<String, (usize, usize)>>,
}

impl ThreadSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or overwrites) the capacity for `kind`. `inuse` starts at
    /// zero.
    pub fn register(&self, kind: impl Into<String>, max: usize) {
        self.inner.lock().expect("thread slots mutex poisoned").insert(kind.into(), (0, max));
    }

    /// Atomically increments `inuse` for `kind` if below `max`. Returns
    /// `true` on success. An unknown kind always returns `true`.
    pub fn acquire(&self, kind: &str) -> bool {
        let mut table = self.inner.lock().expect("thread slots mutex poisoned");
        match table.get_mut(kind) {
            Some((inuse, max)) if *inuse < *max => {
                *inuse += 1;
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Decrements `inuse` for `kind`, never below zero. A no-op for unknown
    /// kinds, and for releases without a prior successful acquire.
    pub fn release(&self, kind: &str) {
        let mut table = self.inner.lock().expect("thread slots mutex poisoned");
        if let Some((inuse, _max)) = table.get_mut(kind) {
            *inuse = inuse.saturating_sub(1);
        }
    }

    /// Returns `(inuse, max)` for `kind`, if it has been registered.
    pub fn status(&self, kind: &str) -> Option<(usize, usize)> {
        self.inner.lock().expect("thread slots mutex poisoned").get(kind).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_respects_max() {
        let slots = ThreadSlots::new();
        slots.register("misc", 2);

        assert!(slots.acquire("misc"));
        assert!(slots.acquire("misc"));
        assert!(!slots.acquire("misc"));
        assert_eq!(slots.status("misc"), Some((2, 2)));
    }

    #[test]
    fn release_never_goes_negative() {
        let slots = ThreadSlots::new();
        slots.register("misc", 2);

        slots.release("misc");
        slots.release("misc");
        assert_eq!(slots.status("misc"), Some((0, 2)));
    }

    #[test]
    fn release_then_acquire_frees_a_slot() {
        let slots = ThreadSlots::new();
        slots.register("misc", 1);

        assert!(slots.acquire("misc"));
        assert!(!slots.acquire("misc"));
        slots.release("misc");
        assert!(slots.acquire("misc"));
    }

    #[test]
    fn unknown_kind_is_unrestricted() {
        let slots = ThreadSlots::new();
        assert!(slots.acquire("unregistered"));
        assert!(slots.acquire("unregistered"));
        slots.release("unregistered");
        assert_eq!(slots.status("unregistered"), None);
    }

    #[test]
    fn interleaved_acquire_release_keeps_inuse_in_bounds() {
        let slots = ThreadSlots::new();
        slots.register("watcher_files", 15);

        for _ in 0..20 {
            slots.acquire("watcher_files");
        }
        let (inuse, max) = slots.status("watcher_files").unwrap();
        assert!(inuse <= max);

        for _ in 0..25 {
            slots.release("watcher_files");
        }
        let (inuse, _) = slots.status("watcher_files").unwrap();
        assert_eq!(inuse, 0);
    }
}
