//! Named wall-clock markers used by the idle/sleep detector and maintenance jobs.
//!
//! The controller keeps a small table of named instants (`boot`,
//! `last_user_action`, `last_sleep_check`, ...) rather than one timestamp
//! per concern scattered across structs, matching the source controller's
//! `timestamps` dict.

use std::collections::HashMap;
use std::sync::Mutex;

use jiff::{SignedDuration, Timestamp};

/// A named wall-clock marker table, guarded by a single mutex.
///
/// Readers/writers are expected to be infrequent (scheduler ticks, user
/// action hooks), so a plain `Mutex<HashMap<_, _>>` is preferred over
/// finer-grained locking.
#[derive(Debug, Default)]
pub struct Timestamps {
    inner: Mutex<HashMap<&'static str, Timestamp>>,
}

impl Timestamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name` as having occurred at `when`.
    pub fn set(&self, name: &'static str, when: Timestamp) {
        self.inner.lock().expect("timestamps mutex poisoned").insert(name, when);
    }

    /// Records `name` as having occurred right now.
    pub fn touch(&self, name: &'static str) -> Timestamp {
        let now = Timestamp::now();
        self.set(name, now);
        now
    }

    /// Returns the last recorded instant for `name`, if any.
    pub fn get(&self, name: &'static str) -> Option<Timestamp> {
        self.inner.lock().expect("timestamps mutex poisoned").get(name).copied()
    }

    /// Returns how long ago `name` was last recorded, if it has ever been set.
    pub fn elapsed_since(&self, name: &'static str) -> Option<SignedDuration> {
        self.get(name).map(|at| Timestamp::now().duration_since(at))
    }
}

/// Well-known timestamp names recorded by the controller and idle detector.
pub mod names {
    pub const BOOT: &str = "boot";
    pub const LAST_USER_ACTION: &str = "last_user_action";
    pub const LAST_MOUSE_ACTION: &str = "last_mouse_action";
    pub const LAST_SLEEP_CHECK: &str = "last_sleep_check";
    pub const NOW_AWAKE: &str = "now_awake";
    pub const LAST_CPU_CHECK: &str = "last_cpu_check";
    pub const LAST_SERVICE_INFO_CACHE_FATTEN: &str = "last_service_info_cache_fatten";
    pub const LAST_PAGE_CHANGE: &str = "last_page_change";
    pub const LAST_DISK_CACHE_POPULATION: &str = "last_disk_cache_population";
    pub const IDLE_STARTED: &str = "idle_started";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trips() {
        let ts = Timestamps::new();
        let now = Timestamp::now();
        ts.set(names::BOOT, now);
        assert_eq!(ts.get(names::BOOT), Some(now));
    }

    #[test]
    fn unset_name_is_none() {
        let ts = Timestamps::new();
        assert_eq!(ts.get(names::LAST_SLEEP_CHECK), None);
    }

    #[test]
    fn touch_records_roughly_now() {
        let ts = Timestamps::new();
        let before = Timestamp::now();
        ts.touch(names::LAST_USER_ACTION);
        let after = Timestamp::now();
        let recorded = ts.get(names::LAST_USER_ACTION).unwrap();
        assert!(recorded >= before && recorded <= after);
    }

    #[test]
    fn elapsed_since_grows_over_time() {
        let ts = Timestamps::new();
        ts.set(names::LAST_SLEEP_CHECK, Timestamp::now() - SignedDuration::from_secs(600));
        let elapsed = ts.elapsed_since(names::LAST_SLEEP_CHECK).unwrap();
        assert!(elapsed >= SignedDuration::from_secs(600));
    }
}
