//! Process-wide mutable globals, collected onto one struct.
//!
//! The source threads a handful of loosely related booleans
//! (`server_busy`, `force_idle_mode`, `emergency_exit`, ...) as module-level
//! globals. Per the Design Note on process-wide mutable globals, they are
//! collected here as a single struct of atomics owned by the controller,
//! so tests can toggle them concurrently without reaching for a mutex.

use std::sync::atomic::{AtomicBool, Ordering};

/// Collected lifecycle and mode flags shared by every runtime kernel component.
///
/// All fields use `Ordering::SeqCst` for reads and writes. These flags are
/// checked far less often than, say, a scheduler heap is locked, so the
/// stronger ordering is not a measurable cost and rules out a class of bugs
/// from mismatched acquire/release pairing.
#[derive(Debug, Default)]
pub struct RuntimeFlags {
    model_shutdown: AtomicBool,
    view_shutdown: AtomicBool,
    just_woke_from_sleep: AtomicBool,
    system_busy: AtomicBool,
    is_booted: AtomicBool,
    last_shutdown_was_bad: AtomicBool,
    server_busy: AtomicBool,
    force_idle_mode: AtomicBool,
    emergency_exit: AtomicBool,
}

macro_rules! flag_accessors {
    ($field:ident, $getter:ident, $setter:ident) => {
        #[must_use]
        pub fn $getter(&self) -> bool {
            self.$field.load(Ordering::SeqCst)
        }

        pub fn $setter(&self, value: bool) {
            self.$field.store(value, Ordering::SeqCst);
        }
    };
}

impl RuntimeFlags {
    pub fn new() -> Self {
        Self::default()
    }

    flag_accessors!(model_shutdown, model_is_shutdown, set_model_shutdown);
    flag_accessors!(view_shutdown, view_is_shutdown, set_view_shutdown);
    flag_accessors!(just_woke_from_sleep, just_woke_from_sleep, set_just_woke_from_sleep);
    flag_accessors!(system_busy, system_busy, set_system_busy);
    flag_accessors!(is_booted, is_booted, set_is_booted);
    flag_accessors!(last_shutdown_was_bad, last_shutdown_was_bad, set_last_shutdown_was_bad);
    flag_accessors!(server_busy, server_busy, set_server_busy);
    flag_accessors!(force_idle_mode, force_idle_mode, set_force_idle_mode);
    flag_accessors!(emergency_exit, emergency_exit, set_emergency_exit);

    /// `model_shutdown ⇒ view_shutdown`: setting the model flag also latches
    /// the view flag, preserving the invariant even if a caller forgets the
    /// two-phase order.
    pub fn set_model_shutdown_enforcing_view(&self) {
        self.set_view_shutdown(true);
        self.set_model_shutdown(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_all_false() {
        let flags = RuntimeFlags::new();
        assert!(!flags.model_is_shutdown());
        assert!(!flags.view_is_shutdown());
        assert!(!flags.is_booted());
        assert!(!flags.server_busy());
        assert!(!flags.emergency_exit());
    }

    #[test]
    fn set_and_read_round_trips() {
        let flags = RuntimeFlags::new();
        flags.set_server_busy(true);
        assert!(flags.server_busy());
        flags.set_server_busy(false);
        assert!(!flags.server_busy());
    }

    #[test]
    fn model_shutdown_implies_view_shutdown() {
        let flags = RuntimeFlags::new();
        flags.set_model_shutdown_enforcing_view();
        assert!(flags.model_is_shutdown());
        assert!(flags.view_is_shutdown());
    }
}
