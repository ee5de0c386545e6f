//! Idle/sleep detector (C6).
//!
//! Clock-driven; there are no OS sleep signals to listen for. The client
//! variant derives `idle`, `very_idle`, `just_woke_from_sleep` and
//! `system_busy` from wall-clock markers plus a periodic CPU sample. The
//! server variant is a headless no-op: it never needs an idle heuristic,
//! so every predicate is trivially constant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use sysinfo::System;
use vaultkeep_core::timing::names;
use vaultkeep_core::{RuntimeFlags, Timestamps};

use crate::pubsub::PubSub;

/// Grace period after boot before `CurrentlyIdle` can ever be true.
pub const BOOT_GRACE: Duration = Duration::from_secs(120);

/// How long continuous idleness must persist before `CurrentlyVeryIdle`.
pub const VERY_IDLE_THRESHOLD: Duration = Duration::from_secs(3600);

/// Threshold past which a gap between sleep checks implies the process was
/// suspended.
pub const SLEEP_SUSPENSION_THRESHOLD: Duration = Duration::from_secs(600);

/// Grace window added to `now_awake` once a suspension is detected.
pub const WAKE_GRACE: Duration = Duration::from_secs(15);

/// How often the CPU probe is allowed to actually sample.
pub const CPU_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

fn signed(duration: Duration) -> SignedDuration {
    SignedDuration::try_from(duration).expect("duration fits in a SignedDuration")
}

/// Common surface both the client and server variants implement.
pub trait IdleDetector: Send + Sync {
    /// Periodic check (called roughly every 10s) that derives
    /// `just_woke_from_sleep` from the gap since the last check.
    fn sleep_check(&self);

    fn currently_idle(&self) -> bool;

    fn currently_very_idle(&self) -> bool;

    /// Busy iff any CPU exceeded the configured ceiling, sampled at most
    /// every [`CPU_SAMPLE_INTERVAL`].
    fn system_busy(&self) -> bool;

    fn just_woke_from_sleep(&self) -> bool;
}

/// Client idle configuration: every threshold is optional, with `None`
/// meaning "don't constrain on this signal".
#[derive(Debug, Clone, Default)]
pub struct ClientIdleConfig {
    pub idle_normal: bool,
    pub idle_period: Option<Duration>,
    pub mouse_idle_period: Option<Duration>,
    pub idle_cpu_max: Option<f32>,
}

/// Full client idle heuristic, backed by shared timestamps, flags and the
/// pubsub bus (idle transitions publish `wake_daemons`).
pub struct ClientIdleDetector {
    timestamps: Arc<Timestamps>,
    flags: Arc<RuntimeFlags>,
    bus: Arc<PubSub>,
    config: ClientIdleConfig,
    idle_started: Mutex<Option<Timestamp>>,
    system: Mutex<System>,
}

impl ClientIdleDetector {
    pub fn new(timestamps: Arc<Timestamps>, flags: Arc<RuntimeFlags>, bus: Arc<PubSub>, config: ClientIdleConfig) -> Self {
        Self {
            timestamps,
            flags,
            bus,
            config,
            idle_started: Mutex::new(None),
            system: Mutex::new(System::new()),
        }
    }
}

impl IdleDetector for ClientIdleDetector {
    fn sleep_check(&self) {
        let now = Timestamp::now();
        let suspended = self
            .timestamps
            .get(names::LAST_SLEEP_CHECK)
            .is_some_and(|last| last + signed(SLEEP_SUSPENSION_THRESHOLD) < now);

        if suspended {
            self.flags.set_just_woke_from_sleep(true);
            self.timestamps.set(names::LAST_USER_ACTION, now);
            self.timestamps.set(names::NOW_AWAKE, now + signed(WAKE_GRACE));
        } else {
            self.flags.set_just_woke_from_sleep(false);
        }
        self.timestamps.set(names::LAST_SLEEP_CHECK, now);
    }

    fn currently_idle(&self) -> bool {
        let now = Timestamp::now();
        let Some(boot) = self.timestamps.get(names::BOOT) else {
            return false;
        };
        if now.duration_since(boot) < signed(BOOT_GRACE) {
            return false;
        }
        if !self.config.idle_normal {
            return false;
        }

        let user_quiet = match self.config.idle_period {
            None => true,
            Some(period) => self
                .timestamps
                .get(names::LAST_USER_ACTION)
                .is_none_or(|at| now.duration_since(at) >= signed(period)),
        };
        let mouse_quiet = match self.config.mouse_idle_period {
            None => true,
            Some(period) => self
                .timestamps
                .get(names::LAST_MOUSE_ACTION)
                .is_none_or(|at| now.duration_since(at) >= signed(period)),
        };

        let idle = user_quiet && mouse_quiet;
        let mut idle_started = self.idle_started.lock().expect("idle_started mutex poisoned");
        match (*idle_started, idle) {
            (None, true) => {
                *idle_started = Some(now);
                self.timestamps.set(names::IDLE_STARTED, now);
                drop(idle_started);
                self.bus.pub_immediate("wake_daemons", serde_json::json!({}));
            }
            (Some(_), false) => {
                *idle_started = None;
            }
            _ => {}
        }
        idle
    }

    fn currently_very_idle(&self) -> bool {
        match *self.idle_started.lock().expect("idle_started mutex poisoned") {
            Some(started) => Timestamp::now().duration_since(started) >= signed(VERY_IDLE_THRESHOLD),
            None => false,
        }
    }

    fn system_busy(&self) -> bool {
        let Some(ceiling) = self.config.idle_cpu_max else {
            return false;
        };
        let now = Timestamp::now();
        let should_refresh = self
            .timestamps
            .get(names::LAST_CPU_CHECK)
            .is_none_or(|last| now.duration_since(last) >= signed(CPU_SAMPLE_INTERVAL));

        if should_refresh {
            let mut system = self.system.lock().expect("sysinfo System mutex poisoned");
            system.refresh_cpu_usage();
            self.timestamps.set(names::LAST_CPU_CHECK, now);
            let busy = system.cpus().iter().any(|cpu| cpu.cpu_usage() > ceiling);
            self.flags.set_system_busy(busy);
        }
        self.flags.system_busy()
    }

    fn just_woke_from_sleep(&self) -> bool {
        self.flags.just_woke_from_sleep()
    }
}

/// Headless server variant: no idle heuristic is needed, so every
/// predicate is a trivial constant.
#[derive(Debug, Default)]
pub struct ServerIdleDetector {
    flags: Mutex<Option<Arc<RuntimeFlags>>>,
}

impl ServerIdleDetector {
    pub fn new(flags: Arc<RuntimeFlags>) -> Self {
        flags.set_just_woke_from_sleep(false);
        Self { flags: Mutex::new(Some(flags)) }
    }
}

impl IdleDetector for ServerIdleDetector {
    fn sleep_check(&self) {
        if let Some(flags) = self.flags.lock().expect("flags mutex poisoned").as_ref() {
            flags.set_just_woke_from_sleep(false);
        }
    }

    fn currently_idle(&self) -> bool {
        false
    }

    fn currently_very_idle(&self) -> bool {
        false
    }

    fn system_busy(&self) -> bool {
        false
    }

    fn just_woke_from_sleep(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(config: ClientIdleConfig) -> (ClientIdleDetector, Arc<Timestamps>, Arc<RuntimeFlags>) {
        let timestamps = Arc::new(Timestamps::new());
        let flags = Arc::new(RuntimeFlags::new());
        let bus = PubSub::new(flags.clone());
        let detector = ClientIdleDetector::new(timestamps.clone(), flags.clone(), bus, config);
        (detector, timestamps, flags)
    }

    #[test]
    fn idle_is_false_before_boot_grace_elapses() {
        let (detector, timestamps, _flags) = detector(ClientIdleConfig {
            idle_normal: true,
            idle_period: None,
            mouse_idle_period: None,
            idle_cpu_max: None,
        });
        timestamps.set(names::BOOT, Timestamp::now());
        assert!(!detector.currently_idle());
    }

    #[test]
    fn idle_true_once_boot_grace_and_quiet_periods_elapse() {
        let (detector, timestamps, _flags) = detector(ClientIdleConfig {
            idle_normal: true,
            idle_period: Some(Duration::from_secs(30)),
            mouse_idle_period: Some(Duration::from_secs(30)),
            idle_cpu_max: None,
        });
        let now = Timestamp::now();
        timestamps.set(names::BOOT, now - signed(Duration::from_secs(200)));
        timestamps.set(names::LAST_USER_ACTION, now - signed(Duration::from_secs(60)));
        timestamps.set(names::LAST_MOUSE_ACTION, now - signed(Duration::from_secs(60)));

        assert!(detector.currently_idle());
    }

    #[test]
    fn idle_normal_false_forces_not_idle() {
        let (detector, timestamps, _flags) = detector(ClientIdleConfig {
            idle_normal: false,
            idle_period: None,
            mouse_idle_period: None,
            idle_cpu_max: None,
        });
        timestamps.set(names::BOOT, Timestamp::now() - signed(Duration::from_secs(200)));
        assert!(!detector.currently_idle());
    }

    #[test]
    fn sleep_check_detects_suspension_after_gap() {
        let (detector, timestamps, flags) = detector(ClientIdleConfig::default());
        timestamps.set(names::LAST_SLEEP_CHECK, Timestamp::now() - signed(Duration::from_secs(3600)));

        detector.sleep_check();

        assert!(flags.just_woke_from_sleep());
        let now_awake = timestamps.get(names::NOW_AWAKE).unwrap();
        assert!(now_awake > Timestamp::now());
    }

    #[test]
    fn sleep_check_clears_flag_without_a_gap() {
        let (detector, timestamps, flags) = detector(ClientIdleConfig::default());
        timestamps.set(names::LAST_SLEEP_CHECK, Timestamp::now());
        flags.set_just_woke_from_sleep(true);

        detector.sleep_check();

        assert!(!flags.just_woke_from_sleep());
    }

    #[test]
    fn null_idle_cpu_max_disables_busy_probe() {
        let (detector, _timestamps, _flags) = detector(ClientIdleConfig {
            idle_normal: true,
            idle_period: None,
            mouse_idle_period: None,
            idle_cpu_max: None,
        });
        assert!(!detector.system_busy());
    }

    #[test]
    fn server_detector_is_always_trivial() {
        let flags = Arc::new(RuntimeFlags::new());
        flags.set_just_woke_from_sleep(true);
        let server = ServerIdleDetector::new(flags.clone());

        assert!(!server.just_woke_from_sleep());
        assert!(!server.currently_idle());
        assert!(!server.currently_very_idle());
        assert!(!server.system_busy());
    }
}
