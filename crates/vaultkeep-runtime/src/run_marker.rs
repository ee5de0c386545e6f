//! Run-marker file: detects a second instance of the same role starting
//! against a database directory that is already claimed.
//!
//! The marker records `<pid>\n<create_time>\n`. A bare pid is not enough:
//! pids recycle, so a stale marker left behind by a crash could otherwise
//! be mistaken for a live process that happens to reuse the same pid. The
//! recorded process creation time disambiguates that case.

use std::fs;
use std::path::{Path, PathBuf};

use sysinfo::{Pid, System};

use vaultkeep_core::Error;

use crate::error::Result;

fn marker_path(db_dir: &Path, role: &str) -> PathBuf {
    db_dir.join(format!("{role}_running"))
}

fn this_process_create_time() -> Result<u64> {
    let mut system = System::new();
    let pid = Pid::from_u32(std::process::id());
    system.refresh_process(pid);
    system
        .process(pid)
        .map(|process| process.start_time())
        .ok_or_else(|| Error::internal("could not read this process's own entry from the process table"))
}

/// A claimed run-marker. Dropping it removes the marker file, as a safety
/// net for crash paths that skip the explicit shutdown call.
pub struct RunMarker {
    path: PathBuf,
}

impl RunMarker {
    /// Claims the marker for `role` under `db_dir`, overwriting whatever
    /// was there. Callers should check [`is_already_running`] first.
    pub fn claim(db_dir: &Path, role: &str) -> Result<Self> {
        let path = marker_path(db_dir, role);
        let create_time = this_process_create_time()?;
        let contents = format!("{}\n{}\n", std::process::id(), create_time);
        fs::write(&path, contents).map_err(|err| Error::file_system("could not write run-marker file").with_source(err))?;
        Ok(Self { path })
    }

    /// Removes the marker file early, ahead of `Drop`. Idempotent.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RunMarker {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Returns `true` if a *different, still-alive* process already holds the
/// marker for `role` under `db_dir`. A marker recorded by this process
/// itself is never a conflict.
pub fn is_already_running(db_dir: &Path, role: &str) -> bool {
    let path = marker_path(db_dir, role);
    let Ok(contents) = fs::read_to_string(&path) else {
        return false;
    };
    let mut lines = contents.lines();
    let Some(Ok(recorded_pid)) = lines.next().map(str::parse::<u32>) else {
        return false;
    };
    let Some(Ok(recorded_create_time)) = lines.next().map(str::parse::<u64>) else {
        return false;
    };

    if recorded_pid == std::process::id() {
        return false;
    }

    let mut system = System::new();
    let pid = Pid::from_u32(recorded_pid);
    system.refresh_process(pid);
    match system.process(pid) {
        Some(process) => process.start_time() == recorded_create_time,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_writes_pid_and_create_time() {
        let dir = tempfile::tempdir().unwrap();
        let marker = RunMarker::claim(dir.path(), "server").unwrap();
        let contents = fs::read_to_string(marker_path(dir.path(), "server")).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap().parse::<u32>().unwrap(), std::process::id());
        assert!(lines.next().unwrap().parse::<u64>().is_ok());
    }

    #[test]
    fn drop_removes_the_marker_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let marker = RunMarker::claim(dir.path(), "server").unwrap();
            marker.path.clone()
        };
        assert!(!path.exists());
    }

    #[test]
    fn self_claimed_marker_is_never_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let _marker = RunMarker::claim(dir.path(), "server").unwrap();
        assert!(!is_already_running(dir.path(), "server"));
    }

    #[test]
    fn missing_marker_is_not_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_already_running(dir.path(), "server"));
    }

    #[test]
    fn garbage_marker_contents_are_not_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(marker_path(dir.path(), "server"), "not a pid\n").unwrap();
        assert!(!is_already_running(dir.path(), "server"));
    }
}
