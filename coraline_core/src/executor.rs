use crate::seed;
use crate::workdir::WorkDir;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Environment variable pointing the target at the session's `output/` directory.
pub const OUTPUT_DIR_ENV: &str = "CORALINE_OUTPUT_DIR";

/// How one execution of the target ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exited on its own with a non-negative status code.
    Normal(i32),
    /// Still running when the timeout elapsed; it was killed and reaped.
    Hang,
    /// Terminated abnormally. On unix the status is the negated signal number.
    Crash(i32),
}

impl Outcome {
    pub fn from_exit_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Outcome::Crash(-signal);
            }
        }
        match status.code() {
            Some(code) if code >= 0 => Outcome::Normal(code),
            Some(code) => Outcome::Crash(code),
            None => Outcome::Crash(-1),
        }
    }

    pub fn is_finding(&self) -> bool {
        !matches!(self, Outcome::Normal(_))
    }
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("target command is empty")]
    EmptyCommand,
    #[error("failed to spawn target '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write mutated input to {path:?}: {source}")]
    InputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for target: {0}")]
    Wait(#[source] io::Error),
    #[error("failed to kill timed-out target (pid {pid}): {source}")]
    Kill {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

/// Runs the target once per mutated buffer and classifies how it ended.
///
/// The target is invoked as `<command...> <input path>`; its standard streams
/// are discarded. Each call owns its transient input file and child process, so
/// one harness can be shared by several worker threads.
pub struct ExecutionHarness {
    command: Vec<String>,
    poll_interval: Duration,
    workdir: WorkDir,
    seed_hex: String,
    cleanup_failures: AtomicU64,
}

impl ExecutionHarness {
    /// `command` is the target program followed by any leading arguments.
    pub fn new(command: Vec<String>, workdir: WorkDir, seed: &str) -> Result<Self, HarnessError> {
        if command.is_empty() {
            return Err(HarnessError::EmptyCommand);
        }
        Ok(Self {
            command,
            poll_interval: DEFAULT_POLL_INTERVAL,
            workdir,
            seed_hex: seed::hex(seed),
            cleanup_failures: AtomicU64::new(0),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Number of transient input files that could not be removed so far.
    pub fn cleanup_failures(&self) -> u64 {
        self.cleanup_failures.load(Ordering::Relaxed)
    }

    /// Path the mutated buffer for `index` is written to while it executes.
    pub fn input_path(&self, index: u64) -> PathBuf {
        self.workdir.input_path(&self.seed_hex, index)
    }

    /// Writes `buffer` to the iteration's input file, runs the target against
    /// it for at most `timeout`, and removes the file again.
    ///
    /// The child is always terminated and reaped before this returns, and the
    /// input file is removed on every path. A failed removal is logged and
    /// counted but does not fail the run.
    pub fn run(&self, buffer: &[u8], index: u64, timeout: Duration) -> Result<Outcome, HarnessError> {
        let input = TransientInput::write(self.input_path(index), buffer)?;
        let result = self.execute(input.path(), timeout);

        if let Err(e) = input.remove() {
            self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
            warn!(index, error = %e, "failed to remove transient input file");
        }

        if let Ok(outcome) = &result {
            debug!(index, ?outcome, "target finished");
        }
        result
    }

    fn execute(&self, input: &Path, timeout: Duration) -> Result<Outcome, HarnessError> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg(input)
            .env(OUTPUT_DIR_ENV, self.workdir.output_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so a hang can be killed together with its descendants.
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            program: self.command[0].clone(),
            source,
        })?;

        let mut child = ChildGuard::new(child);
        match child.wait_timeout(timeout, self.poll_interval)? {
            Some(status) => Ok(Outcome::from_exit_status(status)),
            None => {
                child.kill_and_reap()?;
                Ok(Outcome::Hang)
            }
        }
    }
}

/// A mutated input on disk. Removed on drop if not removed explicitly.
struct TransientInput {
    path: PathBuf,
    removed: bool,
}

impl TransientInput {
    fn write(path: PathBuf, buffer: &[u8]) -> Result<Self, HarnessError> {
        let input = Self {
            path,
            removed: false,
        };
        fs::write(&input.path, buffer).map_err(|source| HarnessError::InputWrite {
            path: input.path.clone(),
            source,
        })?;
        Ok(input)
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

impl Drop for TransientInput {
    fn drop(&mut self) {
        if !self.removed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Owns a spawned target. A child that was never reaped is killed and reaped
/// on drop, so no early return or panic can leave it running. On unix the
/// target leads its own process group and the whole group is killed.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    /// Polls until the child exits or `timeout` elapses. `None` means it is
    /// still running. A timeout too large to represent as an `Instant` never
    /// elapses.
    fn wait_timeout(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<ExitStatus>, HarnessError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(status) = self.child.try_wait().map_err(HarnessError::Wait)? {
                self.reaped = true;
                return Ok(Some(status));
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    poll_interval.min(deadline - now)
                }
                None => poll_interval,
            };
            std::thread::sleep(pause);
        }
    }

    /// Sends SIGKILL to the target's process group, falling back to the
    /// child alone once the group is gone.
    fn kill_tree(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            if let Ok(pgid) = libc::pid_t::try_from(self.child.id()) {
                // SAFETY: killpg takes plain integers; the group was created at spawn.
                if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
                    return Ok(());
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    return Err(err);
                }
            }
        }
        self.child.kill()
    }

    fn kill_and_reap(&mut self) -> Result<(), HarnessError> {
        let pid = self.child.id();
        debug!(pid, "target timed out, killing");
        if let Err(source) = self.kill_tree() {
            // It may have exited between the last poll and the kill.
            if self.child.try_wait().map_err(HarnessError::Wait)?.is_none() {
                return Err(HarnessError::Kill { pid, source });
            }
        }
        self.child.wait().map_err(HarnessError::Wait)?;
        self.reaped = true;
        Ok(())
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.kill_tree();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh_harness(script: &str) -> (TempDir, ExecutionHarness) {
        let scratch = tempfile::tempdir().unwrap();
        let workdir = WorkDir::create(scratch.path().join("work")).unwrap();
        let command = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "coraline-target".to_string(),
        ];
        let harness = ExecutionHarness::new(command, workdir, "x").unwrap();
        (scratch, harness)
    }

    #[test]
    fn normal_exit_is_classified_with_its_code() {
        let (_scratch, harness) = sh_harness("exit 0");
        let outcome = harness.run(b"data", 0, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, Outcome::Normal(0));

        let (_scratch, harness) = sh_harness("exit 3");
        let outcome = harness.run(b"data", 1, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, Outcome::Normal(3));
        assert!(!outcome.is_finding());
    }

    #[test]
    fn target_receives_the_mutated_buffer_as_its_only_argument() {
        let (_scratch, harness) =
            sh_harness(r#"[ "$#" -eq 1 ] && [ "$(cat "$1")" = "hello" ] || exit 9"#);
        let outcome = harness.run(b"hello", 5, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, Outcome::Normal(0));
    }

    #[test]
    fn fault_signal_is_a_crash_with_negative_status() {
        let (_scratch, harness) = sh_harness("kill -SEGV $$");
        let outcome = harness.run(b"data", 2, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, Outcome::Crash(-11));
        assert!(outcome.is_finding());
    }

    #[test]
    fn slow_target_is_a_hang_and_is_reaped() {
        let scratch = tempfile::tempdir().unwrap();
        let pid_file = scratch.path().join("pid");
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
        let (_work, harness) = sh_harness(&script);

        let started = Instant::now();
        let outcome = harness.run(b"data", 3, Duration::from_millis(500)).unwrap();
        assert_eq!(outcome, Outcome::Hang);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!harness.input_path(3).exists());

        #[cfg(target_os = "linux")]
        {
            let pid = fs::read_to_string(&pid_file).unwrap();
            let proc_entry = PathBuf::from("/proc").join(pid.trim());
            assert!(!proc_entry.exists(), "target {} still running", pid.trim());
        }
    }

    /// Whether `pid` has exited. A zombie counts as exited, since reaping an
    /// orphan is up to whichever process adopted it.
    #[cfg(target_os = "linux")]
    fn process_gone(pid: &str) -> bool {
        match fs::read_to_string(PathBuf::from("/proc").join(pid).join("stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next())
                .is_some_and(|state| state == 'Z' || state == 'X'),
        }
    }

    #[test]
    fn hang_kills_background_children_of_the_target() {
        let scratch = tempfile::tempdir().unwrap();
        let pid_file = scratch.path().join("bg-pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
        let (_work, harness) = sh_harness(&script);

        let outcome = harness.run(b"data", 7, Duration::from_millis(500)).unwrap();
        assert_eq!(outcome, Outcome::Hang);

        #[cfg(target_os = "linux")]
        {
            let pid = fs::read_to_string(&pid_file).unwrap();
            let pid = pid.trim();
            let deadline = Instant::now() + Duration::from_secs(5);
            while !process_gone(pid) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            assert!(process_gone(pid), "background child {pid} survived the hang");
        }
    }

    #[test]
    fn huge_timeout_waits_for_the_target_instead_of_overflowing() {
        let (_scratch, harness) = sh_harness("exit 0");
        let outcome = harness.run(b"data", 8, Duration::MAX).unwrap();
        assert_eq!(outcome, Outcome::Normal(0));

        let (_scratch, harness) = sh_harness("exit 5");
        let outcome = harness.run(b"data", 9, Duration::from_secs(u64::MAX)).unwrap();
        assert_eq!(outcome, Outcome::Normal(5));
    }

    #[test]
    fn input_file_is_removed_after_every_outcome() {
        for (index, script) in ["exit 0", "exit 1", "kill -SEGV $$"].iter().enumerate() {
            let (_scratch, harness) = sh_harness(script);
            let index = index as u64;
            harness.run(b"data", index, Duration::from_secs(5)).unwrap();
            assert!(!harness.input_path(index).exists());
            assert_eq!(harness.cleanup_failures(), 0);
        }
    }

    #[test]
    fn target_removing_its_own_input_is_not_a_cleanup_failure() {
        let (_scratch, harness) = sh_harness(r#"rm -f "$1""#);
        let outcome = harness.run(b"data", 4, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, Outcome::Normal(0));
        assert_eq!(harness.cleanup_failures(), 0);
    }

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let scratch = tempfile::tempdir().unwrap();
        let workdir = WorkDir::create(scratch.path()).unwrap();
        let harness = ExecutionHarness::new(
            vec!["./this_command_does_not_exist_ever_12345".to_string()],
            workdir,
            "x",
        )
        .unwrap();

        let err = harness.run(b"data", 0, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }), "got {err:?}");
        assert!(!harness.input_path(0).exists());
    }

    #[test]
    fn empty_command_is_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let workdir = WorkDir::create(scratch.path()).unwrap();
        let err = ExecutionHarness::new(Vec::new(), workdir, "x").err().unwrap();
        assert!(matches!(err, HarnessError::EmptyCommand));
    }

    #[test]
    fn target_sees_output_dir() {
        let (_scratch, harness) = sh_harness(r#"[ -d "$CORALINE_OUTPUT_DIR" ] || exit 4"#);
        let outcome = harness.run(b"", 6, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, Outcome::Normal(0));
    }
}
