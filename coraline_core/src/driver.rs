use crate::executor::{DEFAULT_TIMEOUT, ExecutionHarness, HarnessError, Outcome};
use crate::handler::OutcomeHandler;
use crate::mutator::{MutationRule, ThresholdRule};
use crate::scheduler::{IndexIter, IndexRange};
use crate::session::Session;
use crate::workdir::WorkDirError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum FuzzError {
    #[error("iteration {index} could not be executed: {source}")]
    Harness {
        index: u64,
        #[source]
        source: HarnessError,
    },
    #[error(transparent)]
    WorkDir(#[from] WorkDirError),
}

/// Totals for one call to [`FuzzDriver::fuzz`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuzzStats {
    pub executions: u64,
    pub normal: u64,
    pub hangs: u64,
    pub crashes: u64,
    pub cleanup_failures: u64,
    /// The run stopped because the cancel flag was raised.
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl FuzzStats {
    fn record(&mut self, outcome: Outcome) {
        self.executions += 1;
        match outcome {
            Outcome::Normal(_) => self.normal += 1,
            Outcome::Hang => self.hangs += 1,
            Outcome::Crash(_) => self.crashes += 1,
        }
    }

    pub fn findings(&self) -> u64 {
        self.hangs + self.crashes
    }

    pub fn execs_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.executions as f64 / secs
        } else {
            0.0
        }
    }
}

/// State the workers of one run share.
struct RunState<'h, H: OutcomeHandler> {
    handler: &'h mut H,
    stats: FuzzStats,
    error: Option<FuzzError>,
}

/// Drives a session: mutate, execute and report, once per index.
pub struct FuzzDriver {
    session: Session,
    rule: Box<dyn MutationRule>,
    harness: ExecutionHarness,
    timeout: Duration,
    threads: usize,
    cancel: Arc<AtomicBool>,
}

impl FuzzDriver {
    pub fn new(session: Session, harness: ExecutionHarness) -> Self {
        Self {
            session,
            rule: Box::new(ThresholdRule),
            harness,
            timeout: DEFAULT_TIMEOUT,
            threads: 1,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_rule(self, rule: impl MutationRule + 'static) -> Self {
        self.with_boxed_rule(Box::new(rule))
    }

    pub fn with_boxed_rule(mut self, rule: Box<dyn MutationRule>) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of worker threads. Values below 1 are treated as 1.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn harness(&self) -> &ExecutionHarness {
        &self.harness
    }

    /// Flag that stops the run once raised. No further index is started, and
    /// the outcome of an iteration that was in flight is not reported.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// The buffer the driver executes for `index`.
    pub fn mutated(&self, index: u64) -> Vec<u8> {
        self.rule.mutate(
            self.session.seed(),
            index,
            self.session.sample(),
            self.session.scores(),
        )
    }

    /// Runs every index of `range` exactly once and reports hangs and crashes
    /// to `handler`.
    ///
    /// A spawn failure (or any other harness error) stops the run and is
    /// returned. Findings never stop it.
    pub fn fuzz<H: OutcomeHandler>(
        &self,
        range: IndexRange,
        handler: &mut H,
    ) -> Result<FuzzStats, FuzzError> {
        info!(
            %range,
            seed = %self.session.seed(),
            threads = self.threads,
            timeout_ms = self.timeout.as_millis() as u64,
            "starting fuzz run"
        );

        let started = Instant::now();
        let cleanup_failures_before = self.harness.cleanup_failures();
        let producer = Mutex::new(range.into_iter());
        let state = Mutex::new(RunState {
            handler,
            stats: FuzzStats::default(),
            error: None,
        });
        let abort = AtomicBool::new(false);

        if self.threads == 1 {
            self.worker(&producer, &state, &abort);
        } else {
            std::thread::scope(|scope| {
                for _ in 0..self.threads {
                    scope.spawn(|| self.worker(&producer, &state, &abort));
                }
            });
        }

        let RunState { stats, error, .. } = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = error {
            return Err(err);
        }

        let mut stats = stats;
        stats.elapsed = started.elapsed();
        stats.cleanup_failures = self.harness.cleanup_failures() - cleanup_failures_before;
        info!(
            executions = stats.executions,
            hangs = stats.hangs,
            crashes = stats.crashes,
            cancelled = stats.cancelled,
            elapsed = ?stats.elapsed,
            "fuzz run finished"
        );
        Ok(stats)
    }

    fn worker<H: OutcomeHandler>(
        &self,
        producer: &Mutex<IndexIter>,
        state: &Mutex<RunState<'_, H>>,
        abort: &AtomicBool,
    ) {
        loop {
            if abort.load(Ordering::SeqCst) {
                return;
            }
            if self.is_cancelled() {
                lock(state).stats.cancelled = true;
                return;
            }
            let Some(index) = lock(producer).next() else {
                return;
            };

            let buffer = self.mutated(index);
            let outcome = match self.harness.run(&buffer, index, self.timeout) {
                Ok(outcome) => outcome,
                Err(source) => {
                    error!(index, error = %source, "harness failed, stopping run");
                    abort.store(true, Ordering::SeqCst);
                    let mut state = lock(state);
                    if state.error.is_none() {
                        state.error = Some(FuzzError::Harness { index, source });
                    }
                    return;
                }
            };

            if self.is_cancelled() {
                debug!(index, ?outcome, "run cancelled, discarding in-flight outcome");
                lock(state).stats.cancelled = true;
                return;
            }

            let mut state = lock(state);
            state.stats.record(outcome);
            match outcome {
                Outcome::Normal(_) => {}
                Outcome::Hang => state.handler.on_hang(index),
                Outcome::Crash(status) => state.handler.on_crash(index, status),
            }
        }
    }

    /// Removes the session's transient working locations. Call only once every
    /// run on this driver has returned.
    pub fn cleanup(&self) -> Result<(), WorkDirError> {
        self.harness.workdir().cleanup()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
