use tracing::warn;

/// Receives the findings of a fuzzing run.
///
/// Normal exits are not dispatched. Both methods default to no-ops so a handler
/// only implements what it cares about.
pub trait OutcomeHandler: Send {
    fn on_hang(&mut self, index: u64) {
        let _ = index;
    }

    fn on_crash(&mut self, index: u64, status: i32) {
        let _ = (index, status);
    }
}

/// Ignores every finding. The driver still counts them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl OutcomeHandler for NoOpHandler {}

/// A finding as recorded by [`Findings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finding {
    Hang { index: u64 },
    Crash { index: u64, status: i32 },
}

impl Finding {
    pub fn index(&self) -> u64 {
        match self {
            Finding::Hang { index } | Finding::Crash { index, .. } => *index,
        }
    }
}

/// Collects findings in the order they were reported.
#[derive(Debug, Default, Clone)]
pub struct Findings {
    pub found: Vec<Finding>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hangs(&self) -> impl Iterator<Item = u64> + '_ {
        self.found.iter().filter_map(|f| match f {
            Finding::Hang { index } => Some(*index),
            Finding::Crash { .. } => None,
        })
    }

    pub fn crashes(&self) -> impl Iterator<Item = (u64, i32)> + '_ {
        self.found.iter().filter_map(|f| match f {
            Finding::Crash { index, status } => Some((*index, *status)),
            Finding::Hang { .. } => None,
        })
    }
}

impl OutcomeHandler for Findings {
    fn on_hang(&mut self, index: u64) {
        self.found.push(Finding::Hang { index });
    }

    fn on_crash(&mut self, index: u64, status: i32) {
        self.found.push(Finding::Crash { index, status });
    }
}

/// Adapts a pair of closures into an [`OutcomeHandler`].
pub struct FnHandler<H, C>
where
    H: FnMut(u64) + Send,
    C: FnMut(u64, i32) + Send,
{
    on_hang: H,
    on_crash: C,
}

impl<H, C> FnHandler<H, C>
where
    H: FnMut(u64) + Send,
    C: FnMut(u64, i32) + Send,
{
    pub fn new(on_hang: H, on_crash: C) -> Self {
        Self { on_hang, on_crash }
    }
}

impl<H, C> OutcomeHandler for FnHandler<H, C>
where
    H: FnMut(u64) + Send,
    C: FnMut(u64, i32) + Send,
{
    fn on_hang(&mut self, index: u64) {
        (self.on_hang)(index)
    }

    fn on_crash(&mut self, index: u64, status: i32) {
        (self.on_crash)(index, status)
    }
}

/// Logs each finding at `warn` with the md5 of its mutated input, then
/// forwards it to `inner`.
///
/// `input_for` re-derives the buffer of an index, typically
/// [`FuzzDriver::mutated`](crate::driver::FuzzDriver::mutated). It is only
/// called for findings.
pub struct LogHandler<H, F> {
    inner: H,
    input_for: F,
}

impl<H, F> LogHandler<H, F>
where
    H: OutcomeHandler,
    F: Fn(u64) -> Vec<u8> + Send,
{
    pub fn new(inner: H, input_for: F) -> Self {
        Self { inner, input_for }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub fn into_inner(self) -> H {
        self.inner
    }

    fn input_md5(&self, index: u64) -> String {
        input_digest(&(self.input_for)(index))
    }
}

impl<H, F> OutcomeHandler for LogHandler<H, F>
where
    H: OutcomeHandler,
    F: Fn(u64) -> Vec<u8> + Send,
{
    fn on_hang(&mut self, index: u64) {
        warn!(index, input_md5 = %self.input_md5(index), "hang");
        self.inner.on_hang(index);
    }

    fn on_crash(&mut self, index: u64, status: i32) {
        warn!(index, status, input_md5 = %self.input_md5(index), "crash");
        self.inner.on_crash(index, status);
    }
}

/// Lowercase hex md5 of a mutated input.
pub fn input_digest(input: &[u8]) -> String {
    format!("{:x}", md5::compute(input))
}
