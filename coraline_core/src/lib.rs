pub mod config;
pub mod driver;
pub mod executor;
pub mod handler;
pub mod mutator;
pub mod scheduler;
pub mod score;
pub mod seed;
pub mod session;
pub mod workdir;

pub use config::CoralineConfig;
pub use driver::{FuzzDriver, FuzzError, FuzzStats};
pub use executor::{ExecutionHarness, HarnessError, Outcome};
pub use handler::{Finding, Findings, FnHandler, LogHandler, NoOpHandler, OutcomeHandler};
pub use mutator::{MutationRule, RuleKind, ThresholdRule, WeightedRule};
pub use scheduler::{IndexIter, IndexRange};
pub use score::{ScoreEntry, ScoreError, ScoreTable};
pub use session::{Session, SessionError};
pub use workdir::{WorkDir, WorkDirError};
