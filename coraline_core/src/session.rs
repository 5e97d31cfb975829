use crate::score::{ScoreError, ScoreTable};
use crate::seed;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors that abort a session before any iteration runs.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to read {what} file {path:?}: {source}")]
    Io {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid score table {path:?}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: ScoreError,
    },
}

/// The immutable state shared by every iteration of a fuzzing session.
#[derive(Debug, Clone)]
pub struct Session {
    sample: Vec<u8>,
    scores: ScoreTable,
    seed: String,
}

impl Session {
    pub fn new(sample: Vec<u8>, scores: ScoreTable, seed: Option<String>) -> Self {
        Self {
            sample,
            scores,
            seed: seed.unwrap_or_else(seed::generate),
        }
    }

    /// Reads the sample and score files once and fixes the session seed,
    /// generating one if the caller did not supply it.
    pub fn load(
        sample_path: &Path,
        scores_path: &Path,
        seed: Option<String>,
    ) -> Result<Self, SessionError> {
        let sample = read_file("sample", sample_path)?;
        let raw_scores = read_file("score", scores_path)?;
        let scores = ScoreTable::parse(&raw_scores).map_err(|source| SessionError::Format {
            path: scores_path.to_path_buf(),
            source,
        })?;

        let session = Self::new(sample, scores, seed);
        info!(
            seed = %session.seed,
            sample_len = session.sample.len(),
            score_entries = session.scores.len(),
            "session loaded"
        );
        Ok(session)
    }

    pub fn sample(&self) -> &[u8] {
        &self.sample
    }

    pub fn scores(&self) -> &ScoreTable {
        &self.scores
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }
}

fn read_file(what: &'static str, path: &Path) -> Result<Vec<u8>, SessionError> {
    fs::read(path).map_err(|source| SessionError::Io {
        what,
        path: path.to_path_buf(),
        source,
    })
}
