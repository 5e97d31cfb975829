use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const INPUT_DIR: &str = "input";
pub const OUTPUT_DIR: &str = "output";

#[derive(Error, Debug)]
pub enum WorkDirError {
    #[error("work directory I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The on-disk area a fuzzing session works in.
///
/// `input/` holds the transient mutated files, one per in-flight iteration.
/// `output/` is reserved for artifacts the target itself produces; the fuzzer
/// never writes there.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
    input: PathBuf,
    output: PathBuf,
}

impl WorkDir {
    /// Creates `root`, `root/input` and `root/output` if they don't already exist.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, WorkDirError> {
        let root = root.into();
        let input = root.join(INPUT_DIR);
        let output = root.join(OUTPUT_DIR);
        for dir in [&input, &output] {
            fs::create_dir_all(dir).map_err(|source| WorkDirError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(Self {
            root,
            input,
            output,
        })
    }

    /// Default root for a session: `<system temp>/coraline-<hex seed>`.
    pub fn default_root(seed_hex: &str) -> PathBuf {
        std::env::temp_dir().join(format!("coraline-{seed_hex}"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> &Path {
        &self.input
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    /// Path of the transient input file for one iteration: `input/<hex seed>_<index>`.
    pub fn input_path(&self, seed_hex: &str, index: u64) -> PathBuf {
        self.input.join(format!("{seed_hex}_{index}"))
    }

    /// Removes the transient working locations.
    ///
    /// `input/` goes entirely. `output/` and the root are only removed when
    /// empty, so target artifacts survive. Safe to call on an already clean area.
    pub fn cleanup(&self) -> Result<(), WorkDirError> {
        match fs::remove_dir_all(&self.input) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(WorkDirError::Io {
                    path: self.input.clone(),
                    source,
                });
            }
        }
        remove_if_empty(&self.output)?;
        remove_if_empty(&self.root)?;
        Ok(())
    }
}

fn remove_if_empty(dir: &Path) -> Result<(), WorkDirError> {
    let is_empty = match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(WorkDirError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };
    if !is_empty {
        return Ok(());
    }
    match fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(WorkDirError::Io {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
