//! Scratch space for one run and the capture files that move through it.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::error::Result;

/// Scoped scratch directory. Everything inside is removed when it drops,
/// whether the run succeeded or not. It is created next to the final output
/// so promotion is a same-filesystem rename.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create_in(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix(".capremap-").tempdir_in(parent)?;
        debug!("Workspace at {:?}", dir.path());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path { self.dir.path() }

    pub fn cache_path(&self) -> PathBuf { self.dir.path().join("tags.cache") }

    pub fn pairs_path(&self) -> PathBuf { self.dir.path().join("pairs.json") }

    pub fn stage_path(&self, step: usize) -> PathBuf {
        self.dir.path().join(format!("stage-{:04}.pcap", step))
    }
}

/// One snapshot in the rewrite chain. Step 0 is the caller's input and is
/// never deleted; later steps are workspace files owned by the driver.
#[derive(Debug)]
pub struct CaptureStage {
    path: PathBuf,
    step: usize,
}

impl CaptureStage {
    pub fn initial(path: &Path) -> Self {
        Self { path: path.to_path_buf(), step: 0 }
    }

    pub(crate) fn derived(path: PathBuf, step: usize) -> Self {
        Self { path, step }
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn step(&self) -> usize { self.step }

    pub fn is_transient(&self) -> bool { self.step > 0 }

    /// Delete the file if it belongs to the chain.
    pub(crate) fn discard(self) -> Result<()> {
        if self.is_transient() {
            debug!("Removing superseded stage {:?}", self.path);
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Move this stage to `dest`, replacing whatever is there.
    pub fn promote(self, dest: &Path) -> Result<()> {
        if self.is_transient() {
            fs::rename(&self.path, dest)?;
        } else {
            fs::copy(&self.path, dest)?;
        }
        Ok(())
    }
}
