//! Audio player process management.
//!
//! The call controller only needs three operations from a player: start it
//! for a resource, kill it, and ask whether it has finished on its own.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{AtError, AtResult};

/// Starts playback of an audio resource.
pub trait AudioPlayer: Send + Sync {
    /// Start playing `path`.
    fn spawn(&self, path: &Path) -> AtResult<Box<dyn AudioHandle>>;
}

/// A running playback.
pub trait AudioHandle: Send {
    /// Stop playback. Safe to call after the process has exited.
    fn kill(&mut self);

    /// `true` once playback has ended by itself or been killed.
    fn has_exited(&mut self) -> bool;
}

/// Plays audio by running an external program with the resource path as
/// its last argument, e.g. `mpg123 -q <path>`.
#[derive(Debug, Clone)]
pub struct ProcessPlayer {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessPlayer {
    /// Player running `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the resource path.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args
            .into_iter()
            .map(Into::into)
            .collect();
        self
    }
}

impl AudioPlayer for ProcessPlayer {
    fn spawn(&self, path: &Path) -> AtResult<Box<dyn AudioHandle>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AtError::Audio {
                path: path.to_path_buf(),
                source,
            })?;
        info!(
            "Started {} for {} (pid {:?})",
            self.program.display(),
            path.display(),
            child.id()
        );
        Ok(Box::new(ProcessHandle {
            child,
            path: path.to_path_buf(),
        }))
    }
}

struct ProcessHandle {
    child: Child,
    path: PathBuf,
}

impl AudioHandle for ProcessHandle {
    fn kill(&mut self) {
        match self.child.start_kill() {
            Ok(()) => debug!("Killed player for {}", self.path.display()),
            // already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => warn!("Failed to kill player for {}: {}", self.path.display(), e),
        }
        // reap now if it is already gone, otherwise tokio reaps in the background
        let _ = self.child.try_wait();
    }

    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("Player for {} exited: {}", self.path.display(), status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Cannot poll player for {}: {}", self.path.display(), e);
                true
            }
        }
    }
}
