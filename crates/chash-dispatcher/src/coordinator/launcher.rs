//! Spawning and killing worker processes.
//!
//! The dispatcher only talks to [`WorkerLauncher`] and [`WorkerProcess`], so
//! tests can run workers in-process instead of as child processes.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// A running worker.
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    /// OS process id, if the worker is a process.
    fn pid(&self) -> Option<u32>;

    /// Stop the worker.
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Starts workers listening on a given port.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start the worker at `executable` on `port`.
    async fn launch(&self, executable: &Path, port: u16)
        -> std::io::Result<Box<dyn WorkerProcess>>;
}

/// Launches workers as child processes: `<executable> --port=<port>`.
///
/// Children inherit the dispatcher's stdout and stderr and are killed if
/// their handle is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        executable: &Path,
        port: u16,
    ) -> std::io::Result<Box<dyn WorkerProcess>> {
        let child = Command::new(executable)
            .arg(format!("--port={}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        debug!(
            "Spawned {} on port {} (pid {:?})",
            executable.display(),
            port,
            child.id()
        );
        Ok(Box::new(ChildWorker { child }))
    }
}

struct ChildWorker {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildWorker {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        // Sends SIGKILL and reaps the child.
        Child::kill(&mut self.child).await
    }
}
