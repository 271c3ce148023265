use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::HelperTransport;
use crate::error::{Error, Result};

/// Runs each helper call as a fresh child process.
///
/// Calls share nothing but a semaphore that bounds how many helpers may
/// run at once, so one slow helper cannot hold every lifecycle call.
pub struct ProcessTransport {
    permits: Arc<Semaphore>,
    deadline: Option<Duration>,
}

impl ProcessTransport {
    pub fn new(max_concurrent: usize, deadline: Option<Duration>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            deadline,
        }
    }

    async fn run(&self, program: &Path, input: &[u8]) -> Result<Vec<u8>> {
        let io_err = |source: io::Error| Error::Io {
            program: program.to_path_buf(),
            source,
        };

        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io_err(io::Error::other("child stdin not captured")))?;

        // stdin is closed as soon as the request is written so the helper
        // sees EOF; stdout and stderr are drained concurrently.
        let feed = async move {
            let written = match stdin.write_all(input).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            match written {
                // A helper that exits without reading stdin still gets its
                // output decoded.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin early", program.display());
                    Ok(())
                }
                other => other,
            }
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed.map_err(io_err)?;
        let output = output.map_err(io_err)?;

        debug!("{} exited with {}", program.display(), output.status);
        if !output.stderr.is_empty() {
            debug!(
                "{} stderr: {}",
                program.display(),
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }

        Ok(output.stdout)
    }
}

impl Default for ProcessTransport {
    fn default() -> Self {
        Self::new(8, None)
    }
}

#[async_trait]
impl HelperTransport for ProcessTransport {
    async fn invoke(&self, program: &Path, input: &[u8]) -> Result<Vec<u8>> {
        let _permit = self.permits.acquire().await.map_err(|_| Error::Io {
            program: program.to_path_buf(),
            source: io::Error::other("helper pool closed"),
        })?;

        match self.deadline {
            None => self.run(program, input).await,
            Some(duration) => match timeout(duration, self.run(program, input)).await {
                Ok(result) => result,
                Err(_) => {
                    // Dropping the future dropped the child, which kills it.
                    warn!(
                        "{} exceeded {:?}; killed",
                        program.display(),
                        duration
                    );
                    Err(Error::Timeout {
                        program: program.to_path_buf(),
                        duration,
                    })
                }
            },
        }
    }
}
