//! Tape retrieval adapter: wraps the archive-access utility as one
//! supervised external process per retrieval.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, warn};

use coldstage_core::{Error, Result, RetrievalConfig};

/// Markers in utility output that indicate a credential problem rather than
/// a generic process failure.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "authentication failed",
    "unable to authenticate",
    "keytab",
    "credential",
    "kinit",
];

/// Executor for the tape retrieval utility (hsi-compatible invocation:
/// keytab auth, optional firewall mode, one `get` per run).
#[derive(Clone)]
pub struct TapeRetriever {
    config: RetrievalConfig,
}

impl TapeRetriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// Hard bound on one retrieval run, in seconds.
    pub fn timeout_secs(&self) -> u64 {
        self.config.timeout.as_secs()
    }

    /// Build the argument vector for one retrieval.
    ///
    /// Firewall mode tunnels the transfer through the control channel, which
    /// the utility only accepts as a single quoted command string.
    fn command_args(&self, local: &Path, sda_path: &str) -> Vec<String> {
        let mut args = vec![
            "-d2".to_string(),
            "-A".to_string(),
            "keytab".to_string(),
            "-k".to_string(),
            self.config.keytab_path.display().to_string(),
            "-l".to_string(),
            self.config.user.clone(),
        ];
        if self.config.firewall {
            args.push(format!(
                "firewall -on; get {} : {}",
                local.display(),
                sda_path
            ));
        } else {
            args.push("get".to_string());
            args.push(local.display().to_string());
            args.push(":".to_string());
            args.push(sda_path.to_string());
        }
        args
    }

    /// Retrieve one archive path into the staging root.
    ///
    /// Spawns the configured utility, bounded by the configured timeout. On
    /// timeout the child is killed before this returns, and any partially
    /// transferred file is removed; the same cleanup applies to every other
    /// failure path.
    pub async fn fetch(&self, sda_path: &str, staging_root: &Path) -> Result<PathBuf> {
        let basename = sda_path
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("invalid archive path: {sda_path}")))?;
        let local = staging_root.join(basename);

        let args = self.command_args(&local, sda_path);
        debug!(
            subsystem = "retrieval",
            op = "fetch",
            bin = %self.config.bin_path.display(),
            sda_path,
            local = %local.display(),
            timeout_secs = self.timeout_secs(),
            "Spawning retrieval process"
        );

        let mut child = Command::new(&self.config.bin_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::RetrievalProcessError(format!(
                    "failed to spawn {}: {e}",
                    self.config.bin_path.display()
                ))
            })?;

        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.remove_partial(&local).await;
                return Err(Error::RetrievalProcessError(format!(
                    "failed waiting on retrieval process: {e}"
                )));
            }
            Err(_) => {
                // wait_with_output consumed the child; kill_on_drop has
                // already terminated it at this point. Clean the partial
                // transfer so it cannot masquerade as a staged artifact.
                warn!(
                    subsystem = "retrieval",
                    sda_path,
                    timeout_secs = self.timeout_secs(),
                    "Retrieval timed out, process killed"
                );
                self.remove_partial(&local).await;
                return Err(Error::RetrievalTimeout {
                    timeout_secs: self.timeout_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            self.remove_partial(&local).await;
            return Err(classify_failure(output.status.code(), &stdout, &stderr));
        }

        // The utility can exit 0 without transferring anything (for example
        // when the archive path does not exist on some versions).
        match tokio::fs::metadata(&local).await {
            Ok(meta) if meta.len() > 0 => {
                debug!(
                    subsystem = "retrieval",
                    op = "fetch",
                    sda_path,
                    size_bytes = meta.len(),
                    "Retrieval complete"
                );
                Ok(local)
            }
            _ => Err(Error::RetrievalProcessError(format!(
                "retrieval exited cleanly but no artifact was staged for {sda_path}"
            ))),
        }
    }

    async fn remove_partial(&self, local: &Path) {
        if let Err(e) = tokio::fs::remove_file(local).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(
                    subsystem = "retrieval",
                    local = %local.display(),
                    error = %e,
                    "Could not remove partial transfer"
                );
            }
        }
    }
}

/// Classify a non-zero exit into the retrieval error taxonomy.
fn classify_failure(code: Option<i32>, stdout: &str, stderr: &str) -> Error {
    let combined = format!("{stdout}\n{stderr}").to_lowercase();
    if AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| combined.contains(marker))
    {
        return Error::RetrievalAuthFailure(stderr.trim().to_string());
    }
    Error::RetrievalProcessError(match code {
        Some(code) => format!("retrieval exited with code {code}: {}", stderr.trim()),
        None => format!("retrieval killed by signal: {}", stderr.trim()),
    })
}
