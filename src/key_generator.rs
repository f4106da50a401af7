//! Pluggable CA key generation
//!
//! Bootstrap only needs one capability from a generator: hand back a fresh CA
//! certificate and private key as PEM text. [`ScriptKeyGenerator`] drives an
//! external script that deposits both files on disk; the files are read and
//! removed immediately so no CA secret stays on disk outside the key store.
//! The in-process alternative lives in [`generate_root_ca`](crate::generate_root_ca).
//!
//! Every run gets a private scratch directory as its working directory and
//! relative output paths resolve inside it, so concurrent runs (two processes
//! bootstrapping at once) never read or delete each other's files. Absolute
//! output paths opt out of that isolation.
//!
//! On Unix the script runs in its own process group. A timeout kills the whole
//! group and waits for it before the output files are removed.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::configs::GeneratorConfig;
use crate::error::{CaError, CaResult};

#[cfg(unix)]
const GROUP_EXIT_POLLS: u32 = 50;
#[cfg(unix)]
const GROUP_EXIT_INTERVAL: Duration = Duration::from_millis(20);

/// Freshly generated CA material, PEM encoded
#[derive(Clone)]
pub struct GeneratedKeyMaterial {
    pub certificate_pem: String,
    pub private_key_pem: SecretString,
}

impl GeneratedKeyMaterial {
    pub fn private_key_pem(&self) -> &str {
        self.private_key_pem.expose_secret()
    }
}

impl fmt::Debug for GeneratedKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKeyMaterial")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn generate(&self) -> CaResult<GeneratedKeyMaterial>;
}

/// Runs an external script that writes a CA certificate and key to disk
#[derive(Debug, Clone)]
pub struct ScriptKeyGenerator {
    script: PathBuf,
    args: Vec<String>,
    required_binary: Option<String>,
    certificate_path: PathBuf,
    private_key_path: PathBuf,
    work_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ScriptKeyGenerator {
    pub fn new(
        script: impl Into<PathBuf>,
        certificate_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            script: script.into(),
            args: Vec::new(),
            required_binary: None,
            certificate_path: certificate_path.into(),
            private_key_path: private_key_path.into(),
            work_dir: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(
            &config.script,
            &config.certificate_path,
            &config.private_key_path,
        )
        .args(config.args.clone())
        .required_binary(
            config
                .required_binary
                .clone()
                .filter(|binary| !binary.is_empty()),
        )
        .work_dir(config.work_dir.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Binary that must be on `PATH` before the script is launched
    pub fn required_binary(mut self, binary: Option<String>) -> Self {
        self.required_binary = binary;
        self
    }

    /// Parent of the per-run scratch directories; the system temp dir when unset
    pub fn work_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.work_dir = dir;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn scratch_dir(&self) -> CaResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vaulters-ca-keygen-");
        let dir = match &self.work_dir {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| {
            CaError::ToolUnavailable(format!("Failed to create key generation directory: {}", e))
        })
    }

    /// Scripts given by relative path are resolved before the working directory changes
    fn resolve_script(&self) -> CaResult<PathBuf> {
        if self.script.is_absolute() || self.script.components().count() == 1 {
            return Ok(self.script.clone());
        }
        let cwd = std::env::current_dir().map_err(|e| {
            CaError::ToolUnavailable(format!("Failed to resolve {}: {}", self.script.display(), e))
        })?;
        Ok(cwd.join(&self.script))
    }

    async fn run_script(&self, work_dir: &Path) -> CaResult<()> {
        if let Some(binary) = &self.required_binary {
            if find_executable(binary).is_none() {
                return Err(CaError::ToolUnavailable(format!(
                    "can not find {} on PATH",
                    binary
                )));
            }
        }

        let script = self.resolve_script()?;
        let mut command = Command::new(&script);
        command
            .args(&self.args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        debug!(script = %script.display(), work_dir = %work_dir.display(), "Launching CA key generation script");
        let mut child = command.spawn().map_err(|e| {
            CaError::ToolUnavailable(format!("Failed to execute {}: {}", script.display(), e))
        })?;

        let mut stderr_pipe = child.stderr.take();
        let finished = tokio::time::timeout(self.timeout, async {
            let mut stderr = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                if let Err(e) = pipe.read_to_end(&mut stderr).await {
                    debug!(error = %e, "Failed to read generator stderr");
                }
            }
            child.wait().await.map(|status| (status, stderr))
        })
        .await;

        let (status, stderr) = match finished {
            Ok(waited) => waited.map_err(|e| {
                CaError::ToolUnavailable(format!("Failed to wait for {}: {}", script.display(), e))
            })?,
            Err(_) => {
                terminate(&mut child).await;
                return Err(CaError::ToolUnavailable(format!(
                    "{} did not finish within {:?}",
                    script.display(),
                    self.timeout
                )));
            }
        };

        if !status.success() {
            return Err(CaError::ToolUnavailable(format!(
                "{} exited with {}: {}",
                script.display(),
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyGenerator for ScriptKeyGenerator {
    async fn generate(&self) -> CaResult<GeneratedKeyMaterial> {
        let scratch = self.scratch_dir()?;
        let certificate_path = scratch.path().join(&self.certificate_path);
        let private_key_path = scratch.path().join(&self.private_key_path);

        let result = match self.run_script(scratch.path()).await {
            Ok(()) => read_outputs(&certificate_path, &private_key_path).await,
            Err(e) => Err(e),
        };
        // Artifacts never outlive this call, whatever happened above
        remove_outputs(&[certificate_path.as_path(), private_key_path.as_path()]).await;
        if let Err(e) = scratch.close() {
            warn!(error = %e, "Failed to remove key generation directory");
        }

        if result.is_ok() {
            info!(script = %self.script.display(), "CA key material generated");
        }
        result
    }
}

/// Kill the script with everything it started, then reap it
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    let group = child
        .id()
        .and_then(|pid| i32::try_from(pid).ok())
        .map(Pid::from_raw);
    #[cfg(unix)]
    if let Some(group) = group {
        if let Err(e) = killpg(group, Signal::SIGKILL) {
            warn!(pgid = %group, error = %e, "Failed to kill generator process group");
        }
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Generator process already exited");
    }

    #[cfg(unix)]
    if let Some(group) = group {
        wait_for_group_exit(group).await;
    }
}

#[cfg(unix)]
async fn wait_for_group_exit(group: Pid) {
    for _ in 0..GROUP_EXIT_POLLS {
        // Signal 0 only probes; an error means no member is left
        if killpg(group, None::<Signal>).is_err() {
            return;
        }
        tokio::time::sleep(GROUP_EXIT_INTERVAL).await;
    }
    warn!(pgid = %group, "Generator process group still present after kill");
}

async fn read_outputs(
    certificate_path: &Path,
    private_key_path: &Path,
) -> CaResult<GeneratedKeyMaterial> {
    let certificate_pem = read_pem(certificate_path).await?;
    let private_key_pem = read_pem(private_key_path).await?;
    Ok(GeneratedKeyMaterial {
        certificate_pem,
        private_key_pem: SecretString::from(private_key_pem),
    })
}

async fn remove_outputs(paths: &[&Path]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed generator artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove generator artifact"),
        }
    }
}

async fn read_pem(path: &Path) -> CaResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CaError::corrupt(&format!("Failed to read {}", path.display()), e))
}

fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(OsStr::new(name)))
        .find(|full| full.is_file())
}
