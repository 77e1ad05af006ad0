//! Docker-backed container runtime
//!
//! Each environment is a private staging copy of the project plus a
//! uniquely named `docker run --rm` container mounting it. The source tree
//! is never written to.

use crate::error::SandboxError;
use crate::log::extract_test_output;
use crate::runtime::{ContainerRuntime, EnvironmentHandle, EnvironmentSpec, RunOutput};
use crate::script::{entry_command, normalize_ports, render_run_script, test_file_name, RUN_SCRIPT};
use async_trait::async_trait;
use dashmap::DashMap;
use locus_model::{is_ignored_dir, ProjectKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::OnceCell;
use walkdir::WalkDir;

/// Sandbox settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Docker CLI binary
    pub docker_binary: String,
    /// Image for Node projects
    pub node_image: String,
    /// Image for Python projects
    pub python_image: String,
    /// Per-execution timeout
    pub timeout_secs: u64,
    /// Optional `--memory` limit, e.g. `"1g"`
    pub memory_limit: Option<String>,
    /// Optional shell fragment run before the service starts
    pub fixture_script: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            node_image: "node:18-alpine".to_string(),
            python_image: "python:3.11-slim".to_string(),
            timeout_secs: 300,
            memory_limit: None,
            fixture_script: None,
        }
    }
}

impl SandboxConfig {
    /// Image for a runtime family
    #[must_use]
    pub fn image_for(&self, kind: ProjectKind) -> &str {
        match kind {
            ProjectKind::Node => &self.node_image,
            ProjectKind::Python => &self.python_image,
        }
    }

    /// Execution timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Runtime driving the Docker CLI
#[derive(Debug)]
pub struct DockerRuntime {
    config: SandboxConfig,
    staged: DashMap<String, TempDir>,
    available: OnceCell<()>,
}

impl DockerRuntime {
    /// Create runtime
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            staged: DashMap::new(),
            available: OnceCell::new(),
        }
    }

    /// Number of environments currently staged
    #[must_use]
    pub fn live_environments(&self) -> usize {
        self.staged.len()
    }

    /// Check the daemon once it answers; failed checks are retried next call
    async fn ensure_available(&self) -> Result<(), SandboxError> {
        self.available
            .get_or_try_init(|| async {
                let status = Command::new(&self.config.docker_binary)
                    .arg("version")
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                match status {
                    Ok(s) if s.success() => Ok(()),
                    Ok(s) => Err(SandboxError::Unavailable(format!(
                        "`{} version` exited with {s}",
                        self.config.docker_binary
                    ))),
                    Err(e) => Err(SandboxError::Unavailable(format!(
                        "cannot run {}: {e}",
                        self.config.docker_binary
                    ))),
                }
            })
            .await
            .map(|_| ())
    }

    fn docker_args(&self, env: &EnvironmentHandle, staging: &Path) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            env.name().to_string(),
            "-v".to_string(),
            format!("{}:/app", staging.display()),
            "-w".to_string(),
            "/app".to_string(),
        ];
        if let Some(limit) = &self.config.memory_limit {
            args.push("--memory".to_string());
            args.push(limit.clone());
        }
        args.push(self.config.image_for(env.kind()).to_string());
        args.push("/bin/sh".to_string());
        args.push("-c".to_string());
        args.push(entry_command(env.kind()));
        args
    }

    fn reclaim_args(&self, kind: ProjectKind, staging: &Path, owner: &str) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/app", staging.display()),
            self.config.image_for(kind).to_string(),
            "chown".to_string(),
            "-R".to_string(),
            owner.to_string(),
            "/app".to_string(),
        ]
    }

    /// Remove a staging directory the container filled with root-owned files
    async fn reclaim_staging(&self, kind: ProjectKind, staging: &Path, owner: Option<String>) {
        if let Some(owner) = owner {
            let chowned = Command::new(&self.config.docker_binary)
                .args(self.reclaim_args(kind, staging, &owner))
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = chowned {
                tracing::debug!(path = %staging.display(), error = %e, "ownership reclaim failed");
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
}

/// `uid:gid` owning the staging directory
#[cfg(unix)]
fn staging_owner(path: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path)
        .ok()
        .map(|meta| format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn staging_owner(_path: &Path) -> Option<String> {
    None
}

/// Copy a project into `dest`, skipping ignored directories
fn stage_project(src: &Path, dest: &Path) -> Result<(), SandboxError> {
    let walker = WalkDir::new(src).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || !entry.file_name().to_str().is_some_and(is_ignored_dir)
    });
    for entry in walker {
        let entry = entry.map_err(|e| SandboxError::Provision(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| SandboxError::Provision(e.to_string()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| SandboxError::io(format!("creating {}", target.display()), e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)
                .map_err(|e| SandboxError::io(format!("copying {}", rel.display()), e))?;
        }
    }
    Ok(())
}

fn write_environment_files(dir: &Path, spec: &EnvironmentSpec) -> Result<(), SandboxError> {
    let test_path = dir.join(test_file_name(spec.kind));
    std::fs::write(&test_path, normalize_ports(&spec.test_source, spec.kind))
        .map_err(|e| SandboxError::io("writing test file", e))?;

    let script_path = dir.join(RUN_SCRIPT);
    std::fs::write(
        &script_path,
        render_run_script(spec.kind, spec.fixture_script.as_deref()),
    )
    .map_err(|e| SandboxError::io("writing run script", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| SandboxError::io("marking run script executable", e))?;
    }
    Ok(())
}

/// Stage a project copy with the test and run script in a temporary directory
///
/// # Errors
/// Returns [`SandboxError`] if the copy or the writes fail.
pub fn stage_environment(spec: &EnvironmentSpec) -> Result<TempDir, SandboxError> {
    let dir = tempfile::Builder::new()
        .prefix("locus-env-")
        .tempdir()
        .map_err(|e| SandboxError::io("creating staging directory", e))?;
    stage_project(&spec.project_root, dir.path())?;
    write_environment_files(dir.path(), spec)?;
    Ok(dir)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, SandboxError> {
        self.ensure_available().await?;

        let owned = spec.clone();
        let dir = tokio::task::spawn_blocking(move || stage_environment(&owned))
            .await
            .map_err(|e| SandboxError::Provision(e.to_string()))??;

        let name = format!("locus-sandbox-{}", ulid::Ulid::new().to_string().to_lowercase());
        tracing::debug!(env = %name, staging = %dir.path().display(), "environment staged");
        self.staged.insert(name.clone(), dir);
        Ok(EnvironmentHandle::new(name, spec.kind))
    }

    async fn run(&self, env: &EnvironmentHandle) -> Result<RunOutput, SandboxError> {
        let staging = self
            .staged
            .get(env.name())
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| SandboxError::Runtime(format!("unknown environment {env}")))?;

        let output = Command::new(&self.config.docker_binary)
            .args(self.docker_args(env, &staging))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SandboxError::Unavailable(e.to_string()),
                _ => SandboxError::Runtime(e.to_string()),
            })?;

        let mut full_log = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            full_log.push('\n');
            full_log.push_str(&stderr);
        }

        Ok(RunOutput {
            exit_code: output.status.code(),
            log: extract_test_output(&full_log),
        })
    }

    async fn teardown(&self, env: &EnvironmentHandle) -> Result<(), SandboxError> {
        // container first, it may still hold the mount
        let removed = Command::new(&self.config.docker_binary)
            .args(["rm", "-f", env.name()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        if let Some((_, dir)) = self.staged.remove(env.name()) {
            let path = dir.path().to_path_buf();
            let owner = staging_owner(&path);
            if let Err(e) = dir.close() {
                tracing::debug!(path = %path.display(), error = %e, "staging directory busy, reclaiming");
                self.reclaim_staging(env.kind(), &path, owner).await;
            }
        }

        removed
            .map(|_| ())
            .map_err(|e| SandboxError::Runtime(format!("docker rm -f {env}: {e}")))
    }
}
