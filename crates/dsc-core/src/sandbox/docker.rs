use std::path::PathBuf;

use async_trait::async_trait;
use dsc_config::DockerConfig;
use dsc_types::{DiscoveryError, Result};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ContainerEngine, ContainerSpec};

/// Where the `docker` CLI should connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerEndpoint {
    pub host: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl DockerEndpoint {
    pub fn from_config(docker: &DockerConfig) -> Self {
        Self {
            host: docker.host.clone(),
            tls_cert: docker.client_cert.clone(),
            tls_key: docker.client_key.clone(),
        }
    }

    /// Global flags placed before the subcommand.
    pub fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref host) = self.host {
            args.push("-H".to_string());
            args.push(host.clone());
        }
        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            args.push("--tls".to_string());
            args.push(format!("--tlscert={}", cert.display()));
            args.push(format!("--tlskey={}", key.display()));
        }
        args
    }
}

/// Container engine driving the `docker` command-line client.
#[derive(Debug, Clone, Default)]
pub struct DockerCli {
    endpoint: DockerEndpoint,
}

impl DockerCli {
    pub fn new(endpoint: DockerEndpoint) -> Self {
        Self { endpoint }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.args(self.endpoint.global_args());
        cmd
    }
}

/// Build `docker run` arguments (without the global flags).
pub fn build_create_args(spec: &ContainerSpec) -> Vec<String> {
    let container_name = format!("dsc-{}", uuid::Uuid::new_v4());
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        container_name,
        format!("--network={}", spec.network_mode),
    ];

    for opt in &spec.security_options {
        args.push("--security-opt".to_string());
        args.push(opt.clone());
    }

    args.push("--cap-drop=ALL".to_string());
    args.push(format!("--memory={}", spec.memory_limit));
    if let Some(cpus) = spec.cpus {
        args.push(format!("--cpus={cpus}"));
    }

    args.push("-v".to_string());
    args.push(spec.volume.to_docker_arg());

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());

    args
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn ping(&self) -> Result<()> {
        let status = self
            .command()
            .arg("version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| DiscoveryError::Container(format!("Failed to spawn docker: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(DiscoveryError::Container(format!(
                "docker version exited with {status}"
            )))
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let args = build_create_args(spec);
        debug!(image = %spec.image, args = ?args, "Launching container");

        let output = self
            .command()
            .args(&args)
            .output()
            .await
            .map_err(|e| DiscoveryError::Container(format!("Failed to spawn docker: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiscoveryError::Container(format!(
                "Failed to create container from {}: {}",
                spec.image,
                stderr.trim()
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(DiscoveryError::Container(
                "docker run returned no container id".to_string(),
            ));
        }
        Ok(id)
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let output = self
            .command()
            .args(["wait", id])
            .output()
            .await
            .map_err(|e| DiscoveryError::Container(format!("Failed to wait for container: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiscoveryError::Container(format!(
                "Failed to wait for container {id}: {}",
                stderr.trim()
            )));
        }

        parse_exit_code(&String::from_utf8_lossy(&output.stdout))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let output = self
            .command()
            .args(["rm", "-f", id])
            .output()
            .await
            .map_err(|e| DiscoveryError::Container(format!("Failed to cleanup container: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Ignore "no such container" errors
            if !stderr.contains("No such container") {
                warn!(container = id, stderr = %stderr, "Container cleanup warning");
            }
        }

        Ok(())
    }
}

/// Parse the status code printed by `docker wait`.
pub fn parse_exit_code(stdout: &str) -> Result<i64> {
    let trimmed = stdout.trim();
    trimmed
        .lines()
        .last()
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| DiscoveryError::Container(format!("Unexpected docker wait output: {trimmed:?}")))
}
