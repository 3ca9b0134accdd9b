//! Container execution under an enforced sandbox policy.

pub mod docker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dsc_config::DockerConfig;
use dsc_types::{DiscoveryError, Result, Volume};
use tracing::{debug, info, warn};

pub use docker::{DockerCli, DockerEndpoint};

/// Everything the engine needs to create one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub volume: Volume,
    pub network_mode: String,
    pub security_options: Vec<String>,
    pub memory_limit: String,
    pub cpus: Option<f64>,
}

/// Low-level container engine operations.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Verify the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Create and start a detached container. Returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Block until the container stops. Returns its exit code.
    async fn wait(&self, id: &str) -> Result<i64>;

    /// Force-remove a container. Removing a missing container is not an error.
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Checkpoints fired by [`Sandbox::run`].
///
/// Every hook defaults to a no-op.
#[async_trait]
pub trait ContainerHooks: Send {
    /// Before the container is created.
    async fn on_create(&mut self) -> Result<()> {
        Ok(())
    }

    /// After the engine accepted the create call. The process inside the
    /// container may not have started yet.
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// After the container reached a terminal state.
    async fn on_finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
pub struct NoHooks;

impl ContainerHooks for NoHooks {}

/// Read-only policy applied to every container.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    pub allowed_images: Vec<String>,
    pub network_mode: String,
    pub security_options: Vec<String>,
    pub memory_limit: String,
    pub cpu_limit: Option<f64>,
    /// Route non-zero exits to the failure path instead of `on_finish`.
    pub fail_on_nonzero_exit: bool,
    pub wait_timeout: Option<Duration>,
}

impl SandboxPolicy {
    pub fn from_config(docker: &DockerConfig) -> Self {
        Self {
            allowed_images: docker.allowed_images.clone(),
            network_mode: docker.network_mode.clone(),
            security_options: docker.security_options.clone(),
            memory_limit: docker.memory_limit.clone(),
            cpu_limit: docker.cpu_limit,
            fail_on_nonzero_exit: docker.fail_on_nonzero_exit,
            wait_timeout: docker.wait_timeout.map(Duration::from_secs),
        }
    }

    /// Exact-match allow-list check.
    pub fn is_image_allowed(&self, image: &str) -> bool {
        self.allowed_images.iter().any(|allowed| allowed == image)
    }

    fn container_spec(&self, image: &str, command: Vec<String>, volume: &Volume) -> ContainerSpec {
        ContainerSpec {
            image: image.to_string(),
            command,
            volume: volume.clone(),
            network_mode: self.network_mode.clone(),
            security_options: self.security_options.clone(),
            memory_limit: self.memory_limit.clone(),
            cpus: self.cpu_limit,
        }
    }
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::from_config(&DockerConfig::default())
    }
}

/// Outcome of a container that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerExit {
    pub id: String,
    pub exit_code: i64,
}

/// Runs one container per call with exactly one workspace mount.
#[derive(Clone)]
pub struct Sandbox {
    policy: Arc<SandboxPolicy>,
    engine: Arc<dyn ContainerEngine>,
}

impl Sandbox {
    /// Bind a policy to an engine, failing if the engine is unreachable.
    pub async fn connect(policy: SandboxPolicy, engine: Arc<dyn ContainerEngine>) -> Result<Self> {
        engine.ping().await.map_err(|e| {
            DiscoveryError::Config(format!("Docker is not running, or not configured. ({e})"))
        })?;
        Ok(Self {
            policy: Arc::new(policy),
            engine,
        })
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Fail with [`DiscoveryError::ImageNotAllowed`] unless `image` is allow-listed.
    pub fn ensure_image_allowed(&self, image: &str) -> Result<()> {
        if self.policy.is_image_allowed(image) {
            Ok(())
        } else {
            Err(DiscoveryError::ImageNotAllowed(image.to_string()))
        }
    }

    /// Run `image` with `command` against `volume`, firing `hooks` in order.
    ///
    /// Fails with [`DiscoveryError::ImageNotAllowed`] before any hook when the
    /// image is not allow-listed.
    pub async fn run(
        &self,
        image: &str,
        command: Vec<String>,
        volume: &Volume,
        hooks: &mut dyn ContainerHooks,
    ) -> Result<ContainerExit> {
        self.ensure_image_allowed(image)?;

        hooks.on_create().await?;

        let spec = self.policy.container_spec(image, command, volume);
        let id = self.engine.create(&spec).await?;
        info!(image, container = %id, "Container created");

        if let Err(e) = hooks.on_start().await {
            self.discard(&id).await;
            return Err(e);
        }

        let exit_code = match self.wait(&id).await {
            Ok(code) => code,
            Err(e) => {
                self.discard(&id).await;
                return Err(e);
            }
        };
        self.discard(&id).await;

        if exit_code != 0 {
            warn!(image, container = %id, exit_code, "Container exited with non-zero status");
            if self.policy.fail_on_nonzero_exit {
                return Err(DiscoveryError::Container(format!(
                    "Container {id} exited with status {exit_code}"
                )));
            }
        }

        hooks.on_finish().await?;

        Ok(ContainerExit { id, exit_code })
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        match self.policy.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, self.engine.wait(id))
                .await
                .map_err(|_| {
                    DiscoveryError::Timeout(format!(
                        "Container {id} timed out after {}s",
                        limit.as_secs()
                    ))
                })?,
            None => self.engine.wait(id).await,
        }
    }

    /// Best-effort removal; failures are logged only.
    async fn discard(&self, id: &str) {
        match self.engine.remove(id).await {
            Ok(()) => debug!(container = %id, "Container removed"),
            Err(e) => warn!(container = %id, error = %e, "Failed to remove container"),
        }
    }
}
