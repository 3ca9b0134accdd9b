use std::sync::Arc;

use dsc_config::Config;
use dsc_db::Database;
use dsc_types::{MountMode, Result};
use tracing::info;

use crate::notify::Publisher;
use crate::object_store::{LocalObjectStore, ObjectStore};
use crate::params::ParameterSchema;
use crate::resolver::{DohResolver, DomainResolver};
use crate::run::{Lifecycle, RunContext};
use crate::sandbox::{DockerCli, DockerEndpoint, Sandbox, SandboxPolicy};
use crate::workspace::WorkspaceFactory;

/// Process-wide collaborators shared by every run.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Database>,
    pub publisher: Arc<dyn Publisher>,
    pub resolver: Arc<dyn DomainResolver>,
    pub store: Arc<dyn ObjectStore>,
    pub sandbox: Sandbox,
    pub workspaces: WorkspaceFactory,
}

impl Services {
    /// Wire the Docker CLI engine, DoH resolver and local object store from
    /// configuration. Fails if Docker is unreachable.
    pub async fn from_config(
        config: &Config,
        db: Arc<Database>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        let engine = DockerCli::new(DockerEndpoint::from_config(&config.docker));
        let sandbox =
            Sandbox::connect(SandboxPolicy::from_config(&config.docker), Arc::new(engine)).await?;

        info!(
            images = config.docker.allowed_images.len(),
            network = %config.docker.network_mode,
            "Sandbox ready"
        );

        Ok(Self {
            db,
            publisher,
            resolver: Arc::new(DohResolver::new(&config.dns_resolver_url)),
            store: Arc::new(LocalObjectStore::new(&config.storage_dir)),
            sandbox,
            workspaces: WorkspaceFactory::new(
                &config.docker.volumes_path,
                MountMode::ReadWrite,
                config.docker.change_owner,
            ),
        })
    }

    /// Context for one run of `image` validated against `schema`.
    pub fn context_for(&self, run_id: &str, image: &str, schema: ParameterSchema) -> RunContext {
        RunContext {
            lifecycle: Lifecycle::new(
                run_id,
                image,
                schema,
                self.db.clone(),
                self.publisher.clone(),
                self.resolver.clone(),
            ),
            sandbox: self.sandbox.clone(),
            workspaces: self.workspaces.clone(),
            store: self.store.clone(),
        }
    }
}
