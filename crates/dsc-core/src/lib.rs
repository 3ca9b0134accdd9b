pub mod logging;
pub mod notify;
pub mod object_store;
pub mod params;
pub mod registry;
pub mod resolver;
pub mod run;
pub mod sandbox;
pub mod security;
pub mod services;
pub mod testing;
pub mod workspace;

pub use logging::init_logging;
pub use notify::{BroadcastPublisher, Notification, Publisher};
pub use object_store::{LocalObjectStore, ObjectStore};
pub use params::{BaseParameters, FieldKind, FieldSpec, ParameterSchema};
pub use registry::{discover, validate, Registry, Rejection, TaskDefinition, TaskHandle};
pub use resolver::{is_domain_name, validate_domain, DohResolver, DomainResolver};
pub use run::{execute_in_sandbox, Lifecycle, RunContext, RunResult, Task};
pub use sandbox::{
    ContainerEngine, ContainerExit, ContainerHooks, ContainerSpec, DockerCli, DockerEndpoint,
    NoHooks, Sandbox, SandboxPolicy,
};
pub use security::{check_path_traversal, validate_relative_path};
pub use services::Services;
pub use workspace::{Workspace, WorkspaceFactory, WorkspaceFile};
