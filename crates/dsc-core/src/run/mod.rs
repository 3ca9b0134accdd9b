//! The contract every task implementation honours.

pub mod lifecycle;

use std::sync::Arc;

use async_trait::async_trait;
use dsc_types::{Result, Volume};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub use lifecycle::Lifecycle;

use crate::object_store::ObjectStore;
use crate::sandbox::{ContainerHooks, Sandbox};
use crate::workspace::{Workspace, WorkspaceFactory};

/// Collaborators handed to a task instance for one run.
#[derive(Clone)]
pub struct RunContext {
    pub lifecycle: Lifecycle,
    pub sandbox: Sandbox,
    pub workspaces: WorkspaceFactory,
    pub store: Arc<dyn ObjectStore>,
}

impl RunContext {
    pub fn run_id(&self) -> &str {
        self.lifecycle.run_id()
    }

    /// Check the task image against the sandbox allow-list, recording a
    /// rejection on the run.
    pub async fn ensure_image_allowed(&self) -> Result<()> {
        if let Err(e) = self.sandbox.ensure_image_allowed(self.lifecycle.image()) {
            self.lifecycle.on_error(&e.to_string()).await;
            return Err(e);
        }
        Ok(())
    }

    /// Export the workspace and move the run to `SUCCESS` with `result`.
    pub async fn finish(&self, workspace: &Workspace, result: Value) -> Result<()> {
        let files = workspace.export_to_object_store(self.store.as_ref()).await?;
        self.lifecycle.complete(result, files).await
    }
}

/// Returned to the dispatch transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub id: String,
}

/// One task invocation.
#[async_trait]
pub trait Task: Send + Sync {
    fn context(&self) -> &RunContext;

    /// Create the run record and validate `raw`. Defaults to the schema the
    /// task was registered with.
    async fn validate_parameters(&mut self, raw: &Value) -> Result<()> {
        let lifecycle = self.context().lifecycle.clone();
        lifecycle.validate_parameters(raw).await
    }

    /// Run the task with already-validated parameters.
    async fn execute(&mut self, params: Value) -> Result<RunResult>;

    /// Parse the container output left in `workspace` and complete the run.
    async fn on_finished(&mut self, workspace: &Workspace) -> Result<()>;
}

/// Bridges sandbox checkpoints to a task's lifecycle.
struct Checkpoints<'a, T: Task + ?Sized> {
    task: &'a mut T,
    workspace: &'a Workspace,
}

#[async_trait]
impl<'a, T: Task + ?Sized> ContainerHooks for Checkpoints<'a, T> {
    async fn on_start(&mut self) -> Result<()> {
        let lifecycle = self.task.context().lifecycle.clone();
        lifecycle.on_started().await
    }

    async fn on_finish(&mut self) -> Result<()> {
        self.task.on_finished(self.workspace).await
    }
}

/// Acquire a workspace, run the task's container against it and release it.
///
/// An image outside the allow-list is rejected before the workspace exists.
/// `prepare` seeds the workspace before the container starts and `command`
/// builds the container arguments from the mount. Any failure is recorded
/// through [`Lifecycle::on_error`] before it is returned, and the workspace
/// is destroyed on every path.
pub async fn execute_in_sandbox<T, P, C>(task: &mut T, prepare: P, command: C) -> Result<()>
where
    T: Task + ?Sized,
    P: FnOnce(&Workspace) -> Result<()> + Send,
    C: FnOnce(&Volume) -> Vec<String> + Send,
{
    let ctx = task.context().clone();
    ctx.ensure_image_allowed().await?;

    let workspace = match ctx.workspaces.create() {
        Ok(workspace) => workspace,
        Err(e) => {
            ctx.lifecycle.on_error(&e.to_string()).await;
            return Err(e);
        }
    };

    let outcome = drive(task, &ctx, &workspace, prepare, command).await;
    if let Err(ref e) = outcome {
        ctx.lifecycle.on_error(&e.to_string()).await;
    }

    let workspace_id = workspace.id().to_string();
    if let Err(e) = workspace.destroy() {
        warn!(run_id = %ctx.run_id(), workspace = %workspace_id, error = %e, "Failed to destroy workspace");
        ctx.lifecycle.on_error(&e.to_string()).await;
        outcome?;
        return Err(e);
    }

    outcome
}

async fn drive<T, P, C>(
    task: &mut T,
    ctx: &RunContext,
    workspace: &Workspace,
    prepare: P,
    command: C,
) -> Result<()>
where
    T: Task + ?Sized,
    P: FnOnce(&Workspace) -> Result<()> + Send,
    C: FnOnce(&Volume) -> Vec<String> + Send,
{
    prepare(workspace)?;
    let volume = workspace.mount();
    let args = command(&volume);

    let mut hooks = Checkpoints { task, workspace };
    ctx.sandbox
        .run(ctx.lifecycle.image(), args, &volume, &mut hooks)
        .await?;
    Ok(())
}
