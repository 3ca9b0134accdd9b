//! Task discovery, validation and dispatch.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use dsc_types::{DiscoveryError, Result};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::params::ParameterSchema;
use crate::run::{RunContext, Task};
use crate::services::Services;

/// A pluggable task implementation.
pub trait TaskDefinition: Send + Sync {
    /// Dotted, namespaced name, e.g. `projectdiscovery.subfinder`.
    fn name(&self) -> &str;

    /// Container image every run of this task uses.
    fn image(&self) -> &str;

    fn parameters(&self) -> ParameterSchema;

    fn instantiate(&self, ctx: RunContext) -> Box<dyn Task>;
}

/// A candidate that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub name: String,
    pub reason: String,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_]+)*$").expect("task name pattern is valid")
    })
}

/// Candidate names in the registration table.
pub fn discover(candidates: &[Arc<dyn TaskDefinition>]) -> Vec<String> {
    candidates.iter().map(|c| c.name().to_string()).collect()
}

/// Check one candidate against the task contract.
pub fn validate(candidate: &dyn TaskDefinition) -> Result<()> {
    let name = candidate.name();
    if !name_pattern().is_match(name) {
        return Err(DiscoveryError::Plugin(format!("Malformed task name \"{name}\"")));
    }
    if candidate.image().trim().is_empty() {
        return Err(DiscoveryError::Plugin("No image provided".to_string()));
    }
    candidate.parameters().check_base_contract()
}

/// The validated name → implementation table.
#[derive(Clone)]
pub struct Registry {
    tasks: BTreeMap<String, Arc<dyn TaskDefinition>>,
    rejected: Vec<Rejection>,
    services: Services,
}

impl Registry {
    /// Validate every candidate. Bad candidates are logged and skipped.
    pub fn new(candidates: Vec<Arc<dyn TaskDefinition>>, services: Services) -> Self {
        let mut tasks: BTreeMap<String, Arc<dyn TaskDefinition>> = BTreeMap::new();
        let mut rejected = Vec::new();

        debug!(candidates = ?discover(&candidates), "Discovering tasks");

        for candidate in candidates {
            let name = candidate.name().to_string();
            let verdict = if tasks.contains_key(&name) {
                Err(DiscoveryError::Plugin(format!("Duplicate task name \"{name}\"")))
            } else {
                validate(candidate.as_ref())
            };

            match verdict {
                Ok(()) => {
                    tasks.insert(name, candidate);
                }
                Err(e) => {
                    warn!(task = %name, error = %e, "Task rejected");
                    rejected.push(Rejection {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            tasks = tasks.len(),
            rejected = rejected.len(),
            "Task registry ready"
        );

        Self {
            tasks,
            rejected,
            services,
        }
    }

    /// Legal task identifiers, sorted.
    pub fn dispatchable_names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn rejected(&self) -> &[Rejection] {
        &self.rejected
    }

    /// Find a task by exact name or by its unique final segment.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn TaskDefinition>> {
        if let Some(task) = self.tasks.get(name) {
            return Some(task.clone());
        }

        let mut matches = self
            .tasks
            .iter()
            .filter(|(full, _)| full.rsplit('.').next() == Some(name));
        match (matches.next(), matches.next()) {
            (Some((_, task)), None) => Some(task.clone()),
            _ => None,
        }
    }

    /// A callable bound to `name`.
    pub fn wrap(&self, name: &str) -> Result<TaskHandle> {
        let definition = self
            .resolve(name)
            .ok_or_else(|| DiscoveryError::TaskNotFound(name.to_string()))?;
        Ok(TaskHandle {
            definition,
            services: self.services.clone(),
        })
    }

    /// `wrap(name)` and call it.
    pub async fn dispatch(&self, run_id: &str, name: &str, params: Value) -> Result<Value> {
        self.wrap(name)?.call(run_id, params).await
    }
}

/// A resolved task ready to be invoked.
pub struct TaskHandle {
    definition: Arc<dyn TaskDefinition>,
    services: Services,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Instantiate, validate and execute one run. Errors propagate unmodified.
    pub async fn call(&self, run_id: &str, params: Value) -> Result<Value> {
        let ctx = self.services.context_for(
            run_id,
            self.definition.image(),
            self.definition.parameters(),
        );
        let mut task = self.definition.instantiate(ctx);

        info!(task = %self.definition.name(), run_id, "Dispatching run");
        task.validate_parameters(&params).await?;
        let result = task.execute(params).await?;
        Ok(serde_json::to_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::FieldKind;
    use crate::run::{execute_in_sandbox, RunResult};
    use crate::sandbox::SandboxPolicy;
    use crate::testing::{Harness, MemoryObjectStore, MockEngine, StaticResolver};
    use crate::workspace::Workspace;
    use async_trait::async_trait;
    use dsc_db::RunRepository;
    use dsc_types::RunStatus;
    use serde_json::json;

    const IMAGE: &str = "library/echo:latest";

    struct Echo {
        ctx: RunContext,
    }

    #[async_trait]
    impl Task for Echo {
        fn context(&self) -> &RunContext {
            &self.ctx
        }

        async fn execute(&mut self, params: Value) -> Result<RunResult> {
            let message = params["message"].as_str().unwrap_or_default().to_string();
            execute_in_sandbox(
                self,
                |ws| ws.write("out.txt", &message),
                |_| vec!["echo".to_string()],
            )
            .await?;
            Ok(RunResult {
                id: self.ctx.run_id().to_string(),
            })
        }

        async fn on_finished(&mut self, workspace: &Workspace) -> Result<()> {
            let out = workspace.read("out.txt")?;
            self.ctx.finish(workspace, json!({ "echo": out })).await
        }
    }

    struct Definition {
        name: &'static str,
        image: &'static str,
        schema: ParameterSchema,
    }

    impl Definition {
        fn echo(name: &'static str) -> Arc<dyn TaskDefinition> {
            Arc::new(Self {
                name,
                image: IMAGE,
                schema: ParameterSchema::base().field("message", FieldKind::String, true),
            })
        }
    }

    impl TaskDefinition for Definition {
        fn name(&self) -> &str {
            self.name
        }

        fn image(&self) -> &str {
            self.image
        }

        fn parameters(&self) -> ParameterSchema {
            self.schema.clone()
        }

        fn instantiate(&self, ctx: RunContext) -> Box<dyn Task> {
            Box::new(Echo { ctx })
        }
    }

    async fn harness(base: &std::path::Path) -> Harness {
        let policy = SandboxPolicy {
            allowed_images: vec![IMAGE.to_string()],
            ..SandboxPolicy::default()
        };
        Harness::new(
            base,
            policy,
            MockEngine::new(),
            StaticResolver::default(),
            MemoryObjectStore::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn malformed_candidates_are_skipped() {
        let base = tempfile::tempdir().unwrap();
        let h = harness(base.path()).await;

        let candidates = vec![
            Definition::echo("demo.echo"),
            Definition::echo("demo.other"),
            Arc::new(Definition {
                name: "demo.broken",
                image: IMAGE,
                schema: ParameterSchema::empty(),
            }) as Arc<dyn TaskDefinition>,
            Arc::new(Definition {
                name: "demo.noimage",
                image: "",
                schema: ParameterSchema::base(),
            }) as Arc<dyn TaskDefinition>,
            Definition::echo("Demo Bad Name"),
            Definition::echo("demo.echo"),
        ];
        assert_eq!(discover(&candidates).len(), 6);

        let registry = Registry::new(candidates, h.services.clone());

        assert_eq!(registry.dispatchable_names(), vec!["demo.echo", "demo.other"]);
        let rejected: Vec<_> = registry.rejected().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            rejected,
            vec!["demo.broken", "demo.noimage", "Demo Bad Name", "demo.echo"]
        );
        assert!(registry.rejected()[3].reason.contains("Duplicate"));
    }

    #[tokio::test]
    async fn resolve_by_short_name() {
        let base = tempfile::tempdir().unwrap();
        let h = harness(base.path()).await;
        let registry = Registry::new(
            vec![
                Definition::echo("demo.echo"),
                Definition::echo("other.echo"),
                Definition::echo("demo.unique"),
            ],
            h.services.clone(),
        );

        assert!(registry.resolve("demo.echo").is_some());
        assert_eq!(registry.resolve("unique").unwrap().name(), "demo.unique");
        assert!(registry.resolve("echo").is_none());
        assert!(registry.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn unknown_task_creates_no_record() {
        let base = tempfile::tempdir().unwrap();
        let h = harness(base.path()).await;
        let registry = Registry::new(vec![Definition::echo("demo.echo")], h.services.clone());

        let err = registry
            .dispatch("run-1", "nonexistent", json!({"owner_id": "u1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::TaskNotFound(_)));
        assert!(RunRepository::new(&h.db).get("run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dispatch_runs_to_success() {
        let base = tempfile::tempdir().unwrap();
        let h = harness(base.path()).await;
        let registry = Registry::new(vec![Definition::echo("demo.echo")], h.services.clone());

        let result = registry
            .dispatch("run-1", "echo", json!({"owner_id": "u1", "message": "hi"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"id": "run-1"}));

        let run = RunRepository::new(&h.db).get("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.result["echo"], "hi");
        assert_eq!(run.files.len(), 1);
        assert!(run.files[0].path.ends_with("/out.txt"));
        assert_eq!(h.store.keys().len(), 1);
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn validation_error_propagates_unmodified() {
        let base = tempfile::tempdir().unwrap();
        let h = harness(base.path()).await;
        let registry = Registry::new(vec![Definition::echo("demo.echo")], h.services.clone());

        let err = registry
            .dispatch("run-1", "demo.echo", json!({"owner_id": "u1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Validation(_)));
        assert!(h.engine.calls().is_empty());
    }
}
