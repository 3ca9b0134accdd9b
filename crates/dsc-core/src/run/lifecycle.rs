use std::sync::Arc;

use chrono::Utc;
use dsc_db::{Database, RunRepository};
use dsc_types::{Channel, DiscoveryError, Event, Result, Run, RunFile, RunStatus};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::notify::Publisher;
use crate::params::ParameterSchema;
use crate::resolver::{validate_domain, DomainResolver};

/// Persists and publishes the state transitions of one run.
#[derive(Clone)]
pub struct Lifecycle {
    run_id: String,
    image: String,
    db: Arc<Database>,
    publisher: Arc<dyn Publisher>,
    resolver: Arc<dyn DomainResolver>,
    schema: Arc<ParameterSchema>,
}

impl Lifecycle {
    pub fn new(
        run_id: &str,
        image: &str,
        schema: ParameterSchema,
        db: Arc<Database>,
        publisher: Arc<dyn Publisher>,
        resolver: Arc<dyn DomainResolver>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            image: image.to_string(),
            db,
            publisher,
            resolver,
            schema: Arc::new(schema),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn resolver(&self) -> &dyn DomainResolver {
        self.resolver.as_ref()
    }

    /// Persist the `PENDING` record and publish `run.created`.
    pub async fn on_created(&self, parameters: &Value) -> Result<()> {
        let run = Run::new(&self.run_id, &self.image, parameters.clone());
        RunRepository::new(&self.db).create(&run).await?;

        info!(run_id = %self.run_id, image = %self.image, "Run created");
        self.publisher.publish(
            Channel::Runs,
            Event::RunCreated,
            json!({
                "id": run.id,
                "name": run.name,
                "parameters": run.parameters,
                "owner_id": run.owner_id,
                "parent_id": run.parent_id,
            }),
        );
        Ok(())
    }

    /// Move the record to `RUNNING`. A missing record is a no-op.
    pub async fn on_started(&self) -> Result<()> {
        let repo = RunRepository::new(&self.db);
        let Some(mut run) = repo.get(&self.run_id).await? else {
            warn!(run_id = %self.run_id, "Run record missing, start not recorded");
            return Ok(());
        };

        let prev = run.mark_running(Utc::now())?;
        repo.update(&mut run).await?;

        info!(run_id = %self.run_id, "Run started");
        self.publish_status(&run, prev);
        Ok(())
    }

    /// Record a failure.
    ///
    /// The message is always appended. Status only moves to `FAILED` (and a
    /// notification is only published) when the record is not terminal yet.
    /// Persistence problems are logged, never returned.
    pub async fn on_error(&self, message: &str) {
        if let Err(e) = self.record_error(message).await {
            error!(run_id = %self.run_id, error = %e, "Failed to record run error");
        }
    }

    async fn record_error(&self, message: &str) -> Result<()> {
        let repo = RunRepository::new(&self.db);
        let Some(mut run) = repo.get(&self.run_id).await? else {
            warn!(run_id = %self.run_id, error = message, "Run record missing, error not recorded");
            return Ok(());
        };

        let transitioned = run.mark_failed(message, Utc::now());
        repo.update(&mut run).await?;

        match transitioned {
            Some(prev) => {
                warn!(run_id = %self.run_id, error = message, "Run failed");
                self.publish_status(&run, prev);
            }
            None => {
                warn!(run_id = %self.run_id, status = %run.status, error = message, "Error appended to terminal run");
            }
        }
        Ok(())
    }

    /// Move the record to `SUCCESS` with its result and artifacts.
    pub async fn complete(&self, result: Value, files: Vec<RunFile>) -> Result<()> {
        let repo = RunRepository::new(&self.db);
        let Some(mut run) = repo.get(&self.run_id).await? else {
            warn!(run_id = %self.run_id, "Run record missing, result not recorded");
            return Ok(());
        };

        let prev = run.mark_succeeded(result, files, Utc::now())?;
        repo.update(&mut run).await?;

        info!(run_id = %self.run_id, files = run.files.len(), "Run succeeded");
        self.publish_status(&run, prev);
        Ok(())
    }

    /// Create the record, then check `raw` against the schema and every
    /// domain-typed field against the resolver.
    ///
    /// A rejected submission moves the record straight to `FAILED`.
    pub async fn validate_parameters(&self, raw: &Value) -> Result<()> {
        self.on_created(raw).await?;

        if let Err(e) = self.check_parameters(raw).await {
            self.on_error(&e.to_string()).await;
            return Err(e);
        }
        Ok(())
    }

    async fn check_parameters(&self, raw: &Value) -> Result<()> {
        let params = self.schema.validate(raw)?;
        for (field, domain) in self.schema.domain_values(&params) {
            if !validate_domain(self.resolver.as_ref(), domain).await {
                return Err(DiscoveryError::Validation(format!(
                    "{field}: Invalid domain."
                )));
            }
        }
        Ok(())
    }

    fn publish_status(&self, run: &Run, prev: RunStatus) {
        self.publisher.publish(
            Channel::Runs,
            Event::RunStatusChanged,
            json!({
                "id": run.id,
                "name": run.name,
                "owner_id": run.owner_id,
                "status": [prev.as_str(), run.status.as_str()],
            }),
        );
    }
}
