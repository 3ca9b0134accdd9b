//! Passive subdomain enumeration with `subfinder`.

use async_trait::async_trait;
use dsc_core::{
    execute_in_sandbox, BaseParameters, FieldKind, ParameterSchema, RunContext, RunResult, Task,
    TaskDefinition, Workspace,
};
use dsc_types::{Result, Volume};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const NAME: &str = "projectdiscovery.subfinder";
pub const IMAGE: &str = "projectdiscovery/subfinder:latest";

const OUTPUT_FILE: &str = "domains.txt";

#[derive(Debug, Clone, Deserialize)]
pub struct Parameters {
    #[serde(flatten)]
    pub base: BaseParameters,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubfinderResult {
    pub domains: Vec<String>,
}

pub struct Subfinder;

impl TaskDefinition for Subfinder {
    fn name(&self) -> &str {
        NAME
    }

    fn image(&self) -> &str {
        IMAGE
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::base().field("domain", FieldKind::Domain, true)
    }

    fn instantiate(&self, ctx: RunContext) -> Box<dyn Task> {
        Box::new(SubfinderRun { ctx })
    }
}

pub struct SubfinderRun {
    ctx: RunContext,
}

/// `subfinder -d <domain> -o <mount>/domains.txt`
pub fn command(domain: &str, volume: &Volume) -> Vec<String> {
    vec![
        "-d".to_string(),
        domain.to_string(),
        "-o".to_string(),
        format!("{}/{OUTPUT_FILE}", volume.guest_path.display()),
    ]
}

/// One domain per non-empty line.
pub fn parse_domains(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Task for SubfinderRun {
    fn context(&self) -> &RunContext {
        &self.ctx
    }

    async fn execute(&mut self, params: Value) -> Result<RunResult> {
        let params: Parameters = serde_json::from_value(params)?;
        let domain = params.domain;

        execute_in_sandbox(self, |_| Ok(()), |volume| command(&domain, volume)).await?;

        Ok(RunResult {
            id: self.ctx.run_id().to_string(),
        })
    }

    async fn on_finished(&mut self, workspace: &Workspace) -> Result<()> {
        let domains = parse_domains(&workspace.read(OUTPUT_FILE)?);
        debug!(run_id = %self.ctx.run_id(), count = domains.len(), "Subdomains found");

        let result = serde_json::to_value(SubfinderResult { domains })?;
        self.ctx.finish(workspace, result).await
    }
}
