//! HTTP probing with `httpx`, including screenshots and tech detection.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dsc_core::{
    execute_in_sandbox, validate_domain, BaseParameters, DomainResolver, FieldKind,
    ParameterSchema, RunContext, RunResult, Task, TaskDefinition, Workspace,
};
use dsc_types::{Result, Volume};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

pub const NAME: &str = "projectdiscovery.httpx";
pub const IMAGE: &str = "projectdiscovery/httpx:latest";

const INPUT_FILE: &str = "domains.txt";
const OUTPUT_FILE: &str = "results.json";
const SCREENSHOT_DIR: &str = "screenshot";

#[derive(Debug, Clone, Deserialize)]
pub struct Parameters {
    #[serde(flatten)]
    pub base: BaseParameters,
    pub domains: Vec<String>,
}

/// One probed endpoint. Deserialized from an httpx JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename(deserialize = "a"), default)]
    pub ip_address: Vec<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub content_length: i64,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub failed: bool,
    #[serde(rename(deserialize = "header"), default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub port: String,
    #[serde(rename(deserialize = "raw_header"), default)]
    pub raw_headers: String,
    #[serde(default)]
    pub request: String,
    #[serde(default)]
    pub resolvers: Vec<String>,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub status_code: i64,
    #[serde(rename(deserialize = "tech"), default)]
    pub technologies: Vec<String>,
    #[serde(rename(deserialize = "time"), default)]
    pub response_time: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub webserver: String,
    /// Base64 PNG, empty when httpx took no screenshot.
    #[serde(rename(deserialize = "screenshot_path_rel"), default)]
    pub screenshot: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Items {
    pub items: Vec<Item>,
}

pub struct Httpx;

impl TaskDefinition for Httpx {
    fn name(&self) -> &str {
        NAME
    }

    fn image(&self) -> &str {
        IMAGE
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::base().field("domains", FieldKind::StringList, true)
    }

    fn instantiate(&self, ctx: RunContext) -> Box<dyn Task> {
        Box::new(HttpxRun { ctx })
    }
}

pub struct HttpxRun {
    ctx: RunContext,
}

pub fn command(volume: &Volume) -> Vec<String> {
    let guest = volume.guest_path.display();
    let mut args: Vec<String> = [
        "-json",
        "-no-fallback",
        "-screenshot",
        "-tech-detect",
        "-ip",
        "-cname",
        "-word-count",
        "-line-count",
        "-response-time",
        "-cdn",
        "-include-response",
        "-silent",
        "-stats",
        "-follow-host-redirects",
        "-max-redirects",
        "2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.extend([
        "-l".to_string(),
        format!("{guest}/{INPUT_FILE}"),
        "-o".to_string(),
        format!("{guest}/{OUTPUT_FILE}"),
        "-srd".to_string(),
        guest.to_string(),
    ]);
    args
}

/// Keep only domains that are well-formed and globally routable.
pub async fn routable_domains(resolver: &dyn DomainResolver, domains: &[String]) -> Vec<String> {
    let mut kept = Vec::with_capacity(domains.len());
    for domain in domains {
        if validate_domain(resolver, domain).await {
            kept.push(domain.clone());
        } else {
            debug!(domain = %domain, "Dropping unroutable domain");
        }
    }
    kept
}

/// Parse the JSON-lines output, inlining screenshots from the workspace.
pub fn parse_results(workspace: &Workspace) -> Result<Items> {
    let output = workspace.read(OUTPUT_FILE)?;
    let items = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_item(workspace, line))
        .collect::<Result<Vec<_>>>()?;
    Ok(Items { items })
}

fn parse_item(workspace: &Workspace, line: &str) -> Result<Item> {
    let mut item: Item = serde_json::from_str(line)?;
    item.screenshot = screenshot_to_base64(workspace, &item.screenshot)?;
    Ok(item)
}

fn screenshot_to_base64(workspace: &Workspace, path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(String::new());
    }
    let relative = format!("{SCREENSHOT_DIR}/{path}");
    if !workspace.file_exists(&relative) {
        return Ok(String::new());
    }
    Ok(BASE64.encode(workspace.read_bytes(&relative)?))
}

#[async_trait]
impl Task for HttpxRun {
    fn context(&self) -> &RunContext {
        &self.ctx
    }

    async fn execute(&mut self, params: Value) -> Result<RunResult> {
        let params: Parameters = serde_json::from_value(params)?;
        self.ctx.ensure_image_allowed().await?;
        let domains = routable_domains(self.ctx.lifecycle.resolver(), &params.domains).await;
        info!(
            run_id = %self.ctx.run_id(),
            requested = params.domains.len(),
            kept = domains.len(),
            "Probing domains"
        );

        execute_in_sandbox(
            self,
            |workspace| workspace.write(INPUT_FILE, domains.join("\n")),
            command,
        )
        .await?;

        Ok(RunResult {
            id: self.ctx.run_id().to_string(),
        })
    }

    async fn on_finished(&mut self, workspace: &Workspace) -> Result<()> {
        let items = parse_results(workspace)?;
        let result = serde_json::to_value(items)?;
        self.ctx.finish(workspace, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsc_types::MountMode;
    use serde_json::json;
    use std::path::PathBuf;

    fn volume() -> Volume {
        Volume {
            host_path: PathBuf::from("/tmp/vol/abc"),
            guest_path: PathBuf::from("/tmp/vol/abc"),
            mode: MountMode::ReadWrite,
        }
    }

    fn workspace(base: &std::path::Path) -> Workspace {
        Workspace::create(base, MountMode::ReadWrite, false).unwrap()
    }

    const LINE: &str = r#"{"a":["93.184.216.34"],"content_length":1256,"content_type":"text/html","failed":false,"header":{"server":"ECS"},"host":"93.184.216.34","method":"GET","path":"/","port":"443","raw_header":"HTTP/1.1 200 OK","request":"GET / HTTP/1.1","resolvers":["1.1.1.1:53"],"scheme":"https","status_code":200,"tech":["ECS"],"time":"102ms","timestamp":"2024-01-01T00:00:00Z","title":"Example Domain","url":"https://example.com","webserver":"ECS","screenshot_path_rel":"example.com/shot.png"}"#;

    #[test]
    fn command_points_at_mount() {
        let args = command(&volume());
        assert_eq!(args[0], "-json");
        let pos = args.iter().position(|a| a == "-max-redirects").unwrap();
        assert_eq!(args[pos + 1], "2");
        assert!(args.ends_with(&[
            "-l".to_string(),
            "/tmp/vol/abc/domains.txt".to_string(),
            "-o".to_string(),
            "/tmp/vol/abc/results.json".to_string(),
            "-srd".to_string(),
            "/tmp/vol/abc".to_string(),
        ]));
    }

    #[test]
    fn item_maps_httpx_field_names() {
        let item: Item = serde_json::from_str(LINE).unwrap();
        assert_eq!(item.ip_address, vec!["93.184.216.34"]);
        assert_eq!(item.technologies, vec!["ECS"]);
        assert_eq!(item.response_time, "102ms");
        assert_eq!(item.headers["server"], "ECS");
        assert_eq!(item.status_code, 200);
        assert_eq!(item.body, "");

        let out = serde_json::to_value(&item).unwrap();
        assert_eq!(out["ip_address"][0], "93.184.216.34");
        assert_eq!(out["technologies"][0], "ECS");
        assert!(out.get("tech").is_none());
    }

    #[test]
    fn parse_results_inlines_screenshot() {
        let base = tempfile::tempdir().unwrap();
        let ws = workspace(base.path());
        ws.write(OUTPUT_FILE, format!("{LINE}\n\n")).unwrap();
        ws.make_dir("screenshot/example.com").unwrap();
        ws.write("screenshot/example.com/shot.png", [137u8, 80, 78, 71]).unwrap();

        let items = parse_results(&ws).unwrap();
        assert_eq!(items.items.len(), 1);
        assert_eq!(items.items[0].screenshot, BASE64.encode([137u8, 80, 78, 71]));
    }

    #[test]
    fn missing_screenshot_is_empty() {
        let base = tempfile::tempdir().unwrap();
        let ws = workspace(base.path());
        ws.write(OUTPUT_FILE, LINE).unwrap();

        let items = parse_results(&ws).unwrap();
        assert_eq!(items.items[0].screenshot, "");
    }

    #[test]
    fn escaping_screenshot_path_is_ignored() {
        let base = tempfile::tempdir().unwrap();
        let ws = workspace(base.path());
        let line = LINE.replace("example.com/shot.png", "../../etc/passwd");
        ws.write(OUTPUT_FILE, line).unwrap();

        assert_eq!(parse_results(&ws).unwrap().items[0].screenshot, "");
    }

    #[test]
    fn malformed_output_fails() {
        let base = tempfile::tempdir().unwrap();
        let ws = workspace(base.path());
        ws.write(OUTPUT_FILE, "not json").unwrap();
        assert!(parse_results(&ws).is_err());
        assert!(parse_results(&workspace(base.path())).is_err());
    }

    #[tokio::test]
    async fn unroutable_domains_are_dropped() {
        let resolver = dsc_core::testing::StaticResolver::routable(["example.com"]);
        let kept = routable_domains(
            &resolver,
            &[
                "example.com".to_string(),
                "internal.example.org".to_string(),
                "not_a_domain".to_string(),
            ],
        )
        .await;
        assert_eq!(kept, vec!["example.com"]);
        assert_eq!(resolver.lookups(), vec!["example.com", "internal.example.org"]);
    }

    #[test]
    fn parameters_deserialize() {
        let params: Parameters = serde_json::from_value(
            json!({"domains": ["a.example.com"], "owner_id": "u1", "parent_id": "run-0"}),
        )
        .unwrap();
        assert_eq!(params.domains, vec!["a.example.com"]);
        assert_eq!(params.base.parent_id.as_deref(), Some("run-0"));
    }
}
