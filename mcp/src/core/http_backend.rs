//! REST implementation of [`JobBackend`] for the hosted job platform.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::{
    backend::{JobBackend, JobDefinition, JobRun, ResultPage, RunOptions, StoreQuery},
    config::HttpProxyConfig,
    proxy::build_http_client,
};
use crate::error::{McpError, McpResult};

/// Seconds the platform may hold a wait request open.
const WAIT_FOR_FINISH_SECS: u64 = 60;
const TOTAL_HEADER: &str = "x-apify-pagination-total";
const STANDBY_DOMAIN: &str = "apify.actor";

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorInfo {
    id: String,
    name: String,
    username: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    default_run_options: Option<DefaultRunOptions>,
    #[serde(default)]
    standby_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefaultRunOptions {
    #[serde(default)]
    memory_mbytes: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    #[serde(default)]
    actor_definition: Option<ActorDefinition>,
    #[serde(default)]
    input_schema: Option<String>,
    #[serde(default)]
    readme: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorDefinition {
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    readme: Option<String>,
    #[serde(default)]
    web_server_mcp_path: Option<String>,
}

#[derive(Deserialize)]
struct StoreList {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

pub struct HttpJobBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpJobBackend {
    pub fn new(base_url: &str, proxy: Option<&HttpProxyConfig>) -> McpResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| McpError::Config(format!("invalid API base URL {}: {}", base_url, e)))?;
        Ok(Self {
            client: build_http_client(proxy, None)?,
            base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> McpResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| McpError::Config(format!("cannot-be-a-base URL: {}", self.base_url)))?
            .pop_if_empty()
            .push("v2")
            .extend(segments);
        Ok(url)
    }

    async fn get_data<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> McpResult<T> {
        let response = check_status(request.send().await?).await?;
        Ok(response.json::<Envelope<T>>().await?.data)
    }
}

/// Job identifiers use `~` in URL paths where they use `/` elsewhere.
fn path_id(identifier: &str) -> String {
    identifier.replace('/', "~")
}

fn standby_url(info: &ActorInfo) -> String {
    info.standby_url.clone().unwrap_or_else(|| {
        format!(
            "https://{}--{}.{}",
            info.username.replace('.', "-"),
            info.name,
            STANDBY_DOMAIN
        )
    })
}

/// Map platform error statuses onto the gateway error taxonomy, keeping the
/// remote error text.
async fn check_status(response: reqwest::Response) -> McpResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    let message = format!("{} ({})", message, url.path());

    Err(match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            McpError::Unauthorized(message)
        }
        reqwest::StatusCode::NOT_FOUND => McpError::NotFound(message),
        _ => McpError::Transport(format!("HTTP {}: {}", status.as_u16(), message)),
    })
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn get_job_definition(
        &self,
        identifier: &str,
        credential: &str,
    ) -> McpResult<JobDefinition> {
        let id = path_id(identifier);
        let info: ActorInfo = self
            .get_data(
                self.client
                    .get(self.endpoint(&["acts", &id])?)
                    .bearer_auth(credential),
            )
            .await?;
        let build: BuildInfo = self
            .get_data(
                self.client
                    .get(self.endpoint(&["acts", &id, "builds", "default"])?)
                    .bearer_auth(credential),
            )
            .await?;

        let (input_schema, readme, registry_path) = match build.actor_definition {
            Some(def) => (
                def.input.or_else(|| parse_legacy_schema(build.input_schema.as_deref())),
                def.readme.or(build.readme),
                def.web_server_mcp_path,
            ),
            None => (
                parse_legacy_schema(build.input_schema.as_deref()),
                build.readme,
                None,
            ),
        };

        debug!(
            "Fetched definition of {}/{} (nested registry: {})",
            info.username,
            info.name,
            registry_path.is_some()
        );

        Ok(JobDefinition {
            full_name: format!("{}/{}", info.username, info.name),
            standby_url: Some(standby_url(&info)),
            id: info.id,
            description: info.description,
            input_schema,
            readme,
            default_memory_mbytes: info.default_run_options.and_then(|o| o.memory_mbytes),
            registry_path,
        })
    }

    async fn start_job(
        &self,
        identifier: &str,
        arguments: &Value,
        options: &RunOptions,
        credential: &str,
    ) -> McpResult<JobRun> {
        let mut request = self
            .client
            .post(self.endpoint(&["acts", &path_id(identifier), "runs"])?)
            .bearer_auth(credential)
            .json(arguments);
        if let Some(memory) = options.memory_mbytes {
            request = request.query(&[("memory", memory)]);
        }
        let run: JobRun = self.get_data(request).await?;
        info!("Started run {} of {}", run.id, identifier);
        Ok(run)
    }

    async fn wait_for_job(&self, run_id: &str, credential: &str) -> McpResult<JobRun> {
        loop {
            let run: JobRun = self
                .get_data(
                    self.client
                        .get(self.endpoint(&["actor-runs", run_id])?)
                        .query(&[("waitForFinish", WAIT_FOR_FINISH_SECS)])
                        .timeout(Duration::from_secs(WAIT_FOR_FINISH_SECS + 30))
                        .bearer_auth(credential),
                )
                .await?;
            if run.status.is_terminal() {
                return Ok(run);
            }
            debug!("Run {} still {:?}", run_id, run.status);
        }
    }

    async fn abort_job(&self, run_id: &str, credential: &str) -> McpResult<()> {
        let request = self
            .client
            .post(self.endpoint(&["actor-runs", run_id, "abort"])?)
            .bearer_auth(credential);
        check_status(request.send().await?).await?;
        Ok(())
    }

    async fn get_job_result(
        &self,
        dataset_id: &str,
        offset: usize,
        limit: Option<usize>,
        credential: &str,
    ) -> McpResult<ResultPage> {
        let mut request = self
            .client
            .get(self.endpoint(&["datasets", dataset_id, "items"])?)
            .query(&[("clean", "true"), ("format", "json")])
            .query(&[("offset", offset)])
            .bearer_auth(credential);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }

        let response = check_status(request.send().await?).await?;
        let total = response
            .headers()
            .get(TOTAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let items: Vec<Value> = response.json().await?;

        Ok(ResultPage {
            items,
            offset,
            total,
        })
    }

    async fn search_jobs(
        &self,
        query: &StoreQuery,
        credential: Option<&str>,
    ) -> McpResult<Vec<Value>> {
        let mut request = self
            .client
            .get(self.endpoint(&["store"])?)
            .query(&[("search", query.search.as_str())])
            .query(&[("limit", query.limit), ("offset", query.offset)]);
        if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
            request = request.query(&[("category", category)]);
        }
        if let Some(credential) = credential {
            request = request.bearer_auth(credential);
        }
        let list: StoreList = self.get_data(request).await?;
        Ok(list.items)
    }

    async fn push_results(
        &self,
        dataset_id: &str,
        items: &[Value],
        credential: &str,
    ) -> McpResult<()> {
        let request = self
            .client
            .post(self.endpoint(&["datasets", dataset_id, "items"])?)
            .bearer_auth(credential)
            .json(items);
        check_status(request.send().await?).await?;
        Ok(())
    }
}

/// Older builds carry the input schema as a JSON string.
fn parse_legacy_schema(raw: Option<&str>) -> Option<Value> {
    raw.and_then(|s| serde_json::from_str(s).ok())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::core::backend::JobStatus;

    async fn backend(server: &MockServer) -> HttpJobBackend {
        HttpJobBackend::new(&server.uri(), None).unwrap()
    }

    #[tokio::test]
    async fn test_get_job_definition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/acts/acct~sum-two-numbers"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "id": "A1",
                    "name": "sum-two-numbers",
                    "username": "acct",
                    "description": "Adds two numbers",
                    "defaultRunOptions": {"build": "latest", "memoryMbytes": 8192}
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/acts/acct~sum-two-numbers/builds/default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "actorDefinition": {
                        "input": {"type": "object", "properties": {"a": {"type": "integer"}}},
                        "readme": "# Sum"
                    }
                }
            })))
            .mount(&server)
            .await;

        let def = backend(&server)
            .await
            .get_job_definition("acct/sum-two-numbers", "tok")
            .await
            .unwrap();
        assert_eq!(def.id, "A1");
        assert_eq!(def.full_name, "acct/sum-two-numbers");
        assert_eq!(def.default_memory_mbytes, Some(8192));
        assert_eq!(def.readme.as_deref(), Some("# Sum"));
        assert!(def.input_schema.is_some());
        assert!(!def.is_nested_registry());
        assert_eq!(
            def.standby_url.as_deref(),
            Some("https://acct--sum-two-numbers.apify.actor")
        );
    }

    #[tokio::test]
    async fn test_nested_registry_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/acts/acct~gw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "G1", "name": "gw", "username": "acct",
                         "standbyUrl": "https://gw.example.run"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/acts/acct~gw/builds/default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"actorDefinition": {"webServerMcpPath": "/mcp"}}
            })))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let address = backend.get_registry_address("acct/gw", "tok").await.unwrap();
        assert_eq!(address.as_deref(), Some("https://gw.example.run/mcp"));
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/acts/acct~missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"type": "record-not-found", "message": "Actor was not found"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/acts/acct~private"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"type": "token-not-valid", "message": "User was not found or authentication token is not valid"}
            })))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let err = backend
            .get_job_definition("acct/missing", "tok")
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotFound(ref m) if m.contains("Actor was not found")));

        let err = backend
            .get_job_definition("acct/private", "bad")
            .await
            .unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_start_wait_and_read_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/acts/acct~sum/runs"))
            .and(query_param("memory", "1024"))
            .and(body_json(json!({"a": 1})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {"id": "R1", "actId": "A1", "status": "RUNNING", "defaultDatasetId": "D1"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/actor-runs/R1"))
            .and(query_param("waitForFinish", "60"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "R1", "actId": "A1", "status": "SUCCEEDED", "defaultDatasetId": "D1"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/datasets/D1/items"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(TOTAL_HEADER, "2")
                    .set_body_json(json!([{"sum": 1}, {"sum": 2}])),
            )
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let run = backend
            .start_job(
                "acct/sum",
                &json!({"a": 1}),
                &RunOptions {
                    memory_mbytes: Some(1024),
                },
                "tok",
            )
            .await
            .unwrap();
        assert_eq!(run.status, JobStatus::Running);

        let run = backend.wait_for_job(&run.id, "tok").await.unwrap();
        assert_eq!(run.status, JobStatus::Succeeded);

        let page = backend
            .get_job_result(&run.default_dataset_id, 0, None, "tok")
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, Some(2));
    }

    #[tokio::test]
    async fn test_search_and_push() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/store"))
            .and(query_param("search", "maps"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"total": 1, "items": [{"name": "maps", "username": "acct"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/datasets/OUT/items"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let items = backend
            .search_jobs(
                &StoreQuery {
                    search: "maps".into(),
                    limit: 5,
                    offset: 0,
                    category: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(items.len(), 1);

        backend
            .push_results("OUT", &[json!({"x": 1})], "tok")
            .await
            .unwrap();
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpJobBackend::new("not a url", None),
            Err(McpError::Config(_))
        ));
    }
}
