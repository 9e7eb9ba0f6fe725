use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::SourceProvider;
use crate::config::RallySettings;
use crate::model::work_item::{EntityKind, WorkItem};

const API_PATH: &str = "slm/webservice/v2.0";
const PAGE_SIZE: usize = 1000;
const FETCH_FIELDS: &str = "Name,FormattedID,Project,ObjectID,Description,PlanEstimate,AcceptanceCriteria";

/// A Rally session scoped to one workspace and project.
pub struct RallyProvider {
    api_root: String,
    api_key: String,
    client: reqwest::Client,
    workspace_ref: String,
    project_ref: String,
}

#[derive(Deserialize)]
struct QueryEnvelope<T> {
    #[serde(rename = "QueryResult")]
    query_result: QueryResult<T>,
}

#[derive(Deserialize)]
struct QueryResult<T> {
    #[serde(rename = "Results", default = "Vec::new")]
    results: Vec<T>,
    #[serde(rename = "TotalResultCount", default)]
    total_result_count: usize,
    #[serde(rename = "Errors", default)]
    errors: Vec<String>,
    #[serde(rename = "Warnings", default)]
    warnings: Vec<String>,
}

#[derive(Deserialize)]
struct NamedObject {
    #[serde(rename = "ObjectID")]
    object_id: u64,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Deserialize)]
struct Artifact {
    #[serde(rename = "FormattedID")]
    formatted_id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ObjectID")]
    object_id: u64,
    #[serde(rename = "Project")]
    project: ProjectRef,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "AcceptanceCriteria")]
    acceptance_criteria: Option<String>,
    #[serde(rename = "PlanEstimate")]
    plan_estimate: Option<f64>,
}

#[derive(Deserialize)]
struct ProjectRef {
    #[serde(rename = "ObjectID")]
    object_id: Option<u64>,
    #[serde(rename = "_ref")]
    reference: Option<String>,
}

impl ProjectRef {
    fn id(&self) -> Option<u64> {
        self.object_id.or_else(|| {
            self.reference
                .as_deref()
                .and_then(|r| r.trim_end_matches('/').rsplit('/').next())
                .and_then(|last| last.parse().ok())
        })
    }
}

impl Artifact {
    fn into_work_item(self, kind: EntityKind) -> Result<WorkItem> {
        let project_id = self
            .project
            .id()
            .with_context(|| format!("{} has no project object id", self.formatted_id))?;
        Ok(WorkItem {
            formatted_id: self.formatted_id,
            object_id: self.object_id,
            name: self.name,
            project_id,
            description: self.description.unwrap_or_default(),
            acceptance_criteria: self.acceptance_criteria.unwrap_or_default(),
            plan_estimate: self.plan_estimate,
            kind,
        })
    }
}

fn name_query(name: &str) -> String {
    format!("(Name = \"{}\")", escape_quotes(name))
}

fn iteration_query(iteration: &str) -> String {
    format!("(Iteration.Name = \"{}\")", escape_quotes(iteration))
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl RallyProvider {
    /// Open a session, resolving the workspace and project names to refs.
    pub async fn connect(settings: &RallySettings) -> Result<Self> {
        let mut provider = Self {
            api_root: format!("{}/{API_PATH}", settings.base_url),
            api_key: settings.api_key.clone(),
            client: reqwest::Client::new(),
            workspace_ref: String::new(),
            project_ref: String::new(),
        };

        let workspace = provider
            .find_named("workspace", &settings.workspace, &[])
            .await
            .context("Rally workspace lookup failed")?
            .with_context(|| format!("Rally workspace '{}' not found", settings.workspace))?;
        provider.workspace_ref = format!("/workspace/{}", workspace.object_id);

        let workspace_ref = provider.workspace_ref.clone();
        let project = provider
            .find_named("project", &settings.project, &[("workspace", workspace_ref.as_str())])
            .await
            .context("Rally project lookup failed")?
            .with_context(|| format!("Rally project '{}' not found", settings.project))?;
        provider.project_ref = format!("/project/{}", project.object_id);

        log::debug!(
            "connected to Rally workspace {} project {}",
            provider.workspace_ref,
            provider.project_ref
        );
        Ok(provider)
    }

    async fn find_named(
        &self,
        type_path: &str,
        name: &str,
        scope: &[(&str, &str)],
    ) -> Result<Option<NamedObject>> {
        let url = format!(
            "{}/{type_path}?query={}&fetch=ObjectID,Name",
            self.api_root,
            urlencoding::encode(&name_query(name))
        );
        let result: QueryResult<NamedObject> = self.query(&url, scope).await?;
        Ok(result.results.into_iter().find(|o| o.name == name))
    }

    async fn query<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<QueryResult<T>> {
        log::debug!("GET {url}");
        let resp = self
            .client
            .get(url)
            .query(params)
            .header("ZSESSIONID", &self.api_key)
            .header("X-RallyIntegrationVendor", "Trello")
            .header("X-RallyIntegrationName", "Trello Import")
            .header("X-RallyIntegrationVersion", "1.0")
            .header("Accept", "application/json")
            .send()
            .await
            .context("Rally API request failed")?
            .error_for_status()
            .context("Rally API returned an error status")?;

        let envelope: QueryEnvelope<T> =
            resp.json().await.context("Failed to parse Rally response")?;
        let result = envelope.query_result;

        for warning in &result.warnings {
            log::warn!("Rally: {warning}");
        }
        if !result.errors.is_empty() {
            bail!("Rally query failed: {}", result.errors.join("; "));
        }
        Ok(result)
    }
}

#[async_trait]
impl SourceProvider for RallyProvider {
    fn name(&self) -> &str {
        "Rally"
    }

    async fn fetch_work_items(&self, kind: EntityKind, iteration: &str) -> Result<Vec<WorkItem>> {
        let url = format!(
            "{}/{}?query={}&fetch={FETCH_FIELDS}&order={}&pagesize={PAGE_SIZE}&start=1",
            self.api_root,
            kind.query_type(),
            urlencoding::encode(&iteration_query(iteration)),
            urlencoding::encode("FormattedID desc"),
        );
        let scope = [
            ("workspace", self.workspace_ref.as_str()),
            ("project", self.project_ref.as_str()),
        ];

        let result: QueryResult<Artifact> = self
            .query(&url, &scope)
            .await
            .with_context(|| format!("Rally {kind} query failed"))?;

        if result.total_result_count > result.results.len() {
            log::warn!(
                "iteration '{iteration}' has {} {}, only the first {} are imported",
                result.total_result_count,
                kind.plural(),
                result.results.len()
            );
        }

        result
            .results
            .into_iter()
            .map(|artifact| artifact.into_work_item(kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str) -> RallySettings {
        RallySettings {
            base_url: base_url.to_string(),
            api_key: "secret".into(),
            workspace: "Acme".into(),
            project: "Web Team".into(),
            iteration: "Sprint 7".into(),
            import_defects: false,
        }
    }

    fn envelope(results: serde_json::Value, total: usize) -> serde_json::Value {
        json!({ "QueryResult": {
            "Results": results,
            "TotalResultCount": total,
            "Errors": [],
            "Warnings": []
        }})
    }

    async fn mount_session(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/slm/webservice/v2.0/workspace"))
            .and(query_param("query", "(Name = \"Acme\")"))
            .and(header("ZSESSIONID", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                json!([{ "ObjectID": 11, "Name": "Acme" }]),
                1,
            )))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/slm/webservice/v2.0/project"))
            .and(query_param("workspace", "/workspace/11"))
            .and(query_param("query", "(Name = \"Web Team\")"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                json!([{ "ObjectID": 22, "Name": "Web Team" }]),
                1,
            )))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetches_stories_for_iteration() {
        let server = MockServer::start().await;
        mount_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/slm/webservice/v2.0/hierarchicalrequirement"))
            .and(query_param("query", "(Iteration.Name = \"Sprint 7\")"))
            .and(query_param("order", "FormattedID desc"))
            .and(query_param("pagesize", "1000"))
            .and(query_param("workspace", "/workspace/11"))
            .and(query_param("project", "/project/22"))
            .and(header("X-RallyIntegrationName", "Trello Import"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                json!([
                    {
                        "FormattedID": "US124",
                        "Name": "Logout",
                        "ObjectID": 9001,
                        "Project": { "_ref": "https://rally/slm/webservice/v2.0/project/22", "ObjectID": 22 },
                        "Description": "<p>Add logout</p>",
                        "AcceptanceCriteria": "<p>Works</p>",
                        "PlanEstimate": 3.0
                    },
                    {
                        "FormattedID": "US123",
                        "Name": "Login",
                        "ObjectID": 9000,
                        "Project": { "_ref": "https://rally/slm/webservice/v2.0/project/22" },
                        "Description": null,
                        "AcceptanceCriteria": null,
                        "PlanEstimate": null
                    }
                ]),
                2,
            )))
            .mount(&server)
            .await;

        let rally = RallyProvider::connect(&settings(&server.uri())).await.unwrap();
        let items = rally
            .fetch_work_items(EntityKind::Story, "Sprint 7")
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].formatted_id, "US124");
        assert_eq!(items[0].object_id, 9001);
        assert_eq!(items[0].project_id, 22);
        assert_eq!(items[0].plan_estimate, Some(3.0));
        assert_eq!(items[0].description, "<p>Add logout</p>");
        assert_eq!(items[0].kind, EntityKind::Story);
        // Project id falls back to the ref's trailing segment.
        assert_eq!(items[1].project_id, 22);
        assert_eq!(items[1].description, "");
        assert_eq!(items[1].plan_estimate, None);
    }

    #[tokio::test]
    async fn defects_without_acceptance_criteria() {
        let server = MockServer::start().await;
        mount_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/slm/webservice/v2.0/defect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                json!([{
                    "FormattedID": "DE7",
                    "Name": "Crash",
                    "ObjectID": 77,
                    "Project": { "ObjectID": 22 },
                    "Description": "boom"
                }]),
                1,
            )))
            .mount(&server)
            .await;

        let rally = RallyProvider::connect(&settings(&server.uri())).await.unwrap();
        let items = rally
            .fetch_work_items(EntityKind::Defect, "Sprint 7")
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, EntityKind::Defect);
        assert_eq!(items[0].acceptance_criteria, "");
    }

    #[tokio::test]
    async fn no_matches_is_empty_not_error() {
        let server = MockServer::start().await;
        mount_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/slm/webservice/v2.0/hierarchicalrequirement"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]), 0)))
            .mount(&server)
            .await;

        let rally = RallyProvider::connect(&settings(&server.uri())).await.unwrap();
        let items = rally
            .fetch_work_items(EntityKind::Story, "Nope")
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn missing_results_deserialize_empty() {
        let envelope: QueryEnvelope<NamedObject> = serde_json::from_value(json!({
            "QueryResult": { "TotalResultCount": 0, "Errors": ["bad query"] }
        }))
        .unwrap();
        assert!(envelope.query_result.results.is_empty());
        assert_eq!(envelope.query_result.errors, vec!["bad query".to_string()]);
        assert!(envelope.query_result.warnings.is_empty());
    }

    #[tokio::test]
    async fn query_errors_are_fatal() {
        let server = MockServer::start().await;
        mount_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/slm/webservice/v2.0/hierarchicalrequirement"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "QueryResult": {
                "Results": [],
                "TotalResultCount": 0,
                "Errors": ["Could not parse: bad query"],
                "Warnings": []
            }})))
            .mount(&server)
            .await;

        let rally = RallyProvider::connect(&settings(&server.uri())).await.unwrap();
        let err = rally
            .fetch_work_items(EntityKind::Story, "Sprint 7")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Could not parse"));
    }

    #[tokio::test]
    async fn auth_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = RallyProvider::connect(&settings(&server.uri())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_project_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slm/webservice/v2.0/workspace"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                json!([{ "ObjectID": 11, "Name": "Acme" }]),
                1,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slm/webservice/v2.0/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]), 0)))
            .mount(&server)
            .await;

        let err = RallyProvider::connect(&settings(&server.uri()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Rally project 'Web Team' not found"));
    }

    #[test]
    fn quotes_in_names_are_escaped() {
        assert_eq!(
            iteration_query(r#"Sprint "7""#),
            r#"(Iteration.Name = "Sprint \"7\"")"#
        );
    }

    #[test]
    fn project_id_from_ref() {
        let project = ProjectRef {
            object_id: None,
            reference: Some("https://rally1.rallydev.com/slm/webservice/v2.0/project/12345".into()),
        };
        assert_eq!(project.id(), Some(12345));
    }
}
