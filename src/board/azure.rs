//! Azure Boards client: work item creation and state changes over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::board::{Board, NewWorkItem, tag_list_contains};
use crate::config::env_required;
use crate::error::{BoardError, ConfigError};
use crate::pipeline::types::{WorkItemId, truncate_chars};

const API_VERSION: &str = "6.0";

const JSON_PATCH: &str = "application/json-patch+json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// States assumed when the board cannot be asked.
const DEFAULT_STATES: [&str; 3] = ["To Do", "Doing", "Done"];

/// Fields the client sets itself from the target state and tags.
const MANAGED_FIELDS: [&str; 2] = ["System.State", "System.Tags"];

// ── Configuration ───────────────────────────────────────────────────

/// Azure DevOps connection settings.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Organization URL, e.g. `https://dev.azure.com/my-org`.
    pub organization_url: String,
    pub project: String,
    /// Personal access token with work item read/write scope.
    pub pat: SecretString,
}

impl BoardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            organization_url: env_required("AZURE_ORG")?,
            project: env_required("AZURE_PROJECT")?,
            pat: SecretString::from(env_required("AZURE_PAT")?),
        })
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Azure Boards implementation of [`Board`].
pub struct AzureBoardsClient {
    org_url: reqwest::Url,
    project: String,
    pat: SecretString,
    client: reqwest::Client,
}

impl AzureBoardsClient {
    pub fn new(config: BoardConfig) -> Result<Self, BoardError> {
        let org_url = reqwest::Url::parse(config.organization_url.trim())
            .map_err(|e| BoardError::InvalidConfig(format!("organization URL: {e}")))?;
        if org_url.cannot_be_a_base() {
            return Err(BoardError::InvalidConfig(format!(
                "organization URL {org_url} cannot be used as a base"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BoardError::RequestFailed {
                reason: e.to_string(),
            })?;

        Ok(Self {
            org_url,
            project: config.project,
            pat: config.pat,
            client,
        })
    }

    /// `{org}/{project}/_apis/wit/{segments...}?api-version=6.0`
    pub fn wit_url(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.project_url(&["_apis", "wit"]);
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        url
    }

    /// Browser link for a work item.
    pub fn work_item_url(&self, id: &WorkItemId) -> reqwest::Url {
        self.project_url(&["_workitems", "edit", id.as_str()])
    }

    fn project_url(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.org_url.clone();
        // `new` rejects cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.project).extend(segments);
        }
        url
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, BoardError> {
        let response = request
            .basic_auth("", Some(self.pat.expose_secret()))
            .send()
            .await
            .map_err(|e| BoardError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BoardError::Rejected {
                status: status.as_u16(),
                body: truncate_chars(&body, 500),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BoardError::InvalidResponse {
                reason: e.to_string(),
            })
    }

    /// Work item type names defined in the project.
    pub async fn work_item_types(&self) -> Result<Vec<String>, BoardError> {
        let body = self
            .send(self.client.get(self.wit_url(&["workitemtypes"])))
            .await?;
        Ok(names(&body))
    }

    /// State names available for a work item type.
    pub async fn states_for(&self, type_name: &str) -> Result<Vec<String>, BoardError> {
        let body = self
            .send(
                self.client
                    .get(self.wit_url(&["workitemtypes", type_name, "states"])),
            )
            .await?;
        Ok(names(&body))
    }

    /// The wanted type if the project has it, else the project's first type.
    async fn resolve_type(&self, wanted: &str) -> String {
        match self.work_item_types().await {
            Ok(types) => pick_available(wanted, &types, "work item type"),
            Err(e) => {
                debug!(error = %e, "Could not list work item types, using {wanted}");
                wanted.to_string()
            }
        }
    }

    /// The wanted state if the type supports it, else the type's first state.
    async fn resolve_state(&self, type_name: &str, wanted: &str) -> String {
        let states = match self.states_for(type_name).await {
            Ok(states) => states,
            Err(e) => {
                debug!(error = %e, type_name, "Could not list states, assuming defaults");
                DEFAULT_STATES.iter().map(|s| s.to_string()).collect()
            }
        };
        pick_available(wanted, &states, "state")
    }
}

#[async_trait]
impl Board for AzureBoardsClient {
    fn name(&self) -> &str {
        "azure-boards"
    }

    async fn create_work_item(&self, item: &NewWorkItem) -> Result<WorkItemId, BoardError> {
        let type_name = self.resolve_type(item.work_item_type.board_name()).await;
        let state = self.resolve_state(&type_name, &item.state).await;
        let patch = build_create_patch(item, &state);

        let url = self.wit_url(&["workitems", &format!("${type_name}")]);
        let body = self
            .send(
                self.client
                    .post(url)
                    .header(CONTENT_TYPE, JSON_PATCH)
                    .json(&patch),
            )
            .await?;

        let id = body
            .get("id")
            .and_then(Value::as_u64)
            .map(|id| WorkItemId::new(id.to_string()))
            .ok_or_else(|| BoardError::InvalidResponse {
                reason: "created work item has no id".into(),
            })?;

        info!(
            id = %id,
            type_name = %type_name,
            state = %state,
            url = %self.work_item_url(&id),
            "Azure work item created"
        );
        Ok(id)
    }

    async fn transition_work_item(&self, id: &WorkItemId, state: &str) -> Result<(), BoardError> {
        let patch = json!([{ "op": "add", "path": "/fields/System.State", "value": state }]);
        self.send(
            self.client
                .patch(self.wit_url(&["workitems", id.as_str()]))
                .header(CONTENT_TYPE, JSON_PATCH)
                .json(&patch),
        )
        .await?;
        Ok(())
    }

    async fn has_marker_tag(&self, id: &WorkItemId, marker: &str) -> Result<bool, BoardError> {
        let mut url = self.wit_url(&["workitems", id.as_str()]);
        url.query_pairs_mut().append_pair("fields", "System.Tags");

        let body = self.send(self.client.get(url)).await?;
        let tags = body
            .pointer("/fields/System.Tags")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(tag_list_contains(tags, marker))
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// JSON-patch document creating a work item in `state` with the item's tags and fields.
///
/// Empty field values are left out.
pub fn build_create_patch(item: &NewWorkItem, state: &str) -> Vec<Value> {
    let mut patch: Vec<Value> = item
        .fields
        .iter()
        .filter(|(name, value)| !value.is_empty() && !MANAGED_FIELDS.contains(&name.as_str()))
        .map(|(name, value)| json!({ "op": "add", "path": format!("/fields/{name}"), "value": value }))
        .collect();

    patch.push(json!({ "op": "add", "path": "/fields/System.State", "value": state }));

    if !item.tags.is_empty() {
        let tags = item.tags.iter().map(String::as_str).collect::<Vec<_>>().join("; ");
        patch.push(json!({ "op": "add", "path": "/fields/System.Tags", "value": tags }));
    }

    patch
}

/// `value[].name` from an Azure list response.
fn names(body: &Value) -> Vec<String> {
    body.get("value")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn pick_available(wanted: &str, available: &[String], what: &str) -> String {
    if available.is_empty() || available.iter().any(|a| a == wanted) {
        return wanted.to_string();
    }
    let first = available[0].clone();
    warn!(wanted, using = %first, available = ?available, "Board {what} not available, using first");
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    use crate::pipeline::types::WorkItemType;

    fn client(org: &str, project: &str) -> AzureBoardsClient {
        AzureBoardsClient::new(BoardConfig {
            organization_url: org.into(),
            project: project.into(),
            pat: SecretString::from("pat".to_string()),
        })
        .unwrap()
    }

    fn item() -> NewWorkItem {
        NewWorkItem {
            work_item_type: WorkItemType::Issue,
            state: "Doing".into(),
            tags: BTreeSet::from(["Auto-Generated".to_string(), "Failure".to_string()]),
            fields: BTreeMap::from([
                ("System.Title".to_string(), "Execution failed: Build failed".to_string()),
                ("System.History".to_string(), String::new()),
                ("System.State".to_string(), "Ignored".to_string()),
            ]),
        }
    }

    #[test]
    fn create_patch_sets_state_tags_and_fields() {
        let patch = build_create_patch(&item(), "Doing");
        assert_eq!(
            patch,
            vec![
                json!({"op": "add", "path": "/fields/System.Title", "value": "Execution failed: Build failed"}),
                json!({"op": "add", "path": "/fields/System.State", "value": "Doing"}),
                json!({"op": "add", "path": "/fields/System.Tags", "value": "Auto-Generated; Failure"}),
            ]
        );
    }

    #[test]
    fn wit_url_encodes_project_and_version() {
        let client = client("https://dev.azure.com/my-org/", "QA Automation");
        let url = client.wit_url(&["workitems", "$Issue"]);
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/my-org/QA%20Automation/_apis/wit/workitems/$Issue?api-version=6.0"
        );
    }

    #[test]
    fn work_item_url_points_at_editor() {
        let client = client("https://dev.azure.com/my-org", "QA");
        assert_eq!(
            client.work_item_url(&WorkItemId::new("17")).as_str(),
            "https://dev.azure.com/my-org/QA/_workitems/edit/17"
        );
    }

    #[test]
    fn invalid_org_url_is_rejected() {
        let result = AzureBoardsClient::new(BoardConfig {
            organization_url: "not a url".into(),
            project: "QA".into(),
            pat: SecretString::from("pat".to_string()),
        });
        assert!(matches!(result, Err(BoardError::InvalidConfig(_))));

        let result = AzureBoardsClient::new(BoardConfig {
            organization_url: "mailto:ops@example.com".into(),
            project: "QA".into(),
            pat: SecretString::from("pat".to_string()),
        });
        assert!(matches!(result, Err(BoardError::InvalidConfig(_))));
    }

    #[test]
    fn names_from_list_response() {
        let body = json!({"count": 2, "value": [{"name": "To Do"}, {"name": "Done"}, {"other": 1}]});
        assert_eq!(names(&body), vec!["To Do".to_string(), "Done".to_string()]);
        assert!(names(&json!({})).is_empty());
    }

    #[test]
    fn pick_available_falls_back_to_first() {
        let available = vec!["New".to_string(), "Active".to_string()];
        assert_eq!(pick_available("Doing", &available, "state"), "New");
        assert_eq!(pick_available("Active", &available, "state"), "Active");
        assert_eq!(pick_available("Doing", &[], "state"), "Doing");
    }
}
