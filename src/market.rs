//! HTTP client for the task market

use anyhow::{Context, Result};
use converge::{MarketClient, MarketStatus, MarketTask};
use serde::{Deserialize, Serialize};

/// Posts and polls tasks on an execution market API
pub struct HttpMarketClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
}

impl HttpMarketClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            agent: ureq::Agent::new_with_defaults(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn tasks_url(&self) -> String {
        format!("{}/v1/tasks", self.base_url)
    }

    fn bearer(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| format!("Bearer {key}"))
    }
}

#[derive(Debug, Serialize)]
struct NewTask<'a> {
    title: &'a str,
    description: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    tags: Vec<String>,
    metadata: TaskMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct TaskMetadata<'a> {
    address: String,
    files: &'a [String],
    bounty: f64,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    worker_id: Option<String>,
    #[serde(default)]
    result: Option<TaskResult>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskResult {
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

impl MarketClient for HttpMarketClient {
    fn post(&self, task: &MarketTask) -> Result<String> {
        let body = NewTask {
            title: &task.title,
            description: &task.description,
            kind: "code",
            tags: vec!["driftless".to_string(), task.address.kind().to_string()],
            metadata: TaskMetadata {
                address: task.address.to_string(),
                files: &task.files,
                bounty: task.bounty,
            },
        };

        let mut request = self
            .agent
            .post(&self.tasks_url())
            .header("User-Agent", "driftless");
        if let Some(bearer) = self.bearer() {
            request = request.header("Authorization", &bearer);
        }
        let created: TaskResponse = request
            .send_json(&body)
            .context("Failed to post market task")?
            .body_mut()
            .read_json()
            .context("Invalid market response")?;

        log::info!("Posted {} as market task {}", task.address, created.id);
        Ok(created.id)
    }

    fn poll(&self, task_id: &str) -> Result<MarketStatus> {
        let url = format!("{}/{task_id}", self.tasks_url());
        let mut request = self.agent.get(&url).header("User-Agent", "driftless");
        if let Some(bearer) = self.bearer() {
            request = request.header("Authorization", &bearer);
        }
        let task: TaskResponse = request
            .call()
            .with_context(|| format!("Failed to poll market task {task_id}"))?
            .body_mut()
            .read_json()
            .context("Invalid market response")?;

        Ok(status_of(task))
    }
}

fn status_of(task: TaskResponse) -> MarketStatus {
    let result = task.result.unwrap_or_default();
    match task.status.as_str() {
        "pending" | "open" => MarketStatus::Pending,
        "in_progress" | "assigned" => MarketStatus::InProgress {
            worker: task.worker_id,
        },
        "completed" => MarketStatus::Completed {
            files: result.files,
            worker: task.worker_id,
        },
        "failed" => MarketStatus::Failed {
            reason: result.error.unwrap_or_else(|| "no reason given".to_string()),
        },
        "cancelled" | "canceled" => MarketStatus::Cancelled,
        other => {
            log::warn!("Market task {} has unknown status '{other}'", task.id);
            MarketStatus::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> MarketStatus {
        status_of(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_completed_task_carries_files_and_worker() {
        let status = parse(
            r#"{"id":"t-1","status":"completed","worker_id":"w-9",
                "result":{"files":["src/login.rs"]}}"#,
        );
        assert_eq!(
            status,
            MarketStatus::Completed {
                files: vec!["src/login.rs".to_string()],
                worker: Some("w-9".to_string()),
            }
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(parse(r#"{"id":"t","status":"pending"}"#), MarketStatus::Pending);
        assert_eq!(
            parse(r#"{"id":"t","status":"in_progress","worker_id":"w"}"#),
            MarketStatus::InProgress {
                worker: Some("w".to_string())
            }
        );
        assert_eq!(parse(r#"{"id":"t","status":"cancelled"}"#), MarketStatus::Cancelled);
        assert_eq!(
            parse(r#"{"id":"t","status":"failed","result":{"error":"tests fail"}}"#),
            MarketStatus::Failed {
                reason: "tests fail".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_status_keeps_waiting() {
        assert_eq!(parse(r#"{"id":"t","status":"in_review"}"#), MarketStatus::Pending);
    }

    #[test]
    fn test_new_task_body() {
        let files = vec!["src/a.rs".to_string()];
        let body = NewTask {
            title: "feature.a: login",
            description: "prompt",
            kind: "code",
            tags: vec!["driftless".to_string()],
            metadata: TaskMetadata {
                address: "feature.a".to_string(),
                files: &files,
                bounty: 10.0,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "code");
        assert_eq!(json["metadata"]["address"], "feature.a");
        assert_eq!(json["metadata"]["files"][0], "src/a.rs");
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = HttpMarketClient::new("https://market.test/", None);
        assert_eq!(client.tasks_url(), "https://market.test/v1/tasks");
        assert!(client.bearer().is_none());
    }
}
