//! HTTP client for other agents' A2A servers.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::a2a::{
    AgentCard, CreateTaskRequest, Message, SendMessageRequest, SendMetadata, SenderInfo, Task,
    TaskEnvelope,
};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum A2aError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("unexpected response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl A2aError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct A2aClient {
    http: reqwest::Client,
}

impl A2aClient {
    pub fn new() -> Result<Self, A2aError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| A2aError::Http {
                url: String::new(),
                source,
            })?;
        Ok(Self { http })
    }

    async fn decode<T: DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<T, A2aError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(A2aError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|error| A2aError::InvalidResponse {
                url: url.to_string(),
                message: error.to_string(),
            })
    }

    async fn post<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
    ) -> Result<T, A2aError> {
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| A2aError::Http {
                url: url.clone(),
                source,
            })?;
        Self::decode(&url, response).await
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<T, A2aError> {
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| A2aError::Http {
                url: url.clone(),
                source,
            })?;
        Self::decode(&url, response).await
    }

    /// `POST {endpoint}/tasks/send`. Returns the receiver's view of the task.
    pub async fn send_message(
        &self,
        endpoint: &str,
        request: &SendMessageRequest,
    ) -> Result<Task, A2aError> {
        let envelope: TaskEnvelope = self
            .post(format!("{}/tasks/send", trim(endpoint)), request)
            .await?;
        Ok(envelope.task)
    }

    /// Ask the sender's own server to hold a task for an outbound message.
    pub async fn create_sender_task(
        &self,
        endpoint: &str,
        message: Message,
        metadata: Map<String, Value>,
    ) -> Result<Task, A2aError> {
        let request = CreateTaskRequest {
            message,
            context_id: None,
            metadata,
        };
        let envelope: TaskEnvelope = self
            .post(format!("{}/tasks/create", trim(endpoint)), &request)
            .await?;
        Ok(envelope.task)
    }

    pub async fn get_task(&self, endpoint: &str, task_id: &str) -> Result<Task, A2aError> {
        let envelope: TaskEnvelope = self
            .get(format!("{}/tasks/{task_id}", trim(endpoint)))
            .await?;
        Ok(envelope.task)
    }

    pub async fn cancel_task(&self, endpoint: &str, task_id: &str) -> Result<Task, A2aError> {
        let envelope: TaskEnvelope = self
            .post(
                format!("{}/tasks/{task_id}/cancel", trim(endpoint)),
                &Value::Object(Map::new()),
            )
            .await?;
        Ok(envelope.task)
    }

    /// Poll until the remote task finishes or `timeout` passes; returns the
    /// last seen task. The remote task is never cancelled.
    pub async fn wait_for_task(
        &self,
        endpoint: &str,
        task_id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Task, A2aError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.get_task(endpoint, task_id).await?;
            if task.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn fetch_agent_card(&self, base_url: &str) -> Result<AgentCard, A2aError> {
        self.get(format!("{}/.well-known/agent.json", trim(base_url)))
            .await
    }

    /// Answer a sender-owned task: role `agent`, `in_reply_to` set, never
    /// marked as expecting a response.
    pub async fn send_reply(
        &self,
        endpoint: &str,
        sender: SenderInfo,
        in_reply_to: &str,
        text: &str,
    ) -> Result<Task, A2aError> {
        let request = SendMessageRequest {
            message: Message::agent_text(text),
            context_id: None,
            metadata: SendMetadata {
                sender: Some(sender),
                response_expected: false,
                sender_task_id: None,
                in_reply_to: Some(in_reply_to.to_string()),
            },
        };
        self.send_message(endpoint, &request).await
    }
}

fn trim(endpoint: &str) -> &str {
    endpoint.trim_end_matches('/')
}
