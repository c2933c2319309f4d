//! HTTP implementation of [`AgentRuntime`] over the Assistants v2 API.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::events::decode_sse;
use super::{
    AgentRuntime, AgentSettings, Assistant, AssistantUpdate, Attachment, FileObject, MessageRole,
    Run, RunEventStream, RunRequest, ToolOutput,
};
use crate::error::AgentApiError;

/// Client for an `OpenAI` or Azure `OpenAI` Assistants endpoint.
#[derive(Clone)]
pub struct AssistantsClient {
    http: reqwest::Client,
    settings: AgentSettings,
}

impl std::fmt::Debug for AssistantsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantsClient")
            .field("endpoint", &self.settings.endpoint)
            .field("provider", &self.settings.provider)
            .field("assistant_id", &self.settings.assistant_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListPage<T> {
    data: Vec<T>,
}

impl AssistantsClient {
    #[must_use]
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = self.settings.provider.build_url(&self.settings.endpoint, path);
        let mut rb = self
            .http
            .request(method, url)
            .header("OpenAI-Beta", "assistants=v2");

        if let Some(key) = &self.settings.api_key {
            rb = if self.settings.provider.uses_api_key_header() {
                rb.header("api-key", key)
            } else {
                rb.bearer_auth(key)
            };
        }
        rb
    }

    async fn send(rb: reqwest::RequestBuilder) -> anyhow::Result<reqwest::Response> {
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentApiError {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(rb: reqwest::RequestBuilder) -> anyhow::Result<T> {
        Ok(Self::send(rb).await?.json().await?)
    }

    async fn send_stream(rb: reqwest::RequestBuilder) -> anyhow::Result<RunEventStream> {
        let resp = Self::send(rb).await?;
        Ok(decode_sse(resp.bytes_stream()))
    }
}

#[async_trait::async_trait]
impl AgentRuntime for AssistantsClient {
    async fn create_thread(&self) -> anyhow::Result<String> {
        let rb = self
            .request(reqwest::Method::POST, "threads")
            .json(&serde_json::json!({}));
        let thread: IdOnly = Self::send_json(rb).await?;
        tracing::info!(thread_id = %thread.id, "Created thread");
        Ok(thread.id)
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
        attachments: &[Attachment],
    ) -> anyhow::Result<()> {
        let mut body = serde_json::json!({ "role": role, "content": content });
        if !attachments.is_empty() {
            body["attachments"] = serde_json::to_value(attachments)?;
        }
        let rb = self
            .request(reqwest::Method::POST, &format!("threads/{thread_id}/messages"))
            .json(&body);
        let _: IdOnly = Self::send_json(rb).await?;
        Ok(())
    }

    async fn start_run(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> anyhow::Result<RunEventStream> {
        let body = serde_json::json!({
            "assistant_id": request.assistant_id,
            "temperature": request.temperature,
            "stream": true,
        });
        let rb = self
            .request(reqwest::Method::POST, &format!("threads/{thread_id}/runs"))
            .json(&body);
        Self::send_stream(rb).await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> anyhow::Result<RunEventStream> {
        let body = serde_json::json!({ "tool_outputs": outputs, "stream": true });
        let rb = self
            .request(
                reqwest::Method::POST,
                &format!("threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            )
            .json(&body);
        Self::send_stream(rb).await
    }

    async fn list_runs(&self, thread_id: &str) -> anyhow::Result<Vec<Run>> {
        let rb = self.request(
            reqwest::Method::GET,
            &format!("threads/{thread_id}/runs?limit=100"),
        );
        let page: ListPage<Run> = Self::send_json(rb).await?;
        Ok(page.data)
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> anyhow::Result<()> {
        let rb = self.request(
            reqwest::Method::POST,
            &format!("threads/{thread_id}/runs/{run_id}/cancel"),
        );
        let _: Run = Self::send_json(rb).await?;
        Ok(())
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> anyhow::Result<Assistant> {
        let rb = self.request(reqwest::Method::GET, &format!("assistants/{assistant_id}"));
        Self::send_json(rb).await
    }

    async fn update_assistant(
        &self,
        assistant_id: &str,
        update: &AssistantUpdate,
    ) -> anyhow::Result<Assistant> {
        let rb = self
            .request(reqwest::Method::POST, &format!("assistants/{assistant_id}"))
            .json(update);
        Self::send_json(rb).await
    }

    async fn upload_file(&self, name: &str, bytes: Vec<u8>) -> anyhow::Result<String> {
        let mime = mime_guess::from_path(name).first_or_octet_stream();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str(mime.as_ref())?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);

        let rb = self.request(reqwest::Method::POST, "files").multipart(form);
        let file: IdOnly = Self::send_json(rb).await?;
        tracing::info!(file_id = %file.id, name = %name, "Uploaded file");
        Ok(file.id)
    }

    async fn retrieve_file(&self, file_id: &str) -> anyhow::Result<FileObject> {
        let rb = self.request(reqwest::Method::GET, &format!("files/{file_id}"));
        Self::send_json(rb).await
    }

    async fn file_content(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        let rb = self.request(reqwest::Method::GET, &format!("files/{file_id}/content"));
        let bytes = Self::send(rb).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn delete_file(&self, file_id: &str) -> anyhow::Result<()> {
        let rb = self.request(reqwest::Method::DELETE, &format!("files/{file_id}"));
        Self::send(rb).await?;
        Ok(())
    }
}
