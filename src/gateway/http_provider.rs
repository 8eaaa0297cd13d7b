//! Minimal HTTP adapter for a model sidecar endpoint.
//!
//! The provider SDK proper is out of scope; deployments point
//! `MODEL_ENDPOINT` at a service exposing three routes: `POST /v1/files`
//! (raw audio body → `{"id"}`), `DELETE /v1/files/{id}`, and
//! `POST /v1/generate` (`{"model", "prompt", "file_id", "json"}` →
//! `{"text", "tokens_used"}`). Error bodies surface verbatim so the retry
//! policy can classify them.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::provider::{AudioHandle, LanguageModel, ModelError, ModelRequest, ModelResponse};

pub struct HttpLanguageModel {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
}

impl HttpLanguageModel {
    pub fn new(endpoint: impl Into<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model,
        }
    }

    async fn error_text(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        format!("{status}: {body}")
    }
}

#[derive(Deserialize)]
struct FileResponse {
    id: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
    #[serde(default)]
    tokens_used: Option<u64>,
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn upload_audio(&self, api_key: &str, path: &Path) -> Result<AudioHandle, ModelError> {
        let bytes = tokio::fs::read(path).await.map_err(|err| ModelError::Upload {
            message: format!("cannot read {}: {err}", path.display()),
        })?;
        let response = self
            .client
            .post(format!("{}/v1/files", self.endpoint))
            .bearer_auth(api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|err| ModelError::Upload {
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(ModelError::Upload {
                message: Self::error_text(response).await,
            });
        }
        let file: FileResponse = response.json().await.map_err(|err| ModelError::Upload {
            message: err.to_string(),
        })?;
        Ok(AudioHandle { id: file.id })
    }

    async fn delete_audio(&self, api_key: &str, handle: &AudioHandle) -> Result<(), ModelError> {
        let response = self
            .client
            .delete(format!("{}/v1/files/{}", self.endpoint, handle.id))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|err| ModelError::Call {
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(ModelError::Call {
                message: Self::error_text(response).await,
            });
        }
        Ok(())
    }

    async fn generate(
        &self,
        api_key: &str,
        request: ModelRequest,
    ) -> Result<ModelResponse, ModelError> {
        let mut body = json!({
            "prompt": request.prompt,
            "json": request.json_mode,
        });
        if let Some(model) = &self.model {
            body["model"] = json!(model);
        }
        if let Some(audio) = &request.audio {
            body["file_id"] = json!(audio.id);
        }
        let response = self
            .client
            .post(format!("{}/v1/generate", self.endpoint))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ModelError::Call {
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(ModelError::Call {
                message: Self::error_text(response).await,
            });
        }
        let generated: GenerateResponse =
            response.json().await.map_err(|err| ModelError::Call {
                message: err.to_string(),
            })?;
        Ok(ModelResponse {
            text: generated.text,
            tokens_used: generated.tokens_used,
        })
    }
}
