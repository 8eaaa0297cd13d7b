//! The seam to the remote multimodal model.
//!
//! The concrete provider SDK is out of scope; this crate talks to it through
//! [`LanguageModel`], a text-in/text-out contract with opaque audio handles.
//! The test suite substitutes a deterministic mock.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Provider-scoped reference to an uploaded audio artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioHandle {
    pub id: String,
}

/// One generation request.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub prompt: String,
    /// Attach a previously uploaded audio artifact.
    pub audio: Option<AudioHandle>,
    /// Ask the model for a strict-JSON response.
    pub json_mode: bool,
}

/// Provider response with optional reported token usage.
#[derive(Clone, Debug)]
pub struct ModelResponse {
    pub text: String,
    pub tokens_used: Option<u64>,
}

/// Failures surfaced by a provider implementation. The message text is what
/// retry classification operates on.
#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("audio upload failed: {message}")]
    #[diagnostic(code(podweave::model::upload))]
    Upload { message: String },

    #[error("model call failed: {message}")]
    #[diagnostic(code(podweave::model::call))]
    Call { message: String },

    #[error("model call timed out after {}s", timeout.as_secs())]
    #[diagnostic(
        code(podweave::model::timeout),
        help("The operation-level timeout elapsed; the call was abandoned.")
    )]
    Timeout { timeout: Duration },
}

/// Contract every provider adapter implements. The gateway is the only
/// caller; everything else in the crate depends on the gateway.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Upload a local audio file under the given API key.
    async fn upload_audio(&self, api_key: &str, path: &Path) -> Result<AudioHandle, ModelError>;

    /// Release a previously uploaded artifact. Best-effort; the gateway logs
    /// and continues on failure.
    async fn delete_audio(&self, api_key: &str, handle: &AudioHandle) -> Result<(), ModelError>;

    /// Run one generation request.
    async fn generate(&self, api_key: &str, request: ModelRequest)
    -> Result<ModelResponse, ModelError>;
}
