use async_trait::async_trait;

use crate::{
    encoding::EncodedImage,
    error::GenerationError,
    models::{Artifact, GenerationKind, GenerationRequest, OperationHandle, VideoArtifact, VideoRequest},
};

/// Boundary to the generative-AI service. Everything behind it is opaque,
/// slow and non-deterministic; everything in front of it is orchestration.
#[async_trait]
pub trait Generator: Send + Sync {
    /// One generation call. `slot` is the batch position the result is destined for;
    /// planning calls that serve the whole batch pass `None`.
    async fn generate(
        &self,
        kind: GenerationKind,
        request: &GenerationRequest,
        slot: Option<usize>,
    ) -> Result<Artifact, GenerationError>;

    async fn submit_video_job(&self, request: &VideoRequest) -> Result<OperationHandle, GenerationError>;

    /// Status query for a previously submitted job.
    async fn poll_video_job(&self, handle: &OperationHandle) -> Result<OperationHandle, GenerationError>;

    async fn fetch_video(&self, uri: &str) -> Result<VideoArtifact, GenerationError>;

    async fn analyze_image(&self, image: &EncodedImage) -> Result<String, GenerationError>;

    /// Replace the stored API key after the previous one was rejected.
    fn reselect_credentials(&self, _api_key: String) {}
}
