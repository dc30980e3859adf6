use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    error::GenerationError,
    generator::Generator,
    models::{OperationHandle, VideoArtifact},
};

/// Told when the collaborator rejects the stored credentials mid-job.
pub trait CredentialSignal: Send + Sync {
    fn credentials_invalid(&self, reason: &str);
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&AppConfig> for PollerConfig {
    fn from(config: &AppConfig) -> Self {
        Self { interval: config.poll_interval, max_attempts: config.poll_max_attempts.max(1) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PollPhase {
    Submitted,
    Polling { attempt: u32 },
    Completed,
    Failed { error: GenerationError },
}

impl PollPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollPhase::Completed | PollPhase::Failed { .. })
    }
}

/// Drives one submitted video job to a terminal phase.
pub struct VideoPoller {
    generator: Arc<dyn Generator>,
    config: PollerConfig,
    credentials: Arc<dyn CredentialSignal>,
}

impl VideoPoller {
    pub fn new(generator: Arc<dyn Generator>, config: PollerConfig, credentials: Arc<dyn CredentialSignal>) -> Self {
        Self { generator, config, credentials }
    }

    /// Reports every phase to `observe`, ending with `Completed` or `Failed`.
    /// The artifact is fetched at most once.
    pub async fn drive(
        &self,
        handle: OperationHandle,
        mut observe: impl FnMut(PollPhase) + Send,
    ) -> Result<VideoArtifact, GenerationError> {
        observe(PollPhase::Submitted);
        match self.run(&handle, &mut observe).await {
            Ok(video) => {
                info!(operation = %handle.name, bytes = video.data.len(), "🎬 Video ready");
                observe(PollPhase::Completed);
                Ok(video)
            }
            Err(e) => {
                if let GenerationError::Auth(reason) = &e {
                    self.credentials.credentials_invalid(reason);
                }
                warn!(operation = %handle.name, "❌ Video job failed: {}", e);
                observe(PollPhase::Failed { error: e.clone() });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        handle: &OperationHandle,
        observe: &mut (impl FnMut(PollPhase) + Send),
    ) -> Result<VideoArtifact, GenerationError> {
        let mut current = handle.clone();
        let mut attempt = 0;
        while !current.done {
            if attempt >= self.config.max_attempts {
                let waited = self.config.interval * self.config.max_attempts;
                return Err(GenerationError::Timeout(waited));
            }
            tokio::time::sleep(self.config.interval).await;
            attempt += 1;
            current = self.generator.poll_video_job(&current).await?;
            debug!(operation = %current.name, attempt, done = current.done, "polled video job");
            if !current.done {
                observe(PollPhase::Polling { attempt });
            }
        }

        let uri = current.result_uri.as_deref().filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            let reason = current.failure.clone().unwrap_or_else(|| "operation finished without a video".into());
            GenerationError::NoArtifact(reason)
        })?;
        self.generator.fetch_video(uri).await
    }
}
