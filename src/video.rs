use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    encoding::ReferenceImage,
    error::{ApiError, GenerationError},
    generator::Generator,
    models::{AspectRatio, VideoArtifact, VideoRequest},
    poller::{CredentialSignal, PollPhase, PollerConfig, VideoPoller},
};

/// Whether the stored API key is still believed to work.
#[derive(Debug)]
pub struct CredentialState {
    valid: AtomicBool,
    invalidations: AtomicU32,
    reason: RwLock<Option<String>>,
}

impl Default for CredentialState {
    fn default() -> Self {
        Self { valid: AtomicBool::new(true), invalidations: AtomicU32::new(0), reason: RwLock::new(None) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub valid: bool,
    pub invalidations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CredentialState {
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> CredentialStatus {
        CredentialStatus {
            valid: self.is_valid(),
            invalidations: self.invalidations.load(Ordering::SeqCst),
            reason: self.reason.read().clone(),
        }
    }

    /// Installs a new key on the collaborator and marks credentials usable again.
    pub fn reselect(&self, generator: &dyn Generator, api_key: String) -> Result<(), GenerationError> {
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(GenerationError::Validation("api_key".into()));
        }
        generator.reselect_credentials(api_key);
        self.valid.store(true, Ordering::SeqCst);
        *self.reason.write() = None;
        info!("🔑 API key reselected");
        Ok(())
    }
}

impl CredentialSignal for CredentialState {
    fn credentials_invalid(&self, reason: &str) {
        self.valid.store(false, Ordering::SeqCst);
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        *self.reason.write() = Some(reason.to_string());
        warn!("🔒 Stored credentials rejected: {}", reason);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInput {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub image: Option<ReferenceImage>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

impl VideoInput {
    fn validate(&self) -> Result<VideoRequest, GenerationError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::Validation("prompt".into()));
        }
        let image = self.image.as_ref().ok_or_else(|| GenerationError::Validation("image".into()))?.encode()?;
        Ok(VideoRequest { prompt: prompt.to_string(), image, aspect_ratio: self.aspect_ratio })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoJob {
    pub id: Uuid,
    pub operation: String,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub phase: PollPhase,
    pub history: Vec<PollPhase>,
    pub video_ready: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    video: Option<VideoArtifact>,
}

impl VideoJob {
    fn record(&mut self, phase: PollPhase) {
        self.history.push(phase.clone());
        self.phase = phase;
    }

    /// Writes the poll outcome. A job cancelled in the meantime keeps its phase.
    fn settle(&mut self, outcome: Result<VideoArtifact, GenerationError>) {
        if self.phase.is_terminal() {
            return;
        }
        match outcome {
            Ok(video) => {
                self.video = Some(video);
                self.video_ready = true;
                self.record(PollPhase::Completed);
            }
            Err(error) => self.record(PollPhase::Failed { error }),
        }
    }
}

/// Finished jobs kept in memory, videos included.
const KEEP_FINISHED: usize = 32;

/// Drops the oldest finished jobs beyond `keep`. Running jobs are never dropped.
fn prune_finished(jobs: &mut HashMap<Uuid, VideoJob>, keep: usize) {
    let mut finished: Vec<_> =
        jobs.values().filter(|j| j.phase.is_terminal()).map(|j| (j.created_at, j.id)).collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in &finished[..excess] {
        jobs.remove(id);
    }
    debug!(dropped = excess, "pruned finished video jobs");
}

/// Video jobs of the current session and the tasks polling them.
pub struct VideoController {
    generator: Arc<dyn Generator>,
    poller: Arc<VideoPoller>,
    credentials: Arc<CredentialState>,
    jobs: Arc<RwLock<HashMap<Uuid, VideoJob>>>,
    tasks: Arc<Mutex<HashMap<Uuid, AbortHandle>>>,
}

impl VideoController {
    pub fn new(generator: Arc<dyn Generator>, config: PollerConfig, credentials: Arc<CredentialState>) -> Self {
        let poller = VideoPoller::new(generator.clone(), config, credentials.clone());
        Self {
            generator,
            poller: Arc::new(poller),
            credentials,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submits the job and starts polling it in the background.
    pub async fn submit(&self, input: &VideoInput) -> Result<(VideoJob, JoinHandle<()>), GenerationError> {
        let request = input.validate()?;
        if !self.credentials.is_valid() {
            return Err(GenerationError::Auth("select a valid API key before generating video".into()));
        }

        let handle = match self.generator.submit_video_job(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                if let GenerationError::Auth(reason) = &e {
                    self.credentials.credentials_invalid(reason);
                }
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        let job = VideoJob {
            id,
            operation: handle.name.clone(),
            prompt: request.prompt.clone(),
            aspect_ratio: request.aspect_ratio,
            phase: PollPhase::Submitted,
            history: vec![PollPhase::Submitted],
            video_ready: false,
            created_at: Utc::now(),
            video: None,
        };
        self.jobs.write().insert(id, job);
        info!(%id, operation = %handle.name, "🎬 Video job submitted");

        let poller = self.poller.clone();
        let jobs = self.jobs.clone();
        let finished_tasks = self.tasks.clone();
        // held across the spawn so the task cannot remove its entry before it exists
        let mut tasks = self.tasks.lock();
        let task = tokio::spawn(async move {
            let observer_jobs = jobs.clone();
            let observe = move |phase: PollPhase| {
                // submission is already recorded; terminal phases are written with their outcome
                if phase == PollPhase::Submitted || phase.is_terminal() {
                    return;
                }
                if let Some(job) = observer_jobs.write().get_mut(&id) {
                    job.record(phase);
                }
            };
            let outcome = poller.drive(handle, observe).await;
            finished_tasks.lock().remove(&id);
            let mut jobs = jobs.write();
            if let Some(job) = jobs.get_mut(&id) {
                job.settle(outcome);
            }
            prune_finished(&mut jobs, KEEP_FINISHED);
        });
        tasks.insert(id, task.abort_handle());
        drop(tasks);

        let job = self.get(id).ok_or_else(|| GenerationError::Transport("video job vanished".into()))?;
        Ok((job, task))
    }

    pub fn get(&self, id: Uuid) -> Option<VideoJob> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<VideoJob> {
        let mut jobs: Vec<_> = self.jobs.read().values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn video(&self, id: Uuid) -> Result<VideoArtifact, ApiError> {
        let jobs = self.jobs.read();
        let job = jobs.get(&id).ok_or_else(|| ApiError::NotFound(format!("video job {id} not found")))?;
        job.video.clone().ok_or_else(|| ApiError::Conflict(format!("video job {id} has no video yet")))
    }

    /// Stops polling. A job that already reached a terminal phase keeps it.
    pub fn cancel(&self, id: Uuid) -> Result<VideoJob, ApiError> {
        if let Some(task) = self.tasks.lock().remove(&id) {
            task.abort();
        }
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| ApiError::NotFound(format!("video job {id} not found")))?;
        if !job.phase.is_terminal() {
            job.record(PollPhase::Failed { error: GenerationError::Cancelled });
            info!(%id, "🛑 Video job cancelled");
        }
        let job = job.clone();
        prune_finished(&mut jobs, KEEP_FINISHED);
        Ok(job)
    }
}
