//! Scripted collaborator for orchestration tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::{collections::VecDeque, time::Duration};

use crate::{
    encoding::EncodedImage,
    error::GenerationError,
    generator::Generator,
    models::{Artifact, GenerationKind, GenerationRequest, ImageArtifact, OperationHandle, VideoArtifact, VideoRequest},
};

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: GenerationKind,
    pub slot: Option<usize>,
    pub prompt: String,
    pub count: usize,
    pub has_reference: bool,
    /// How many earlier calls had the same kind and slot.
    pub attempt: usize,
}

pub struct Scripted {
    pub delay: Duration,
    pub result: Result<Artifact, GenerationError>,
}

impl Scripted {
    pub fn now(result: Result<Artifact, GenerationError>) -> Self {
        Self { delay: Duration::ZERO, result }
    }

    pub fn after_ms(ms: u64, result: Result<Artifact, GenerationError>) -> Self {
        Self { delay: Duration::from_millis(ms), result }
    }
}

/// Distinct PNG-typed bytes per slot and attempt.
pub fn image_for(slot: usize, attempt: usize) -> Artifact {
    let mut data = b"\x89PNG".to_vec();
    data.extend_from_slice(format!("slot-{slot}-attempt-{attempt}").as_bytes());
    Artifact::Image(ImageArtifact { data, media_type: "image/png".into(), style: None })
}

type Script = Box<dyn Fn(&Call) -> Scripted + Send + Sync>;

pub struct ScriptedGenerator {
    script: Script,
    calls: Mutex<Vec<Call>>,
    submit: Mutex<Option<Result<OperationHandle, GenerationError>>>,
    polls: Mutex<VecDeque<Result<OperationHandle, GenerationError>>>,
    fetch: Mutex<Option<Result<VideoArtifact, GenerationError>>>,
    fetches: Mutex<usize>,
    reselected: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(script: impl Fn(&Call) -> Scripted + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            submit: Mutex::new(None),
            polls: Mutex::new(VecDeque::new()),
            fetch: Mutex::new(None),
            fetches: Mutex::new(0),
            reselected: Mutex::new(Vec::new()),
        }
    }

    /// A video script: `polls` are returned in order, one per status query.
    pub fn video(
        submit: Result<OperationHandle, GenerationError>,
        polls: Vec<Result<OperationHandle, GenerationError>>,
        fetch: Result<VideoArtifact, GenerationError>,
    ) -> Self {
        let gen = Self::new(|_| Scripted::now(Err(GenerationError::Transport("not scripted".into()))));
        *gen.submit.lock() = Some(submit);
        *gen.polls.lock() = polls.into();
        *gen.fetch.lock() = Some(fetch);
        gen
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock()
    }

    pub fn reselected(&self) -> Vec<String> {
        self.reselected.lock().clone()
    }
}

pub fn done(name: &str, uri: &str) -> OperationHandle {
    OperationHandle { name: name.into(), done: true, result_uri: Some(uri.into()), failure: None }
}

pub fn mp4() -> VideoArtifact {
    VideoArtifact { data: Bytes::from_static(b"\0\0\0\x18ftypmp42"), media_type: "video/mp4".into() }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        kind: GenerationKind,
        request: &GenerationRequest,
        slot: Option<usize>,
    ) -> Result<Artifact, GenerationError> {
        let scripted = {
            let mut calls = self.calls.lock();
            let attempt = calls.iter().filter(|c| c.kind == kind && c.slot == slot).count();
            let call = Call {
                kind,
                slot,
                prompt: request.prompt.clone(),
                count: request.count,
                has_reference: request.reference.is_some(),
                attempt,
            };
            let scripted = (self.script)(&call);
            calls.push(call);
            scripted
        };
        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        scripted.result
    }

    async fn submit_video_job(&self, _request: &VideoRequest) -> Result<OperationHandle, GenerationError> {
        self.submit.lock().clone().unwrap_or_else(|| Err(GenerationError::Transport("no submit scripted".into())))
    }

    async fn poll_video_job(&self, handle: &OperationHandle) -> Result<OperationHandle, GenerationError> {
        // an exhausted queue keeps reporting "still running"
        self.polls.lock().pop_front().unwrap_or_else(|| Ok(OperationHandle::pending(handle.name.clone())))
    }

    async fn fetch_video(&self, _uri: &str) -> Result<VideoArtifact, GenerationError> {
        *self.fetches.lock() += 1;
        self.fetch.lock().clone().unwrap_or_else(|| Err(GenerationError::Transport("no fetch scripted".into())))
    }

    async fn analyze_image(&self, _image: &EncodedImage) -> Result<String, GenerationError> {
        Ok("análisis".into())
    }

    fn reselect_credentials(&self, api_key: String) {
        self.reselected.lock().push(api_key);
    }
}
