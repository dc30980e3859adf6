//! Batch generation: a fixed number of independent slots filled by
//! concurrent collaborator calls, with per-slot regeneration.
//!
//! Every call that may write into a slot carries a ticket. Tickets come from a
//! single counter per tool that only ever grows; a slot remembers the ticket of
//! the last call issued for it and a settling call is applied only when its
//! ticket still matches. The last call *issued* for a slot therefore wins,
//! whatever order the responses arrive in.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{ApiError, GenerationError},
    export,
    generator::Generator,
    models::{validate_artifact, Artifact, GenerationKind, GenerationRequest, Payload, SocialIdea},
    sink::{Sink, SinkError},
    tools::{Strategy, ToolInput, ToolKind, ToolParams},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSlot {
    pub index: usize,
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Idea the slot's image is rendered from (plan-then-fill tools only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<SocialIdea>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    ticket: u64,
}

impl ResultSlot {
    fn pending(index: usize) -> Self {
        Self {
            index,
            status: SlotStatus::Pending,
            payload: None,
            error_message: None,
            error_kind: None,
            retryable: None,
            plan: None,
            updated_at: Utc::now(),
            ticket: 0,
        }
    }

    fn start(&mut self, ticket: u64) {
        self.status = SlotStatus::Loading;
        self.payload = None;
        self.error_message = None;
        self.error_kind = None;
        self.retryable = None;
        self.ticket = ticket;
        self.updated_at = Utc::now();
    }
}

/// State of one tool's batch. Each tool controller owns exactly one.
#[derive(Debug, Clone, Serialize)]
pub struct BatchState {
    pub tool: ToolKind,
    pub batch_id: Option<Uuid>,
    pub slots: Vec<ResultSlot>,
    pub is_generating: bool,
    #[serde(skip)]
    params: Option<ToolParams>,
    #[serde(skip)]
    next_ticket: u64,
}

impl BatchState {
    /// Placeholder state shown before the first batch: `size` pending slots.
    pub fn placeholder(tool: ToolKind, size: usize) -> Self {
        Self {
            tool,
            batch_id: None,
            slots: (0..size).map(ResultSlot::pending).collect(),
            is_generating: false,
            params: None,
            next_ticket: 0,
        }
    }

    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn begin_batch(&mut self, size: usize, params: ToolParams) -> (Uuid, Vec<u64>) {
        let batch_id = Uuid::new_v4();
        let mut slots = Vec::with_capacity(size);
        let mut tickets = Vec::with_capacity(size);
        for index in 0..size {
            let ticket = self.issue_ticket();
            let mut slot = ResultSlot::pending(index);
            slot.start(ticket);
            slots.push(slot);
            tickets.push(ticket);
        }
        self.batch_id = Some(batch_id);
        self.slots = slots;
        self.is_generating = true;
        self.params = Some(params);
        (batch_id, tickets)
    }

    /// Checks that `index` can be regenerated and returns its plan, if any.
    fn regenerable(&self, index: usize, needs_plan: bool) -> Result<Option<SocialIdea>, BatchRejected> {
        let slot = self.slots.get(index).ok_or(BatchRejected::NoSuchSlot(index))?;
        if slot.status == SlotStatus::Pending {
            return Err(BatchRejected::SlotPending(index));
        }
        if needs_plan && slot.plan.is_none() {
            return Err(BatchRejected::NothingToRegenerate(index));
        }
        Ok(slot.plan.clone())
    }

    fn restart(&mut self, index: usize) -> u64 {
        let ticket = self.issue_ticket();
        if let Some(slot) = self.slots.get_mut(index) {
            slot.start(ticket);
        }
        ticket
    }

    /// Applies the outcome of the call holding `ticket`. Returns `false` when the
    /// slot has since been handed to a newer call and the outcome was dropped.
    pub fn settle(&mut self, index: usize, ticket: u64, outcome: Result<Payload, GenerationError>) -> bool {
        let Some(slot) = self.slots.get_mut(index) else { return false };
        if slot.ticket != ticket {
            return false;
        }
        match outcome {
            Ok(payload) => {
                slot.status = SlotStatus::Success;
                slot.payload = Some(payload);
            }
            Err(e) => {
                slot.status = SlotStatus::Error;
                slot.error_message = Some(e.to_string());
                slot.error_kind = Some(e.kind());
                slot.retryable = Some(e.is_retryable());
            }
        }
        slot.updated_at = Utc::now();
        true
    }

    fn attach_plan(&mut self, index: usize, ticket: u64, idea: SocialIdea) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.ticket == ticket => {
                slot.plan = Some(idea);
                slot.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn finish_batch(&mut self, batch_id: Uuid) {
        if self.batch_id == Some(batch_id) {
            self.is_generating = false;
        }
    }

    pub fn slot(&self, index: usize) -> Option<&ResultSlot> {
        self.slots.get(index)
    }

    /// Successful payloads in index order.
    pub fn successful(&self) -> impl Iterator<Item = (usize, &Payload)> {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::Success)
            .filter_map(|s| s.payload.as_ref().map(|p| (s.index, p)))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BatchRejected {
    #[error(transparent)]
    Invalid(#[from] GenerationError),
    #[error("a batch is already being generated")]
    AlreadyGenerating,
    #[error("slot {0} does not exist")]
    NoSuchSlot(usize),
    #[error("slot {0} has not been generated yet")]
    SlotPending(usize),
    #[error("slot {0} has no idea to render; generate the batch again")]
    NothingToRegenerate(usize),
}

impl From<BatchRejected> for ApiError {
    fn from(e: BatchRejected) -> Self {
        match e {
            BatchRejected::Invalid(e) => ApiError::Generation(e),
            BatchRejected::NoSuchSlot(_) => ApiError::NotFound(e.to_string()),
            BatchRejected::AlreadyGenerating
            | BatchRejected::SlotPending(_)
            | BatchRejected::NothingToRegenerate(_) => ApiError::Conflict(e.to_string()),
        }
    }
}

/// What a settling call needs: shared by the batch driver and every slot task.
#[derive(Clone)]
struct SlotWriter {
    tool: ToolKind,
    generator: Arc<dyn Generator>,
    state: Arc<RwLock<BatchState>>,
    call_timeout: Duration,
}

impl SlotWriter {
    async fn call(
        &self,
        kind: GenerationKind,
        request: &GenerationRequest,
        slot: Option<usize>,
    ) -> Result<Artifact, GenerationError> {
        let artifact = tokio::time::timeout(self.call_timeout, self.generator.generate(kind, request, slot))
            .await
            .map_err(|_| GenerationError::Timeout(self.call_timeout))??;
        validate_artifact(&artifact)?;
        Ok(artifact)
    }

    async fn fill(&self, index: usize, ticket: u64, request: GenerationRequest, plan: Option<SocialIdea>) {
        let outcome = self
            .call(self.tool.slot_kind(), &request, Some(index))
            .await
            .and_then(|artifact| into_payload(self.tool, artifact, plan));
        self.apply(index, ticket, outcome);
    }

    fn apply(&self, index: usize, ticket: u64, outcome: Result<Payload, GenerationError>) {
        if let Err(e) = &outcome {
            warn!(tool = self.tool.slug(), slot = index, ticket, "❌ Slot failed: {}", e);
        }
        if self.state.write().settle(index, ticket, outcome) {
            debug!(tool = self.tool.slug(), slot = index, ticket, "slot settled");
        } else {
            debug!(tool = self.tool.slug(), slot = index, ticket, "discarding stale result");
        }
    }

    async fn run_independent(&self, request: GenerationRequest, tickets: Vec<u64>) {
        let mut set = JoinSet::new();
        for (index, ticket) in tickets.into_iter().enumerate() {
            let writer = self.clone();
            let request = request.clone();
            set.spawn(async move { writer.fill(index, ticket, request, None).await });
        }
        while set.join_next().await.is_some() {}
    }

    async fn run_plan_then_fill(&self, plan_request: GenerationRequest, tickets: Vec<u64>) {
        let ideas = match self.call(GenerationKind::SocialIdeas, &plan_request, None).await {
            Ok(Artifact::SocialIdeas(ideas)) => ideas,
            Ok(other) => {
                let e = GenerationError::Malformed(format!("expected post ideas, got {}", other.kind_name()));
                return self.fail_all(&tickets, e);
            }
            Err(e) => return self.fail_all(&tickets, e),
        };
        info!(tool = self.tool.slug(), "💡 {} ideas planned, rendering images", ideas.len());

        let mut set = JoinSet::new();
        for (index, ticket) in tickets.into_iter().enumerate() {
            let Some(idea) = ideas.get(index).cloned() else {
                self.apply(index, ticket, Err(GenerationError::NoArtifact("fewer ideas than slots".into())));
                continue;
            };
            if !self.state.write().attach_plan(index, ticket, idea.clone()) {
                continue;
            }
            let writer = self.clone();
            set.spawn(async move {
                let request = GenerationRequest::text(idea.image_prompt.clone());
                writer.fill(index, ticket, request, Some(idea)).await
            });
        }
        while set.join_next().await.is_some() {}
    }

    fn fail_all(&self, tickets: &[u64], e: GenerationError) {
        for (index, ticket) in tickets.iter().enumerate() {
            self.apply(index, *ticket, Err(e.clone()));
        }
    }
}

fn into_payload(tool: ToolKind, artifact: Artifact, plan: Option<SocialIdea>) -> Result<Payload, GenerationError> {
    let payload = match (tool, artifact, plan) {
        (ToolKind::Social, Artifact::Image(image), Some(idea)) => Payload::SocialPost { idea, image },
        (ToolKind::Mockups | ToolKind::Logos, Artifact::Image(image), _) => Payload::Image(image),
        (ToolKind::Branding, Artifact::Branding(b), _) => Payload::Branding(b),
        (ToolKind::Copywriting, Artifact::Copy(c), _) => Payload::Copy(c),
        (ToolKind::Campaign, Artifact::Campaign(c), _) => Payload::Campaign(c),
        (ToolKind::Scripts, Artifact::Script(s), _) => Payload::Script(s),
        (ToolKind::Personas, Artifact::Persona(p), _) => Payload::Persona(p),
        (ToolKind::Seo, Artifact::Seo(s), _) => Payload::Seo(s),
        (ToolKind::Names, Artifact::NameSlogan(n), _) => Payload::NameSlogan(n),
        (tool, artifact, _) => {
            return Err(GenerationError::Malformed(format!(
                "{} cannot use a {} result",
                tool.slug(),
                artifact.kind_name()
            )))
        }
    };
    Ok(payload)
}

/// Owns one tool's batch and every task writing into it.
pub struct BatchController {
    writer: SlotWriter,
    batch_size: usize,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl BatchController {
    pub fn new(tool: ToolKind, generator: Arc<dyn Generator>, batch_size: usize, call_timeout: Duration) -> Self {
        Self {
            writer: SlotWriter {
                tool,
                generator,
                state: Arc::new(RwLock::new(BatchState::placeholder(tool, batch_size))),
                call_timeout,
            },
            batch_size,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn tool(&self) -> ToolKind {
        self.writer.tool
    }

    pub fn snapshot(&self) -> BatchState {
        self.writer.state.read().clone()
    }

    fn track(&self, handle: &JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle.abort_handle());
    }

    /// Starts a full batch. Invalid input or a batch already in flight leave the
    /// state untouched and issue no request.
    pub fn start_batch(&self, input: &ToolInput) -> Result<JoinHandle<()>, BatchRejected> {
        let tool = self.tool();
        let params = ToolParams::build(tool, input)?;
        let (batch_id, tickets) = {
            let mut state = self.writer.state.write();
            if state.is_generating {
                return Err(BatchRejected::AlreadyGenerating);
            }
            state.begin_batch(self.batch_size, params.clone())
        };
        info!(tool = tool.slug(), %batch_id, "🚀 Starting batch of {}", tickets.len());

        let writer = self.writer.clone();
        let request = params.request(tickets.len());
        let handle = tokio::spawn(async move {
            match tool.strategy() {
                Strategy::Independent => writer.run_independent(request, tickets).await,
                Strategy::PlanThenFill => writer.run_plan_then_fill(request, tickets).await,
            }
            writer.state.write().finish_batch(batch_id);
            info!(tool = tool.slug(), %batch_id, "✅ Batch settled");
        });
        self.track(&handle);
        Ok(handle)
    }

    /// Re-issues the call for a single slot. With `input`, the new parameters are
    /// used for this call only; otherwise the batch's parameters are reused.
    /// Plan-then-fill slots always re-render from their existing idea.
    pub fn regenerate_slot(&self, index: usize, input: Option<&ToolInput>) -> Result<JoinHandle<()>, BatchRejected> {
        let tool = self.tool();
        let plan_then_fill = tool.strategy() == Strategy::PlanThenFill;
        let override_params = match input {
            Some(input) if !plan_then_fill => Some(ToolParams::build(tool, input)?),
            _ => None,
        };

        let (ticket, plan, request) = {
            let mut state = self.writer.state.write();
            let plan = state.regenerable(index, plan_then_fill)?;
            let request = match (&plan, override_params.or_else(|| state.params.clone())) {
                (Some(idea), _) => GenerationRequest::text(idea.image_prompt.clone()),
                (None, Some(params)) => params.request(1),
                (None, None) => return Err(BatchRejected::SlotPending(index)),
            };
            (state.restart(index), plan, request)
        };
        info!(tool = tool.slug(), slot = index, ticket, "🔄 Regenerating slot");

        let writer = self.writer.clone();
        let handle = tokio::spawn(async move { writer.fill(index, ticket, request, plan).await });
        self.track(&handle);
        Ok(handle)
    }

    /// Aborts every in-flight call and restores the placeholder batch.
    pub fn reset(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let mut state = self.writer.state.write();
        let next_ticket = state.next_ticket;
        *state = BatchState::placeholder(self.tool(), self.batch_size);
        state.next_ticket = next_ticket;
        info!(tool = self.tool().slug(), "🧹 Batch reset");
    }

    pub fn copy_slot(&self, index: usize, sink: &dyn Sink) -> Result<(), SinkError> {
        let text = {
            let state = self.writer.state.read();
            let payload = successful_payload(&state, index)?;
            payload.copy_text().ok_or(SinkError::NothingToCopy(index))?
        };
        sink.copy_to_clipboard(&text)
    }

    pub fn download_slot(&self, index: usize, sink: &dyn Sink) -> Result<(), SinkError> {
        let state = self.writer.state.read();
        let payload = successful_payload(&state, index)?;
        match payload.image() {
            Some(image) => {
                let stem = format!("{}-{}", self.tool().slug(), Utc::now().timestamp_millis());
                sink.download_bytes(&image.file_name(&stem), &image.media_type, &image.data)
            }
            None => {
                let name = format!("{}-{}.txt", self.tool().slug(), index + 1);
                sink.download_text(&name, &payload.export_text())
            }
        }
    }

    /// Sends every successful slot, in index order, as one text file.
    pub fn export_text(&self, sink: &dyn Sink) -> Result<(), SinkError> {
        let content = export::batch_text(&self.writer.state.read());
        let name = format!("{}-export.txt", self.tool().slug());
        sink.download_text(&name, &content)
    }

    pub fn export_pdf(&self, sink: &dyn Sink) -> Result<(), SinkError> {
        let bytes = export::batch_pdf(&self.writer.state.read())?;
        let name = format!("{}-export.pdf", self.tool().slug());
        sink.download_bytes(&name, "application/pdf", &bytes)
    }
}

fn successful_payload(state: &BatchState, index: usize) -> Result<&Payload, SinkError> {
    let slot = state.slot(index).ok_or(SinkError::NoSuchSlot(index))?;
    match (&slot.status, &slot.payload) {
        (SlotStatus::Success, Some(payload)) => Ok(payload),
        _ => Err(SinkError::NotReady(index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{ImageArtifact, SocialIdea},
        sink::MemorySink,
        testing::{image_for, ScriptedGenerator, Scripted},
    };
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(120);

    fn prompt(text: &str) -> ToolInput {
        ToolInput { prompt: Some(text.into()), ..Default::default() }
    }

    fn controller(tool: ToolKind, n: usize, generator: &Arc<ScriptedGenerator>) -> BatchController {
        BatchController::new(tool, generator.clone(), n, TIMEOUT)
    }

    fn payload_of(state: &BatchState, index: usize) -> Option<Payload> {
        state.slots[index].payload.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn every_slot_settles_for_any_batch_size() {
        for n in [1, 3, 10] {
            let gen = Arc::new(ScriptedGenerator::new(|call| {
                let slot = call.slot.unwrap();
                Scripted::after_ms(10 * slot as u64, Ok(image_for(slot, call.attempt)))
            }));
            let ctl = controller(ToolKind::Logos, n, &gen);
            ctl.start_batch(&prompt("zorro lector")).unwrap().await.unwrap();

            let state = ctl.snapshot();
            assert_eq!(state.slots.len(), n);
            assert!(state.slots.iter().all(|s| s.status == SlotStatus::Success));
            assert!(!state.is_generating);
            assert_eq!(gen.calls().len(), n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settlement_order_does_not_change_mapping() {
        let forward = Arc::new(ScriptedGenerator::new(|call| {
            let slot = call.slot.unwrap();
            Scripted::after_ms(100 * slot as u64, Ok(image_for(slot, 0)))
        }));
        let reverse = Arc::new(ScriptedGenerator::new(|call| {
            let slot = call.slot.unwrap();
            Scripted::after_ms(100 * (10 - slot as u64), Ok(image_for(slot, 0)))
        }));
        let a = controller(ToolKind::Logos, 10, &forward);
        let b = controller(ToolKind::Logos, 10, &reverse);
        a.start_batch(&prompt("x")).unwrap().await.unwrap();
        b.start_batch(&prompt("x")).unwrap().await.unwrap();

        let (sa, sb) = (a.snapshot(), b.snapshot());
        for i in 0..10 {
            assert_eq!(payload_of(&sa, i), payload_of(&sb, i));
            assert_eq!(payload_of(&sa, i), Some(Payload::Image(image_artifact(i, 0))));
        }
    }

    fn image_artifact(slot: usize, attempt: usize) -> ImageArtifact {
        match image_for(slot, attempt) {
            Artifact::Image(img) => img,
            _ => unreachable!(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_is_isolated() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            let slot = call.slot.unwrap();
            if slot == 4 {
                Scripted::after_ms(5, Err(GenerationError::Transport("connection reset".into())))
            } else {
                Scripted::after_ms(50, Ok(image_for(slot, 0)))
            }
        }));
        let ctl = controller(ToolKind::Mockups, 6, &gen);
        let input = ToolInput {
            image: Some(crate::encoding::ReferenceImage::from_bytes(crate::encoding::PNG_MAGIC, None)),
            ..Default::default()
        };
        ctl.start_batch(&input).unwrap().await.unwrap();

        let state = ctl.snapshot();
        for slot in &state.slots {
            if slot.index == 4 {
                assert_eq!(slot.status, SlotStatus::Error);
                assert_eq!(slot.error_message.as_deref(), Some("transport error: connection reset"));
                assert_eq!(slot.retryable, Some(true));
                assert!(slot.payload.is_none());
            } else {
                assert_eq!(slot.status, SlotStatus::Success);
                assert_eq!(slot.payload, Some(Payload::Image(image_artifact(slot.index, 0))));
            }
        }
        // every mockup call carries the logo
        assert!(gen.calls().iter().all(|c| c.has_reference));
    }

    #[tokio::test(start_paused = true)]
    async fn logo_batch_with_two_blocked() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            let slot = call.slot.unwrap();
            if slot == 2 || slot == 7 {
                Scripted::after_ms(30, Err(GenerationError::Blocked("IMAGE_SAFETY".into())))
            } else {
                Scripted::after_ms(60, Ok(image_for(slot, 0)))
            }
        }));
        let ctl = controller(ToolKind::Logos, 10, &gen);
        ctl.start_batch(&prompt("un zorro astuto leyendo un libro")).unwrap().await.unwrap();

        let state = ctl.snapshot();
        let ok: Vec<_> = state.successful().map(|(_, p)| p.clone()).collect();
        assert_eq!(ok.len(), 8);
        for (i, a) in ok.iter().enumerate() {
            assert!(ok[i + 1..].iter().all(|b| a != b), "payloads must be distinct");
        }
        let errors: Vec<_> = state.slots.iter().filter(|s| s.status == SlotStatus::Error).collect();
        assert_eq!(errors.iter().map(|s| s.index).collect::<Vec<_>>(), vec![2, 7]);
        assert!(errors.iter().all(|s| s.error_message.as_deref().unwrap().contains("IMAGE_SAFETY")));
        assert!(!state.is_generating);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_is_a_no_op() {
        let gen = Arc::new(ScriptedGenerator::new(|call| Scripted::now(Ok(image_for(call.slot.unwrap(), 0)))));
        let ctl = controller(ToolKind::Logos, 10, &gen);
        let before = ctl.snapshot();

        let err = ctl.start_batch(&prompt("  ")).unwrap_err();
        assert_eq!(err, BatchRejected::Invalid(GenerationError::Validation("prompt".into())));

        let after = ctl.snapshot();
        assert_eq!(after.slots, before.slots);
        assert!(after.slots.iter().all(|s| s.status == SlotStatus::Pending));
        assert!(!after.is_generating);
        assert!(gen.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_batch_is_rejected_but_regenerate_is_not() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            Scripted::after_ms(5_000, Ok(image_for(call.slot.unwrap(), call.attempt)))
        }));
        let ctl = controller(ToolKind::Logos, 4, &gen);
        let batch = ctl.start_batch(&prompt("a")).unwrap();
        // let every batch call start before the regenerate is issued
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(ctl.start_batch(&prompt("b")).unwrap_err(), BatchRejected::AlreadyGenerating);
        assert!(ctl.snapshot().is_generating);

        let regen = ctl.regenerate_slot(1, None).unwrap();
        batch.await.unwrap();
        regen.await.unwrap();

        let state = ctl.snapshot();
        assert!(!state.is_generating);
        // the batch's own call for slot 1 was superseded by the regenerate
        assert_eq!(payload_of(&state, 1), Some(Payload::Image(image_artifact(1, 1))));
        assert_eq!(gen.calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn regenerate_only_touches_its_slot() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            Scripted::after_ms(20, Ok(image_for(call.slot.unwrap(), call.attempt)))
        }));
        let ctl = controller(ToolKind::Logos, 5, &gen);
        ctl.start_batch(&prompt("a")).unwrap().await.unwrap();
        let before = ctl.snapshot();

        let handle = ctl.regenerate_slot(3, None).unwrap();
        {
            let during = ctl.snapshot();
            assert_eq!(during.slots[3].status, SlotStatus::Loading);
            assert!(during.slots[3].payload.is_none());
        }
        handle.await.unwrap();

        let after = ctl.snapshot();
        for i in (0..5).filter(|i| *i != 3) {
            assert_eq!(after.slots[i], before.slots[i]);
        }
        assert_eq!(payload_of(&after, 3), Some(Payload::Image(image_artifact(3, 1))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stale_regenerate_is_discarded() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            let slot = call.slot.unwrap();
            match call.attempt {
                0 => Scripted::after_ms(10, Ok(image_for(slot, 0))),
                1 => Scripted::after_ms(10_000, Ok(image_for(slot, 1))),
                _ => Scripted::after_ms(1_000, Ok(image_for(slot, call.attempt))),
            }
        }));
        let ctl = controller(ToolKind::Logos, 3, &gen);
        ctl.start_batch(&prompt("a")).unwrap().await.unwrap();

        let slow = ctl.regenerate_slot(0, None).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let fast = ctl.regenerate_slot(0, None).unwrap();
        fast.await.unwrap();
        assert_eq!(payload_of(&ctl.snapshot(), 0), Some(Payload::Image(image_artifact(0, 2))));

        slow.await.unwrap();
        assert_eq!(payload_of(&ctl.snapshot(), 0), Some(Payload::Image(image_artifact(0, 2))));
    }

    #[tokio::test(start_paused = true)]
    async fn regenerate_preconditions() {
        let gen = Arc::new(ScriptedGenerator::new(|call| Scripted::now(Ok(image_for(call.slot.unwrap(), 0)))));
        let ctl = controller(ToolKind::Logos, 3, &gen);

        assert_eq!(ctl.regenerate_slot(0, None).unwrap_err(), BatchRejected::SlotPending(0));
        ctl.start_batch(&prompt("a")).unwrap().await.unwrap();
        assert_eq!(ctl.regenerate_slot(3, None).unwrap_err(), BatchRejected::NoSuchSlot(3));
        assert_eq!(
            ctl.regenerate_slot(0, Some(&prompt(""))).unwrap_err(),
            BatchRejected::Invalid(GenerationError::Validation("prompt".into()))
        );
        assert_eq!(ctl.snapshot().slots[0].status, SlotStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn regenerate_with_new_input_uses_it() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            Scripted::now(Ok(Artifact::Script(crate::models::ReelScript {
                concept: call.prompt.clone(),
                script: "Escena 1".into(),
            })))
        }));
        let ctl = controller(ToolKind::Scripts, 2, &gen);
        ctl.start_batch(&prompt("productividad")).unwrap().await.unwrap();
        ctl.regenerate_slot(1, Some(&prompt("descanso"))).unwrap().await.unwrap();

        let state = ctl.snapshot();
        let concepts: Vec<_> = state
            .slots
            .iter()
            .map(|s| match &s.payload {
                Some(Payload::Script(s)) => s.concept.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(concepts, vec!["productividad".to_string(), "descanso".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out_in_its_slot_only() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            let slot = call.slot.unwrap();
            if slot == 1 {
                Scripted::after_ms(1_000_000, Ok(image_for(slot, 0)))
            } else {
                Scripted::after_ms(10, Ok(image_for(slot, 0)))
            }
        }));
        let ctl = BatchController::new(ToolKind::Logos, gen.clone(), 3, Duration::from_secs(5));
        ctl.start_batch(&prompt("a")).unwrap().await.unwrap();

        let state = ctl.snapshot();
        assert_eq!(state.slots[1].status, SlotStatus::Error);
        assert_eq!(state.slots[1].error_kind, Some("timeout"));
        assert_eq!(state.slots[0].status, SlotStatus::Success);
        assert_eq!(state.slots[2].status, SlotStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_artifact_kind_is_malformed() {
        let gen = Arc::new(ScriptedGenerator::new(|call| Scripted::now(Ok(image_for(call.slot.unwrap(), 0)))));
        let ctl = controller(ToolKind::Personas, 2, &gen);
        ctl.start_batch(&prompt("café de especialidad")).unwrap().await.unwrap();
        let state = ctl.snapshot();
        assert!(state.slots.iter().all(|s| s.error_kind == Some("malformed") && s.retryable == Some(false)));
    }

    fn ideas(n: usize) -> Artifact {
        Artifact::SocialIdeas(
            (0..n)
                .map(|i| SocialIdea { copy: format!("copy {i}"), image_prompt: format!("prompt {i}") })
                .collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn failed_plan_issues_no_image_calls() {
        let gen = Arc::new(ScriptedGenerator::new(|call| match call.kind {
            GenerationKind::SocialIdeas => Scripted::after_ms(10, Err(GenerationError::Blocked("SAFETY".into()))),
            _ => Scripted::now(Ok(image_for(call.slot.unwrap(), 0))),
        }));
        let ctl = controller(ToolKind::Social, 10, &gen);
        ctl.start_batch(&prompt("descuento del 20%")).unwrap().await.unwrap();

        let calls = gen.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, GenerationKind::SocialIdeas);
        assert_eq!(calls[0].count, 10);
        let state = ctl.snapshot();
        assert!(state.slots.iter().all(|s| s.status == SlotStatus::Error && s.plan.is_none()));
        assert!(!state.is_generating);
        // without an idea there is nothing to re-render
        assert_eq!(ctl.regenerate_slot(0, None).unwrap_err(), BatchRejected::NothingToRegenerate(0));
    }

    #[tokio::test(start_paused = true)]
    async fn plan_then_fill_renders_each_idea() {
        let gen = Arc::new(ScriptedGenerator::new(|call| match call.kind {
            GenerationKind::SocialIdeas => Scripted::after_ms(10, Ok(ideas(call.count))),
            _ => {
                let slot = call.slot.unwrap();
                if slot == 1 {
                    Scripted::after_ms(10, Err(GenerationError::NoArtifact("no image".into())))
                } else {
                    Scripted::after_ms(10, Ok(image_for(slot, call.attempt)))
                }
            }
        }));
        let ctl = controller(ToolKind::Social, 3, &gen);
        ctl.start_batch(&prompt("café colombiano")).unwrap().await.unwrap();

        let state = ctl.snapshot();
        assert_eq!(state.slots[1].status, SlotStatus::Error);
        assert_eq!(state.slots[1].plan.as_ref().unwrap().copy, "copy 1");
        for i in [0, 2] {
            match &state.slots[i].payload {
                Some(Payload::SocialPost { idea, image }) => {
                    assert_eq!(idea.copy, format!("copy {i}"));
                    assert_eq!(image, &image_artifact(i, 0));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        let image_prompts: Vec<_> = gen
            .calls()
            .into_iter()
            .filter(|c| c.kind == GenerationKind::SocialImage)
            .map(|c| (c.slot.unwrap(), c.prompt))
            .collect();
        assert_eq!(image_prompts.len(), 3);
        assert!(image_prompts.iter().all(|(slot, p)| p == &format!("prompt {slot}")));
    }

    #[tokio::test(start_paused = true)]
    async fn social_regenerate_keeps_the_idea() {
        let gen = Arc::new(ScriptedGenerator::new(|call| match call.kind {
            GenerationKind::SocialIdeas => Scripted::now(Ok(ideas(call.count))),
            _ => Scripted::after_ms(10, Ok(image_for(call.slot.unwrap(), call.attempt))),
        }));
        let ctl = controller(ToolKind::Social, 2, &gen);
        ctl.start_batch(&prompt("café")).unwrap().await.unwrap();
        // new input is ignored: only the image is re-rendered
        ctl.regenerate_slot(0, Some(&prompt("otra cosa"))).unwrap().await.unwrap();

        assert_eq!(gen.calls().iter().filter(|c| c.kind == GenerationKind::SocialIdeas).count(), 1);
        match &ctl.snapshot().slots[0].payload {
            Some(Payload::SocialPost { idea, image }) => {
                assert_eq!(idea.copy, "copy 0");
                assert_eq!(image, &image_artifact(0, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn short_plan_fails_missing_slots() {
        let gen = Arc::new(ScriptedGenerator::new(|call| match call.kind {
            GenerationKind::SocialIdeas => Scripted::now(Ok(ideas(2))),
            _ => Scripted::now(Ok(image_for(call.slot.unwrap(), 0))),
        }));
        let ctl = controller(ToolKind::Social, 4, &gen);
        ctl.start_batch(&prompt("café")).unwrap().await.unwrap();
        let statuses: Vec<_> = ctl.snapshot().slots.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![SlotStatus::Success, SlotStatus::Success, SlotStatus::Error, SlotStatus::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_aborts_and_restores_placeholders() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            Scripted::after_ms(60_000, Ok(image_for(call.slot.unwrap(), 0)))
        }));
        let ctl = controller(ToolKind::Logos, 3, &gen);
        let batch = ctl.start_batch(&prompt("a")).unwrap();
        tokio::task::yield_now().await;

        ctl.reset();
        assert!(batch.await.unwrap_err().is_cancelled());
        let state = ctl.snapshot();
        assert!(!state.is_generating);
        assert!(state.batch_id.is_none());
        assert!(state.slots.iter().all(|s| s.status == SlotStatus::Pending));

        // a fresh batch can start immediately
        assert!(ctl.start_batch(&prompt("b")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn export_contains_only_successful_slots_in_order() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            let slot = call.slot.unwrap();
            let delay = 30 - 10 * slot as u64;
            match slot {
                1 => Scripted::after_ms(delay, Err(GenerationError::Blocked("SAFETY".into()))),
                _ => Scripted::after_ms(
                    delay,
                    Ok(Artifact::Copy(crate::models::CopyVariant { copy: format!("payload {slot}") })),
                ),
            }
        }));
        let ctl = controller(ToolKind::Copywriting, 3, &gen);
        let input = ToolInput {
            product: Some("Curso".into()),
            audience: Some("Millennials".into()),
            tone: Some("Educativo".into()),
            ..Default::default()
        };
        ctl.start_batch(&input).unwrap().await.unwrap();

        let sink = MemorySink::default();
        ctl.export_text(&sink).unwrap();
        let (name, content) = sink.last_text().unwrap();
        assert_eq!(name, "copywriting-export.txt");
        assert_eq!(content, "payload 0\n\n---\n\npayload 2");
    }

    #[tokio::test(start_paused = true)]
    async fn card_actions_go_through_the_sink() {
        let gen = Arc::new(ScriptedGenerator::new(|call| {
            Scripted::now(Ok(Artifact::Campaign(crate::models::CampaignIdea {
                concept: format!("Idea {}", call.slot.unwrap()),
                summary: "Resumen".into(),
                key_actions: vec!["Uno".into()],
            })))
        }));
        let ctl = controller(ToolKind::Campaign, 2, &gen);
        let input = ToolInput {
            product: Some("App".into()),
            objective: Some("Usuarios".into()),
            audience: Some("Jóvenes".into()),
            ..Default::default()
        };
        ctl.start_batch(&input).unwrap().await.unwrap();

        let sink = MemorySink::default();
        ctl.copy_slot(1, &sink).unwrap();
        assert_eq!(sink.clipboard().unwrap(), "Concepto: Idea 1\n\nResumen: Resumen\n\nAcciones Clave:\n- Uno");
        assert_eq!(ctl.copy_slot(5, &sink).unwrap_err(), SinkError::NoSuchSlot(5));
    }

    #[tokio::test(start_paused = true)]
    async fn image_download_uses_media_type() {
        let gen = Arc::new(ScriptedGenerator::new(|call| Scripted::now(Ok(image_for(call.slot.unwrap(), 0)))));
        let ctl = controller(ToolKind::Logos, 1, &gen);
        let sink = MemorySink::default();
        assert_eq!(ctl.download_slot(0, &sink).unwrap_err(), SinkError::NotReady(0));

        ctl.start_batch(&prompt("a")).unwrap().await.unwrap();
        ctl.download_slot(0, &sink).unwrap();
        let (name, media_type, bytes) = sink.last_bytes().unwrap();
        assert!(name.starts_with("logos-") && name.ends_with(".png"));
        assert_eq!(media_type, "image/png");
        assert_eq!(bytes, image_artifact(0, 0).data);
        assert_eq!(ctl.copy_slot(0, &sink).unwrap_err(), SinkError::NothingToCopy(0));
    }
}
