//! Session state.
//!
//! The session owns the inputs, the latest batch run and the error banner.
//! Planning, execution and post-processing work on snapshots taken under the
//! lock; their results are written back only once a unit of work has fully
//! settled, so readers never see a half-updated result sequence.

use super::error::{BatchError, InputError, PostProcessError, SessionError};
use super::executor::BatchExecutor;
use super::planner;
use super::postprocess::PostProcessor;
use super::progress::{self, Progress, ProgressBoard, ProgressEstimator, ProgressReporter, ProgressSettings};
use super::types::{BatchRun, BatchStatus, GenerationResult, OutfitId, OutfitSpec, ResultSet, RunId};
use imagent::{ImageGenerator, ImageResource};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Tuning for a [`Session`]
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub progress: ProgressSettings,
    /// Cap on remote calls in flight per batch, unbounded when `None`
    pub max_concurrency: Option<usize>,
}

/// Outcome of a file selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub accepted: usize,
    /// Labels of files that were not PNG or JPEG
    pub rejected: Vec<String>,
}

/// Point-in-time copy of the session for display
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub model_images: Vec<ImageResource>,
    pub outfits: Vec<OutfitSpec>,
    pub run: Option<BatchRun>,
    pub error: Option<String>,
    /// Result indices with a variation or upscale in flight
    pub busy: Vec<usize>,
}

impl SessionSnapshot {
    pub fn results(&self) -> ResultSet {
        self.run.as_ref().map(|r| r.results.clone()).unwrap_or_default()
    }

    pub fn is_generating(&self) -> bool {
        self.run.as_ref().is_some_and(BatchRun::is_in_flight)
    }

    pub fn is_upscaled(&self, index: usize) -> bool {
        self.run
            .as_ref()
            .and_then(|r| r.results.get(index))
            .is_some_and(|r| r.upscaled)
    }
}

struct SessionState {
    model_images: Vec<ImageResource>,
    outfits: Vec<OutfitSpec>,
    next_outfit: u64,
    next_run: u64,
    run: Option<BatchRun>,
    busy: HashSet<(RunId, usize)>,
    error: Option<String>,
}

impl SessionState {
    fn new() -> Self {
        let mut state = Self {
            model_images: Vec::new(),
            outfits: Vec::new(),
            next_outfit: 0,
            next_run: 0,
            run: None,
            busy: HashSet::new(),
            error: None,
        };
        let id = state.outfit_id();
        state.outfits.push(OutfitSpec::new(id));
        state
    }

    fn outfit_id(&mut self) -> OutfitId {
        self.next_outfit += 1;
        OutfitId(self.next_outfit)
    }

    fn outfit_mut(&mut self, index: usize) -> Result<&mut OutfitSpec, InputError> {
        self.outfits.get_mut(index).ok_or(InputError::OutfitIndex(index))
    }

    fn current_run_mut(&mut self, id: RunId) -> Option<&mut BatchRun> {
        self.run.as_mut().filter(|r| r.id == id)
    }

    fn record<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result {
            self.error = Some(e.to_string());
        }
        result
    }
}

#[derive(Clone, Copy)]
enum PostOp {
    Variation,
    Upscale,
}

/// Marks a result slot busy for the lifetime of a variation or upscale
struct SlotGuard<'a> {
    state: &'a Mutex<SessionState>,
    key: (RunId, usize),
    reporter: Option<ProgressReporter>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        // no-op once the operation has settled its progress
        if let Some(reporter) = &self.reporter {
            reporter.abandon("Cancelled");
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.busy.remove(&self.key);
    }
}

/// Fails a run whose generate request was dropped before it settled
struct RunGuard<'a> {
    state: &'a Mutex<SessionState>,
    id: RunId,
    reporter: Option<ProgressReporter>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(run) = state.current_run_mut(self.id) else {
            return;
        };
        if !run.is_in_flight() {
            return;
        }

        tracing::warn!(run = self.id.0, "generate request dropped before it settled");
        run.status = BatchStatus::Failed;
        run.message = "generation cancelled".to_string();
        if let Some(reporter) = &self.reporter {
            reporter.abandon("Generation cancelled");
        }
    }
}

/// The try-on session: inputs, latest results, progress and error state
pub struct Session {
    state: Mutex<SessionState>,
    executor: BatchExecutor,
    post: PostProcessor,
    board: ProgressBoard,
    settings: SessionSettings,
}

impl Session {
    pub fn new(generator: Arc<dyn ImageGenerator>, settings: SessionSettings) -> Self {
        Self {
            state: Mutex::new(SessionState::new()),
            executor: BatchExecutor::new(Arc::clone(&generator))
                .with_max_concurrency(settings.max_concurrency),
            post: PostProcessor::new(generator),
            board: ProgressBoard::new(),
            settings,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        let mut busy: Vec<usize> = state.busy.iter().map(|(_, index)| *index).collect();
        busy.sort_unstable();

        SessionSnapshot {
            model_images: state.model_images.clone(),
            outfits: state.outfits.clone(),
            run: state.run.clone(),
            error: state.error.clone(),
            busy,
        }
    }

    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.board.subscribe()
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    /// Replace the model images. Files that are not PNG or JPEG are rejected.
    pub fn select_model_images(&self, files: Vec<ImageResource>) -> Selection {
        let (accepted, rejected): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| f.media_type().is_some());

        let selection = Selection {
            accepted: accepted.len(),
            rejected: rejected.iter().map(|f| f.label().to_string()).collect(),
        };
        for file in &rejected {
            tracing::warn!(image = file.label(), mime = file.mime(), "rejected model image");
        }

        self.state().model_images = accepted;
        selection
    }

    pub fn add_outfit(&self) -> OutfitId {
        let mut state = self.state();
        let id = state.outfit_id();
        state.outfits.push(OutfitSpec::new(id));
        id
    }

    /// Remove an outfit slot. The last remaining slot cannot be removed.
    pub fn remove_outfit(&self, index: usize) -> Result<OutfitSpec, InputError> {
        let mut state = self.state();
        if index >= state.outfits.len() {
            return Err(InputError::OutfitIndex(index));
        }
        if state.outfits.len() == 1 {
            return Err(InputError::LastOutfit);
        }
        Ok(state.outfits.remove(index))
    }

    /// Set or clear the image of an outfit slot
    pub fn select_outfit_image(&self, index: usize, image: Option<ImageResource>) -> Result<(), InputError> {
        if let Some(image) = &image {
            if image.media_type().is_none() {
                tracing::warn!(image = image.label(), mime = image.mime(), "rejected outfit image");
                return Err(InputError::Unsupported(image.label().to_string()));
            }
        }

        let mut state = self.state();
        state.outfit_mut(index)?.image = image;
        Ok(())
    }

    pub fn set_outfit_text(&self, index: usize, text: impl Into<String>) -> Result<(), InputError> {
        let mut state = self.state();
        state.outfit_mut(index)?.description = text.into();
        Ok(())
    }

    /// Discard everything: inputs, results, error and progress
    pub fn reset(&self) {
        {
            let mut state = self.state();
            let next_outfit = state.next_outfit;
            let next_run = state.next_run;
            *state = SessionState::new();
            // keep identities unique across resets
            state.next_outfit += next_outfit;
            state.outfits[0].id = OutfitId(state.next_outfit);
            state.next_run = next_run;
        }
        self.board.clear();
        tracing::debug!("session reset");
    }

    /// Plan and run a batch from the current inputs.
    ///
    /// A request made while another batch is running supersedes it.
    pub async fn request_generate(&self) -> Result<BatchRun, SessionError> {
        let (run_id, model_images, outfits) = {
            let mut state = self.state();
            state.error = None;
            state.next_run += 1;
            let id = RunId(state.next_run);
            state.run = Some(BatchRun::planning(id));
            (id, state.model_images.clone(), state.outfits.clone())
        };
        let mut run_guard = RunGuard {
            state: &self.state,
            id: run_id,
            reporter: None,
        };

        let plan = match planner::plan(&model_images, &outfits) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(error = %e, "generate request rejected");
                self.board.clear();
                let mut state = self.state();
                if let Some(run) = state.current_run_mut(run_id) {
                    run.status = BatchStatus::Failed;
                    run.message = e.to_string();
                }
                return state.record(Err(e.into()));
            }
        };

        let job_count = plan.jobs.len();
        {
            let mut state = self.state();
            if let Some(run) = state.current_run_mut(run_id) {
                run.status = BatchStatus::Running;
                run.job_count = job_count;
                run.skipped_models = plan.skipped_models;
                run.message = format!("Generating {job_count} image(s)...");
            }
        }

        let estimate = self.settings.progress.batch_estimate(job_count);
        let reporter = self
            .board
            .begin(format!("Generating {job_count} image(s)..."), estimate);
        run_guard.reporter = Some(reporter.clone());

        let outcome = {
            let _ticker = progress::start_ticker(
                ProgressEstimator::new(estimate, self.settings.progress.tick),
                reporter.clone(),
            );
            self.executor.run(plan.jobs, &reporter).await
        };

        let mut state = self.state();
        let Some(run) = state.current_run_mut(run_id) else {
            tracing::debug!(run = run_id.0, "batch settled after being superseded");
            return Err(BatchError::Superseded.into());
        };

        match outcome {
            Ok(outcome) => {
                let succeeded = outcome.results.len();
                let mut message = format!("Generated {succeeded} of {job_count} image(s)");
                if outcome.failure_count() > 0 {
                    message.push_str(&format!(", {} failed", outcome.failure_count()));
                }
                if plan.skipped_models > 0 {
                    message.push_str(&format!(
                        ", {} unsupported model image(s) skipped",
                        plan.skipped_models
                    ));
                }

                run.status = BatchStatus::Completed;
                run.results = ResultSet::new(outcome.results);
                run.failures = outcome.failures;
                run.message = message.clone();
                let run = run.clone();

                reporter.finish(message);
                Ok(run)
            }
            Err(e) => {
                run.status = BatchStatus::Failed;
                run.failures = e.failures().to_vec();
                run.message = e.to_string();

                reporter.abandon(e.to_string());
                state.record(Err(e.into()))
            }
        }
    }

    /// Regenerate one result with a new instruction, replacing it in place
    pub async fn request_variation(
        &self,
        index: usize,
        instruction: &str,
    ) -> Result<GenerationResult, SessionError> {
        self.post_process(index, PostOp::Variation, instruction).await
    }

    /// Enhance one result, replacing it in place
    pub async fn request_upscale(&self, index: usize) -> Result<GenerationResult, SessionError> {
        self.post_process(index, PostOp::Upscale, "").await
    }

    async fn post_process(
        &self,
        index: usize,
        op: PostOp,
        instruction: &str,
    ) -> Result<GenerationResult, SessionError> {
        let (run_id, result) = {
            let mut state = self.state();
            state.error = None;
            let begun = Self::begin_post(&mut state, index, op, instruction);
            state.record(begun.map_err(SessionError::from))?
        };
        let mut slot = SlotGuard {
            state: &self.state,
            key: (run_id, index),
            reporter: None,
        };

        let (label, done) = match op {
            PostOp::Variation => ("Creating variation...", "Variation complete"),
            PostOp::Upscale => ("Upscaling image...", "Upscale complete"),
        };
        let estimate = self.settings.progress.job_estimate;
        // overlapping operations on other slots share one readout
        let reporter = self.board.join(label, estimate);
        slot.reporter = Some(reporter.clone());

        let outcome = {
            let _ticker = progress::start_ticker(
                ProgressEstimator::new(estimate, self.settings.progress.tick),
                reporter.clone(),
            );
            match op {
                PostOp::Variation => self.post.variation(&result, instruction).await,
                PostOp::Upscale => self.post.upscale(index, &result).await,
            }
        };

        let mut state = self.state();
        let applied = outcome.and_then(|replacement| {
            let run = state
                .current_run_mut(run_id)
                .ok_or(PostProcessError::Superseded)?;
            run.results = run
                .results
                .replaced(index, replacement.clone())
                .ok_or(PostProcessError::Superseded)?;
            Ok(replacement)
        });

        match &applied {
            Ok(_) => reporter.finish(done),
            Err(e) => reporter.abandon(e.to_string()),
        }
        state.record(applied.map_err(SessionError::from))
    }

    fn begin_post(
        state: &mut SessionState,
        index: usize,
        op: PostOp,
        instruction: &str,
    ) -> Result<(RunId, GenerationResult), PostProcessError> {
        let run = state.run.as_ref().ok_or(PostProcessError::NoResult(index))?;
        if run.is_in_flight() {
            return Err(PostProcessError::BatchInFlight);
        }
        let result = run
            .results
            .get(index)
            .cloned()
            .ok_or(PostProcessError::NoResult(index))?;

        match op {
            PostOp::Upscale if result.upscaled => return Err(PostProcessError::AlreadyUpscaled(index)),
            PostOp::Variation if instruction.trim().is_empty() => {
                return Err(PostProcessError::EmptyInstruction);
            }
            _ => {}
        }

        let key = (run.id, index);
        if !state.busy.insert(key) {
            return Err(PostProcessError::SlotBusy(index));
        }
        Ok((key.0, result))
    }
}
