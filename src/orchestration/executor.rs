// Batch executor - runs every planned job concurrently and keeps the successes

use super::error::BatchError;
use super::progress::ProgressReporter;
use super::types::{GenerationJob, GenerationResult, JobFailure, JobKind};
use futures_util::future::join_all;
use imagent::{EncodedImage, ImageGenerator, RemoteError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Settled batch: successes in planning order, plus diagnostics
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<GenerationResult>,
    pub failures: Vec<JobFailure>,
}

impl BatchOutcome {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Run a single job against the generator
pub async fn execute(generator: &dyn ImageGenerator, job: &GenerationJob) -> Result<EncodedImage, RemoteError> {
    match &job.kind {
        JobKind::Upscale { source } => generator.enhance(source).await,
        JobKind::Generate | JobKind::Variation => {
            let request = job.request()?;
            generator.generate(&request).await
        }
    }
}

/// Fans a batch out to the generator and waits for every job to settle
pub struct BatchExecutor {
    generator: Arc<dyn ImageGenerator>,
    limit: Option<Arc<Semaphore>>,
}

impl BatchExecutor {
    /// Executor without a concurrency cap: every job is in flight at once
    pub fn new(generator: Arc<dyn ImageGenerator>) -> Self {
        Self {
            generator,
            limit: None,
        }
    }

    /// Bound the number of remote calls in flight. `None` or zero removes
    /// the bound.
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.limit = max.filter(|n| *n > 0).map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    pub fn generator(&self) -> &Arc<dyn ImageGenerator> {
        &self.generator
    }

    /// Run all jobs and collect every outcome.
    ///
    /// One job failing never cancels another. Fails only when no job
    /// produced an image.
    pub async fn run(
        &self,
        jobs: Vec<GenerationJob>,
        progress: &ProgressReporter,
    ) -> Result<BatchOutcome, BatchError> {
        let total = jobs.len();
        let settled = AtomicUsize::new(0);

        let tasks = jobs.iter().enumerate().map(|(position, job)| {
            let settled = &settled;
            async move {
                let _permit = match &self.limit {
                    Some(limit) => limit.acquire().await.ok(),
                    None => None,
                };

                progress.set_message(format!("Processing job {} of {}...", position + 1, total));
                let outcome = execute(self.generator.as_ref(), job).await;

                let done = settled.fetch_add(1, Ordering::Relaxed) + 1;
                progress.set_message(format!("Completed {done} of {total}..."));
                outcome
            }
        });

        let outcomes = join_all(tasks).await;

        let mut results = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (job, outcome) in jobs.iter().zip(outcomes) {
            match outcome {
                Ok(image) => results.push(GenerationResult::from_job(job, image)),
                Err(reason) => {
                    tracing::warn!(job = job.index + 1, total, error = %reason, "generation job failed");
                    failures.push(JobFailure {
                        job_index: job.index,
                        reason,
                    });
                }
            }
        }

        if results.is_empty() {
            tracing::error!(failed = failures.len(), "no images could be generated");
            return Err(BatchError::NoImagesGenerated { failures });
        }

        tracing::info!(
            succeeded = results.len(),
            failed = failures.len(),
            "generation batch settled"
        );

        Ok(BatchOutcome { results, failures })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory generator shared by the orchestration tests

    use async_trait::async_trait;
    use imagent::{EncodedImage, GenerationRequest, ImageGenerator, MediaType, RemoteError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes the instruction back as the "image". Instructions containing
    /// `fail` are rejected, and `slow` ones take longer than the rest.
    #[derive(Default)]
    pub struct ScriptedGenerator {
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub peak_in_flight: AtomicUsize,
        pub requests: Mutex<Vec<GenerationRequest>>,
        pub fail_enhance: bool,
    }

    impl ScriptedGenerator {
        pub fn failing_enhance() -> Self {
            Self {
                fail_enhance: true,
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn enter(&self, delay: Duration) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn image(tag: &str) -> EncodedImage {
        EncodedImage::from_base64(tag, MediaType::Png)
    }

    #[async_trait]
    impl ImageGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<EncodedImage, RemoteError> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }

            let delay = if request.instruction.contains("slow") { 50 } else { 10 };
            self.enter(Duration::from_millis(delay)).await;

            if request.instruction.contains("fail") {
                return Err(RemoteError::Explanation(format!("refused: {}", request.instruction)));
            }
            let prefix = if request.variation { "var:" } else { "gen:" };
            Ok(image(&format!("{prefix}{}", request.instruction)))
        }

        async fn enhance(&self, source: &EncodedImage) -> Result<EncodedImage, RemoteError> {
            self.enter(Duration::from_millis(20)).await;

            if self.fail_enhance {
                return Err(RemoteError::Transport("connection reset".into()));
            }
            Ok(image(&format!("hd:{}", source.data())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;
    use crate::orchestration::progress::ProgressBoard;
    use imagent::ImageResource;
    use std::time::Duration;

    fn job(index: usize, instruction: &str) -> GenerationJob {
        GenerationJob {
            index,
            base: ImageResource::new("image/png", vec![index as u8]),
            reference: None,
            instruction: instruction.to_string(),
            kind: JobKind::Generate,
        }
    }

    fn reporter(board: &ProgressBoard) -> ProgressReporter {
        board.begin("Generating...", Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_all_jobs_succeed_in_order() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = BatchExecutor::new(generator.clone());
        let board = ProgressBoard::new();

        let jobs = vec![job(0, "slow coat"), job(1, "hat"), job(2, "boots")];
        let outcome = executor.run(jobs, &reporter(&board)).await.unwrap();

        let images: Vec<&str> = outcome.results.iter().map(|r| r.image.data()).collect();
        assert_eq!(images, vec!["gen:slow coat", "gen:hat", "gen:boots"]);
        assert_eq!(outcome.failure_count(), 0);
        assert_eq!(generator.call_count(), 3);
        assert_eq!(board.current().message, "Completed 3 of 3...");
    }

    #[tokio::test]
    async fn test_jobs_run_concurrently() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = BatchExecutor::new(generator.clone());
        let board = ProgressBoard::new();

        let jobs = (0..5).map(|i| job(i, "slow shirt")).collect();
        executor.run(jobs, &reporter(&board)).await.unwrap();

        assert_eq!(generator.peak_in_flight.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = BatchExecutor::new(generator.clone()).with_max_concurrency(Some(2));
        let board = ProgressBoard::new();

        let jobs = (0..6).map(|i| job(i, "slow shirt")).collect();
        let outcome = executor.run(jobs, &reporter(&board)).await.unwrap();

        assert_eq!(outcome.results.len(), 6);
        assert_eq!(generator.peak_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = BatchExecutor::new(generator);
        let board = ProgressBoard::new();

        let jobs = vec![job(0, "scarf"), job(1, "fail gloves"), job(2, "slow cape"), job(3, "fail belt")];
        let outcome = executor.run(jobs, &reporter(&board)).await.unwrap();

        let indices: Vec<usize> = outcome.results.iter().map(|r| r.job_index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(outcome.failure_count(), 2);
        assert_eq!(outcome.failures[0].job_index, 1);
        assert_eq!(
            outcome.failures[1].reason,
            RemoteError::Explanation("refused: fail belt".into())
        );
    }

    #[tokio::test]
    async fn test_second_of_two_fails() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = BatchExecutor::new(generator);
        let board = ProgressBoard::new();

        let outcome = executor
            .run(vec![job(0, "tux"), job(1, "fail tux")], &reporter(&board))
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_all_fail() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = BatchExecutor::new(generator.clone());
        let board = ProgressBoard::new();

        let jobs = vec![job(0, "fail a"), job(1, "fail b"), job(2, "fail c")];
        let err = executor.run(jobs, &reporter(&board)).await.unwrap_err();

        assert_eq!(err.to_string(), "no images could be generated");
        assert_eq!(err.failures().len(), 3);
        // every job was attempted
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unencodable_job_fails_alone() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = BatchExecutor::new(generator.clone());
        let board = ProgressBoard::new();

        let mut bad = job(0, "vest");
        bad.base = ImageResource::new("image/tiff", vec![0]);
        let outcome = executor.run(vec![bad, job(1, "vest")], &reporter(&board)).await.unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert!(matches!(outcome.failures[0].reason, RemoteError::InvalidRequest(_)));
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_execute_upscale_uses_enhance() {
        let generator = ScriptedGenerator::default();
        let mut upscale = job(0, "");
        upscale.kind = JobKind::Upscale {
            source: testing::image("gen:coat"),
        };

        let image = execute(&generator, &upscale).await.unwrap();
        assert_eq!(image.data(), "hd:gen:coat");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let executor = BatchExecutor::new(Arc::new(ScriptedGenerator::default()));
        let board = ProgressBoard::new();

        let err = executor.run(Vec::new(), &reporter(&board)).await.unwrap_err();
        assert!(err.failures().is_empty());
    }
}
