// Post-processing - single-result variation and upscale

use super::error::PostProcessError;
use super::executor::execute;
use super::types::{GenerationJob, GenerationResult, JobKind};
use imagent::ImageGenerator;
use std::sync::Arc;

/// Follow-up operations on one already generated result.
///
/// Both operations take a snapshot of the result and return its replacement;
/// applying the replacement to the result sequence is up to the caller.
pub struct PostProcessor {
    generator: Arc<dyn ImageGenerator>,
}

impl PostProcessor {
    pub fn new(generator: Arc<dyn ImageGenerator>) -> Self {
        Self { generator }
    }

    /// Regenerate from the original model and outfit images with a new
    /// instruction.
    pub async fn variation(
        &self,
        result: &GenerationResult,
        instruction: &str,
    ) -> Result<GenerationResult, PostProcessError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(PostProcessError::EmptyInstruction);
        }

        let job = GenerationJob {
            index: result.job_index,
            base: result.base.clone(),
            reference: result.reference.clone(),
            instruction: instruction.to_string(),
            kind: JobKind::Variation,
        };

        tracing::info!(job = result.job_index + 1, instruction, "requesting variation");
        let image = execute(self.generator.as_ref(), &job).await.inspect_err(|e| {
            tracing::warn!(job = result.job_index + 1, error = %e, "variation failed");
        })?;

        Ok(GenerationResult {
            instruction: job.instruction,
            image,
            upscaled: false,
            variations: result.variations + 1,
            ..result.clone()
        })
    }

    /// Enhance the currently displayed image of the result at `slot`
    pub async fn upscale(
        &self,
        slot: usize,
        result: &GenerationResult,
    ) -> Result<GenerationResult, PostProcessError> {
        if result.upscaled {
            return Err(PostProcessError::AlreadyUpscaled(slot));
        }

        let job = GenerationJob {
            index: result.job_index,
            base: result.base.clone(),
            reference: None,
            instruction: String::new(),
            kind: JobKind::Upscale {
                source: result.image.clone(),
            },
        };

        tracing::info!(job = result.job_index + 1, "requesting upscale");
        let image = execute(self.generator.as_ref(), &job).await.inspect_err(|e| {
            tracing::warn!(job = result.job_index + 1, error = %e, "upscale failed");
        })?;

        Ok(GenerationResult {
            image,
            upscaled: true,
            ..result.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::executor::testing::{ScriptedGenerator, image};
    use imagent::{ImageResource, RemoteError};

    fn generated() -> GenerationResult {
        GenerationResult {
            job_index: 3,
            base: ImageResource::new("image/jpeg", b"model".to_vec()),
            reference: Some(ImageResource::new("image/png", b"outfit".to_vec())),
            instruction: "striped shirt".into(),
            image: image("gen:striped shirt"),
            upscaled: false,
            variations: 0,
        }
    }

    #[tokio::test]
    async fn test_variation_reuses_original_images() {
        let generator = Arc::new(ScriptedGenerator::default());
        let post = PostProcessor::new(generator.clone());

        let replaced = post.variation(&generated(), " checked shirt ").await.unwrap();
        assert_eq!(replaced.image.data(), "var:checked shirt");
        assert_eq!(replaced.instruction, "checked shirt");
        assert_eq!(replaced.variations, 1);
        assert_eq!(replaced.job_index, 3);

        let requests = generator.requests.lock().unwrap();
        let request = &requests[0];
        assert!(request.variation);
        assert_eq!(request.base.decode().unwrap(), b"model");
        assert_eq!(request.reference.as_ref().unwrap().decode().unwrap(), b"outfit");
    }

    #[tokio::test]
    async fn test_variation_resets_upscaled() {
        let post = PostProcessor::new(Arc::new(ScriptedGenerator::default()));
        let mut result = generated();
        result.upscaled = true;

        let replaced = post.variation(&result, "polo").await.unwrap();
        assert!(!replaced.upscaled);
    }

    #[tokio::test]
    async fn test_variation_failure_is_surfaced() {
        let post = PostProcessor::new(Arc::new(ScriptedGenerator::default()));

        let err = post.variation(&generated(), "fail poncho").await.unwrap_err();
        assert_eq!(
            err,
            PostProcessError::Remote(RemoteError::Explanation("refused: fail poncho".into()))
        );
    }

    #[tokio::test]
    async fn test_empty_variation_makes_no_call() {
        let generator = Arc::new(ScriptedGenerator::default());
        let post = PostProcessor::new(generator.clone());

        let err = post.variation(&generated(), "   ").await.unwrap_err();
        assert_eq!(err, PostProcessError::EmptyInstruction);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_upscale_uses_displayed_image() {
        let post = PostProcessor::new(Arc::new(ScriptedGenerator::default()));

        let replaced = post.upscale(0, &generated()).await.unwrap();
        assert_eq!(replaced.image.data(), "hd:gen:striped shirt");
        assert!(replaced.upscaled);
        assert_eq!(replaced.instruction, "striped shirt");
    }

    #[tokio::test]
    async fn test_upscale_twice_is_rejected() {
        let generator = Arc::new(ScriptedGenerator::default());
        let post = PostProcessor::new(generator.clone());

        let once = post.upscale(1, &generated()).await.unwrap();
        let err = post.upscale(1, &once).await.unwrap_err();

        // reported by result slot, not by planned job
        assert_eq!(err, PostProcessError::AlreadyUpscaled(1));
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_upscale_failure() {
        let post = PostProcessor::new(Arc::new(ScriptedGenerator::failing_enhance()));

        let err = post.upscale(0, &generated()).await.unwrap_err();
        assert_eq!(
            err,
            PostProcessError::Remote(RemoteError::Transport("connection reset".into()))
        );
    }
}
