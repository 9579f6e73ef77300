// Error taxonomy for the orchestration layer

use super::types::JobFailure;
use imagent::RemoteError;

/// Local, pre-dispatch input problems. No remote call has been made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no model image")]
    NoModelImage,

    #[error("no usable outfit")]
    NoUsableOutfit,

    #[error("no valid jobs")]
    NoValidJobs,
}

/// Every job of a batch failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchError {
    #[error("no images could be generated")]
    NoImagesGenerated { failures: Vec<JobFailure> },

    #[error("superseded by a newer request")]
    Superseded,
}

impl BatchError {
    pub fn failures(&self) -> &[JobFailure] {
        match self {
            BatchError::NoImagesGenerated { failures } => failures,
            BatchError::Superseded => &[],
        }
    }
}

/// A variation or upscale could not be applied. The slot keeps its last
/// successful state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PostProcessError {
    #[error("no generated result at index {0}")]
    NoResult(usize),

    #[error("result {0} is already upscaled")]
    AlreadyUpscaled(usize),

    #[error("a variation needs a non-empty instruction")]
    EmptyInstruction,

    #[error("result {0} is already being processed")]
    SlotBusy(usize),

    #[error("a generation is still running")]
    BatchInFlight,

    #[error("the results were replaced before the operation finished")]
    Superseded,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Rejected edits to the session inputs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("no outfit at index {0}")]
    OutfitIndex(usize),

    #[error("at least one outfit is required")]
    LastOutfit,

    #[error("unsupported image '{0}', only PNG and JPEG are accepted")]
    Unsupported(String),
}

/// Anything a session operation can report to the UI
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("generation failed: {0}")]
    Batch(#[from] BatchError),

    #[error(transparent)]
    PostProcess(#[from] PostProcessError),

    #[error(transparent)]
    Input(#[from] InputError),
}
