// Core types for the try-on orchestration

use chrono::{DateTime, Local};
use imagent::{EncodedImage, GenerationRequest, ImageResource, RemoteError};
use serde::Serialize;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

/// Identity of an outfit slot, used only to key editing UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OutfitId(pub u64);

/// One outfit the user wants to try on: an image, a description, or both
#[derive(Debug, Clone)]
pub struct OutfitSpec {
    pub id: OutfitId,
    pub image: Option<ImageResource>,
    pub description: String,
}

impl OutfitSpec {
    pub fn new(id: OutfitId) -> Self {
        Self {
            id,
            image: None,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_image(mut self, image: ImageResource) -> Self {
        self.image = Some(image);
        self
    }

    /// An outfit is usable when it has an image or a non-blank description
    pub fn is_usable(&self) -> bool {
        self.image.is_some() || !self.description.trim().is_empty()
    }
}

/// What a job asks the remote service for
#[derive(Debug, Clone)]
pub enum JobKind {
    Generate,
    Variation,
    /// Enhance a previously generated image
    Upscale { source: EncodedImage },
}

/// Unit of remote work
#[derive(Debug, Clone)]
pub struct GenerationJob {
    /// Position in the planned order
    pub index: usize,
    pub base: ImageResource,
    pub reference: Option<ImageResource>,
    pub instruction: String,
    pub kind: JobKind,
}

impl GenerationJob {
    pub fn is_well_formed(&self) -> bool {
        if self.base.media_type().is_none() {
            return false;
        }
        match self.kind {
            JobKind::Upscale { .. } => true,
            _ => self.reference.is_some() || !self.instruction.trim().is_empty(),
        }
    }

    /// Encode the job's images for the generation call
    pub fn request(&self) -> Result<GenerationRequest, RemoteError> {
        let invalid = |e: imagent::CodecError| RemoteError::InvalidRequest(e.to_string());

        Ok(GenerationRequest {
            base: self.base.encode().map_err(invalid)?,
            reference: self
                .reference
                .as_ref()
                .map(|r| r.encode())
                .transpose()
                .map_err(invalid)?,
            instruction: self.instruction.clone(),
            variation: matches!(self.kind, JobKind::Variation),
        })
    }
}

/// A generated image paired with the inputs that produced it
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub job_index: usize,
    /// Original model image, for side-by-side display
    pub base: ImageResource,
    pub reference: Option<ImageResource>,
    pub instruction: String,
    /// Generated image, always PNG
    pub image: EncodedImage,
    pub upscaled: bool,
    /// Successful variations applied to this slot
    pub variations: u32,
}

impl GenerationResult {
    pub fn from_job(job: &GenerationJob, image: EncodedImage) -> Self {
        Self {
            job_index: job.index,
            base: job.base.clone(),
            reference: job.reference.clone(),
            instruction: job.instruction.clone(),
            image,
            upscaled: false,
            variations: 0,
        }
    }

    /// File name for downloading this result.
    ///
    /// `position` is zero-based within a result set of `total` entries.
    pub fn download_name(&self, prefix: &str, position: usize, total: usize) -> String {
        let mut name = prefix.to_string();
        if total > 1 {
            name.push_str(&format!("-{}", position + 1));
        }
        if self.upscaled {
            name.push_str("-upscaled");
        }
        name.push_str(".png");
        name
    }
}

/// Ordered, copy-on-write sequence of results.
///
/// Replacing a slot builds a new sequence, so holders of an older snapshot
/// never observe a partially updated one.
#[derive(Debug, Clone, Default)]
pub struct ResultSet(Arc<[GenerationResult]>);

impl ResultSet {
    pub fn new(results: Vec<GenerationResult>) -> Self {
        Self(results.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&GenerationResult> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GenerationResult> {
        self.0.iter()
    }

    /// A copy of this set with `index` replaced, or `None` when out of range
    pub fn replaced(&self, index: usize, result: GenerationResult) -> Option<ResultSet> {
        if index >= self.0.len() {
            return None;
        }
        let mut results = self.0.to_vec();
        results[index] = result;
        Some(Self::new(results))
    }
}

impl Index<usize> for ResultSet {
    type Output = GenerationResult;

    fn index(&self, index: usize) -> &GenerationResult {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a GenerationResult;
    type IntoIter = std::slice::Iter<'a, GenerationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Diagnostics for a job that produced no image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub job_index: usize,
    pub reason: RemoteError,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {}: {}", self.job_index + 1, self.reason)
    }
}

/// Identity of one generate request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RunId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Planning,
    Running,
    Completed,
    Failed,
}

/// Aggregate state of one generate request
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub id: RunId,
    pub status: BatchStatus,
    pub job_count: usize,
    /// Model images dropped by the planner for an unsupported type
    pub skipped_models: usize,
    pub results: ResultSet,
    pub failures: Vec<JobFailure>,
    pub message: String,
    pub started_at: DateTime<Local>,
}

impl BatchRun {
    pub fn planning(id: RunId) -> Self {
        Self {
            id,
            status: BatchStatus::Planning,
            job_count: 0,
            skipped_models: 0,
            results: ResultSet::default(),
            failures: Vec::new(),
            message: "Preparing generation...".to_string(),
            started_at: Local::now(),
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, BatchStatus::Planning | BatchStatus::Running)
    }
}
