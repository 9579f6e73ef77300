// Job planner - expands model images x outfits into independent jobs

use super::error::ValidationError;
use super::types::{GenerationJob, JobKind, OutfitSpec};
use imagent::ImageResource;

/// Jobs for one generate request
#[derive(Debug, Clone)]
pub struct Plan {
    /// Model-major, outfit-minor
    pub jobs: Vec<GenerationJob>,
    /// Model images dropped for an unsupported type
    pub skipped_models: usize,
}

/// Build the cross product of usable model images and usable outfits.
///
/// Unusable outfits are skipped silently. Model images that are not PNG or
/// JPEG are skipped with a warning.
pub fn plan(model_images: &[ImageResource], outfits: &[OutfitSpec]) -> Result<Plan, ValidationError> {
    if model_images.is_empty() {
        return Err(ValidationError::NoModelImage);
    }

    let usable: Vec<&OutfitSpec> = outfits.iter().filter(|o| o.is_usable()).collect();
    if usable.is_empty() {
        return Err(ValidationError::NoUsableOutfit);
    }

    let mut jobs = Vec::with_capacity(model_images.len() * usable.len());
    let mut skipped_models = 0;

    for (model_index, model) in model_images.iter().enumerate() {
        if model.media_type().is_none() {
            tracing::warn!(
                model = model_index,
                image = model.label(),
                mime = model.mime(),
                "skipping model image with unsupported type"
            );
            skipped_models += 1;
            continue;
        }

        for outfit in &usable {
            jobs.push(GenerationJob {
                index: jobs.len(),
                base: model.clone(),
                reference: outfit.image.clone(),
                instruction: outfit.description.trim().to_string(),
                kind: JobKind::Generate,
            });
        }
    }

    if jobs.is_empty() {
        return Err(ValidationError::NoValidJobs);
    }

    tracing::debug!(
        jobs = jobs.len(),
        models = model_images.len() - skipped_models,
        outfits = usable.len(),
        "planned generation batch"
    );

    Ok(Plan {
        jobs,
        skipped_models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::types::OutfitId;

    fn model(name: &str) -> ImageResource {
        ImageResource::new("image/jpeg", name.as_bytes().to_vec()).with_name(name)
    }

    fn text(id: u64, description: &str) -> OutfitSpec {
        OutfitSpec::new(OutfitId(id)).with_description(description)
    }

    #[test]
    fn test_cross_product_is_model_major() {
        let models = vec![model("anna.jpg"), model("ben.jpg")];
        let outfits = vec![
            text(1, "trench coat"),
            OutfitSpec::new(OutfitId(2)).with_image(ImageResource::new("image/png", vec![7])),
            text(3, "sundress"),
        ];

        let plan = plan(&models, &outfits).unwrap();
        assert_eq!(plan.jobs.len(), 6);
        assert_eq!(plan.skipped_models, 0);

        let pairs: Vec<(&str, &str)> = plan
            .jobs
            .iter()
            .map(|j| (j.base.label(), j.instruction.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("anna.jpg", "trench coat"),
                ("anna.jpg", ""),
                ("anna.jpg", "sundress"),
                ("ben.jpg", "trench coat"),
                ("ben.jpg", ""),
                ("ben.jpg", "sundress"),
            ]
        );
        assert!(plan.jobs.iter().enumerate().all(|(i, j)| j.index == i));
        assert!(plan.jobs[1].reference.is_some());
        assert!(plan.jobs.iter().all(|j| j.is_well_formed()));
    }

    #[test]
    fn test_two_models_one_text_outfit() {
        let plan = plan(&[model("a.jpg"), model("b.jpg")], &[text(1, "red scarf")]).unwrap();
        assert_eq!(plan.jobs.len(), 2);
    }

    #[test]
    fn test_invalid_outfit_skipped() {
        let outfits = vec![OutfitSpec::new(OutfitId(1)), text(2, "leather jacket")];
        let plan = plan(&[model("a.jpg")], &outfits).unwrap();

        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].instruction, "leather jacket");
    }

    #[test]
    fn test_instruction_is_trimmed() {
        let plan = plan(&[model("a.jpg")], &[text(1, "  kilt \n")]).unwrap();
        assert_eq!(plan.jobs[0].instruction, "kilt");
    }

    #[test]
    fn test_no_model_image() {
        assert_eq!(
            plan(&[], &[text(1, "suit")]).unwrap_err(),
            ValidationError::NoModelImage
        );
    }

    #[test]
    fn test_no_usable_outfit() {
        let outfits = vec![OutfitSpec::new(OutfitId(1)), text(2, "  ")];
        assert_eq!(
            plan(&[model("a.jpg")], &outfits).unwrap_err(),
            ValidationError::NoUsableOutfit
        );
        assert_eq!(
            plan(&[model("a.jpg")], &[]).unwrap_err(),
            ValidationError::NoUsableOutfit
        );
    }

    #[test]
    fn test_unsupported_models_skipped() {
        let models = vec![
            ImageResource::new("image/gif", vec![1]),
            model("b.jpg"),
            ImageResource::new("image/webp", vec![2]),
        ];
        let plan = plan(&models, &[text(1, "poncho")]).unwrap();

        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.skipped_models, 2);
        assert_eq!(plan.jobs[0].base.label(), "b.jpg");
    }

    #[test]
    fn test_all_models_unsupported() {
        let models = vec![ImageResource::new("image/gif", vec![1])];
        assert_eq!(
            plan(&models, &[text(1, "poncho")]).unwrap_err(),
            ValidationError::NoValidJobs
        );
    }
}
