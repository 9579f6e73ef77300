// Prompt construction for try-on, variation and enhance calls

const PRESERVE: &str = "It's very important that you do NOT change the person's face, hair, \
body shape, pose, or the background. Only change the clothes.";

/// Build the text instruction for a try-on generation.
///
/// `has_reference` tells whether an outfit image follows the model image in
/// the request.
pub fn try_on(instruction: &str, has_reference: bool, variation: bool) -> String {
    let instruction = instruction.trim();

    let mut prompt = match (has_reference, instruction.is_empty()) {
        (true, true) => "The first image shows a person and the second image shows an outfit. \
Dress the person from the first image in the outfit from the second image."
            .to_string(),
        (true, false) => format!(
            "The first image shows a person and the second image shows an outfit. \
Dress the person from the first image in the outfit from the second image, \
following this description: \"{instruction}\"."
        ),
        (false, _) => format!(
            "Please replace the clothing on the person in this image with: \"{instruction}\"."
        ),
    };

    if variation {
        prompt.push_str(
            " This is a variation request: give a fresh, creative interpretation of the outfit \
rather than repeating a previous result.",
        );
    }

    prompt.push(' ');
    prompt.push_str(PRESERVE);
    prompt
}

/// Text instruction for the enhance (upscale) call
pub fn enhance() -> String {
    "Upscale this image to a higher resolution. Sharpen fine details such as fabric texture, \
hair and facial features while keeping the composition, colors and content exactly the same. \
Do not add, remove or restyle anything."
        .to_string()
}
