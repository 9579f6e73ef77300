// imagent - remote try-on image generation
// Image capture/encoding, prompts, and the generation service client

pub mod client;
pub mod codec;
pub mod error;
pub mod prompt;

pub use client::{GeminiConfig, GeminiGenerator, GenerationRequest, ImageGenerator};
pub use codec::{EncodedImage, ImageResource, MediaType};
pub use error::{CodecError, RemoteError, Result};
