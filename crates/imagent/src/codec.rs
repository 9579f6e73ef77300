//! Image capture and transport encoding.
//!
//! `ImageResource` is what a capture collaborator hands over: raw bytes plus
//! the MIME type it declared. `EncodedImage` is the base64 form sent to and
//! received from the generation service.

use crate::error::CodecError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Image media types the generation service accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Png,
    Jpeg,
}

impl MediaType {
    /// Parse a declared MIME type. Anything other than PNG or JPEG is rejected.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(MediaType::Png),
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
        }
    }

    fn from_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Png => Some(MediaType::Png),
            image::ImageFormat::Jpeg => Some(MediaType::Jpeg),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// A captured image: shared immutable bytes plus the declared MIME type
#[derive(Clone)]
pub struct ImageResource {
    name: Option<String>,
    mime: String,
    bytes: Arc<[u8]>,
}

impl ImageResource {
    /// Wrap an in-memory upload. The declared type is not checked here; see
    /// [`ImageResource::media_type`].
    pub fn new(mime: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: None,
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Read an image from disk, detecting its format from the content.
    ///
    /// Only PNG and JPEG files are accepted.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let media_type = image::guess_format(&bytes)
            .ok()
            .and_then(MediaType::from_format)
            .ok_or_else(|| CodecError::Unsupported(path.display().to_string()))?;

        let mut resource = Self::new(media_type.mime(), bytes);
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            resource.name = Some(name.to_string());
        }
        Ok(resource)
    }

    /// Supported media type, or `None` when the declared type is not PNG/JPEG
    pub fn media_type(&self) -> Option<MediaType> {
        MediaType::from_mime(&self.mime)
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for diagnostics: the file name when known, the MIME type otherwise
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.mime)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Base64-encode for transport
    pub fn encode(&self) -> Result<EncodedImage, CodecError> {
        let media_type = self
            .media_type()
            .ok_or_else(|| CodecError::Unsupported(self.mime.clone()))?;
        Ok(EncodedImage::from_bytes(&self.bytes, media_type))
    }
}

impl fmt::Debug for ImageResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageResource")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Base64 image as carried on the wire
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    data: Arc<str>,
    media_type: MediaType,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], media_type: MediaType) -> Self {
        Self {
            data: STANDARD.encode(bytes).into(),
            media_type,
        }
    }

    /// Wrap data that is already base64 encoded
    pub fn from_base64(data: impl Into<Arc<str>>, media_type: MediaType) -> Self {
        Self {
            data: data.into(),
            media_type,
        }
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn decode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(STANDARD.decode(self.data.as_bytes())?)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type.mime(), self.data)
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("media_type", &self.media_type)
            .field("base64_len", &self.data.len())
            .finish()
    }
}
