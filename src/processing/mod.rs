use std::io::Cursor;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::tools::ToolId;

pub mod api;
pub mod dispatch;
pub mod external;
pub mod local;
pub mod replicate;
pub mod sagemaker;

pub use dispatch::{Dispatcher, ProcessorConfig};

/// Which backend family handles processing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorMode {
    Local,
    External,
    Replicate,
    SageMaker,
}

impl ProcessorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessorMode::Local => "local",
            ProcessorMode::External => "external",
            ProcessorMode::Replicate => "replicate",
            ProcessorMode::SageMaker => "sagemaker",
        }
    }
}

/// Output of one backend invocation.
#[derive(Debug)]
pub struct BackendRun {
    pub image: DynamicImage,
    /// Network attempts the backend spent. Zero for in-process work.
    pub attempts: u32,
}

/// Which backend actually produced a result and under what conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub processor: &'static str,
    pub attempts: u32,
    pub fallback: bool,
}

#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this backend can run the tool at all. Dispatch consults this
    /// before attempting, so backends may assume supported input.
    fn supports(&self, tool: ToolId) -> bool;

    async fn process(&self, tool: ToolId, image: &DynamicImage) -> AppResult<BackendRun>;
}

pub(crate) struct EncodedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub file_name: &'static str,
}

/// PNG when the image carries alpha (so transparency survives), JPEG
/// otherwise.
pub(crate) fn encode_image(image: &DynamicImage, jpeg_quality: u8) -> AppResult<EncodedImage> {
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    if image.color().has_alpha() {
        image
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .map_err(|err| AppError::Message(format!("PNG encode failed: {err}")))?;
        Ok(EncodedImage {
            bytes,
            content_type: "image/png",
            file_name: "input.png",
        })
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut cursor, ImageOutputFormat::Jpeg(jpeg_quality))
            .map_err(|err| AppError::Message(format!("JPEG encode failed: {err}")))?;
        Ok(EncodedImage {
            bytes,
            content_type: "image/jpeg",
            file_name: "input.jpg",
        })
    }
}
