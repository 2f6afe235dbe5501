use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Query},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine as _;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::dispatch::{DispatchSettings, Dispatcher};
use super::encode_image;
use crate::error::{AppError, AppResult};
use crate::tools::ToolId;

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub image_base64: String,
    pub tool: ToolId,
    pub width: u32,
    pub height: u32,
    pub mode: &'static str,
    pub processor: &'static str,
    pub attempts: u32,
    pub fallback: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProcessParams {
    pub tool_id: String,
    #[serde(default)]
    pub raw: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AliasParams {
    #[serde(default)]
    pub raw: Option<String>,
}

pub async fn debug_settings(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
) -> Json<DispatchSettings> {
    Json(dispatcher.settings())
}

/// Generic entry point taking the tool as a query parameter. The per-tool
/// aliases below cover clients with the tool baked into the path.
pub async fn process_image(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Query(params): Query<ProcessParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    let tool = ToolId::parse(&params.tool_id)
        .ok_or_else(|| AppError::UnknownTool(params.tool_id.clone()))?;
    run_tool(dispatcher, tool, multipart, truthy(&params.raw)).await
}

pub async fn enhance(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Query(params): Query<AliasParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    run_tool(dispatcher, ToolId::AutoEnhance, multipart, truthy(&params.raw)).await
}

pub async fn remove_bg(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Query(params): Query<AliasParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    run_tool(
        dispatcher,
        ToolId::BackgroundRemoval,
        multipart,
        truthy(&params.raw),
    )
    .await
}

pub async fn face_retouch(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Query(params): Query<AliasParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    run_tool(dispatcher, ToolId::FaceRetouch, multipart, truthy(&params.raw)).await
}

pub async fn erase_object(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Query(params): Query<AliasParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    run_tool(dispatcher, ToolId::ObjectEraser, multipart, truthy(&params.raw)).await
}

pub async fn sky_replace(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Query(params): Query<AliasParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    run_tool(
        dispatcher,
        ToolId::SkyReplacement,
        multipart,
        truthy(&params.raw),
    )
    .await
}

pub async fn super_res(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Query(params): Query<AliasParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    run_tool(
        dispatcher,
        ToolId::SuperResolution,
        multipart,
        truthy(&params.raw),
    )
    .await
}

pub async fn style_transfer(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Query(params): Query<AliasParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    run_tool(
        dispatcher,
        ToolId::StyleTransfer,
        multipart,
        truthy(&params.raw),
    )
    .await
}

async fn run_tool(
    dispatcher: Arc<Dispatcher>,
    tool: ToolId,
    mut multipart: Multipart,
    raw: bool,
) -> AppResult<Response> {
    let input = read_upload(&mut multipart).await?;
    let (output, provenance) = dispatcher.dispatch(tool, &input).await?;

    let mut headers = HeaderMap::new();
    headers.insert("X-Processor", HeaderValue::from_static(provenance.processor));
    if let Ok(value) = HeaderValue::from_str(&provenance.attempts.to_string()) {
        headers.insert("X-Attempts", value);
    }
    if provenance.fallback {
        headers.insert("X-Fallback", HeaderValue::from_static("1"));
    }

    let encoded = encode_image(&output, 85)?;
    if raw {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(encoded.content_type),
        );
        return Ok((headers, encoded.bytes).into_response());
    }

    let body = ImageResponse {
        image_base64: base64::engine::general_purpose::STANDARD.encode(&encoded.bytes),
        tool,
        width: output.width(),
        height: output.height(),
        mode: color_mode(&output),
        processor: provenance.processor,
        attempts: provenance.attempts,
        fallback: provenance.fallback,
    };
    Ok((headers, Json(body)).into_response())
}

async fn read_upload(multipart: &mut Multipart) -> AppResult<DynamicImage> {
    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|value| value.to_string())
            .unwrap_or_default();
        if !content_type.starts_with("image/") {
            return Err(AppError::InvalidImage(format!(
                "unsupported file type '{content_type}'"
            )));
        }
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::BadRequest(format!("failed reading upload: {err}")))?;
        if data.is_empty() {
            return Err(AppError::InvalidImage("empty upload".to_string()));
        }
        return image::load_from_memory(&data).map_err(|_| {
            AppError::InvalidImage(format!(
                "failed to parse image (content_type={content_type}, bytes={})",
                data.len()
            ))
        });
    }
    Err(AppError::BadRequest(
        "multipart field 'file' is required".to_string(),
    ))
}

fn truthy(raw: &Option<String>) -> bool {
    raw.as_deref()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            )
        })
        .unwrap_or(false)
}

/// PIL-style mode label, which is what the mobile clients still expect.
fn color_mode(image: &DynamicImage) -> &'static str {
    match image.color() {
        image::ColorType::L8 | image::ColorType::L16 => "L",
        image::ColorType::La8 | image::ColorType::La16 => "LA",
        image::ColorType::Rgb8 | image::ColorType::Rgb16 | image::ColorType::Rgb32F => "RGB",
        image::ColorType::Rgba8 | image::ColorType::Rgba16 | image::ColorType::Rgba32F => "RGBA",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn raw_flag_accepts_common_truthy_spellings() {
        for value in ["1", "true", "yes", " TRUE "] {
            assert!(truthy(&Some(value.to_string())), "{value}");
        }
        for value in ["0", "false", "no", ""] {
            assert!(!truthy(&Some(value.to_string())), "{value}");
        }
        assert!(!truthy(&None));
    }

    #[test]
    fn color_mode_reports_pil_labels() {
        let rgba =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 4])));
        assert_eq!(color_mode(&rgba), "RGBA");
        let gray = DynamicImage::ImageLuma8(image::GrayImage::new(1, 1));
        assert_eq!(color_mode(&gray), "L");
    }
}
