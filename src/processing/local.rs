use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage};

use super::{BackendRun, ProcessingBackend};
use crate::error::{AppError, AppResult};
use crate::tools::ToolId;

/// In-process placeholder transforms. Deterministic, no network, and the
/// fallback target for every hosted mode. Real model inference would slot in
/// behind the same [`apply`] signature.
pub struct LocalBackend;

#[async_trait]
impl ProcessingBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn supports(&self, _tool: ToolId) -> bool {
        true
    }

    async fn process(&self, tool: ToolId, image: &DynamicImage) -> AppResult<BackendRun> {
        let image = image.clone();
        let processed = tokio::task::spawn_blocking(move || apply(tool, &image))
            .await
            .map_err(|err| AppError::Message(format!("local processing task failed: {err}")))?;
        Ok(BackendRun {
            image: processed,
            attempts: 0,
        })
    }
}

/// Pure transform per tool. Kept free of async so unit tests can call it
/// directly.
pub fn apply(tool: ToolId, image: &DynamicImage) -> DynamicImage {
    match tool {
        ToolId::AutoEnhance => auto_enhance(image),
        ToolId::BackgroundRemoval => remove_background(image),
        ToolId::FaceRetouch => image.blur(1.0),
        ToolId::ObjectEraser => image.clone(),
        ToolId::SkyReplacement => boost_sky(image),
        ToolId::SuperResolution => upscale_2x(image),
        ToolId::StyleTransfer => edge_enhance(image),
    }
}

fn auto_enhance(image: &DynamicImage) -> DynamicImage {
    image.adjust_contrast(20.0).unsharpen(1.0, 3)
}

/// Knocks out near-white pixels. A stand-in for real matting, but enough to
/// exercise the alpha path end to end.
fn remove_background(image: &DynamicImage) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        if r > 240 && g > 240 && b > 240 {
            pixel.0[3] = 0;
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

fn boost_sky(image: &DynamicImage) -> DynamicImage {
    let mut rgb = image.to_rgb8();
    for pixel in rgb.pixels_mut() {
        let boosted = pixel.0[2] as f32 * 1.1;
        pixel.0[2] = boosted.min(255.0) as u8;
    }
    DynamicImage::ImageRgb8(rgb)
}

fn upscale_2x(image: &DynamicImage) -> DynamicImage {
    let (w, h) = (image.width(), image.height());
    image.resize_exact(w * 2, h * 2, FilterType::Lanczos3)
}

fn edge_enhance(image: &DynamicImage) -> DynamicImage {
    image.filter3x3(&[-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, Rgba, RgbaImage, RgbImage};

    #[test]
    fn every_tool_produces_an_image() {
        let input = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([120, 130, 140])));
        for tool in ToolId::ALL {
            let out = apply(tool, &input);
            assert!(out.width() > 0 && out.height() > 0, "{tool:?}");
        }
    }

    #[test]
    fn super_resolution_doubles_dimensions() {
        let input = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 6, Rgb([1, 2, 3])));
        let out = apply(ToolId::SuperResolution, &input);
        assert_eq!(out.dimensions(), (20, 12));
    }

    #[test]
    fn background_removal_clears_near_white_pixels_only() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([250, 250, 250, 255]));
        img.put_pixel(1, 0, Rgba([50, 50, 50, 255]));
        let out = apply(ToolId::BackgroundRemoval, &DynamicImage::ImageRgba8(img));
        let out = out.to_rgba8();
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(1, 0).0[3], 255);
    }

    #[test]
    fn object_eraser_is_identity() {
        let input = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([9, 9, 9])));
        let out = apply(ToolId::ObjectEraser, &input);
        assert_eq!(out.to_rgb8().as_raw(), input.to_rgb8().as_raw());
    }

    #[test]
    fn transforms_are_deterministic() {
        let input = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 6, Rgb([200, 100, 50])));
        let first = apply(ToolId::AutoEnhance, &input).to_rgb8();
        let second = apply(ToolId::AutoEnhance, &input).to_rgb8();
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn sky_boost_saturates_at_white() {
        let input = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([0, 0, 250])));
        let out = apply(ToolId::SkyReplacement, &input).to_rgb8();
        assert_eq!(out.get_pixel(0, 0).0[2], 255);
    }
}
