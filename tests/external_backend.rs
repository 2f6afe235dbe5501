use std::io::Cursor;
use std::time::Duration;

use base64::Engine as _;
use httpmock::prelude::*;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use lenslab::error::AppError;
use lenslab::processing::external::{ExternalApiConfig, ExternalBackend};
use lenslab::processing::ProcessingBackend;
use lenslab::tools::ToolId;

fn sample_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 6, Rgb([10, 20, 30])))
}

fn jpeg_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Jpeg(90))
        .unwrap();
    bytes
}

fn backend(base_url: &str, max_retries: u32) -> ExternalBackend {
    ExternalBackend::new(ExternalApiConfig {
        base_url: base_url.to_string(),
        api_key: None,
        timeout: Duration::from_secs(5),
        max_retries,
        verify_tls: true,
        strict_domain_guard: true,
    })
    .unwrap()
}

#[tokio::test]
async fn first_attempt_success_counts_one_attempt() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/imaging/face_retouch");
        then.status(200)
            .header("content-type", "image/jpeg")
            .body(jpeg_bytes(&sample_image()));
    });

    let backend = backend(&server.base_url(), 3);
    let run = backend
        .process(ToolId::FaceRetouch, &sample_image())
        .await
        .unwrap();

    mock.assert();
    assert_eq!(run.attempts, 1);
    assert_eq!(run.image.width(), 6);
}

#[tokio::test]
async fn json_payload_responses_decode() {
    let server = MockServer::start_async().await;
    let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg_bytes(&sample_image()));
    server.mock(|when, then| {
        when.method(POST).path("/v1/imaging/auto_enhance");
        then.status(200)
            .header("content-type", "application/json")
            .body(format!(r#"{{"image_base64":"{encoded}"}}"#));
    });

    let backend = backend(&server.base_url(), 1);
    let run = backend
        .process(ToolId::AutoEnhance, &sample_image())
        .await
        .unwrap();
    assert_eq!(run.image.width(), 6);
}

#[tokio::test]
async fn server_errors_exhaust_the_retry_budget() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/imaging/auto_enhance");
        then.status(503).body("overloaded");
    });

    let backend = backend(&server.base_url(), 3);
    let err = backend
        .process(ToolId::AutoEnhance, &sample_image())
        .await
        .unwrap_err();

    assert_eq!(mock.hits(), 3);
    match err {
        AppError::ExternalProcessingFailed {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("503"), "{last_error}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn structural_rejection_aborts_retrying_immediately() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/imaging/auto_enhance");
        then.status(422)
            .header("content-type", "application/json")
            .body(r#"{"detail":[{"loc":["query","request"],"msg":"field required"}]}"#);
    });

    let backend = backend(&server.base_url(), 5);
    let err = backend
        .process(ToolId::AutoEnhance, &sample_image())
        .await
        .unwrap_err();

    // One request, despite a budget of five.
    assert_eq!(mock.hits(), 1);
    match err {
        AppError::ExternalProcessingFailed {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 1);
            assert!(last_error.contains("structurally"), "{last_error}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn ordinary_422s_still_retry() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/imaging/auto_enhance");
        then.status(422)
            .header("content-type", "application/json")
            .body(r#"{"detail":"image too large"}"#);
    });

    let backend = backend(&server.base_url(), 2);
    let err = backend
        .process(ToolId::AutoEnhance, &sample_image())
        .await
        .unwrap_err();

    assert_eq!(mock.hits(), 2);
    assert!(matches!(
        err,
        AppError::ExternalProcessingFailed { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn undecodable_success_bodies_are_retried_then_reported() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/imaging/auto_enhance");
        then.status(200)
            .header("content-type", "image/png")
            .body("not actually a png");
    });

    let backend = backend(&server.base_url(), 2);
    let err = backend
        .process(ToolId::AutoEnhance, &sample_image())
        .await
        .unwrap_err();

    assert_eq!(mock.hits(), 2);
    match err {
        AppError::ExternalProcessingFailed { last_error, .. } => {
            assert!(last_error.contains("undecodable"), "{last_error}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn tool_id_travels_as_query_parameter() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/imaging/sky_replacement")
            .query_param("request", "sky_replacement");
        then.status(200)
            .header("content-type", "image/jpeg")
            .body(jpeg_bytes(&sample_image()));
    });

    let backend = backend(&server.base_url(), 1);
    backend
        .process(ToolId::SkyReplacement, &sample_image())
        .await
        .unwrap();
    mock.assert();
}
