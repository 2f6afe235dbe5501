use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{Extension, Router};
use image::{DynamicImage, Rgb, RgbImage};
use lenslab::processing::dispatch::ProcessorConfig;
use lenslab::processing::external::ExternalApiConfig;
use lenslab::processing::replicate::ReplicateConfig;
use lenslab::processing::sagemaker::SageMakerConfig;
use lenslab::processing::{Dispatcher, ProcessorMode};
use lenslab::routes::api_routes;
use tower::ServiceExt; // for `oneshot`

const BOUNDARY: &str = "lenslab-test-boundary";

fn local_dispatcher() -> Arc<Dispatcher> {
    Arc::new(
        Dispatcher::new(ProcessorConfig {
            mode: ProcessorMode::Local,
            allow_fallback: true,
            external: ExternalApiConfig {
                base_url: String::new(),
                api_key: None,
                timeout: Duration::from_secs(5),
                max_retries: 1,
                verify_tls: true,
                strict_domain_guard: true,
            },
            replicate: ReplicateConfig {
                api_base: "https://api.replicate.com".to_string(),
                api_token: None,
                model: "tencentarc/gfpgan".to_string(),
                timeout: Duration::from_secs(5),
            },
            sagemaker: SageMakerConfig {
                endpoint_name: None,
                region: None,
                credentials: None,
                endpoint_url: None,
                timeout: Duration::from_secs(5),
            },
        })
        .unwrap(),
    )
}

fn app() -> Router {
    api_routes().layer(Extension(local_dispatcher()))
}

fn png_fixture() -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([200, 150, 100])));
    let mut bytes = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageOutputFormat::Png,
        )
        .unwrap();
    bytes
}

fn multipart_upload(content_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"input.png\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn process_request(uri: &str, content_type: &str, payload: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_upload(content_type, payload)))
        .unwrap()
}

#[tokio::test]
async fn tool_catalog_lists_every_tool() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/tools")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let tools = parsed["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 7);
    assert!(tools.iter().any(|t| t["id"] == "auto_enhance"));
}

#[tokio::test]
async fn debug_settings_reports_dispatch_policy() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/debug/settings")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["processor_mode"], "local");
    assert_eq!(parsed["allow_fallback"], true);
    assert!(parsed["remote_backend"].is_null());
}

#[tokio::test]
async fn processing_returns_provenance_headers_and_payload() {
    let response = app()
        .oneshot(process_request(
            "/api/process?tool_id=super_resolution",
            "image/png",
            &png_fixture(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-processor"], "local");
    assert_eq!(response.headers()["x-attempts"], "0");
    assert!(response.headers().get("x-fallback").is_none());

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["tool"], "super_resolution");
    assert_eq!(parsed["width"], 8);
    assert_eq!(parsed["height"], 8);
    assert_eq!(parsed["processor"], "local");
    assert_eq!(parsed["fallback"], false);
    assert!(!parsed["image_base64"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn raw_flag_streams_image_bytes() {
    let response = app()
        .oneshot(process_request(
            "/api/enhance?raw=1",
            "image/png",
            &png_fixture(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("image/"), "{content_type}");

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert!(image::load_from_memory(&body).is_ok());
}

#[tokio::test]
async fn unknown_tool_is_a_client_error() {
    let response = app()
        .oneshot(process_request(
            "/api/process?tool_id=beautify",
            "image/png",
            &png_fixture(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_image_upload_is_rejected() {
    let response = app()
        .oneshot(process_request(
            "/api/process?tool_id=auto_enhance",
            "text/plain",
            b"hello",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn undecodable_image_is_rejected() {
    let response = app()
        .oneshot(process_request(
            "/api/process?tool_id=auto_enhance",
            "image/png",
            b"these are not pixels",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_file_field_is_rejected() {
    let body = format!("--{BOUNDARY}--\r\n");
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/process?tool_id=auto_enhance")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/transactions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
